use std::fmt;

use log::warn;

use crate::bus::DeviceBus;
use crate::commands::{Command, Device, SERVO_CHANNEL};
use crate::executor::{CommandExecutor, TransportError};

/// A distance sensor reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reading {
    /// Centimeters as reported. Zero or negative means no echo.
    Cm(i32),
    /// The reply was not a decimal integer.
    Invalid,
}

impl Reading {
    pub fn parse(response: &str) -> Self {
        response
            .trim()
            .parse::<i32>()
            .map(Reading::Cm)
            .unwrap_or(Reading::Invalid)
    }

    /// True only for a valid echo strictly inside `threshold`.
    pub fn within(self, threshold: i32) -> bool {
        matches!(self, Reading::Cm(cm) if cm > 0 && cm < threshold)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Cm(cm) => write!(f, "{cm} cm"),
            Reading::Invalid => write!(f, "invalid reading"),
        }
    }
}

/// Servo, fan and distance sensor operations over the shared bus.
pub struct Devices<E> {
    bus: DeviceBus<E>,
}

impl<E: CommandExecutor> Devices<E> {
    pub fn new(bus: DeviceBus<E>) -> Self {
        Devices { bus }
    }

    /// Forwards `angle` as-is; the servo board clamps out-of-range values.
    pub async fn set_servo_angle(&mut self, servo: Device, angle: i32) -> Result<(), TransportError> {
        self.bus
            .send(
                servo.address(),
                &Command::ServoAngle {
                    channel: SERVO_CHANNEL,
                    angle,
                },
            )
            .await?;
        Ok(())
    }

    /// Aims the fan first (when `angle` is given) so it never spins up
    /// pointing somewhere stale.
    pub async fn set_fan(&mut self, speed: u8, angle: Option<i32>) -> Result<(), TransportError> {
        if let Some(angle) = angle {
            self.set_servo_angle(Device::FanServo, angle).await?;
        }
        self.bus
            .send(Device::Fan.address(), &Command::FanSpeed(speed))
            .await?;
        Ok(())
    }

    pub async fn read_distance(&mut self) -> Result<Reading, TransportError> {
        let response = self
            .bus
            .send(Device::DistanceSensor.address(), &Command::Distance)
            .await?;
        let reading = Reading::parse(&response);
        if reading == Reading::Invalid {
            warn!("Unparseable distance response {:?}", response);
        }
        Ok(reading)
    }

    #[cfg(test)]
    pub fn bus(&self) -> &DeviceBus<E> {
        &self.bus
    }
}
