use std::fmt;

/// Peripherals on the shared command channel, by address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    SensorServo,
    DistanceSensor,
    FanServo,
    Fan,
}

impl Device {
    pub fn address(self) -> u8 {
        match self {
            Device::SensorServo => 1,
            Device::DistanceSensor => 2,
            Device::FanServo => 3,
            Device::Fan => 4,
        }
    }
}

/// Every servo board drives its servo on channel 1.
pub const SERVO_CHANNEL: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Select(u8),
    ServoAngle { channel: u8, angle: i32 },
    FanSpeed(u8),
    Distance,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Select(address) => write!(f, "sel({address})"),
            Command::ServoAngle { channel, angle } => write!(f, "servost({channel},{angle})"),
            Command::FanSpeed(speed) => write!(f, "fan({speed})"),
            Command::Distance => write!(f, "distance()"),
        }
    }
}
