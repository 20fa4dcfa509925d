use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use log::{debug, error, info};

use crate::commands::Device;
use crate::devices::{Devices, Reading};
use crate::executor::CommandExecutor;

pub const MIN_ANGLE: i32 = 20;
pub const MAX_ANGLE: i32 = 160;
pub const STEP_DEGREES: i32 = 5;
/// Centimeters. Readings strictly below this (and above zero) are a hit.
pub const PROXIMITY_THRESHOLD: i32 = 15;
pub const FAN_ON_SPEED: u8 = 60;
pub const FAN_OFF_SPEED: u8 = 0;

const SWEEP_POLL: Duration = Duration::from_millis(100);
const TRACK_POLL: Duration = Duration::from_millis(90);

/// Triangular sweep of the sensor servo.
///
/// Reversal is decided after stepping, so the angle overshoots each bound by
/// one step before turning around.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sweep {
    pub angle: i32,
    pub direction: i32,
}

impl Default for Sweep {
    fn default() -> Self {
        Sweep {
            angle: MIN_ANGLE,
            direction: 1,
        }
    }
}

impl Sweep {
    pub fn advance(&mut self) {
        self.angle += self.direction * STEP_DEGREES;
        if self.angle > MAX_ANGLE {
            self.direction = -1;
        }
        if self.angle < MIN_ANGLE {
            self.direction = 1;
        }
    }
}

pub struct ScanController<E> {
    devices: Devices<E>,
    sweep: Sweep,
}

impl<E: CommandExecutor> ScanController<E> {
    pub fn new(devices: Devices<E>) -> Self {
        ScanController {
            devices,
            sweep: Sweep::default(),
        }
    }

    #[cfg(test)]
    pub fn sweep(&self) -> Sweep {
        self.sweep
    }

    /// Parks both servos at the start of the arc with the fan off.
    pub async fn setup(&mut self) -> anyhow::Result<()> {
        self.sweep = Sweep::default();
        self.devices
            .set_servo_angle(Device::SensorServo, self.sweep.angle)
            .await
            .context("positioning sensor servo")?;
        self.devices
            .set_fan(FAN_OFF_SPEED, Some(self.sweep.angle))
            .await
            .context("parking fan")?;
        Ok(())
    }

    /// Runs the scan loop until it fails or `shutdown` resolves, then turns
    /// the fan off.
    pub async fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            res = self.run() => res,
            () = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        if let Err(err) = self.devices.set_fan(FAN_OFF_SPEED, None).await {
            if outcome.is_ok() {
                return Err(err).context("turning fan off");
            }
            error!("Could not turn fan off: {}", err);
        } else {
            info!("Fan off");
        }
        outcome
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.cycle().await {
                error!("Scan loop stopped: {:#}", err);
                return Err(err);
            }
        }
    }

    /// One sweep step, including a full tracking episode if it detects
    /// something.
    pub async fn cycle(&mut self) -> anyhow::Result<()> {
        tokio::time::sleep(SWEEP_POLL).await;

        let reading = self
            .devices
            .read_distance()
            .await
            .context("reading distance")?;
        let angle = self.sweep.angle;
        self.devices
            .set_servo_angle(Device::SensorServo, angle)
            .await
            .context("moving sensor servo")?;
        self.sweep.advance();
        debug!("Swept to {} ({}), next {:?}", angle, reading, self.sweep);

        if reading.within(PROXIMITY_THRESHOLD) {
            self.track(angle, reading).await?;
        }
        Ok(())
    }

    /// Holds the fan on `angle` until a reading falls outside the threshold.
    /// An invalid reading ends the episode like a departure does.
    async fn track(&mut self, angle: i32, first: Reading) -> anyhow::Result<()> {
        info!("Object at {}, fan on at {} degrees", first, angle);
        self.devices
            .set_fan(FAN_ON_SPEED, Some(angle))
            .await
            .context("turning fan on")?;

        let last = loop {
            let reading = self
                .devices
                .read_distance()
                .await
                .context("reading distance while tracking")?;
            tokio::time::sleep(TRACK_POLL).await;
            if !reading.within(PROXIMITY_THRESHOLD) {
                break reading;
            }
        };

        info!("Object gone ({}), fan off", last);
        self.devices
            .set_fan(FAN_OFF_SPEED, None)
            .await
            .context("turning fan off")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn with_sweep(devices: Devices<E>, sweep: Sweep) -> Self {
        ScanController { devices, sweep }
    }

    #[cfg(test)]
    pub fn executor(&self) -> &E {
        self.devices.bus().executor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DeviceBus;
    use crate::executor::mock::RecordingExecutor;

    fn controller(executor: RecordingExecutor) -> ScanController<RecordingExecutor> {
        ScanController::new(Devices::new(DeviceBus::new(executor)))
    }

    fn servo_angles(commands: &[&str]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| c.strip_prefix("servost(1,"))
            .map(|c| c.trim_end_matches(')').to_string())
            .collect()
    }

    #[test]
    fn test_sweep_reverses_after_overshoot() {
        let mut sweep = Sweep::default();
        for _ in 0..28 {
            sweep.advance();
        }
        assert_eq!(sweep, Sweep { angle: 160, direction: 1 });

        sweep.advance();
        assert_eq!(sweep, Sweep { angle: 165, direction: -1 });

        while sweep.angle >= MIN_ANGLE {
            sweep.advance();
        }
        assert_eq!(sweep, Sweep { angle: 15, direction: 1 });
    }

    #[test]
    fn test_sweep_stays_within_one_step_of_bounds() {
        let mut sweep = Sweep::default();
        let mut flips = 0;
        for _ in 0..1000 {
            let before = sweep.direction;
            sweep.advance();
            assert!(sweep.angle >= MIN_ANGLE - STEP_DEGREES);
            assert!(sweep.angle <= MAX_ANGLE + STEP_DEGREES);
            if sweep.direction != before {
                flips += 1;
                assert!(sweep.angle > MAX_ANGLE || sweep.angle < MIN_ANGLE);
            }
        }
        assert!(flips > 0);
    }

    #[test]
    fn test_sweep_period() {
        let start = Sweep::default();
        let mut sweep = start;
        let mut steps = 0;
        loop {
            sweep.advance();
            steps += 1;
            if sweep == start {
                break;
            }
        }
        // 20 -> 165 -> 15 -> 20
        assert_eq!(steps, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_parks_servos() {
        let mut controller = controller(RecordingExecutor::new());
        controller.setup().await.unwrap();
        assert_eq!(
            controller.executor().commands,
            vec![
                "sel(1)",
                "servost(1,20)",
                "sel(3)",
                "servost(1,20)",
                "sel(4)",
                "fan(0)",
            ]
        );
        assert_eq!(controller.sweep(), Sweep::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_track_and_resume() {
        let executor = RecordingExecutor::with_distances([50, 50, 12, 8, 20]);
        let mut controller = ScanController::with_sweep(
            Devices::new(DeviceBus::new(executor)),
            Sweep { angle: 35, direction: 1 },
        );
        for _ in 0..4 {
            controller.cycle().await.unwrap();
        }

        assert_eq!(
            controller.executor().commands,
            vec![
                "sel(2)",
                "distance()",
                "sel(1)",
                "servost(1,35)",
                "sel(2)",
                "distance()",
                "sel(1)",
                "servost(1,40)",
                "sel(2)",
                "distance()",
                "sel(1)",
                "servost(1,45)",
                // tracking episode
                "sel(3)",
                "servost(1,45)",
                "sel(4)",
                "fan(60)",
                "sel(2)",
                "distance()",
                "distance()",
                "sel(4)",
                "fan(0)",
                // sweep resumes where it left off
                "sel(2)",
                "distance()",
                "sel(1)",
                "servost(1,50)",
            ]
        );
        assert_eq!(controller.sweep(), Sweep { angle: 55, direction: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_holds_aim() {
        let executor = RecordingExecutor::with_distances([5, 3, 7, 14, 1, 15]);
        let mut controller = ScanController::with_sweep(
            Devices::new(DeviceBus::new(executor)),
            Sweep { angle: 90, direction: -1 },
        );
        controller.cycle().await.unwrap();

        let commands = controller.executor().without_selects();
        let fan_on = commands.iter().position(|c| *c == "fan(60)").unwrap();
        let fan_off = commands.iter().position(|c| *c == "fan(0)").unwrap();
        assert!(fan_on < fan_off);
        // One sweep move and one fan aim, both at 90.
        assert_eq!(servo_angles(&commands), vec!["90", "90"]);
        assert!(
            commands[fan_on..fan_off]
                .iter()
                .all(|c| *c == "fan(60)" || *c == "distance()")
        );
        assert_eq!(commands.iter().filter(|c| **c == "distance()").count(), 6);
        assert_eq!(commands.last(), Some(&"fan(0)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_detections_keep_fan_off() {
        let executor = RecordingExecutor::with_distances(["0", "-1", "15", "nope", "400"]);
        let mut controller = controller(executor);
        for _ in 0..5 {
            controller.cycle().await.unwrap();
        }
        let commands = controller.executor().without_selects();
        assert!(!commands.iter().any(|c| c.starts_with("fan(")));
        assert_eq!(servo_angles(&commands), vec!["20", "25", "30", "35", "40"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_reading_ends_tracking() {
        let executor = RecordingExecutor::with_distances(["10", "9", "???"]);
        let mut controller = controller(executor);
        controller.cycle().await.unwrap();
        let commands = controller.executor().without_selects();
        assert_eq!(commands.iter().filter(|c| **c == "fan(0)").count(), 1);
        assert_eq!(commands.last(), Some(&"fan(0)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_or_negative_reading_ends_tracking() {
        for no_echo in ["0", "-1"] {
            let executor = RecordingExecutor::with_distances(["10", "9", no_echo, "12"]);
            let mut controller = controller(executor);
            controller.cycle().await.unwrap();

            let commands = controller.executor().without_selects();
            let fan_off = commands.iter().position(|c| *c == "fan(0)").unwrap();
            assert_eq!(commands.iter().filter(|c| **c == "fan(0)").count(), 1);
            // sweep read, two tracking reads, then straight to fan off
            assert_eq!(commands.iter().filter(|c| **c == "distance()").count(), 3);
            assert_eq!(commands[fan_off - 1], "distance()");
            assert_eq!(commands.last(), Some(&"fan(0)"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_reads_then_waits() {
        let executor = RecordingExecutor::with_distances([5, 3, 20]);
        let mut controller = controller(executor);
        let start = tokio::time::Instant::now();
        controller.cycle().await.unwrap();

        assert_eq!(start.elapsed(), SWEEP_POLL + TRACK_POLL * 2);

        let reads = controller.executor().times_of("distance()");
        let offsets: Vec<Duration> = reads.iter().map(|at| *at - start).collect();
        // First tracking read happens before any tracking wait.
        assert_eq!(offsets, vec![SWEEP_POLL, SWEEP_POLL, SWEEP_POLL + TRACK_POLL]);

        let fan_off = controller.executor().times_of("fan(0)");
        assert_eq!(fan_off, vec![start + SWEEP_POLL + TRACK_POLL * 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_turns_fan_off() {
        let mut controller = controller(RecordingExecutor::new());
        controller
            .run_until(tokio::time::sleep(Duration::from_millis(250)))
            .await
            .unwrap();

        let commands = &controller.executor().commands;
        assert_eq!(servo_angles(&controller.executor().without_selects()), vec!["20", "25"]);
        assert_eq!(commands[commands.len() - 2..], ["sel(4)", "fan(0)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_stops_loop_and_turns_fan_off() {
        let executor = RecordingExecutor::new().fail_on("distance()");
        let mut controller = controller(executor);
        let result = controller.run_until(std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(controller.executor().commands, vec!["sel(2)", "sel(4)", "fan(0)"]);
    }
}
