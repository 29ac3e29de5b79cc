// Closed-loop levelling on a tilting platform
//
// Reads pitch/roll from the drivetrain's heading sample, folds them into one
// signed tilt angle, and drives forward/back through a PID loop until level.

use tracing::{debug, info};

use super::drivetrain::ChassisDrive;
use super::geometry::ChassisVelocity;
use super::pid::PidController;
use crate::config::{BalanceConfig, DrivetrainConfig};

/// Inclination of the chassis plane from pitch and roll, in degrees
///
/// Magnitude is the true angle between the chassis plane and horizontal,
/// atan(hypot(tan pitch, tan roll)). The sign follows pitch + roll so the
/// single forward axis pushes against the dominant tilt.
pub fn combined_tilt_deg(pitch_deg: f64, roll_deg: f64) -> f64 {
    let tan_pitch = pitch_deg.to_radians().tan();
    let tan_roll = roll_deg.to_radians().tan();
    let magnitude_deg = tan_pitch.hypot(tan_roll).atan().to_degrees();

    if pitch_deg + roll_deg < 0.0 {
        -magnitude_deg
    } else {
        magnitude_deg
    }
}

pub struct BalanceController {
    config: BalanceConfig,
    drivetrain: DrivetrainConfig,
    pid: PidController,
    active: bool,
    ticks_in_window: u32,
    window_start_pitch_deg: Option<f64>,
    /// |pitch change| across the last completed window
    pitch_change_deg: f64,
}

impl BalanceController {
    /// `dt_s` is the control period the controller is ticked at
    pub fn new(config: BalanceConfig, drivetrain: &DrivetrainConfig, dt_s: f64) -> Self {
        let pid = PidController::new(config.kp, config.ki, config.kd, dt_s, 1.0);
        Self {
            config,
            drivetrain: drivetrain.clone(),
            pid,
            active: false,
            ticks_in_window: 0,
            window_start_pitch_deg: None,
            pitch_change_deg: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        if !self.active {
            info!("Balance controller activated");
        }
        self.active = true;
        self.pid.reset();
        self.ticks_in_window = 0;
        self.window_start_pitch_deg = None;
        self.pitch_change_deg = 0.0;
    }

    /// Release the chassis: zero command, then halt to resting angles
    pub fn deactivate(&mut self, chassis: &mut impl ChassisDrive) {
        if !self.active {
            return;
        }
        self.active = false;
        chassis.drive(ChassisVelocity::zero());
        chassis.stop();
        info!("Balance controller deactivated");
    }

    /// Run one control period; returns the forward speed commanded, if active
    pub fn tick(&mut self, chassis: &mut impl ChassisDrive) -> Option<f64> {
        if !self.active {
            return None;
        }

        let sample = chassis.heading_sample();
        self.track_pitch_change(sample.pitch_deg);

        let tilt_deg = combined_tilt_deg(sample.pitch_deg, sample.roll_deg);
        let settling = self.pitch_change_deg >= self.config.max_tilt_change_deg;

        let vx_mps = if tilt_deg.abs() > self.config.level_tolerance_deg && !settling {
            let percent = self.pid.calculate(tilt_deg, 0.0);
            self.drivetrain.percent_to_mps(percent)
        } else {
            0.0
        };

        debug!(
            "Balance: tilt {:.2} deg, pitch change {:.2} deg, vx {:.3} m/s",
            tilt_deg, self.pitch_change_deg, vx_mps
        );
        chassis.drive(ChassisVelocity::new(vx_mps, 0.0, 0.0));
        Some(vx_mps)
    }

    fn track_pitch_change(&mut self, pitch_deg: f64) {
        match self.window_start_pitch_deg {
            None => {
                self.window_start_pitch_deg = Some(pitch_deg);
                self.ticks_in_window = 0;
            }
            Some(start) => {
                self.ticks_in_window += 1;
                if self.ticks_in_window >= self.config.settle_window_ticks {
                    self.pitch_change_deg = (pitch_deg - start).abs();
                    self.window_start_pitch_deg = Some(pitch_deg);
                    self.ticks_in_window = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::geometry::Pose2D;
    use crate::drive::heading::HeadingSample;

    const EPS: f64 = 1e-9;

    #[derive(Default)]
    struct FakeChassis {
        sample: HeadingSample,
        drives: Vec<ChassisVelocity>,
        stops: usize,
    }

    impl ChassisDrive for FakeChassis {
        fn drive(&mut self, velocity: ChassisVelocity) {
            self.drives.push(velocity);
        }

        fn stop(&mut self) {
            self.stops += 1;
        }

        fn pose(&self) -> Pose2D {
            Pose2D::default()
        }

        fn heading_sample(&self) -> HeadingSample {
            self.sample
        }
    }

    fn controller() -> BalanceController {
        let config = BalanceConfig {
            kp: 0.05,
            ki: 0.0,
            kd: 0.0,
            level_tolerance_deg: 2.0,
            settle_window_ticks: 5,
            max_tilt_change_deg: 3.0,
        };
        BalanceController::new(config, &DrivetrainConfig::default(), 0.02)
    }

    #[test]
    fn test_combined_tilt_pure_axes() {
        assert!((combined_tilt_deg(10.0, 0.0) - 10.0).abs() < EPS);
        assert!((combined_tilt_deg(0.0, -7.0) - -7.0).abs() < EPS);
        assert_eq!(combined_tilt_deg(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_combined_tilt_both_axes() {
        // Plane tilted 10 deg about both axes is steeper than either alone
        let tilt = combined_tilt_deg(10.0, 10.0);
        assert!(tilt > 10.0 && tilt < 20.0);
        let expected = (10f64.to_radians().tan() * 2f64.sqrt()).atan().to_degrees();
        assert!((tilt - expected).abs() < EPS);
    }

    #[test]
    fn test_inactive_does_nothing() {
        let mut balance = controller();
        let mut chassis = FakeChassis::default();
        assert_eq!(balance.tick(&mut chassis), None);
        assert!(chassis.drives.is_empty());
    }

    #[test]
    fn test_drives_against_tilt() {
        let mut balance = controller();
        let mut chassis = FakeChassis {
            sample: HeadingSample::new(0.0, 10.0, 0.0),
            ..Default::default()
        };
        balance.activate();
        let vx = balance.tick(&mut chassis).unwrap();

        // kp 0.05 * -10 deg = -0.5 percent of 3 m/s
        assert!((vx - -1.5).abs() < EPS);
        let last = chassis.drives.last().unwrap();
        assert_eq!(last.vy_mps, 0.0);
        assert_eq!(last.omega_radps, 0.0);
    }

    #[test]
    fn test_output_limited_to_max_speed() {
        let mut balance = controller();
        let mut chassis = FakeChassis {
            sample: HeadingSample::new(0.0, -45.0, 0.0),
            ..Default::default()
        };
        balance.activate();
        let vx = balance.tick(&mut chassis).unwrap();
        assert!((vx - 3.0).abs() < EPS);
    }

    #[test]
    fn test_level_within_tolerance() {
        let mut balance = controller();
        let mut chassis = FakeChassis {
            sample: HeadingSample::new(0.0, 1.5, 0.5),
            ..Default::default()
        };
        balance.activate();
        assert_eq!(balance.tick(&mut chassis), Some(0.0));
        assert!(chassis.drives.last().unwrap().is_zero());
    }

    #[test]
    fn test_holds_while_platform_tipping() {
        let mut balance = controller();
        let mut chassis = FakeChassis::default();
        balance.activate();

        // Pitch swings 1 deg per tick: after a 5 tick window it moved 5 deg
        for i in 0..=5 {
            chassis.sample = HeadingSample::new(0.0, 5.0 + i as f64, 0.0);
            balance.tick(&mut chassis);
        }
        assert_eq!(balance.tick(&mut chassis), Some(0.0));

        // Steady again for a full window: correction resumes
        for _ in 0..5 {
            balance.tick(&mut chassis);
        }
        let vx = balance.tick(&mut chassis).unwrap();
        assert!(vx < 0.0);
    }

    #[test]
    fn test_deactivate_zeroes_then_stops() {
        let mut balance = controller();
        let mut chassis = FakeChassis::default();
        balance.activate();
        balance.deactivate(&mut chassis);

        assert!(!balance.is_active());
        assert!(chassis.drives.last().unwrap().is_zero());
        assert_eq!(chassis.stops, 1);

        // Second deactivate is a no-op
        balance.deactivate(&mut chassis);
        assert_eq!(chassis.stops, 1);
    }
}
