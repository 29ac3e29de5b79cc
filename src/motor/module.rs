// Feetech swerve module: a velocity-mode drive servo plus a position-mode
// steer servo sharing one serial bus with the other three modules.

use std::f64::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode, STEPS_PER_REVOLUTION};
use crate::config::FeetechModuleConfig;
use crate::drive::geometry::{wrap_deg_180, wrap_deg_360};
use crate::drive::module::{ModuleError, ModuleMeasuredState, ModulePosition, WheelModule};

/// Bus handle shared by every module on the chassis
pub type SharedBus = Arc<Mutex<FeetechBus>>;

/// Maximum raw velocity command (safety limit)
const MAX_RAW: i16 = 3000;

const STEPS_PER_DEG: f64 = STEPS_PER_REVOLUTION as f64 / 360.0;

/// Convert azimuth (deg) to a goal position in steps
fn angle_to_steps(angle_deg: f64) -> u16 {
    let steps = (wrap_deg_360(angle_deg) * STEPS_PER_DEG).round() as u32;
    (steps % STEPS_PER_REVOLUTION as u32) as u16
}

fn steps_to_angle(steps: u16) -> f64 {
    steps as f64 / STEPS_PER_DEG
}

/// Signed step change between two single-turn readings, assuming less than
/// half a revolution per read
fn unwrap_delta(previous: u16, current: u16) -> i32 {
    let rev = STEPS_PER_REVOLUTION as i32;
    let half = rev / 2;
    (current as i32 - previous as i32 + half).rem_euclid(rev) - half
}

pub struct FeetechSwerveModule {
    bus: SharedBus,
    position: ModulePosition,
    drive_id: u8,
    steer_id: u8,
    steer_offset_deg: f64,
    /// Wheel travel per drive servo step
    meters_per_step: f64,

    last_drive_steps: Option<u16>,
    distance_m: f64,
    /// Fallback azimuth: last absolute reading, advanced by commands
    relative_angle_deg: f64,
    degraded: bool,
}

impl FeetechSwerveModule {
    pub fn new(
        bus: SharedBus,
        position: ModulePosition,
        config: &FeetechModuleConfig,
        steer_offset_deg: f64,
    ) -> Self {
        let (drive_id, steer_id) = config.motor_ids[position.index()];
        let wheel_circumference_m = 2.0 * PI * config.wheel_radius_m;

        Self {
            bus,
            position,
            drive_id,
            steer_id,
            steer_offset_deg,
            meters_per_step: wheel_circumference_m
                / (STEPS_PER_REVOLUTION as f64 * config.drive_gear_ratio),
            last_drive_steps: None,
            distance_m: 0.0,
            relative_angle_deg: 0.0,
            degraded: false,
        }
    }

    /// Build all four modules on one bus
    pub fn chassis(
        bus: SharedBus,
        config: &FeetechModuleConfig,
        steer_offsets_deg: [f64; 4],
    ) -> [FeetechSwerveModule; 4] {
        std::array::from_fn(|i| {
            Self::new(
                Arc::clone(&bus),
                ModulePosition::ALL[i],
                config,
                steer_offsets_deg[i],
            )
        })
    }

    /// Put both servos in their operating modes
    ///
    /// Must be called before the module is handed to the drivetrain.
    pub fn initialize(&mut self) -> Result<(), FeetechError> {
        info!(
            "Initializing {} module (drive {}, steer {})",
            self.position.name(),
            self.drive_id,
            self.steer_id
        );
        let mut bus = self.bus.lock();

        for id in [self.drive_id, self.steer_id] {
            if !bus.ping(id)? {
                warn!("Servo {} not responding to ping", id);
                return Err(FeetechError::Timeout { id });
            }
            bus.disable_torque(id)?;
        }

        bus.set_operating_mode(self.drive_id, OperatingMode::Velocity)?;
        bus.set_operating_mode(self.steer_id, OperatingMode::Position)?;

        for id in [self.drive_id, self.steer_id] {
            bus.enable_torque(id)?;
        }
        Ok(())
    }

    /// Wheel surface speed (m/s) to raw drive servo steps/s
    fn mps_to_raw(&self, speed_mps: f64) -> i16 {
        let raw = (speed_mps / self.meters_per_step).round();
        raw.clamp(-(MAX_RAW as f64), MAX_RAW as f64) as i16
    }

    fn raw_to_mps(&self, raw: i16) -> f64 {
        raw as f64 * self.meters_per_step
    }

    fn read_absolute_angle(&mut self) -> Result<f64, FeetechError> {
        let steps = self.bus.lock().get_position(self.steer_id)?;
        Ok(wrap_deg_180(steps_to_angle(steps) - self.steer_offset_deg))
    }
}

impl WheelModule for FeetechSwerveModule {
    fn set_target(&mut self, speed_mps: f64, angle_deg: f64) -> Result<(), ModuleError> {
        let goal_steps = angle_to_steps(angle_deg + self.steer_offset_deg);
        let raw_speed = self.mps_to_raw(speed_mps);

        let mut bus = self.bus.lock();
        bus.set_position(self.steer_id, goal_steps)?;
        bus.set_velocity(self.drive_id, raw_speed)?;

        self.relative_angle_deg = wrap_deg_180(angle_deg);
        Ok(())
    }

    fn measured(&mut self) -> Result<ModuleMeasuredState, ModuleError> {
        let angle_deg = match self.read_absolute_angle() {
            Ok(angle_deg) => {
                self.relative_angle_deg = angle_deg;
                self.degraded = false;
                angle_deg
            }
            Err(e) => {
                debug!(
                    "{} steer read failed, using relative angle: {}",
                    self.position.name(),
                    e
                );
                self.degraded = true;
                self.relative_angle_deg
            }
        };

        let (drive_steps, raw_speed) = {
            let mut bus = self.bus.lock();
            (bus.get_position(self.drive_id)?, bus.get_velocity(self.drive_id)?)
        };

        if let Some(previous) = self.last_drive_steps {
            self.distance_m += unwrap_delta(previous, drive_steps) as f64 * self.meters_per_step;
        }
        self.last_drive_steps = Some(drive_steps);

        Ok(ModuleMeasuredState {
            speed_mps: self.raw_to_mps(raw_speed),
            angle_deg,
            distance_m: self.distance_m,
        })
    }

    fn calibrate_absolute_angle(&mut self) -> Result<(), ModuleError> {
        match self.read_absolute_angle() {
            Ok(angle_deg) => {
                debug!(
                    "{} steer synced at {:.1} deg",
                    self.position.name(),
                    angle_deg
                );
                self.relative_angle_deg = angle_deg;
                self.degraded = false;
                Ok(())
            }
            Err(e) => {
                debug!("{} absolute read failed: {}", self.position.name(), e);
                self.degraded = true;
                Err(ModuleError::AbsoluteSensorUnavailable)
            }
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl Drop for FeetechSwerveModule {
    fn drop(&mut self) {
        // Try to stop the wheel when the module is dropped (safety measure)
        if let Err(e) = self.bus.lock().set_velocity(self.drive_id, 0) {
            warn!("Failed to stop {} drive on drop: {}", self.position.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_steps_round_trip() {
        assert_eq!(angle_to_steps(0.0), 0);
        assert_eq!(angle_to_steps(90.0), 1024);
        assert_eq!(angle_to_steps(-90.0), 3072);
        assert_eq!(angle_to_steps(359.99), 0);
        assert!((steps_to_angle(2048) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_unwrap_delta_across_rollover() {
        assert_eq!(unwrap_delta(4000, 100), 196);
        assert_eq!(unwrap_delta(100, 4000), -196);
        assert_eq!(unwrap_delta(1000, 1500), 500);
        assert_eq!(unwrap_delta(0, 0), 0);
    }
}
