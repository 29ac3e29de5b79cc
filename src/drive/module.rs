// Wheel module capability interface
//
// The drive core only ever sees a module through `WheelModule`: write a target,
// read the measured state, re-sync the steering sensor. Vendor variants (the
// Feetech servo module, the simulated module below) live behind it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::geometry::wrap_deg_180;
use super::kinematics::angle_delta_deg;
use crate::motor::FeetechError;

/// Module identity, fixed for the life of the drivetrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulePosition {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl ModulePosition {
    pub const ALL: [ModulePosition; 4] = [
        ModulePosition::FrontLeft,
        ModulePosition::FrontRight,
        ModulePosition::BackLeft,
        ModulePosition::BackRight,
    ];

    /// Slot in every [fl, fr, bl, br] array
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModulePosition::FrontLeft => "front_left",
            ModulePosition::FrontRight => "front_right",
            ModulePosition::BackLeft => "back_left",
            ModulePosition::BackRight => "back_right",
        }
    }
}

/// Desired speed and azimuth for one module
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleTargetState {
    pub speed_mps: f64,
    /// Azimuth in (-180, 180]
    pub angle_deg: f64,
}

impl ModuleTargetState {
    pub fn new(speed_mps: f64, angle_deg: f64) -> Self {
        Self {
            speed_mps,
            angle_deg: wrap_deg_180(angle_deg),
        }
    }

    /// Pick the equivalent target that needs the least steering from `current_deg`
    ///
    /// If the direct rotation exceeds 90 degrees, steer to the opposite azimuth
    /// and reverse the wheel instead, so no module ever turns more than 90.
    pub fn optimize(self, current_deg: f64) -> Self {
        let delta = angle_delta_deg(current_deg, self.angle_deg);
        if delta.abs() > 90.0 {
            Self::new(-self.speed_mps, self.angle_deg + 180.0)
        } else {
            self
        }
    }
}

/// What a module reports back each tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMeasuredState {
    pub speed_mps: f64,
    pub angle_deg: f64,
    /// Signed wheel travel since power-up or the last calibration
    pub distance_m: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Servo bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Absolute steering sensor unavailable")]
    AbsoluteSensorUnavailable,

    #[error("Module rejected command")]
    CommandRejected,
}

/// Capability set the drivetrain needs from a wheel module
pub trait WheelModule: Send {
    /// Command drive speed and azimuth; the target is already path-optimized
    fn set_target(&mut self, speed_mps: f64, angle_deg: f64) -> Result<(), ModuleError>;

    /// Read speed, azimuth and cumulative distance
    ///
    /// A module whose absolute steering sensor fails should still return a
    /// relative-sensor angle and report `is_degraded()`, not an error.
    fn measured(&mut self) -> Result<ModuleMeasuredState, ModuleError>;

    /// Re-synchronize the relative steering estimate against the absolute sensor
    fn calibrate_absolute_angle(&mut self) -> Result<(), ModuleError>;

    /// True while the module is running on its relative steering sensor
    fn is_degraded(&self) -> bool;
}

/// Shared state behind a simulated module
#[derive(Debug, Clone, Default)]
struct SimModuleState {
    target: ModuleTargetState,
    distance_m: f64,
    absolute_available: bool,
    relative_drift_deg: f64,
    degraded: bool,
    fail_writes: bool,
    commands: u64,
}

/// Simulated wheel module: steering is instantaneous, distance advances with `step`
pub struct SimModule {
    state: Arc<Mutex<SimModuleState>>,
}

/// Test/simulation handle onto a `SimModule` owned by the drivetrain
#[derive(Clone)]
pub struct SimModuleHandle {
    state: Arc<Mutex<SimModuleState>>,
}

impl SimModule {
    pub fn new() -> (Self, SimModuleHandle) {
        let state = Arc::new(Mutex::new(SimModuleState {
            absolute_available: true,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimModuleHandle { state },
        )
    }
}

impl WheelModule for SimModule {
    fn set_target(&mut self, speed_mps: f64, angle_deg: f64) -> Result<(), ModuleError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(ModuleError::CommandRejected);
        }
        state.target = ModuleTargetState::new(speed_mps, angle_deg);
        state.commands += 1;
        Ok(())
    }

    fn measured(&mut self) -> Result<ModuleMeasuredState, ModuleError> {
        let mut state = self.state.lock();
        state.degraded = !state.absolute_available;
        let angle_deg = if state.absolute_available {
            state.target.angle_deg
        } else {
            wrap_deg_180(state.target.angle_deg + state.relative_drift_deg)
        };
        Ok(ModuleMeasuredState {
            speed_mps: state.target.speed_mps,
            angle_deg,
            distance_m: state.distance_m,
        })
    }

    fn calibrate_absolute_angle(&mut self) -> Result<(), ModuleError> {
        let mut state = self.state.lock();
        if !state.absolute_available {
            state.degraded = true;
            return Err(ModuleError::AbsoluteSensorUnavailable);
        }
        state.relative_drift_deg = 0.0;
        state.degraded = false;
        Ok(())
    }

    fn is_degraded(&self) -> bool {
        self.state.lock().degraded
    }
}

/// Four simulated modules [fl, fr, bl, br] plus their handles
pub fn sim_modules() -> ([Box<dyn WheelModule>; 4], Vec<SimModuleHandle>) {
    let mut handles = Vec::with_capacity(4);
    let modules = std::array::from_fn(|_| {
        let (module, handle) = SimModule::new();
        handles.push(handle);
        Box::new(module) as Box<dyn WheelModule>
    });
    (modules, handles)
}

impl SimModuleHandle {
    /// Advance the wheel by the commanded speed over `dt_s`
    pub fn step(&self, dt_s: f64) {
        let mut state = self.state.lock();
        state.distance_m += state.target.speed_mps * dt_s;
    }

    /// Move the wheel by a fixed distance, regardless of command
    pub fn add_distance(&self, distance_m: f64) {
        self.state.lock().distance_m += distance_m;
    }

    /// Force the measured azimuth, as if the module had been pushed by hand
    pub fn set_angle(&self, angle_deg: f64) {
        self.state.lock().target.angle_deg = wrap_deg_180(angle_deg);
    }

    pub fn set_absolute_available(&self, available: bool) {
        self.state.lock().absolute_available = available;
    }

    pub fn set_relative_drift(&self, drift_deg: f64) {
        self.state.lock().relative_drift_deg = drift_deg;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Last target written by the drivetrain
    pub fn target(&self) -> ModuleTargetState {
        self.state.lock().target
    }

    pub fn command_count(&self) -> u64 {
        self.state.lock().commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_optimize_keeps_small_rotation() {
        let target = ModuleTargetState::new(1.0, 30.0).optimize(0.0);
        assert_eq!(target.speed_mps, 1.0);
        assert!((target.angle_deg - 30.0).abs() < EPS);
    }

    #[test]
    fn test_optimize_flips_large_rotation() {
        let target = ModuleTargetState::new(1.0, 170.0).optimize(0.0);
        assert_eq!(target.speed_mps, -1.0);
        assert!((target.angle_deg - -10.0).abs() < EPS);
    }

    #[test]
    fn test_optimize_across_wrap() {
        // 179 -> -179 is a 2 degree turn, no flip needed
        let target = ModuleTargetState::new(0.5, -179.0).optimize(179.0);
        assert_eq!(target.speed_mps, 0.5);
        assert!((target.angle_deg - -179.0).abs() < EPS);
    }

    #[test]
    fn test_optimize_never_rotates_more_than_90() {
        let mut current = -180.0;
        while current <= 180.0 {
            let mut desired = -180.0;
            while desired <= 180.0 {
                let target = ModuleTargetState::new(1.0, desired).optimize(current);
                let rotation = angle_delta_deg(current, target.angle_deg).abs();
                assert!(
                    rotation <= 90.0 + EPS,
                    "current {current}, desired {desired}, rotation {rotation}"
                );
                desired += 7.5;
            }
            current += 5.0;
        }
    }

    #[test]
    fn test_sim_module_falls_back_to_relative_sensor() {
        let (mut module, handle) = SimModule::new();
        module.set_target(0.0, 20.0).unwrap();
        handle.set_relative_drift(5.0);
        handle.set_absolute_available(false);

        let measured = module.measured().unwrap();
        assert!((measured.angle_deg - 25.0).abs() < EPS);
        assert!(module.is_degraded());
        assert!(module.calibrate_absolute_angle().is_err());

        handle.set_absolute_available(true);
        module.calibrate_absolute_angle().unwrap();
        let measured = module.measured().unwrap();
        assert!((measured.angle_deg - 20.0).abs() < EPS);
        assert!(!module.is_degraded());
    }

    #[test]
    fn test_sim_module_distance_follows_speed() {
        let (mut module, handle) = SimModule::new();
        module.set_target(2.0, 0.0).unwrap();
        handle.step(0.5);
        assert!((module.measured().unwrap().distance_m - 1.0).abs() < EPS);
    }
}
