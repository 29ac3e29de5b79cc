// Drivetrain coordinator: owns the four modules, the heading sensor and the
// odometry, and runs one control period per `tick()`.
//
// Tick order: read heading + modules -> solve + normalize -> write modules ->
// integrate odometry from the readings taken at the start of the tick.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::geometry::{ChassisVelocity, Pose2D, wrap_deg_360};
use super::heading::{HeadingSample, HeadingSensor};
use super::kinematics::{SwerveKinematics, normalize};
use super::module::{ModuleMeasuredState, ModulePosition, ModuleTargetState, WheelModule};
use super::odometry::SwerveOdometry;
use crate::config::{ConfigError, DrivetrainConfig};

/// Coordinator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    /// Re-syncing steering sensors after power-up
    Calibrating,
    /// No nonzero command since the last stop
    Idle,
    /// Nonzero chassis velocity active
    Driving,
}

/// Non-fatal fault flags reported upward
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveStatus {
    pub state: DriveState,
    pub heading_degraded: bool,
    /// [fl, fr, bl, br]
    pub modules_degraded: [bool; 4],
}

impl DriveStatus {
    pub fn is_degraded(&self) -> bool {
        self.heading_degraded || self.modules_degraded.iter().any(|&d| d)
    }
}

/// What external layers (balance controller, autonomous) may do to the chassis
pub trait ChassisDrive {
    fn drive(&mut self, velocity: ChassisVelocity);
    fn stop(&mut self);
    fn pose(&self) -> Pose2D;
    /// Sensor sample used by the most recent tick
    fn heading_sample(&self) -> HeadingSample;
}

pub struct Drivetrain {
    config: DrivetrainConfig,
    kinematics: SwerveKinematics,
    modules: [Box<dyn WheelModule>; 4],
    heading_sensor: Box<dyn HeadingSensor>,
    odometry: SwerveOdometry,

    state: DriveState,
    command: ChassisVelocity,
    targets: [ModuleTargetState; 4],
    measured: [ModuleMeasuredState; 4],

    /// Last good raw sensor sample
    raw_heading: HeadingSample,
    /// Added to raw yaw so that zeroing doesn't need to touch the sensor
    yaw_offset_deg: f64,

    heading_degraded: bool,
    read_failed: [bool; 4],
    write_failed: [bool; 4],
    modules_degraded: [bool; 4],

    calibrated: [bool; 4],
    calibration_ticks_left: u32,
}

impl Drivetrain {
    /// Take ownership of the modules [fl, fr, bl, br] and the heading sensor
    ///
    /// Invalid geometry is fatal here; sensor faults at startup are not.
    pub fn new(
        config: DrivetrainConfig,
        modules: [Box<dyn WheelModule>; 4],
        heading_sensor: Box<dyn HeadingSensor>,
    ) -> Result<Self, ConfigError> {
        let kinematics = SwerveKinematics::new(&config)?;
        info!(
            "Drivetrain: track {} m, wheelbase {} m, max {} m/s",
            config.track_width_m, config.wheelbase_m, config.max_speed_mps
        );

        let resting = kinematics.resting_states();
        let odometry = SwerveOdometry::new(
            kinematics.clone(),
            &HeadingSample::default(),
            &[ModuleMeasuredState::default(); 4],
            Pose2D::default(),
        );

        let mut drivetrain = Self {
            calibration_ticks_left: config.calibration_ticks,
            config,
            kinematics,
            modules,
            heading_sensor,
            odometry,
            state: DriveState::Calibrating,
            command: ChassisVelocity::zero(),
            targets: resting,
            measured: [ModuleMeasuredState::default(); 4],
            raw_heading: HeadingSample::default(),
            yaw_offset_deg: 0.0,
            heading_degraded: false,
            read_failed: [false; 4],
            write_failed: [false; 4],
            modules_degraded: [false; 4],
            calibrated: [false; 4],
        };

        // Baseline odometry on whatever the hardware reports right now
        drivetrain.read_sensors();
        let heading = drivetrain.heading_sample();
        drivetrain
            .odometry
            .reset(Pose2D::default(), &heading, &drivetrain.measured);
        info!("Drivetrain calibrating steering sensors");

        Ok(drivetrain)
    }

    /// Run one control period
    pub fn tick(&mut self) {
        self.read_sensors();

        if self.state == DriveState::Calibrating {
            self.calibration_step();
        }

        let targets = self.desired_targets();
        self.targets = targets;
        self.command_modules(targets);

        let heading = self.heading_sample();
        self.odometry.update(&heading, &self.measured);

        self.update_module_health();
    }

    /// Command a chassis velocity; takes effect on the next tick
    pub fn drive(&mut self, velocity: ChassisVelocity) {
        let limit = self.config.max_angular_speed_radps;
        let velocity = ChassisVelocity {
            omega_radps: velocity.omega_radps.clamp(-limit, limit),
            ..velocity
        };
        self.command = velocity;

        if self.state != DriveState::Calibrating {
            let next = if velocity.is_zero() {
                DriveState::Idle
            } else {
                DriveState::Driving
            };
            self.set_state(next);
        }

        self.targets = self.desired_targets();
    }

    /// Halt at the resting angles immediately, bypassing the solver
    ///
    /// Each module takes the shorter way onto its resting axis, so a module may
    /// settle 180 degrees from the configured angle.
    pub fn stop(&mut self) {
        self.command = ChassisVelocity::zero();
        if self.state != DriveState::Calibrating {
            self.set_state(DriveState::Idle);
        }

        let resting = self
            .config
            .resting_angles_deg
            .map(|angle_deg| ModuleTargetState::new(0.0, angle_deg));
        self.targets = resting;
        self.command_modules(resting);
    }

    /// Hold the resting formation so the chassis resists being pushed
    pub fn lock(&mut self) {
        info!("Locking modules in resting formation");
        self.stop();
    }

    /// Overwrite the pose; the heading sample is re-referenced to match it
    pub fn reset_odometry(&mut self, pose: Pose2D) {
        self.set_initial_pose(pose, pose.heading_deg);
    }

    /// Re-reference the heading sensor to `heading_deg` and reset the pose
    pub fn set_initial_pose(&mut self, pose: Pose2D, heading_deg: f64) {
        self.read_sensors();
        self.yaw_offset_deg = heading_deg - self.raw_heading.yaw_deg;
        let heading = self.heading_sample();
        self.odometry.reset(
            Pose2D::new(pose.x_m, pose.y_m, heading_deg),
            &heading,
            &self.measured,
        );
        info!(
            "Initial pose set to ({:.3}, {:.3}, {:.1} deg)",
            pose.x_m, pose.y_m, heading_deg
        );
    }

    /// Re-sync every module's steering against its absolute sensor
    ///
    /// Modules hold their resting angles until calibration completes or the
    /// tick budget runs out; a stored command resumes afterwards.
    pub fn recalibrate(&mut self) {
        info!("Drivetrain recalibrating steering sensors");
        self.calibrated = [false; 4];
        self.calibration_ticks_left = self.config.calibration_ticks;
        self.set_state(DriveState::Calibrating);
        self.targets = self.kinematics.resting_states();
    }

    /// Make the current orientation read as zero heading, keeping position
    pub fn zero_yaw(&mut self) {
        let pose = self.odometry.pose();
        self.set_initial_pose(pose, 0.0);
    }

    pub fn pose(&self) -> Pose2D {
        self.odometry.pose()
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn command(&self) -> ChassisVelocity {
        self.command
    }

    /// Normalized targets before shortest-path optimization
    pub fn module_states(&self) -> [ModuleTargetState; 4] {
        self.targets
    }

    /// Module readings taken at the start of the last tick
    pub fn measured_states(&self) -> [ModuleMeasuredState; 4] {
        self.measured
    }

    /// Re-referenced sample used by the last tick
    pub fn heading_sample(&self) -> HeadingSample {
        HeadingSample {
            yaw_deg: wrap_deg_360(self.raw_heading.yaw_deg + self.yaw_offset_deg),
            ..self.raw_heading
        }
    }

    pub fn status(&self) -> DriveStatus {
        DriveStatus {
            state: self.state,
            heading_degraded: self.heading_degraded,
            modules_degraded: self.modules_degraded,
        }
    }

    pub fn config(&self) -> &DrivetrainConfig {
        &self.config
    }

    fn desired_targets(&self) -> [ModuleTargetState; 4] {
        match self.state {
            DriveState::Calibrating => self.kinematics.resting_states(),
            DriveState::Idle | DriveState::Driving => {
                let mut targets = self.kinematics.solve(self.command);
                normalize(&mut targets, self.config.max_speed_mps);
                targets
            }
        }
    }

    fn set_state(&mut self, next: DriveState) {
        if self.state != next {
            debug!("Drivetrain {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn read_sensors(&mut self) {
        match self.heading_sensor.read() {
            Ok(sample) => {
                if self.heading_degraded {
                    info!("Heading sensor recovered");
                }
                self.heading_degraded = false;
                self.raw_heading = sample;
            }
            Err(e) => {
                // Keep the last good sample
                if !self.heading_degraded {
                    warn!("Heading sensor degraded: {}", e);
                }
                self.heading_degraded = true;
            }
        }

        for (i, module) in self.modules.iter_mut().enumerate() {
            match module.measured() {
                Ok(measured) => {
                    self.measured[i] = measured;
                    self.read_failed[i] = false;
                }
                Err(e) => {
                    if !self.read_failed[i] {
                        warn!(
                            "Module {} read failed, holding last state: {}",
                            ModulePosition::ALL[i].name(),
                            e
                        );
                    }
                    self.read_failed[i] = true;
                }
            }
        }
    }

    /// Write targets along the shortest steering path from the measured angles
    fn command_modules(&mut self, targets: [ModuleTargetState; 4]) {
        for (i, module) in self.modules.iter_mut().enumerate() {
            let target = targets[i].optimize(self.measured[i].angle_deg);

            match module.set_target(target.speed_mps, target.angle_deg) {
                Ok(()) => self.write_failed[i] = false,
                Err(e) => {
                    if !self.write_failed[i] {
                        warn!(
                            "Module {} write failed: {}",
                            ModulePosition::ALL[i].name(),
                            e
                        );
                    }
                    self.write_failed[i] = true;
                }
            }
        }
    }

    fn calibration_step(&mut self) {
        for (i, module) in self.modules.iter_mut().enumerate() {
            if self.calibrated[i] {
                continue;
            }
            match module.calibrate_absolute_angle() {
                Ok(()) => {
                    debug!("Module {} calibrated", ModulePosition::ALL[i].name());
                    self.calibrated[i] = true;
                }
                Err(e) => debug!(
                    "Module {} calibration pending: {}",
                    ModulePosition::ALL[i].name(),
                    e
                ),
            }
        }

        self.calibration_ticks_left = self.calibration_ticks_left.saturating_sub(1);
        let all_calibrated = self.calibrated.iter().all(|&c| c);

        if all_calibrated || self.calibration_ticks_left == 0 {
            if all_calibrated {
                info!("Steering calibration complete");
            } else {
                for (i, _) in self.calibrated.iter().enumerate().filter(|(_, c)| !**c) {
                    warn!(
                        "Module {} failed to calibrate, running on relative sensor",
                        ModulePosition::ALL[i].name()
                    );
                }
            }

            let next = if self.command.is_zero() {
                DriveState::Idle
            } else {
                DriveState::Driving
            };
            self.set_state(next);
        }
    }

    fn update_module_health(&mut self) {
        let calibrating = self.state == DriveState::Calibrating;
        for (i, module) in self.modules.iter().enumerate() {
            let degraded = self.read_failed[i]
                || self.write_failed[i]
                || module.is_degraded()
                || (!calibrating && !self.calibrated[i]);

            if degraded != self.modules_degraded[i] {
                let name = ModulePosition::ALL[i].name();
                if degraded {
                    warn!("Module {} degraded", name);
                } else {
                    info!("Module {} healthy", name);
                }
            }
            self.modules_degraded[i] = degraded;
        }
    }
}

impl ChassisDrive for Drivetrain {
    fn drive(&mut self, velocity: ChassisVelocity) {
        Drivetrain::drive(self, velocity)
    }

    fn stop(&mut self) {
        Drivetrain::stop(self)
    }

    fn pose(&self) -> Pose2D {
        Drivetrain::pose(self)
    }

    fn heading_sample(&self) -> HeadingSample {
        Drivetrain::heading_sample(self)
    }
}
