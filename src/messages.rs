// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::drive::{
    ChassisVelocity, DriveState, DriveStatus, HeadingSample, ModuleMeasuredState,
    ModuleTargetState, Pose2D,
};

// Command from teleop/scripts -> runtime
// Rotation is in deg/s on the wire; the drive core works in rad/s
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaseCommand {
    pub x_vel: f64,
    pub y_vel: f64,
    pub theta_vel: f64,
}

impl From<&BaseCommand> for ChassisVelocity {
    fn from(cmd: &BaseCommand) -> Self {
        ChassisVelocity::new(cmd.x_vel, cmd.y_vel, cmd.theta_vel.to_radians())
    }
}

/// Balance controller on/off
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceCommand {
    pub enabled: bool,
}

/// Re-baseline odometry; with `rezero_heading` the heading is set to
/// `heading_deg`, otherwise the current heading is kept
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResetPoseCommand {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_deg: f64,
    #[serde(default)]
    pub rezero_heading: bool,
}

/// Re-run steering calibration against the absolute sensors
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrateCommand {}

/// IMU sample published by the sensor node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImuSample {
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

impl From<&ImuSample> for HeadingSample {
    fn from(sample: &ImuSample) -> Self {
        HeadingSample::new(sample.yaw_deg, sample.pitch_deg, sample.roll_deg)
    }
}

/// Drive telemetry published every tick: one-way output for loggers/dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub pose: Pose2D,
    pub state: DriveState,
    pub command: ChassisVelocity,
    pub targets: [ModuleTargetState; 4],
    pub measured: [ModuleMeasuredState; 4],
    pub balancing: bool,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    Calibrating,
    Degraded,
}

impl RuntimeHealth {
    /// Worst condition wins: degraded sensors, then calibration, then a stale command
    pub fn from_status(status: &DriveStatus, cmd_stale: bool) -> Self {
        if status.is_degraded() {
            RuntimeHealth::Degraded
        } else if status.state == DriveState::Calibrating {
            RuntimeHealth::Calibrating
        } else if cmd_stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        }
    }
}
