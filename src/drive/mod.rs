// Swerve drive core
//
// Provides:
// - Chassis kinematics, desaturation and the least-squares inverse
// - The wheel-module and heading-sensor capability interfaces
// - Odometry, the drivetrain coordinator and the balance controller

pub mod balance;
pub mod drivetrain;
pub mod geometry;
pub mod heading;
pub mod kinematics;
pub mod module;
pub mod odometry;
mod pid;

pub use balance::BalanceController;
pub use drivetrain::{ChassisDrive, DriveState, DriveStatus, Drivetrain};
pub use geometry::{ChassisVelocity, Pose2D};
pub use heading::{HeadingFeed, HeadingFeedHandle, HeadingSample, HeadingSensor, SensorError};
pub use kinematics::{ModuleGeometry, SwerveKinematics, normalize};
pub use module::{
    ModuleError, ModuleMeasuredState, ModulePosition, ModuleTargetState, SimModule,
    SimModuleHandle, WheelModule, sim_modules,
};
pub use odometry::SwerveOdometry;
pub use pid::PidController;
