// Feetech servo hardware for the swerve chassis
//
// Provides:
// - Feetech STS3215 serial protocol implementation
// - The Feetech wheel-module variant (drive servo + steer servo)

pub mod feetech;
mod module;

pub use feetech::{FeetechBus, FeetechError};
pub use module::{FeetechSwerveModule, SharedBus};
