// Timeouts, topics, drivetrain geometry and module configuration
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// IMU samples older than this are treated as a sensor fault
pub const HEADING_MAX_AGE: Duration = Duration::from_millis(100);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "swerve/cmd/base"; // chassis velocity commands
pub const TOPIC_CMD_BALANCE: &str = "swerve/cmd/balance"; // balance controller on/off
pub const TOPIC_CMD_RESET_POSE: &str = "swerve/cmd/reset_pose"; // odometry re-baseline
pub const TOPIC_CMD_CALIBRATE: &str = "swerve/cmd/calibrate"; // steering re-sync
pub const TOPIC_SENSOR_IMU: &str = "swerve/sensor/imu"; // yaw/pitch/roll samples
pub const TOPIC_STATE_DRIVE: &str = "swerve/state/drive"; // pose + module telemetry
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the Feetech servo bus
pub const MOTOR_PORT: &str = "/dev/ttyACM0";

/// Configuration errors are fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid drivetrain geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid limit {name}: {value}")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("Servo id {0} is assigned more than once")]
    DuplicateServoId(u8),

    #[error("Kinematics matrix is singular for the configured module offsets")]
    SingularKinematics,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Geometry and limits of the swerve chassis, fixed for the life of a drivetrain
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrivetrainConfig {
    /// Left-to-right distance between module contact points
    pub track_width_m: f64,
    /// Front-to-back distance between module contact points
    pub wheelbase_m: f64,
    pub max_speed_mps: f64,
    pub max_angular_speed_radps: f64,
    /// Azimuth held while parked, [fl, fr, bl, br]
    pub resting_angles_deg: [f64; 4],
    /// Absolute sensor mounting misalignment, [fl, fr, bl, br]
    pub steer_offsets_deg: [f64; 4],
    /// Ticks allowed for absolute-angle calibration before giving up
    pub calibration_ticks: u32,
}

impl Default for DrivetrainConfig {
    fn default() -> Self {
        Self {
            track_width_m: 0.6,
            wheelbase_m: 0.6,
            max_speed_mps: 3.0,
            max_angular_speed_radps: 2.0 * std::f64::consts::PI,
            // X formation
            resting_angles_deg: [45.0, -45.0, -45.0, 45.0],
            steer_offsets_deg: [0.0; 4],
            calibration_ticks: LOOP_HZ as u32,
        }
    }
}

impl DrivetrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.track_width_m.is_finite() && self.track_width_m > 0.0) {
            return Err(ConfigError::InvalidGeometry(format!(
                "track width must be positive, got {}",
                self.track_width_m
            )));
        }
        if !(self.wheelbase_m.is_finite() && self.wheelbase_m > 0.0) {
            return Err(ConfigError::InvalidGeometry(format!(
                "wheelbase must be positive, got {}",
                self.wheelbase_m
            )));
        }
        if !(self.max_speed_mps.is_finite() && self.max_speed_mps > 0.0) {
            return Err(ConfigError::InvalidLimit {
                name: "max_speed_mps",
                value: self.max_speed_mps,
            });
        }
        if !(self.max_angular_speed_radps.is_finite() && self.max_angular_speed_radps > 0.0) {
            return Err(ConfigError::InvalidLimit {
                name: "max_angular_speed_radps",
                value: self.max_angular_speed_radps,
            });
        }
        Ok(())
    }

    /// Module offsets from the chassis center as (x, y), [fl, fr, bl, br]
    pub fn module_offsets_m(&self) -> [(f64, f64); 4] {
        let half_base = self.wheelbase_m / 2.0;
        let half_track = self.track_width_m / 2.0;
        [
            (half_base, half_track),
            (half_base, -half_track),
            (-half_base, half_track),
            (-half_base, -half_track),
        ]
    }

    /// Map a normalized [-1, 1] output onto linear speed
    pub fn percent_to_mps(&self, percent: f64) -> f64 {
        percent * self.max_speed_mps
    }
}

/// Servo wiring and drive train ratios for the Feetech module variant
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeetechModuleConfig {
    /// (drive servo id, steer servo id), [fl, fr, bl, br]
    pub motor_ids: [(u8, u8); 4],
    pub wheel_radius_m: f64,
    /// Servo revolutions per wheel revolution
    pub drive_gear_ratio: f64,
}

impl Default for FeetechModuleConfig {
    fn default() -> Self {
        Self {
            motor_ids: [(1, 2), (3, 4), (5, 6), (7, 8)],
            wheel_radius_m: 0.05,
            drive_gear_ratio: 1.0,
        }
    }
}

impl FeetechModuleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("wheel_radius_m", self.wheel_radius_m),
            ("drive_gear_ratio", self.drive_gear_ratio),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidLimit { name, value });
            }
        }

        let mut ids: Vec<u8> = self
            .motor_ids
            .iter()
            .flat_map(|&(drive, steer)| [drive, steer])
            .collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::DuplicateServoId(pair[0]));
        }
        Ok(())
    }
}

/// Gains and gating for the balance controller
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Tilt at or below this is considered level
    pub level_tolerance_deg: f64,
    /// Ticks between tilt-change samples
    pub settle_window_ticks: u32,
    /// Hold still while pitch moved more than this across the last window
    pub max_tilt_change_deg: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            kp: 0.02,
            ki: 0.0,
            kd: 0.002,
            level_tolerance_deg: 2.5,
            settle_window_ticks: 10,
            max_tilt_change_deg: 3.0,
        }
    }
}

/// Everything loaded once at startup
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub drivetrain: DrivetrainConfig,
    pub modules: FeetechModuleConfig,
    pub balance: BalanceConfig,
}

impl RuntimeConfig {
    /// Load from a JSON file; missing sections fall back to defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&text)?;
        config.drivetrain.validate()?;
        config.modules.validate()?;
        Ok(config)
    }
}
