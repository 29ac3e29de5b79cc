// Fixed-rate host for the drivetrain: drains Zenoh topics, runs one control
// period per tick, publishes telemetry and health.
// If teleop goes quiet for longer than CMD_TIMEOUT the watchdog halts the
// chassis instead of replaying the last velocity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, ConfigError, HEADING_MAX_AGE, LOOP_HZ, RuntimeConfig, TOPIC_CMD_BALANCE,
    TOPIC_CMD_BASE, TOPIC_CMD_CALIBRATE, TOPIC_CMD_RESET_POSE, TOPIC_HEALTH, TOPIC_SENSOR_IMU,
    TOPIC_STATE_DRIVE,
};
use crate::drive::{
    BalanceController, ChassisVelocity, Drivetrain, HeadingFeed, HeadingFeedHandle, HeadingSample,
    Pose2D, SimModuleHandle, SwerveKinematics, WheelModule, sim_modules,
};
use crate::messages::{
    BalanceCommand, BaseCommand, CalibrateCommand, DriveTelemetry, ImuSample, ResetPoseCommand,
    RuntimeHealth,
};
use crate::motor::{FeetechBus, FeetechError, FeetechSwerveModule, SharedBus};

/// How the runtime was asked to start
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub config: RuntimeConfig,
    pub port: String,
    pub simulate: bool,
}

/// Times each tick against the control period
pub struct TickMonitor {
    period: Duration,
    misses: u64,
}

impl TickMonitor {
    pub fn new(period: Duration) -> Self {
        Self { period, misses: 0 }
    }

    /// Record how long a tick took; returns true on a deadline miss
    pub fn record(&mut self, elapsed: Duration) -> bool {
        if elapsed <= self.period {
            return false;
        }
        self.misses += 1;
        warn!(
            "Tick overran its {:?} period: took {:?} ({} misses)",
            self.period, elapsed, self.misses
        );
        true
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Closes the loop in simulation: moves the wheels and spins the fake IMU
pub struct Simulation {
    modules: Vec<SimModuleHandle>,
    imu: HeadingFeedHandle,
    kinematics: SwerveKinematics,
    yaw_deg: f64,
    dt_s: f64,
}

impl Simulation {
    pub fn new(
        modules: Vec<SimModuleHandle>,
        imu: HeadingFeedHandle,
        kinematics: SwerveKinematics,
        dt_s: f64,
    ) -> Self {
        imu.publish(HeadingSample::default());
        Self {
            modules,
            imu,
            kinematics,
            yaw_deg: 0.0,
            dt_s,
        }
    }

    /// Advance one period using what was last written to each module
    pub fn step(&mut self) {
        let mut deltas = [(0.0, 0.0); 4];
        for (i, handle) in self.modules.iter().enumerate() {
            let target = handle.target();
            deltas[i] = (target.speed_mps * self.dt_s, target.angle_deg);
            handle.step(self.dt_s);
        }

        let (_, _, dtheta_rad) = self.kinematics.to_chassis_displacement(&deltas);
        self.yaw_deg += dtheta_rad.to_degrees();
        self.imu.publish(HeadingSample::new(self.yaw_deg, 0.0, 0.0));
    }
}

pub struct Runtime {
    drivetrain: Drivetrain,
    balance: BalanceController,
    imu: HeadingFeedHandle,
    sim: Option<Simulation>,
    latest_cmd: Option<BaseCommand>,
    cmd_received_at: Instant,
    cmd_stale: bool,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(
        drivetrain: Drivetrain,
        balance: BalanceController,
        imu: HeadingFeedHandle,
        sim: Option<Simulation>,
    ) -> Self {
        Self {
            drivetrain,
            balance,
            imu,
            sim,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            cmd_stale: true, // Start stale until first cmd
            health: RuntimeHealth::Calibrating,
        }
    }

    /// Runtime over simulated modules and a simulated IMU
    pub fn simulated(config: &RuntimeConfig, period: Duration) -> Result<Self, ConfigError> {
        let (feed, imu) = HeadingFeed::new(None);
        let (modules, handles) = sim_modules();
        let sim = Simulation::new(
            handles,
            imu.clone(),
            SwerveKinematics::new(&config.drivetrain)?,
            period.as_secs_f64(),
        );
        Self::assemble(config, period, modules, feed, imu, Some(sim))
    }

    /// Runtime over the Feetech servo bus, fed by the IMU topic
    pub fn hardware(
        config: &RuntimeConfig,
        period: Duration,
        port: &str,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        config.modules.validate()?;
        let (feed, imu) = HeadingFeed::new(Some(HEADING_MAX_AGE));
        let modules = open_feetech_modules(port, config)?;
        Ok(Self::assemble(config, period, modules, feed, imu, None)?)
    }

    fn assemble(
        config: &RuntimeConfig,
        period: Duration,
        modules: [Box<dyn WheelModule>; 4],
        feed: HeadingFeed,
        imu: HeadingFeedHandle,
        sim: Option<Simulation>,
    ) -> Result<Self, ConfigError> {
        let drivetrain = Drivetrain::new(config.drivetrain.clone(), modules, Box::new(feed))?;
        let balance = BalanceController::new(
            config.balance.clone(),
            &config.drivetrain,
            period.as_secs_f64(),
        );
        Ok(Self::new(drivetrain, balance, imu, sim))
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: BaseCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    pub fn on_balance(&mut self, cmd: BalanceCommand) {
        if cmd.enabled {
            self.balance.activate();
        } else {
            self.balance.deactivate(&mut self.drivetrain);
        }
    }

    pub fn on_reset_pose(&mut self, cmd: ResetPoseCommand) {
        if cmd.rezero_heading {
            let pose = Pose2D::new(cmd.x_m, cmd.y_m, cmd.heading_deg);
            self.drivetrain.set_initial_pose(pose, cmd.heading_deg);
        } else {
            let heading_deg = self.drivetrain.pose().heading_deg;
            self.drivetrain
                .reset_odometry(Pose2D::new(cmd.x_m, cmd.y_m, heading_deg));
        }
    }

    pub fn on_calibrate(&mut self, _cmd: CalibrateCommand) {
        self.drivetrain.recalibrate();
    }

    pub fn on_imu(&mut self, sample: ImuSample) {
        if self.sim.is_some() {
            debug!("Ignoring IMU sample in simulation");
            return;
        }
        self.imu.publish(HeadingSample::from(&sample));
    }

    /// Teleop velocity after the watchdog
    fn teleop_velocity(&mut self) -> ChassisVelocity {
        let cmd_age = self.cmd_received_at.elapsed();

        match self.latest_cmd {
            Some(ref cmd) if cmd_age <= CMD_TIMEOUT => {
                self.cmd_stale = false;
                ChassisVelocity::from(cmd)
            }
            _ => {
                // Watchdog triggered (or no command ever received) - halt once, then hold idle
                if !self.cmd_stale {
                    warn!("Command stale ({:?} old), stopping chassis", cmd_age);
                    self.drivetrain.stop();
                }
                self.cmd_stale = true;
                ChassisVelocity::zero()
            }
        }
    }

    /// One control period: command selection, drivetrain tick, simulation
    pub fn step(&mut self) {
        let teleop = self.teleop_velocity();

        // Balancing owns the chassis while active
        if self.balance.tick(&mut self.drivetrain).is_none() {
            self.drivetrain.drive(teleop);
        }

        self.drivetrain.tick();

        if let Some(sim) = self.sim.as_mut() {
            sim.step();
        }

        self.health = RuntimeHealth::from_status(&self.drivetrain.status(), self.cmd_stale);
    }

    pub fn telemetry(&self) -> DriveTelemetry {
        DriveTelemetry {
            pose: self.drivetrain.pose(),
            state: self.drivetrain.state(),
            command: self.drivetrain.command(),
            targets: self.drivetrain.module_states(),
            measured: self.drivetrain.measured_states(),
            balancing: self.balance.is_active(),
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }
}

fn open_feetech_modules(
    port: &str,
    config: &RuntimeConfig,
) -> Result<[Box<dyn WheelModule>; 4], FeetechError> {
    info!("Opening servo bus on {}", port);
    let bus: SharedBus = Arc::new(Mutex::new(FeetechBus::open(port)?));
    let mut modules = FeetechSwerveModule::chassis(
        bus,
        &config.modules,
        config.drivetrain.steer_offsets_deg,
    );
    for module in modules.iter_mut() {
        module.initialize()?;
    }
    Ok(modules.map(|m| Box::new(m) as Box<dyn WheelModule>))
}

/// Decode a JSON sample, logging (not failing) on bad payloads
fn decode<T: DeserializeOwned>(sample: &zenoh::sample::Sample, topic: &str) -> Option<T> {
    let payload = sample.payload().to_bytes();
    match serde_json::from_slice::<T>(&payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Failed to parse message on {}: {}", topic, e);
            None
        }
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let period = Duration::from_millis(1000 / LOOP_HZ);

    let mut runtime = if options.simulate {
        info!("Starting with simulated modules");
        Runtime::simulated(&options.config, period)?
    } else {
        Runtime::hardware(&options.config, period, &options.port)?
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_balance = session.declare_subscriber(TOPIC_CMD_BALANCE).await?;
    let sub_reset = session.declare_subscriber(TOPIC_CMD_RESET_POSE).await?;
    let sub_calibrate = session.declare_subscriber(TOPIC_CMD_CALIBRATE).await?;
    let sub_imu = session.declare_subscriber(TOPIC_SENSOR_IMU).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_DRIVE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(period);
    // Stale commands are worse than a dropped tick: never burst to catch up
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut monitor = TickMonitor::new(period);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!(
        "Subscribed to: {}, {}, {}, {}, {}",
        TOPIC_CMD_BASE,
        TOPIC_CMD_BALANCE,
        TOPIC_CMD_RESET_POSE,
        TOPIC_CMD_CALIBRATE,
        TOPIC_SENSOR_IMU
    );
    info!("Publishing to: {}, {}", TOPIC_STATE_DRIVE, TOPIC_HEALTH);

    loop {
        tick.tick().await;
        let started = Instant::now();

        // 1. Drain all pending messages (non-blocking), sensors first
        while let Ok(Some(sample)) = sub_imu.try_recv() {
            if let Some(imu) = decode::<ImuSample>(&sample, TOPIC_SENSOR_IMU) {
                runtime.on_imu(imu);
            }
        }
        while let Ok(Some(sample)) = sub_reset.try_recv() {
            if let Some(cmd) = decode::<ResetPoseCommand>(&sample, TOPIC_CMD_RESET_POSE) {
                runtime.on_reset_pose(cmd);
            }
        }
        while let Ok(Some(sample)) = sub_calibrate.try_recv() {
            if let Some(cmd) = decode::<CalibrateCommand>(&sample, TOPIC_CMD_CALIBRATE) {
                runtime.on_calibrate(cmd);
            }
        }
        while let Ok(Some(sample)) = sub_balance.try_recv() {
            if let Some(cmd) = decode::<BalanceCommand>(&sample, TOPIC_CMD_BALANCE) {
                runtime.on_balance(cmd);
            }
        }
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            if let Some(cmd) = decode::<BaseCommand>(&sample, TOPIC_CMD_BASE) {
                runtime.on_command(cmd);
            }
        }

        // 2. Control period (includes watchdog logic)
        runtime.step();

        // 3. Publish telemetry and health
        pub_state
            .put(serde_json::to_string(&runtime.telemetry())?)
            .await?;
        pub_health
            .put(serde_json::to_string(&runtime.health())?)
            .await?;

        monitor.record(started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveState;

    const PERIOD: Duration = Duration::from_millis(20);

    fn sim_runtime() -> Runtime {
        let mut runtime = Runtime::simulated(&RuntimeConfig::default(), PERIOD).unwrap();
        runtime.step(); // calibration tick
        runtime
    }

    #[test]
    fn test_tick_monitor_counts_overruns() {
        let mut monitor = TickMonitor::new(PERIOD);
        assert!(!monitor.record(Duration::from_millis(5)));
        assert!(!monitor.record(PERIOD));
        assert!(monitor.record(Duration::from_millis(35)));
        assert_eq!(monitor.misses(), 1);
    }

    #[test]
    fn test_no_command_is_stale() {
        let runtime = sim_runtime();
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        assert_eq!(runtime.drivetrain().state(), DriveState::Idle);
    }

    #[test]
    fn test_fresh_command_drives() {
        let mut runtime = sim_runtime();
        runtime.on_command(BaseCommand {
            x_vel: 0.5,
            y_vel: 0.0,
            theta_vel: 0.0,
        });
        runtime.step();
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
        assert_eq!(runtime.drivetrain().state(), DriveState::Driving);

        // Simulated wheels move, so the pose advances on the following ticks
        for _ in 0..5 {
            runtime.step();
        }
        assert!(runtime.telemetry().pose.x_m > 0.0);
    }

    #[test]
    fn test_simulated_spin_tracks_yaw() {
        let mut runtime = sim_runtime();
        runtime.on_command(BaseCommand {
            x_vel: 0.0,
            y_vel: 0.0,
            theta_vel: 90.0,
        });
        for _ in 0..10 {
            runtime.step();
        }
        let pose = runtime.telemetry().pose;
        assert!(pose.heading_deg > 0.0 && pose.heading_deg < 90.0);
        assert!(pose.x_m.abs() < 1e-6);
        assert!(pose.y_m.abs() < 1e-6);
    }

    #[test]
    fn test_reset_pose_command() {
        let mut runtime = sim_runtime();
        runtime.on_reset_pose(ResetPoseCommand {
            x_m: 2.0,
            y_m: -1.0,
            heading_deg: 180.0,
            rezero_heading: true,
        });
        runtime.step();
        let pose = runtime.telemetry().pose;
        assert!((pose.x_m - 2.0).abs() < 1e-9);
        assert!((pose.heading_deg - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_balance_overrides_teleop() {
        let mut runtime = sim_runtime();
        runtime.on_balance(BalanceCommand { enabled: true });
        runtime.on_command(BaseCommand {
            x_vel: 0.0,
            y_vel: 1.0,
            theta_vel: 0.0,
        });
        runtime.step();
        // Simulated IMU is level, so the balance loop holds still
        let telemetry = runtime.telemetry();
        assert!(telemetry.balancing);
        assert!(telemetry.command.is_zero());

        runtime.on_balance(BalanceCommand { enabled: false });
        assert!(!runtime.telemetry().balancing);
        runtime.step();
        assert_eq!(runtime.telemetry().command.vy_mps, 1.0);
    }

    #[test]
    fn test_calibrate_command_resyncs_steering() {
        let mut runtime = sim_runtime();
        runtime.on_calibrate(CalibrateCommand {});
        assert_eq!(runtime.drivetrain().state(), DriveState::Calibrating);

        runtime.step();
        assert_eq!(runtime.drivetrain().state(), DriveState::Idle);
    }

    #[test]
    fn test_reset_pose_keeps_heading_without_rezero() {
        let mut runtime = sim_runtime();
        runtime.on_reset_pose(ResetPoseCommand {
            x_m: 0.0,
            y_m: 0.0,
            heading_deg: 90.0,
            rezero_heading: true,
        });
        runtime.on_reset_pose(ResetPoseCommand {
            x_m: 1.0,
            y_m: 1.0,
            heading_deg: 0.0,
            rezero_heading: false,
        });
        let pose = runtime.telemetry().pose;
        assert!((pose.x_m - 1.0).abs() < 1e-9);
        assert!((pose.heading_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_hardware_rejects_invalid_module_config() {
        let mut config = RuntimeConfig::default();
        config.modules.wheel_radius_m = 0.0;

        // Fails on the config before any serial port is touched
        let err = match Runtime::hardware(&config, PERIOD, "/dev/does-not-exist") {
            Ok(_) => panic!("invalid module config accepted"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidLimit {
                name: "wheel_radius_m",
                ..
            })
        ));
    }
}
