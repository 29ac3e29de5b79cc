// Keyboard teleop: WASD translate, Z/X rotate, R/F speed, B balance toggle,
// O reset pose to origin, C recalibrate steering, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use swerve_zenoh_runtime::config::{
    TOPIC_CMD_BALANCE, TOPIC_CMD_BASE, TOPIC_CMD_CALIBRATE, TOPIC_CMD_RESET_POSE,
};
use swerve_zenoh_runtime::messages::{
    BalanceCommand, BaseCommand, CalibrateCommand, ResetPoseCommand,
};
use tracing::info;

const SPEEDS: [f64; 3] = [0.3, 1.0, 2.5]; // m/s
const THETA_SPEEDS: [f64; 3] = [30.0, 90.0, 180.0]; // deg/s
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

struct Publishers<'a> {
    base: zenoh::pubsub::Publisher<'a>,
    balance: zenoh::pubsub::Publisher<'a>,
    reset_pose: zenoh::pubsub::Publisher<'a>,
    calibrate: zenoh::pubsub::Publisher<'a>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publishers = Publishers {
        base: session.declare_publisher(TOPIC_CMD_BASE).await?,
        balance: session.declare_publisher(TOPIC_CMD_BALANCE).await?,
        reset_pose: session.declare_publisher(TOPIC_CMD_RESET_POSE).await?,
        calibrate: session.declare_publisher(TOPIC_CMD_CALIBRATE).await?,
    };

    info!(
        "Controls: WASD=move, Z/X=rotate, R/F=speed, B=balance, O=reset pose, C=calibrate, Q=quit"
    );
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publishers).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publishers: &Publishers<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut balancing = false;

    // Persistent velocity state
    let mut cmd = BaseCommand {
        x_vel: 0.0,
        y_vel: 0.0,
        theta_vel: 0.0,
    };
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        cmd.x_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        cmd.x_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        cmd.y_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        cmd.y_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation (counter-clockwise positive)
                    KeyCode::Char('z') if pressed => {
                        cmd.theta_vel = THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        cmd.theta_vel = -THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('b') if kind == KeyEventKind::Press => {
                        balancing = !balancing;
                        let msg = BalanceCommand { enabled: balancing };
                        publishers.balance.put(serde_json::to_string(&msg)?).await?;
                        info!("Balance: {}", if balancing { "ON" } else { "OFF" });
                    }

                    KeyCode::Char('o') if kind == KeyEventKind::Press => {
                        let msg = ResetPoseCommand {
                            x_m: 0.0,
                            y_m: 0.0,
                            heading_deg: 0.0,
                            rezero_heading: true,
                        };
                        publishers.reset_pose.put(serde_json::to_string(&msg)?).await?;
                        info!("Pose reset to origin");
                    }

                    KeyCode::Char('c') if kind == KeyEventKind::Press => {
                        let msg = CalibrateCommand {};
                        publishers.calibrate.put(serde_json::to_string(&msg)?).await?;
                        info!("Steering recalibration requested");
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd.x_vel = 0.0;
            cmd.y_vel = 0.0;
            cmd.theta_vel = 0.0;
        }

        // Always publish at ~50Hz
        publishers.base.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
