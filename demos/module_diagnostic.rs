// Swerve module diagnostic: READ-ONLY check of all eight servos
//
// This tool does NOT write anything to the servos, so it is safe to run with
// the wheels on the ground. Use this first before running the runtime.
//
// Usage: cargo run --example module_diagnostic -- [port]
// Example: cargo run --example module_diagnostic -- /dev/ttyACM0

use swerve_zenoh_runtime::config::{FeetechModuleConfig, MOTOR_PORT};
use swerve_zenoh_runtime::drive::ModulePosition;
use swerve_zenoh_runtime::motor::feetech::{FeetechBus, Register, STEPS_PER_REVOLUTION};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| MOTOR_PORT.to_string());
    let config = FeetechModuleConfig::default();

    println!("Swerve module diagnostic (READ-ONLY)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check the servo power supply");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading modules...");
    let mut missing = 0;
    for position in ModulePosition::ALL {
        let (drive_id, steer_id) = config.motor_ids[position.index()];
        println!("  === {} module ===", position.name());

        for (role, id) in [("drive", drive_id), ("steer", steer_id)] {
            match bus.ping(id) {
                Ok(true) => {}
                Ok(false) => {
                    println!("    {} (ID {}): ✗ NO RESPONSE", role, id);
                    missing += 1;
                    continue;
                }
                Err(e) => {
                    println!("    {} (ID {}): ✗ ERROR: {}", role, id, e);
                    missing += 1;
                    continue;
                }
            }

            let model = bus
                .model_number(id)
                .map(|m| m.to_string())
                .unwrap_or_else(|e| format!("ERROR - {}", e));
            let mode = match bus.read_u8(id, Register::OperatingMode) {
                Ok(0) => "Position".to_string(),
                Ok(1) => "Velocity".to_string(),
                Ok(other) => format!("Other ({})", other),
                Err(e) => format!("ERROR - {}", e),
            };
            let position_str = match bus.get_position(id) {
                Ok(steps) => {
                    let degrees = steps as f64 * 360.0 / STEPS_PER_REVOLUTION as f64;
                    format!("{} ({:.1}°)", steps, degrees)
                }
                Err(e) => format!("ERROR - {}", e),
            };

            println!(
                "    {} (ID {}): model {}, mode {}, position {}",
                role, id, model, mode, position_str
            );
        }
        println!();
    }

    if missing > 0 {
        println!("⚠ WARNING: {} servo(s) did not respond", missing);
        println!("  - Verify servo IDs match the config motor_ids");
        println!("  - Check wiring connections");
    } else {
        println!("All servos responded.");
        println!("Drive servos should report Velocity mode and steer servos Position mode");
        println!("once the runtime has initialized them.");
    }

    Ok(())
}
