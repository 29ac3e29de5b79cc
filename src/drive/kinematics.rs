// Swerve inverse kinematics for a 4-module chassis
// Converts chassis velocities (vx, vy, omega) to per-module speed and azimuth,
// and module displacements back into a chassis displacement for odometry.

use nalgebra::{SMatrix, SVector};

use super::geometry::{ChassisVelocity, wrap_deg_180};
use super::module::ModuleTargetState;
use crate::config::{ConfigError, DrivetrainConfig};

/// Fixed mounting position of one module relative to the chassis center
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleGeometry {
    pub offset_x_m: f64,
    pub offset_y_m: f64,
}

/// Kinematics for the fixed module layout [fl, fr, bl, br]
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    geometry: [ModuleGeometry; 4],
    resting_angles_deg: [f64; 4],
    /// Least-squares inverse of the 8x3 forward matrix
    pseudo_inverse: SMatrix<f64, 3, 8>,
}

impl SwerveKinematics {
    /// Build the solver; fails when the geometry cannot support rotation
    pub fn new(config: &DrivetrainConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let geometry = config
            .module_offsets_m()
            .map(|(offset_x_m, offset_y_m)| ModuleGeometry {
                offset_x_m,
                offset_y_m,
            });

        // Each module contributes two rows: [1, 0, -oy] and [0, 1, ox]
        let mut rows = [0.0f64; 24];
        for (i, g) in geometry.iter().enumerate() {
            rows[i * 6..i * 6 + 6].copy_from_slice(&[
                1.0,
                0.0,
                -g.offset_y_m,
                0.0,
                1.0,
                g.offset_x_m,
            ]);
        }
        let forward = SMatrix::<f64, 8, 3>::from_row_slice(&rows);
        let normal = forward.transpose() * forward;
        let normal_inv = normal
            .try_inverse()
            .ok_or(ConfigError::SingularKinematics)?;

        Ok(Self {
            geometry,
            resting_angles_deg: config.resting_angles_deg,
            pseudo_inverse: normal_inv * forward.transpose(),
        })
    }

    pub fn geometry(&self) -> &[ModuleGeometry; 4] {
        &self.geometry
    }

    /// Zero speed at each module's resting azimuth
    pub fn resting_states(&self) -> [ModuleTargetState; 4] {
        self.resting_angles_deg
            .map(|angle_deg| ModuleTargetState::new(0.0, angle_deg))
    }

    /// Solve the per-module targets for a chassis velocity
    ///
    /// A command of exactly zero on all axes returns the resting states so
    /// parked modules don't chatter around an undefined atan2.
    pub fn solve(&self, velocity: ChassisVelocity) -> [ModuleTargetState; 4] {
        if velocity.is_zero() {
            return self.resting_states();
        }

        self.geometry.map(|g| {
            let vx = velocity.vx_mps - velocity.omega_radps * g.offset_y_m;
            let vy = velocity.vy_mps + velocity.omega_radps * g.offset_x_m;
            ModuleTargetState::new(vx.hypot(vy), vy.atan2(vx).to_degrees())
        })
    }

    /// Combine per-module displacements into a chassis-frame displacement
    ///
    /// Each entry is (distance travelled, azimuth) for one module. Returns
    /// (dx, dy, dtheta in radians) as the least-squares fit over all modules.
    pub fn to_chassis_displacement(&self, module_deltas: &[(f64, f64); 4]) -> (f64, f64, f64) {
        let mut b = SVector::<f64, 8>::zeros();
        for (i, &(distance_m, angle_deg)) in module_deltas.iter().enumerate() {
            let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();
            b[i * 2] = distance_m * cos_a;
            b[i * 2 + 1] = distance_m * sin_a;
        }
        let twist = self.pseudo_inverse * b;
        (twist[0], twist[1], twist[2])
    }
}

/// Scale all module speeds down uniformly so none exceeds `max_speed_mps`
///
/// Never increases a magnitude and never touches an angle.
pub fn normalize(states: &mut [ModuleTargetState; 4], max_speed_mps: f64) {
    let max_computed = states
        .iter()
        .map(|s| s.speed_mps.abs())
        .fold(0.0f64, f64::max);

    if max_computed > max_speed_mps {
        let scale = max_speed_mps / max_computed;
        for state in states.iter_mut() {
            state.speed_mps *= scale;
        }
    }
}

/// Smallest signed rotation taking `from_deg` to `to_deg`
pub fn angle_delta_deg(from_deg: f64, to_deg: f64) -> f64 {
    wrap_deg_180(to_deg - from_deg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn square_kinematics() -> SwerveKinematics {
        SwerveKinematics::new(&DrivetrainConfig {
            track_width_m: 0.6,
            wheelbase_m: 0.6,
            max_speed_mps: 3.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_module_offsets() {
        let kinematics = square_kinematics();
        let [fl, fr, bl, br] = kinematics.geometry();
        assert_eq!((fl.offset_x_m, fl.offset_y_m), (0.3, 0.3));
        assert_eq!((fr.offset_x_m, fr.offset_y_m), (0.3, -0.3));
        assert_eq!((bl.offset_x_m, bl.offset_y_m), (-0.3, 0.3));
        assert_eq!((br.offset_x_m, br.offset_y_m), (-0.3, -0.3));
    }

    #[test]
    fn test_zero_velocity_returns_resting_angles() {
        let kin = square_kinematics();
        for _ in 0..3 {
            let states = kin.solve(ChassisVelocity::zero());
            for (state, resting) in states.iter().zip([45.0, -45.0, -45.0, 45.0]) {
                assert_eq!(state.speed_mps, 0.0);
                assert!((state.angle_deg - resting).abs() < EPS);
            }
        }
    }

    #[test]
    fn test_forward_motion() {
        let kin = square_kinematics();
        let mut states = kin.solve(ChassisVelocity::new(1.0, 0.0, 0.0));
        normalize(&mut states, 3.0);
        for state in &states {
            assert!((state.speed_mps - 1.0).abs() < EPS);
            assert!(state.angle_deg.abs() < EPS);
        }
    }

    #[test]
    fn test_strafe_left() {
        let kin = square_kinematics();
        let states = kin.solve(ChassisVelocity::new(0.0, 0.5, 0.0));
        for state in &states {
            assert!((state.speed_mps - 0.5).abs() < EPS);
            assert!((state.angle_deg - 90.0).abs() < EPS);
        }
    }

    #[test]
    fn test_rotation_only() {
        let kin = square_kinematics();
        let states = kin.solve(ChassisVelocity::new(0.0, 0.0, 2.0));
        let expected_speed = 2.0 * 0.3f64.hypot(0.3);
        for state in &states {
            assert!((state.speed_mps - expected_speed).abs() < EPS);
        }
        // Counter-clockwise rotation: each module points tangentially
        assert!((states[0].angle_deg - 135.0).abs() < EPS); // front left
        assert!((states[1].angle_deg - 45.0).abs() < EPS); // front right
        assert!((states[2].angle_deg - -135.0).abs() < EPS); // back left
        assert!((states[3].angle_deg - -45.0).abs() < EPS); // back right
    }

    #[test]
    fn test_normalize_scales_uniformly() {
        let mut states = [
            ModuleTargetState::new(4.0, 10.0),
            ModuleTargetState::new(2.0, 20.0),
            ModuleTargetState::new(1.0, 30.0),
            ModuleTargetState::new(3.0, 40.0),
        ];
        normalize(&mut states, 3.0);
        let speeds: Vec<f64> = states.iter().map(|s| s.speed_mps).collect();
        for (got, want) in speeds.iter().zip([3.0, 1.5, 0.75, 2.25]) {
            assert!((got - want).abs() < EPS, "got {got}, want {want}");
        }
        let angles: Vec<f64> = states.iter().map(|s| s.angle_deg).collect();
        assert_eq!(angles, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_normalize_never_scales_up() {
        let mut states = [ModuleTargetState::new(0.5, 0.0); 4];
        normalize(&mut states, 3.0);
        for state in &states {
            assert_eq!(state.speed_mps, 0.5);
        }
    }

    #[test]
    fn test_saturated_command_preserves_ratios() {
        let kin = square_kinematics();
        let raw = kin.solve(ChassisVelocity::new(3.0, 1.0, 6.0));
        let mut states = raw;
        normalize(&mut states, 3.0);

        let max = states.iter().map(|s| s.speed_mps.abs()).fold(0.0, f64::max);
        assert!(max <= 3.0 + EPS);
        for i in 1..4 {
            let before = raw[i].speed_mps / raw[0].speed_mps;
            let after = states[i].speed_mps / states[0].speed_mps;
            assert!((before - after).abs() < 1e-9);
            assert_eq!(raw[i].angle_deg, states[i].angle_deg);
        }
    }

    #[test]
    fn test_displacement_inverts_solve() {
        let kin = square_kinematics();
        let velocity = ChassisVelocity::new(0.4, -0.2, 0.7);
        let dt = 0.02;
        let states = kin.solve(velocity);
        let deltas = states.map(|s| (s.speed_mps * dt, s.angle_deg));

        let (dx, dy, dtheta) = kin.to_chassis_displacement(&deltas);
        assert!((dx - 0.4 * dt).abs() < 1e-12);
        assert!((dy - -0.2 * dt).abs() < 1e-12);
        assert!((dtheta - 0.7 * dt).abs() < 1e-12);
    }

    #[test]
    fn test_zero_wheelbase_is_fatal() {
        let result = SwerveKinematics::new(&DrivetrainConfig {
            wheelbase_m: 0.0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_angle_delta_takes_short_way() {
        assert!((angle_delta_deg(170.0, -170.0) - 20.0).abs() < EPS);
        assert!((angle_delta_deg(-170.0, 170.0) - -20.0).abs() < EPS);
    }
}
