// Dead-reckoning pose estimate from module travel and the heading sensor

use tracing::debug;

use super::geometry::{Pose2D, wrap_deg_360};
use super::heading::HeadingSample;
use super::kinematics::{SwerveKinematics, angle_delta_deg};
use super::module::ModuleMeasuredState;

/// Fuses module distance deltas with yaw into a field-frame pose
///
/// Translation comes from the least-squares chassis displacement of the four
/// modules; heading always comes from the sensor, never from the wheels.
#[derive(Debug, Clone)]
pub struct SwerveOdometry {
    kinematics: SwerveKinematics,
    pose: Pose2D,
    last_distances_m: [f64; 4],
    /// Pose heading minus sensor yaw, fixed at the last reset
    heading_offset_deg: f64,
}

impl SwerveOdometry {
    pub fn new(
        kinematics: SwerveKinematics,
        heading: &HeadingSample,
        measured: &[ModuleMeasuredState; 4],
        initial_pose: Pose2D,
    ) -> Self {
        let mut odometry = Self {
            kinematics,
            pose: initial_pose,
            last_distances_m: [0.0; 4],
            heading_offset_deg: 0.0,
        };
        odometry.reset(initial_pose, heading, measured);
        odometry
    }

    /// Overwrite the pose and re-baseline module distances in one step
    ///
    /// The next `update` then only sees travel that happens after this call.
    pub fn reset(
        &mut self,
        pose: Pose2D,
        heading: &HeadingSample,
        measured: &[ModuleMeasuredState; 4],
    ) {
        self.pose = Pose2D::new(pose.x_m, pose.y_m, pose.heading_deg);
        self.heading_offset_deg = self.pose.heading_deg - heading.yaw_deg;
        self.last_distances_m = measured.map(|m| m.distance_m);
        debug!(
            "Odometry reset to ({:.3}, {:.3}, {:.1} deg)",
            self.pose.x_m, self.pose.y_m, self.pose.heading_deg
        );
    }

    /// Integrate one tick of module travel and return the new pose
    pub fn update(
        &mut self,
        heading: &HeadingSample,
        measured: &[ModuleMeasuredState; 4],
    ) -> Pose2D {
        let mut deltas = [(0.0, 0.0); 4];
        for (i, m) in measured.iter().enumerate() {
            deltas[i] = (m.distance_m - self.last_distances_m[i], m.angle_deg);
            self.last_distances_m[i] = m.distance_m;
        }

        let (dx_m, dy_m, _) = self.kinematics.to_chassis_displacement(&deltas);

        let heading_deg = wrap_deg_360(heading.yaw_deg + self.heading_offset_deg);
        let dtheta_rad = angle_delta_deg(self.pose.heading_deg, heading_deg).to_radians();

        let next = self.pose.exp(dx_m, dy_m, dtheta_rad);
        // Take the sensor heading exactly rather than the integrated one
        self.pose = Pose2D::new(next.x_m, next.y_m, heading_deg);
        self.pose
    }

    pub fn pose(&self) -> Pose2D {
        self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrivetrainConfig;
    use crate::drive::geometry::ChassisVelocity;

    const EPS: f64 = 1e-9;

    fn odometry_at(pose: Pose2D, yaw_deg: f64) -> SwerveOdometry {
        let kinematics = SwerveKinematics::new(&DrivetrainConfig::default()).unwrap();
        SwerveOdometry::new(
            kinematics,
            &HeadingSample::new(yaw_deg, 0.0, 0.0),
            &[ModuleMeasuredState::default(); 4],
            pose,
        )
    }

    fn modules_at(distance_m: f64, angle_deg: f64) -> [ModuleMeasuredState; 4] {
        [ModuleMeasuredState {
            speed_mps: 0.0,
            angle_deg,
            distance_m,
        }; 4]
    }

    #[test]
    fn test_straight_travel() {
        let mut odometry = odometry_at(Pose2D::default(), 0.0);
        let pose = odometry.update(&HeadingSample::default(), &modules_at(0.5, 0.0));
        assert!((pose.x_m - 0.5).abs() < EPS);
        assert!(pose.y_m.abs() < EPS);
    }

    #[test]
    fn test_travel_rotated_into_field_frame() {
        let mut odometry = odometry_at(Pose2D::new(0.0, 0.0, 90.0), 0.0);
        let pose = odometry.update(&HeadingSample::default(), &modules_at(1.0, 0.0));
        assert!(pose.x_m.abs() < EPS);
        assert!((pose.y_m - 1.0).abs() < EPS);
        assert!((pose.heading_deg - 90.0).abs() < EPS);
    }

    #[test]
    fn test_yaw_change_without_travel() {
        let mut odometry = odometry_at(Pose2D::new(1.0, -2.0, 0.0), 0.0);
        let pose = odometry.update(&HeadingSample::new(10.0, 0.0, 0.0), &modules_at(0.0, 0.0));
        assert!((pose.heading_deg - 10.0).abs() < EPS);
        assert!((pose.x_m - 1.0).abs() < EPS);
        assert!((pose.y_m - -2.0).abs() < EPS);
    }

    #[test]
    fn test_reset_rebaselines_distances() {
        let mut odometry = odometry_at(Pose2D::default(), 0.0);
        odometry.update(&HeadingSample::default(), &modules_at(2.0, 0.0));

        // Modules have travelled 3 m in total when the reset happens
        let target = Pose2D::new(5.0, 5.0, 45.0);
        odometry.reset(target, &HeadingSample::default(), &modules_at(3.0, 0.0));
        assert_eq!(odometry.pose(), target);

        let pose = odometry.update(&HeadingSample::default(), &modules_at(3.0, 0.0));
        assert!((pose.x_m - 5.0).abs() < EPS);
        assert!((pose.y_m - 5.0).abs() < EPS);
        assert!((pose.heading_deg - 45.0).abs() < EPS);
    }

    #[test]
    fn test_heading_offset_kept_after_reset() {
        let mut odometry = odometry_at(Pose2D::default(), 0.0);
        odometry.reset(
            Pose2D::new(0.0, 0.0, 90.0),
            &HeadingSample::new(30.0, 0.0, 0.0),
            &modules_at(0.0, 0.0),
        );
        // Sensor turns 15 degrees, pose follows from its reset heading
        let pose = odometry.update(&HeadingSample::new(45.0, 0.0, 0.0), &modules_at(0.0, 0.0));
        assert!((pose.heading_deg - 105.0).abs() < EPS);
    }

    #[test]
    fn test_spin_in_place_keeps_position() {
        let kinematics = SwerveKinematics::new(&DrivetrainConfig::default()).unwrap();
        let targets = kinematics.solve(ChassisVelocity::new(0.0, 0.0, 1.0));
        let mut odometry = odometry_at(Pose2D::default(), 0.0);

        let dt = 0.02;
        let mut measured = targets.map(|t| ModuleMeasuredState {
            speed_mps: t.speed_mps,
            angle_deg: t.angle_deg,
            distance_m: 0.0,
        });
        let mut yaw_deg = 0.0;
        for _ in 0..50 {
            for (m, t) in measured.iter_mut().zip(targets.iter()) {
                m.distance_m += t.speed_mps * dt;
            }
            yaw_deg += (1.0 * dt).to_degrees();
            odometry.update(&HeadingSample::new(yaw_deg, 0.0, 0.0), &measured);
        }

        let pose = odometry.pose();
        assert!(pose.x_m.abs() < 1e-9);
        assert!(pose.y_m.abs() < 1e-9);
        assert!((pose.heading_deg - 1.0f64.to_degrees()).abs() < 1e-6);
    }
}
