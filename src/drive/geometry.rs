// Planar geometry shared by the drive core: chassis velocity, pose, angle wrapping.
//
// Frame convention: +x forward, +y left, positive rotation counter-clockwise.

use serde::{Deserialize, Serialize};

/// Wrap an angle in degrees into (-180, 180]
pub fn wrap_deg_180(angle_deg: f64) -> f64 {
    let wrapped = angle_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Wrap an angle in degrees into [0, 360)
pub fn wrap_deg_360(angle_deg: f64) -> f64 {
    let wrapped = angle_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Commanded planar motion of the chassis body
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisVelocity {
    pub vx_mps: f64,
    pub vy_mps: f64,
    pub omega_radps: f64,
}

impl ChassisVelocity {
    pub fn new(vx_mps: f64, vy_mps: f64, omega_radps: f64) -> Self {
        Self {
            vx_mps,
            vy_mps,
            omega_radps,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// True only when all three axes are exactly zero
    pub fn is_zero(&self) -> bool {
        self.vx_mps == 0.0 && self.vy_mps == 0.0 && self.omega_radps == 0.0
    }

    /// Convert a field-frame velocity into the chassis frame given the current heading
    pub fn from_field_relative(
        vx_mps: f64,
        vy_mps: f64,
        omega_radps: f64,
        heading_deg: f64,
    ) -> Self {
        let (sin_h, cos_h) = heading_deg.to_radians().sin_cos();
        Self {
            vx_mps: vx_mps * cos_h + vy_mps * sin_h,
            vy_mps: -vx_mps * sin_h + vy_mps * cos_h,
            omega_radps,
        }
    }
}

/// Position plus heading of the chassis in the field frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x_m: f64,
    pub y_m: f64,
    /// Heading in [0, 360)
    pub heading_deg: f64,
}

impl Pose2D {
    pub fn new(x_m: f64, y_m: f64, heading_deg: f64) -> Self {
        Self {
            x_m,
            y_m,
            heading_deg: wrap_deg_360(heading_deg),
        }
    }

    /// Apply a chassis-frame twist (dx, dy, dtheta) using the constant-curvature
    /// arc model, returning the new pose.
    pub fn exp(&self, dx_m: f64, dy_m: f64, dtheta_rad: f64) -> Self {
        let (sin_t, cos_t) = dtheta_rad.sin_cos();

        // Arc coefficients; fall back to the Taylor series near zero rotation
        let (s, c) = if dtheta_rad.abs() < 1e-9 {
            (
                1.0 - dtheta_rad * dtheta_rad / 6.0,
                0.5 * dtheta_rad,
            )
        } else {
            (sin_t / dtheta_rad, (1.0 - cos_t) / dtheta_rad)
        };

        let local_x = dx_m * s - dy_m * c;
        let local_y = dx_m * c + dy_m * s;

        let (sin_h, cos_h) = self.heading_deg.to_radians().sin_cos();
        Self::new(
            self.x_m + local_x * cos_h - local_y * sin_h,
            self.y_m + local_x * sin_h + local_y * cos_h,
            self.heading_deg + dtheta_rad.to_degrees(),
        )
    }
}
