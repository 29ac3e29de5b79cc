/// Discrete PID with a symmetric output clamp
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    dt: f64,
    output_limit: f64,
    prev_err: Option<f64>,
    integral: f64,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, dt: f64, output_limit: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            dt,
            output_limit,
            prev_err: None,
            integral: 0.0,
        }
    }

    /// One step toward `setpoint`; output stays within +-output_limit
    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let error = setpoint - measurement;
        self.integral += error * self.dt;
        // Integral term alone never exceeds the output clamp
        if self.ki != 0.0 {
            let bound = (self.output_limit / self.ki).abs();
            self.integral = self.integral.clamp(-bound, bound);
        }
        // No derivative kick on the first sample after a reset
        let derivative = match self.prev_err {
            Some(prev) => (error - prev) / self.dt,
            None => 0.0,
        };
        self.prev_err = Some(error);

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.clamp(-self.output_limit, self.output_limit)
    }

    pub fn reset(&mut self) {
        self.prev_err = None;
        self.integral = 0.0;
    }
}
