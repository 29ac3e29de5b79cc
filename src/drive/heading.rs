// Heading sensor read capability
//
// The drive core owns no IMU. It reads yaw/pitch/roll through `HeadingSensor`;
// `HeadingFeed` is the one implementation we ship, fed either by the runtime
// draining an IMU topic or by a simulation/test harness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::geometry::{wrap_deg_180, wrap_deg_360};

/// One reading of the heading sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadingSample {
    /// [0, 360)
    pub yaw_deg: f64,
    /// [-180, 180)
    pub pitch_deg: f64,
    /// [-180, 180)
    pub roll_deg: f64,
}

impl HeadingSample {
    /// Build a sample with every axis normalized to its range
    pub fn new(yaw_deg: f64, pitch_deg: f64, roll_deg: f64) -> Self {
        Self {
            yaw_deg: wrap_deg_360(yaw_deg),
            pitch_deg: wrap_half_open(pitch_deg),
            roll_deg: wrap_half_open(roll_deg),
        }
    }

    pub fn normalized(self) -> Self {
        Self::new(self.yaw_deg, self.pitch_deg, self.roll_deg)
    }
}

// [-180, 180)
fn wrap_half_open(angle_deg: f64) -> f64 {
    let wrapped = wrap_deg_180(angle_deg);
    if wrapped >= 180.0 { wrapped - 360.0 } else { wrapped }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SensorError {
    #[error("No heading sample received yet")]
    NoSample,

    #[error("Heading sample is stale ({0:?} old)")]
    Stale(Duration),

    #[error("Heading sensor offline")]
    Offline,
}

/// Read-only heading capability
pub trait HeadingSensor: Send {
    fn read(&mut self) -> Result<HeadingSample, SensorError>;
}

#[derive(Debug, Default)]
struct FeedState {
    latest: Option<(HeadingSample, Instant)>,
    offline: bool,
}

/// Heading sensor backed by the most recently published sample
pub struct HeadingFeed {
    state: Arc<Mutex<FeedState>>,
    max_age: Option<Duration>,
}

/// Publishing side of a `HeadingFeed`
#[derive(Clone)]
pub struct HeadingFeedHandle {
    state: Arc<Mutex<FeedState>>,
}

impl HeadingFeed {
    /// Create a feed; samples older than `max_age` are reported as stale
    pub fn new(max_age: Option<Duration>) -> (Self, HeadingFeedHandle) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            Self {
                state: Arc::clone(&state),
                max_age,
            },
            HeadingFeedHandle { state },
        )
    }
}

impl HeadingSensor for HeadingFeed {
    fn read(&mut self) -> Result<HeadingSample, SensorError> {
        let state = self.state.lock();
        if state.offline {
            return Err(SensorError::Offline);
        }
        let (sample, received_at) = state.latest.ok_or(SensorError::NoSample)?;
        if let Some(max_age) = self.max_age {
            let age = received_at.elapsed();
            if age > max_age {
                return Err(SensorError::Stale(age));
            }
        }
        Ok(sample)
    }
}

impl HeadingFeedHandle {
    pub fn publish(&self, sample: HeadingSample) {
        let mut state = self.state.lock();
        state.latest = Some((sample.normalized(), Instant::now()));
        state.offline = false;
    }

    /// Simulate losing the sensor until the next `publish`
    pub fn set_offline(&self) {
        self.state.lock().offline = true;
    }
}
