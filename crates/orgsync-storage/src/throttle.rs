use std::time::Duration;

use async_trait::async_trait;

/// Where in the per-record update cycle a pause is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausePoint {
    /// Directly after the profile PATCH returned.
    AfterPatch,
    /// After a record finished, whatever its outcome.
    AfterRecord,
}

#[async_trait]
pub trait Throttle: Send + Sync {
    async fn pause(&self, point: PausePoint);
}

/// Fixed sleeps between directory writes.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayThrottle {
    pub after_patch: Duration,
    pub after_record: Duration,
}

impl Default for FixedDelayThrottle {
    fn default() -> Self {
        Self {
            after_patch: Duration::from_secs(3),
            after_record: Duration::from_secs(5),
        }
    }
}

impl FixedDelayThrottle {
    pub fn delay_for(&self, point: PausePoint) -> Duration {
        match point {
            PausePoint::AfterPatch => self.after_patch,
            PausePoint::AfterRecord => self.after_record,
        }
    }
}

#[async_trait]
impl Throttle for FixedDelayThrottle {
    async fn pause(&self, point: PausePoint) {
        let delay = self.delay_for(point);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Throttle for NoDelay {
    async fn pause(&self, _point: PausePoint) {}
}
