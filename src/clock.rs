use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time and the only place the poller suspends.
///
/// Injected everywhere time matters so that retry delays and poll intervals
/// can be driven by a manual clock in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
