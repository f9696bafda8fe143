use std::time::Duration;

pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Doubling delay between reconnect attempts, capped, reset on a successful connect.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(MIN_RECONNECT_DELAY, MAX_RECONNECT_DELAY)
    }
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
