use std::time::Duration;

/// Doubling reconnect delay clamped to `[floor, ceiling]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay for the next attempt; the following one will be twice as long.
    pub fn next_delay(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn peek(&self) -> Duration {
        self.current
    }
}
