use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Pause for `pause` after every `every` writes to keep a hosted store happy.
#[derive(Debug, Clone)]
pub struct Throttle {
    every: usize,
    pause: Duration,
    count: usize,
}

impl Throttle {
    pub fn new(every: usize, pause_ms: u64) -> Self {
        Self {
            every,
            pause: Duration::from_millis(pause_ms),
            count: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Record one write; sleeps when a sub-batch boundary is reached.
    /// Returns true if it paused.
    pub async fn tick(&mut self) -> bool {
        self.count += 1;
        if self.every == 0 || self.count % self.every != 0 {
            return false;
        }
        debug!(
            writes = self.count,
            pause_ms = self.pause.as_millis() as u64,
            "Throttle pause"
        );
        if !self.pause.is_zero() {
            sleep(self.pause).await;
        }
        true
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pauses_on_sub_batch_boundaries() {
        let mut throttle = Throttle::new(3, 0);
        let mut pauses = Vec::new();
        for _ in 0..7 {
            pauses.push(throttle.tick().await);
        }
        assert_eq!(pauses, vec![false, false, true, false, false, true, false]);
        assert_eq!(throttle.count(), 7);
    }

    #[tokio::test]
    async fn test_disabled_never_pauses() {
        let mut throttle = Throttle::disabled();
        for _ in 0..10 {
            assert!(!throttle.tick().await);
        }
    }
}
