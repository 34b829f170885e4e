//! Bounded polling window for post-condition checks.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline plus poll interval for one verification wait.
///
/// Usage: check the condition first, then call [`wait`](Self::wait);
/// `false` means the deadline passed and the caller takes the
/// soft-success branch.
#[derive(Debug)]
pub struct VerifyWindow {
    deadline: Instant,
    poll: Duration,
}

impl VerifyWindow {
    pub fn new(timeout: Duration, poll: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            poll,
        }
    }

    /// Sleeps one poll interval. Returns `false` when the deadline has
    /// passed (before or after the sleep).
    pub async fn wait(&self) -> bool {
        if Instant::now() >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.poll).await;
        Instant::now() < self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_expires() {
        let window = VerifyWindow::new(Duration::from_millis(25), Duration::from_millis(10));
        let mut waits = 0;
        while window.wait().await {
            waits += 1;
            assert!(waits < 100, "window never expired");
        }
        assert!(waits >= 1);
    }

    #[tokio::test]
    async fn zero_timeout_expires_immediately() {
        let window = VerifyWindow::new(Duration::ZERO, Duration::from_millis(10));
        assert!(!window.wait().await);
    }
}
