use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A one-shot timer which stays pending until it is scheduled.
///
/// Awaiting `fired` is cancellation safe, so the timer may sit in a `select!` loop next to
/// shutdown & signal branches without delaying them.
pub struct RetryTimer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl RetryTimer {
    /// Create a new, unarmed instance.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: false,
        }
    }

    /// Arm the timer to fire once after the given delay, replacing any earlier deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.sleep.as_mut().reset(Instant::now() + delay);
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Wait for the timer to fire, disarming it.
    pub async fn fired(&mut self) {
        if !self.armed {
            futures::future::pending::<()>().await;
        }
        (&mut self.sleep).await;
        self.armed = false;
    }
}
