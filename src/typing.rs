//! Periodic typing indicator that runs until cancelled.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Stops the ticker when stopped or dropped. One tick already in flight may
/// still complete.
pub struct TypingTicker {
    token: CancellationToken,
}

impl TypingTicker {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TypingTicker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Calls `tick` now and then every `period` until the returned ticker stops.
pub fn spawn_ticker<F, Fut>(period: Duration, mut tick: F) -> TypingTicker
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        trace!("Typing ticker stopped");
    });

    TypingTicker { token }
}
