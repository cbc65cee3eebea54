//! Waiting on background work.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Polling period of [`wait_for`].
pub const POLL: Duration = Duration::from_millis(5);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns how long it took, or `None` on timeout. Under paused time the
/// clock advances while the background tasks are idle.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> Option<Duration>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    loop {
        if condition() {
            return Some(started.elapsed());
        }
        if started.elapsed() >= timeout {
            return None;
        }
        sleep(POLL).await;
    }
}
