use std::time::Duration;

use tokio::time::Instant;

/// Poll `ready` every `interval` until it holds or `max_wait` elapses.
///
/// Checks once before sleeping. Returns whether `ready` ended up true.
pub async fn wait_until<F>(interval: Duration, max_wait: Duration, mut ready: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + max_wait;
    loop {
        if ready() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
