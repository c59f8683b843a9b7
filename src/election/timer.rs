use rand::Rng;
use std::time::Duration;
use tokio::time::{interval, Interval};

/// Draws the effective election timeout, uniform on [base, 2 * base).
/// Randomization desynchronizes candidates and avoids repeated split votes.
pub fn random_election_timeout(base_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(base_ms..base_ms * 2);
    Duration::from_millis(timeout_ms)
}

/// Creates the leader's heartbeat interval. The first tick completes
/// immediately, so a fresh leader announces itself without delay.
pub fn heartbeat_interval(interval_ms: u64) -> Interval {
    interval(Duration::from_millis(interval_ms))
}
