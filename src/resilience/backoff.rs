//! Reconnect delays.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt number `attempts` (zero-based):
/// `min(2^attempts, max_secs)` seconds.
pub fn reconnect_delay(attempts: u32, max_secs: u64) -> Duration {
    let secs = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
    Duration::from_secs(secs.min(max_secs))
}

/// Same as [`reconnect_delay`] with up to 10% of random jitter added,
/// so many clients dropped together do not reconnect in lockstep.
pub fn reconnect_delay_with_jitter(attempts: u32, max_secs: u64) -> Duration {
    let delay = reconnect_delay(attempts, max_secs);
    let jitter_range = delay.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    delay + Duration::from_millis(jitter)
}
