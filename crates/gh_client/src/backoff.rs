use std::time::Duration;

const BASE_MS: u64 = 250;
const CAP_MS: u64 = 5_000;
const JITTER_FRACTION: f64 = 0.2;

/// Backoff for the nth retry of a remote call (0-based): doubles from 250 ms
/// toward a 5 s ceiling, with ±20% jitter.
pub fn retry_backoff(attempt: u32) -> Duration {
    let doubled = BASE_MS.saturating_mul(1u64 << attempt.min(10));
    let nominal = doubled.min(CAP_MS) as f64;
    let spread = 1.0 + JITTER_FRACTION * (2.0 * fastrand::f64() - 1.0);
    let millis = (nominal * spread).round() as u64;
    Duration::from_millis(millis.min(CAP_MS))
}
