use std::time::Duration;

/// Exponential backoff with a cap; `attempt` is zero-based. A provider's
/// `retry_after_ms` hint, when present, always wins.
pub fn next_backoff(base: Duration, cap: Duration, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(ms) = retry_after_ms {
        return Duration::from_millis(ms);
    }
    let multiplier = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
    let scaled = base.saturating_mul(multiplier as u32);
    scaled.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_each_attempt_up_to_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        assert_eq!(next_backoff(base, cap, 0, None), Duration::from_secs(1));
        assert_eq!(next_backoff(base, cap, 1, None), Duration::from_secs(2));
        assert_eq!(next_backoff(base, cap, 2, None), Duration::from_secs(4));
        assert_eq!(next_backoff(base, cap, 10, None), cap);
    }

    #[test]
    fn retry_after_hint_overrides_backoff() {
        let got = next_backoff(Duration::from_secs(1), Duration::from_secs(10), 5, Some(250));
        assert_eq!(got, Duration::from_millis(250));
    }
}
