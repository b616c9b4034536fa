//! Queue owner idle-TTL normalization

/// Default idle TTL for a queue owner: five minutes
pub const DEFAULT_IDLE_TTL_MS: u64 = 300_000;

/// Minimum wait before the first task, regardless of TTL
pub const FIRST_TASK_MIN_WAIT_MS: u64 = 1_000;

/// Normalize a user-supplied idle TTL into milliseconds
///
/// `None` and anything unusable (negative, NaN, infinite) fall back to
/// the default; `0` means keep the owner alive forever; a positive finite
/// value is rounded to whole milliseconds.
pub fn normalize_idle_ttl(ttl_ms: Option<f64>) -> u64 {
    match ttl_ms {
        None => DEFAULT_IDLE_TTL_MS,
        Some(v) if !v.is_finite() => DEFAULT_IDLE_TTL_MS,
        Some(v) if v < 0.0 => DEFAULT_IDLE_TTL_MS,
        Some(v) if v == 0.0 => 0,
        Some(v) => v.round() as u64,
    }
}

/// Wait budget before the first task is accepted
///
/// `ttl == 0` keeps the owner alive forever, also in the initial window.
pub fn first_task_wait_ms(ttl_ms: u64) -> u64 {
    if ttl_ms == 0 {
        0
    } else {
        ttl_ms.max(FIRST_TASK_MIN_WAIT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_table() {
        assert_eq!(normalize_idle_ttl(None), DEFAULT_IDLE_TTL_MS);
        assert_eq!(normalize_idle_ttl(Some(0.0)), 0);
        assert_eq!(normalize_idle_ttl(Some(-5.0)), DEFAULT_IDLE_TTL_MS);
        assert_eq!(normalize_idle_ttl(Some(f64::NAN)), DEFAULT_IDLE_TTL_MS);
        assert_eq!(normalize_idle_ttl(Some(f64::INFINITY)), DEFAULT_IDLE_TTL_MS);
        assert_eq!(normalize_idle_ttl(Some(f64::NEG_INFINITY)), DEFAULT_IDLE_TTL_MS);
        assert_eq!(normalize_idle_ttl(Some(1500.4)), 1500);
        assert_eq!(normalize_idle_ttl(Some(1500.6)), 1501);
    }

    #[test]
    fn test_first_task_wait() {
        assert_eq!(first_task_wait_ms(0), 0);
        assert_eq!(first_task_wait_ms(200), FIRST_TASK_MIN_WAIT_MS);
        assert_eq!(first_task_wait_ms(30_000), 30_000);
    }
}
