// ── Retry backoff ──

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Exponential backoff with deterministic jitter.
///
/// `next_eligible_time` is a pure function of its inputs: the scheduler can
/// recompute it every tick and get the same answer, while fabrics that
/// failed at different instants still land at different retry times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fractional spread around the nominal delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(30 * 60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay before jitter: `min(base * 2^attempt, cap)`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    /// Delay after jitter. The seed mixes the attempt number with the
    /// sub-day position of `last_attempt`.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn delay(&self, attempt: u32, last_attempt: DateTime<Utc>) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let spread = self.jitter.clamp(0.0, 1.0);
        let day_ms = last_attempt.timestamp_millis().rem_euclid(86_400_000) as f64;
        let seed = f64::from(attempt) * 7.3 + day_ms / 1000.0;
        let factor = 1.0 + spread * seed.sin();
        Duration::try_from_secs_f64((nominal * factor).max(0.0)).unwrap_or(self.cap)
    }

    /// Earliest time a fabric that has already been retried `attempt` times
    /// may be tried again.
    pub fn next_eligible_time(&self, attempt: u32, last_attempt: DateTime<Utc>) -> DateTime<Utc> {
        add(last_attempt, self.delay(attempt, last_attempt))
    }

    /// Like [`Self::next_eligible_time`], but never earlier than a server
    /// `Retry-After` hint.
    pub fn next_eligible_time_with_hint(
        &self,
        attempt: u32,
        last_attempt: DateTime<Utc>,
        retry_after: Option<Duration>,
    ) -> DateTime<Utc> {
        let backoff = self.next_eligible_time(attempt, last_attempt);
        retry_after.map_or(backoff, |hint| backoff.max(add(last_attempt, hint)))
    }
}

fn add(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00.250Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn within_jitter(actual: Duration, nominal: Duration) -> bool {
        let (lo, hi) = (nominal.mul_f64(0.8), nominal.mul_f64(1.2));
        actual >= lo && actual <= hi
    }

    #[test]
    fn nominal_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(30));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(60));
        assert_eq!(policy.nominal_delay(5), Duration::from_secs(960));
        assert_eq!(policy.nominal_delay(6), Duration::from_secs(1800));
        assert_eq!(policy.nominal_delay(40), Duration::from_secs(1800));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();
        for attempt in 0..12 {
            for offset_ms in [0, 17, 999, 12_345, 3_600_000] {
                let last = t0() + TimeDelta::milliseconds(offset_ms);
                let delay = policy.delay(attempt, last);
                assert!(
                    within_jitter(delay, policy.nominal_delay(attempt)),
                    "attempt {attempt}, offset {offset_ms}: {delay:?}"
                );
            }
        }
    }

    #[test]
    fn next_eligible_time_is_stable() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_eligible_time(3, t0()),
            policy.next_eligible_time(3, t0())
        );
    }

    #[test]
    fn different_failure_instants_spread_out() {
        let policy = RetryPolicy::default();
        let a = policy.delay(2, t0());
        let b = policy.delay(2, t0() + TimeDelta::milliseconds(1_500));
        assert_ne!(a, b);
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.next_eligible_time(1, t0()),
            t0() + TimeDelta::seconds(60)
        );
    }

    #[test]
    fn retry_after_hint_pushes_out() {
        let policy = RetryPolicy::default();
        let hinted =
            policy.next_eligible_time_with_hint(0, t0(), Some(Duration::from_secs(600)));
        assert_eq!(hinted, t0() + TimeDelta::seconds(600));

        let short = policy.next_eligible_time_with_hint(0, t0(), Some(Duration::from_secs(1)));
        assert_eq!(short, policy.next_eligible_time(0, t0()));
    }
}
