use crate::decision::{sampler_tags, IsSampled, SAMPLER_TYPE_RATE_LIMITING};
use crate::error::{RemoteSamplerError, RemoteSamplerResult};
use opentelemetry::trace::TraceId;
use opentelemetry::KeyValue;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

// credit bucket: starts full, refills continuously at `credits_per_second`
// up to `max_balance`, the balance never goes negative
#[derive(Debug)]
pub(crate) struct RateLimiter {
    credits_per_second: f64,
    balance: f64,
    max_balance: f64,
    last_tick: Instant,
}

impl RateLimiter {
    pub(crate) fn new(credits_per_second: f64, max_balance: f64) -> RateLimiter {
        Self::new_at(credits_per_second, max_balance, Instant::now())
    }

    fn new_at(credits_per_second: f64, max_balance: f64, now: Instant) -> RateLimiter {
        RateLimiter {
            credits_per_second,
            balance: max_balance,
            max_balance,
            last_tick: now,
        }
    }

    pub(crate) fn check_credit(&mut self, item_cost: f64) -> bool {
        self.check_credit_at(item_cost, Instant::now())
    }

    fn check_credit_at(&mut self, item_cost: f64, now: Instant) -> bool {
        self.refill(now);
        if self.balance >= item_cost {
            self.balance -= item_cost;
            true
        } else {
            false
        }
    }

    pub(crate) fn update(&mut self, credits_per_second: f64, max_balance: f64) {
        self.update_at(credits_per_second, max_balance, Instant::now())
    }

    // keeps the bucket as full (relatively) as it was under the old capacity
    fn update_at(&mut self, credits_per_second: f64, max_balance: f64, now: Instant) {
        self.refill(now);
        self.balance = self.balance * max_balance / self.max_balance;
        self.credits_per_second = credits_per_second;
        self.max_balance = max_balance;
    }

    fn refill(&mut self, now: Instant) {
        if let Some(elapsed) = now.checked_duration_since(self.last_tick) {
            self.last_tick = now;
            self.balance = f64::min(
                self.balance + elapsed.as_secs_f64() * self.credits_per_second,
                self.max_balance,
            );
        }
    }
}

/// Samples at most a fixed number of traces per second.
///
/// The first `max(max_traces_per_second, 1)` traces are sampled right away,
/// after that credits are replenished continuously.
#[derive(Debug)]
pub struct RateLimitingSampler {
    max_traces_per_second: f64,
    rate_limiter: Mutex<RateLimiter>,
    tags: Vec<KeyValue>,
}

impl RateLimitingSampler {
    /// Create a sampler allowing `max_traces_per_second`.
    ///
    /// Returns [`RemoteSamplerError::InvalidRateLimit`] for negative or non
    /// finite values.
    pub fn new(max_traces_per_second: f64) -> RemoteSamplerResult<Self> {
        validate_rate_limit(max_traces_per_second)?;
        Ok(RateLimitingSampler {
            max_traces_per_second,
            rate_limiter: Mutex::new(RateLimiter::new(
                max_traces_per_second,
                max_balance(max_traces_per_second),
            )),
            tags: sampler_tags(SAMPLER_TYPE_RATE_LIMITING, max_traces_per_second),
        })
    }

    /// Change the rate. The credit bucket is only reconfigured when the rate
    /// actually changes, so repeated identical updates do not hand out new
    /// credits.
    pub fn update(&mut self, max_traces_per_second: f64) -> RemoteSamplerResult<()> {
        validate_rate_limit(max_traces_per_second)?;
        if self.max_traces_per_second != max_traces_per_second {
            self.rate_limiter
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .update(max_traces_per_second, max_balance(max_traces_per_second));
            self.max_traces_per_second = max_traces_per_second;
            self.tags = sampler_tags(SAMPLER_TYPE_RATE_LIMITING, max_traces_per_second);
        }
        Ok(())
    }

    /// The configured number of traces per second.
    pub fn max_traces_per_second(&self) -> f64 {
        self.max_traces_per_second
    }
}

impl IsSampled for RateLimitingSampler {
    fn is_sampled(&self, _trace_id: TraceId, _operation: &str) -> (bool, Vec<KeyValue>) {
        let sampled = self
            .rate_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_credit(1.0);
        (sampled, self.tags.clone())
    }
}

impl fmt::Display for RateLimitingSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RateLimitingSampler{{maxTracesPerSecond={}}}",
            self.max_traces_per_second
        )
    }
}

fn max_balance(max_traces_per_second: f64) -> f64 {
    f64::max(max_traces_per_second, 1.0)
}

pub(crate) fn validate_rate_limit(max_traces_per_second: f64) -> RemoteSamplerResult<()> {
    if max_traces_per_second.is_finite() && max_traces_per_second >= 0.0 {
        Ok(())
    } else {
        Err(RemoteSamplerError::InvalidRateLimit(max_traces_per_second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::trace_id;
    use std::time::Duration;

    #[test]
    fn test_rate_limiter() {
        // maximum balance 2, add 1 credit every 10 seconds
        let start = Instant::now();
        let mut rate_limiter = RateLimiter::new_at(0.1, 2.0, start);

        let test_cases = vec![
            (0, vec![true, true, false]),
            (1, vec![false]),
            (5, vec![false]),
            (10, vec![true, false]),
            (60, vec![true, true, false]), // maximum balance is 2
        ];

        for (elapsed_sec, cases) in test_cases.into_iter() {
            for should_pass in cases {
                assert_eq!(
                    should_pass,
                    rate_limiter.check_credit_at(1.0, start + Duration::from_secs(elapsed_sec))
                )
            }
        }
    }

    #[test]
    fn test_balance_never_negative() {
        let start = Instant::now();
        let mut rate_limiter = RateLimiter::new_at(1.0, 1.0, start);
        for _ in 0..10 {
            rate_limiter.check_credit_at(1.0, start);
            assert!(rate_limiter.balance >= 0.0);
        }
        assert!(!rate_limiter.check_credit_at(1.0, start + Duration::from_millis(500)));
        assert!(rate_limiter.check_credit_at(1.0, start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_idle_period_does_not_exceed_burst() {
        let start = Instant::now();
        let mut rate_limiter = RateLimiter::new_at(1.0, 1.0, start);
        let idle = start + Duration::from_secs(100);
        let sampled: Vec<bool> = (0..3)
            .map(|ms| rate_limiter.check_credit_at(1.0, idle + Duration::from_millis(ms)))
            .collect();
        assert_eq!(sampled, vec![true, false, false]);

        let mut rate_limiter = RateLimiter::new_at(2.0, 2.0, start);
        let idle = start + Duration::from_secs(10);
        let sampled = (0..5)
            .filter(|step| {
                rate_limiter.check_credit_at(1.0, idle + Duration::from_millis(step * 10))
            })
            .count();
        assert_eq!(sampled, 2);
    }

    #[test]
    fn test_earlier_timestamp_does_not_refill() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut rate_limiter = RateLimiter::new_at(1.0, 1.0, start);
        assert!(rate_limiter.check_credit_at(1.0, start));
        assert!(!rate_limiter.check_credit_at(1.0, start - Duration::from_secs(5)));
        assert_eq!(rate_limiter.last_tick, start);
    }

    #[test]
    fn test_update_scales_balance() {
        let start = Instant::now();
        let mut rate_limiter = RateLimiter::new_at(1.0, 1.0, start);
        rate_limiter.update_at(2.0, 2.0, start);
        assert!(rate_limiter.check_credit_at(1.0, start));
        assert!(rate_limiter.check_credit_at(1.0, start));
        assert!(!rate_limiter.check_credit_at(1.0, start));

        // half full stays half full
        rate_limiter.update_at(4.0, 4.0, start + Duration::from_millis(500));
        assert_eq!(rate_limiter.balance, 2.0);
    }

    #[test]
    fn test_steady_state_never_exceeds_rate() {
        let start = Instant::now();
        let mut rate_limiter = RateLimiter::new_at(3.0, 3.0, start);
        while rate_limiter.check_credit_at(1.0, start) {}

        for window in 0..3u64 {
            let mut sampled = 0;
            for step in 1..=100u64 {
                let now = start + Duration::from_millis(window * 1000 + step * 10);
                if rate_limiter.check_credit_at(1.0, now) {
                    sampled += 1;
                }
            }
            assert!(sampled <= 3, "window {} sampled {}", window, sampled);
            assert!(sampled >= 2, "window {} sampled {}", window, sampled);
        }
    }

    #[test]
    fn test_sampler_initial_burst() {
        let sampler = RateLimitingSampler::new(2.0).unwrap();
        let sampled = (0..5)
            .filter(|_| sampler.is_sampled(trace_id(1), "op").0)
            .count();
        assert_eq!(sampled, 2);
    }

    #[test]
    fn test_sampler_burst_is_at_least_one() {
        let sampler = RateLimitingSampler::new(0.1).unwrap();
        assert!(sampler.is_sampled(trace_id(1), "op").0);
        assert!(!sampler.is_sampled(trace_id(2), "op").0);
    }

    #[test]
    fn test_sampler_noop_update_keeps_balance() {
        let mut sampler = RateLimitingSampler::new(1.0).unwrap();
        assert!(sampler.is_sampled(trace_id(1), "op").0);
        sampler.update(1.0).unwrap();
        assert!(!sampler.is_sampled(trace_id(2), "op").0);
    }

    #[test]
    fn test_sampler_update() {
        let mut sampler = RateLimitingSampler::new(1.0).unwrap();
        sampler.update(5.0).unwrap();
        assert_eq!(sampler.max_traces_per_second(), 5.0);
        assert_eq!(sampler.to_string(), "RateLimitingSampler{maxTracesPerSecond=5}");

        assert!(matches!(
            sampler.update(-1.0),
            Err(RemoteSamplerError::InvalidRateLimit(_))
        ));
        assert!(RateLimitingSampler::new(f64::NAN).is_err());
        assert_eq!(sampler.max_traces_per_second(), 5.0);
    }
}
