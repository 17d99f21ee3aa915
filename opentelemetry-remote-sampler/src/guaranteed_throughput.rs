use crate::decision::IsSampled;
use crate::error::RemoteSamplerResult;
use crate::probabilistic::{validate_sampling_rate, ProbabilisticSampler};
use crate::rate_limit::{validate_rate_limit, RateLimitingSampler};
use opentelemetry::trace::TraceId;
use opentelemetry::KeyValue;
use std::fmt;

/// A probabilistic sampler with a floor of `lower_bound` sampled traces per
/// second.
///
/// Every decision consumes a lower bound credit, also the ones the
/// probabilistic sampler already accepted.
#[derive(Debug)]
pub struct GuaranteedThroughputSampler {
    probabilistic_sampler: ProbabilisticSampler,
    lower_bound_sampler: RateLimitingSampler,
    lower_bound: f64,
}

impl GuaranteedThroughputSampler {
    /// Create a sampler sampling `sampling_rate` of the traces, and at least
    /// `lower_bound` traces per second.
    pub fn new(lower_bound: f64, sampling_rate: f64) -> RemoteSamplerResult<Self> {
        Ok(GuaranteedThroughputSampler {
            probabilistic_sampler: ProbabilisticSampler::new(sampling_rate)?,
            lower_bound_sampler: RateLimitingSampler::new(lower_bound)?,
            lower_bound,
        })
    }

    /// Update both parameters. Nothing changes if either one is rejected.
    pub fn update(&mut self, lower_bound: f64, sampling_rate: f64) -> RemoteSamplerResult<()> {
        validate_sampling_rate(sampling_rate)?;
        validate_rate_limit(lower_bound)?;

        self.probabilistic_sampler.update(sampling_rate)?;
        if self.lower_bound != lower_bound {
            self.lower_bound_sampler.update(lower_bound)?;
            self.lower_bound = lower_bound;
        }
        Ok(())
    }

    /// The probability of the inner probabilistic sampler.
    pub fn sampling_rate(&self) -> f64 {
        self.probabilistic_sampler.sampling_rate()
    }

    /// The guaranteed number of traces per second.
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }
}

impl IsSampled for GuaranteedThroughputSampler {
    fn is_sampled(&self, trace_id: TraceId, operation: &str) -> (bool, Vec<KeyValue>) {
        let (sampled, tags) = self.probabilistic_sampler.is_sampled(trace_id, operation);
        if sampled {
            // consume the credit anyway, the verdict is already known
            let _ = self.lower_bound_sampler.is_sampled(trace_id, operation);
            return (true, tags);
        }
        self.lower_bound_sampler.is_sampled(trace_id, operation)
    }
}

impl fmt::Display for GuaranteedThroughputSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GuaranteedThroughputSampler{{samplingRate={}, lowerBound={}}}",
            self.sampling_rate(),
            self.lower_bound
        )
    }
}
