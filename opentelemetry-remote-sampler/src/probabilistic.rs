use crate::decision::{sampler_tags, trace_id_low, IsSampled, SAMPLER_TYPE_PROBABILISTIC};
use crate::error::{RemoteSamplerError, RemoteSamplerResult};
use opentelemetry::trace::TraceId;
use opentelemetry::KeyValue;
use std::fmt;

/// Upper bound of the "random" number taken from a trace id. The top bit is
/// masked so that the comparison stays within the positive `i64` range used by
/// other Jaeger clients.
const MAX_RANDOM_NUMBER: u64 = !(1 << 63);

/// Samples a fixed fraction of traces.
///
/// The decision is a pure function of the low 64 bits of the trace id, so all
/// processes configured with the same rate agree on the same trace.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilisticSampler {
    sampling_rate: f64,
    sampling_boundary: u64,
    tags: Vec<KeyValue>,
}

impl ProbabilisticSampler {
    /// Create a sampler with the given probability.
    ///
    /// Returns [`RemoteSamplerError::InvalidSamplingRate`] if `sampling_rate`
    /// is not within `[0.0, 1.0]`.
    pub fn new(sampling_rate: f64) -> RemoteSamplerResult<Self> {
        validate_sampling_rate(sampling_rate)?;
        Ok(ProbabilisticSampler {
            sampling_rate,
            sampling_boundary: sampling_boundary(sampling_rate),
            tags: sampler_tags(SAMPLER_TYPE_PROBABILISTIC, sampling_rate),
        })
    }

    /// Change the sampling probability. The sampler is left as is if the new
    /// rate is rejected.
    pub fn update(&mut self, sampling_rate: f64) -> RemoteSamplerResult<()> {
        validate_sampling_rate(sampling_rate)?;
        if self.sampling_rate != sampling_rate {
            *self = ProbabilisticSampler {
                sampling_rate,
                sampling_boundary: sampling_boundary(sampling_rate),
                tags: sampler_tags(SAMPLER_TYPE_PROBABILISTIC, sampling_rate),
            };
        }
        Ok(())
    }

    /// The configured sampling probability.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }
}

impl IsSampled for ProbabilisticSampler {
    fn is_sampled(&self, trace_id: TraceId, _operation: &str) -> (bool, Vec<KeyValue>) {
        let sampled = self.sampling_rate > 0.0
            && (trace_id_low(trace_id) & MAX_RANDOM_NUMBER) <= self.sampling_boundary;
        (sampled, self.tags.clone())
    }
}

impl fmt::Display for ProbabilisticSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProbabilisticSampler{{samplingRate={}}}", self.sampling_rate)
    }
}

pub(crate) fn validate_sampling_rate(sampling_rate: f64) -> RemoteSamplerResult<()> {
    if (0.0..=1.0).contains(&sampling_rate) {
        Ok(())
    } else {
        Err(RemoteSamplerError::InvalidSamplingRate(sampling_rate))
    }
}

fn sampling_boundary(sampling_rate: f64) -> u64 {
    (MAX_RANDOM_NUMBER as f64 * sampling_rate) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{SAMPLER_PARAM_KEY, SAMPLER_TYPE_KEY};
    use crate::testing::trace_id;
    use rstest::rstest;

    fn sampled(sampler: &ProbabilisticSampler, low: u64) -> bool {
        sampler
            .is_sampled(trace_id((0xabcd_u128 << 64) | low as u128), "op")
            .0
    }

    #[test]
    fn boundary_is_monotonic_in_rate() {
        let mut previous = 0;
        for step in 0..=100 {
            let sampler = ProbabilisticSampler::new(step as f64 / 100.0).unwrap();
            assert!(sampler.sampling_boundary >= previous);
            previous = sampler.sampling_boundary;
        }
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(MAX_RANDOM_NUMBER / 2)]
    #[case(MAX_RANDOM_NUMBER)]
    #[case(u64::MAX)]
    fn zero_rate_samples_nothing_and_full_rate_everything(#[case] low: u64) {
        let never = ProbabilisticSampler::new(0.0).unwrap();
        let always = ProbabilisticSampler::new(1.0).unwrap();
        assert!(!sampled(&never, low));
        assert!(sampled(&always, low));
    }

    #[test]
    fn decision_uses_low_bits_against_boundary() {
        let sampler = ProbabilisticSampler::new(0.5).unwrap();
        let boundary = sampler.sampling_boundary;
        assert!(sampled(&sampler, boundary));
        assert!(!sampled(&sampler, boundary + 1));
        // the top bit is masked out
        assert!(sampled(&sampler, (1 << 63) | 1));
    }

    #[test]
    fn decision_is_deterministic() {
        let sampler = ProbabilisticSampler::new(0.3).unwrap();
        for _ in 0..100 {
            let trace_id = trace_id(rand::random::<u128>());
            let first = sampler.is_sampled(trace_id, "op");
            for _ in 0..5 {
                assert_eq!(first, sampler.is_sampled(trace_id, "other-op"));
            }
        }
    }

    #[rstest]
    #[case(-0.1)]
    #[case(1.1)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn rejects_out_of_range_rates(#[case] rate: f64) {
        assert!(matches!(
            ProbabilisticSampler::new(rate),
            Err(RemoteSamplerError::InvalidSamplingRate(_))
        ));

        let mut sampler = ProbabilisticSampler::new(0.25).unwrap();
        assert!(sampler.update(rate).is_err());
        assert_eq!(sampler, ProbabilisticSampler::new(0.25).unwrap());
    }

    #[test]
    fn update_changes_boundary_and_tags() {
        let mut sampler = ProbabilisticSampler::new(0.001).unwrap();
        sampler.update(1.0).unwrap();
        assert_eq!(sampler.sampling_rate(), 1.0);

        let (sampled, tags) = sampler.is_sampled(trace_id(42), "op");
        assert!(sampled);
        assert_eq!(
            tags,
            vec![
                KeyValue::new(SAMPLER_TYPE_KEY, "probabilistic"),
                KeyValue::new(SAMPLER_PARAM_KEY, 1.0),
            ]
        );
    }

    #[test]
    fn description() {
        let sampler = ProbabilisticSampler::new(0.25).unwrap();
        assert_eq!(
            sampler.to_string(),
            "ProbabilisticSampler{samplingRate=0.25}"
        );
    }
}
