//! Applies a strategy document onto the sampler currently in use.
//!
//! Strategies are tried in a fixed order: per operation, probabilistic, rate
//! limiting. A strategy of the same kind as the active sampler updates it in
//! place, so credit balances and lazily tracked operations survive a refresh.
//! A strategy of another kind replaces the active sampler with a new one.
use crate::decision::{Decision, LegacySampler, SpanParams, SpanSampler};
use crate::error::{RemoteSamplerError, RemoteSamplerResult};
use crate::per_operation::{PerOperationSampler, PerOperationSamplerParams};
use crate::probabilistic::ProbabilisticSampler;
use crate::rate_limit::RateLimitingSampler;
use crate::remote::{SamplingStrategy, SamplingStrategyResponse};
use opentelemetry::{Key, Value};
use std::fmt;

#[derive(Clone, Copy, Debug)]
pub(crate) struct UpdaterParams {
    pub(crate) max_operations: usize,
    pub(crate) operation_name_late_binding: bool,
}

#[derive(Debug)]
pub(crate) enum ActiveSampler {
    Probabilistic(LegacySampler<ProbabilisticSampler>),
    RateLimiting(LegacySampler<RateLimitingSampler>),
    PerOperation(PerOperationSampler),
    Custom(Box<dyn SpanSampler>),
}

impl ActiveSampler {
    fn as_span_sampler(&self) -> &dyn SpanSampler {
        match self {
            ActiveSampler::Probabilistic(sampler) => sampler,
            ActiveSampler::RateLimiting(sampler) => sampler,
            ActiveSampler::PerOperation(sampler) => sampler,
            ActiveSampler::Custom(sampler) => sampler.as_ref(),
        }
    }

    // stable across refreshes that carry the same strategy, used as a metric
    // attribute
    pub(crate) fn configuration(&self) -> String {
        match self {
            ActiveSampler::PerOperation(sampler) => sampler.configuration(),
            other => other.to_string(),
        }
    }
}

impl SpanSampler for ActiveSampler {
    fn on_create_span(&self, span: &SpanParams<'_>) -> Decision {
        self.as_span_sampler().on_create_span(span)
    }

    fn on_set_operation_name(&self, span: &SpanParams<'_>, operation: &str) -> Decision {
        self.as_span_sampler().on_set_operation_name(span, operation)
    }

    fn on_set_tag(&self, span: &SpanParams<'_>, key: &Key, value: &Value) -> Decision {
        self.as_span_sampler().on_set_tag(span, key, value)
    }

    fn on_finish_span(&self, span: &SpanParams<'_>) -> Decision {
        self.as_span_sampler().on_finish_span(span)
    }
}

impl fmt::Display for ActiveSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveSampler::Probabilistic(sampler) => fmt::Display::fmt(sampler.get_ref(), f),
            ActiveSampler::RateLimiting(sampler) => fmt::Display::fmt(sampler.get_ref(), f),
            ActiveSampler::PerOperation(sampler) => fmt::Display::fmt(sampler, f),
            ActiveSampler::Custom(sampler) => write!(f, "{:?}", sampler),
        }
    }
}

/// Apply `response` onto `active`. `active` is left untouched on error.
pub(crate) fn apply_response(
    active: &mut ActiveSampler,
    response: SamplingStrategyResponse,
    params: &UpdaterParams,
) -> RemoteSamplerResult<()> {
    let strategy = response
        .into_strategy()
        .ok_or(RemoteSamplerError::UnrecognizedStrategy)?;
    apply_strategy(active, strategy, params)
}

pub(crate) fn apply_strategy(
    active: &mut ActiveSampler,
    strategy: SamplingStrategy,
    params: &UpdaterParams,
) -> RemoteSamplerResult<()> {
    match strategy {
        SamplingStrategy::PerOperation(strategies) => match active {
            ActiveSampler::PerOperation(sampler) => sampler.update(&strategies),
            _ => {
                *active = ActiveSampler::PerOperation(PerOperationSampler::new(
                    PerOperationSamplerParams {
                        max_operations: params.max_operations,
                        operation_name_late_binding: params.operation_name_late_binding,
                        strategies,
                    },
                )?);
                Ok(())
            }
        },
        SamplingStrategy::Probabilistic(strategy) => match active {
            ActiveSampler::Probabilistic(sampler) => {
                sampler.get_mut().update(strategy.sampling_rate)
            }
            _ => {
                *active = ActiveSampler::Probabilistic(LegacySampler::new(
                    ProbabilisticSampler::new(strategy.sampling_rate)?,
                ));
                Ok(())
            }
        },
        SamplingStrategy::RateLimiting(strategy) => match active {
            ActiveSampler::RateLimiting(sampler) => {
                sampler.get_mut().update(strategy.max_traces_per_second)
            }
            _ => {
                *active = ActiveSampler::RateLimiting(LegacySampler::new(
                    RateLimitingSampler::new(strategy.max_traces_per_second)?,
                ));
                Ok(())
            }
        },
    }
}
