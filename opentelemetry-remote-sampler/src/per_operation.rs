use crate::decision::{undecided, Decision, IsSampled, SpanParams, SpanSampler};
use crate::error::RemoteSamplerResult;
use crate::guaranteed_throughput::GuaranteedThroughputSampler;
use crate::probabilistic::{validate_sampling_rate, ProbabilisticSampler};
use crate::rate_limit::validate_rate_limit;
use crate::remote::PerOperationSamplingStrategies;
use opentelemetry::trace::TraceId;
use opentelemetry::{otel_warn, Key, KeyValue, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Default cap on the number of operations a [`PerOperationSampler`] tracks.
pub const DEFAULT_MAX_OPERATIONS: usize = 2000;

/// Parameters of a [`PerOperationSampler`].
#[derive(Clone, Debug)]
pub struct PerOperationSamplerParams {
    /// Maximum number of operations with a dedicated sampler. `0` means
    /// [`DEFAULT_MAX_OPERATIONS`].
    pub max_operations: usize,
    /// Whether decisions stay open until the operation name is final.
    pub operation_name_late_binding: bool,
    /// Initial strategies.
    pub strategies: PerOperationSamplingStrategies,
}

/// Samples each operation with its own [`GuaranteedThroughputSampler`].
///
/// Operations are tracked lazily, the first time they are seen, and up to
/// `max_operations`. Operations past the cap share the default probabilistic
/// sampler and get no lower bound.
#[derive(Debug)]
pub struct PerOperationSampler {
    state: RwLock<PerOperationState>,
    max_operations: usize,
    operation_name_late_binding: bool,
}

#[derive(Debug)]
struct PerOperationState {
    samplers: HashMap<String, GuaranteedThroughputSampler>,
    default_sampler: ProbabilisticSampler,
    lower_bound: f64,
}

impl PerOperationState {
    // callers hold the write lock, so the cap check and the insert are atomic
    fn sampler_for_operation(&mut self, operation: &str, max_operations: usize) -> &dyn IsSampled {
        if self.samplers.contains_key(operation) {
            return &self.samplers[operation];
        }
        if self.samplers.len() >= max_operations {
            return &self.default_sampler;
        }
        match GuaranteedThroughputSampler::new(self.lower_bound, self.default_sampler.sampling_rate())
        {
            Ok(sampler) => &*self
                .samplers
                .entry(operation.to_string())
                .or_insert(sampler),
            Err(err) => {
                otel_warn!(
                    name: "RemoteSampler.PerOperation.SamplerCreationFailed",
                    operation = operation,
                    error = format!("{}", err)
                );
                &self.default_sampler
            }
        }
    }
}

impl PerOperationSampler {
    /// Create a sampler from the initial strategies in `params`.
    ///
    /// Strategies past `max_operations` are ignored.
    pub fn new(params: PerOperationSamplerParams) -> RemoteSamplerResult<Self> {
        let max_operations = match params.max_operations {
            0 => DEFAULT_MAX_OPERATIONS,
            max => max,
        };
        let strategies = &params.strategies;
        validate(strategies)?;

        let mut samplers = HashMap::new();
        for strategy in capped(strategies, max_operations) {
            samplers.insert(
                strategy.operation.clone(),
                GuaranteedThroughputSampler::new(
                    strategies.default_lower_bound_traces_per_second,
                    strategy.probabilistic_sampling.sampling_rate,
                )?,
            );
        }

        Ok(PerOperationSampler {
            state: RwLock::new(PerOperationState {
                samplers,
                default_sampler: ProbabilisticSampler::new(
                    strategies.default_sampling_probability,
                )?,
                lower_bound: strategies.default_lower_bound_traces_per_second,
            }),
            max_operations,
            operation_name_late_binding: params.operation_name_late_binding,
        })
    }

    /// Replace the strategies.
    ///
    /// Operations listed in `strategies` keep their sampler (updated with the
    /// new rate), or get a fresh one. Operations that are not listed lose
    /// their sampler. Nothing changes if any rate in `strategies` is invalid.
    pub fn update(&self, strategies: &PerOperationSamplingStrategies) -> RemoteSamplerResult<()> {
        validate(strategies)?;
        let lower_bound = strategies.default_lower_bound_traces_per_second;

        let operations: Vec<_> = capped(strategies, self.max_operations).collect();

        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        // fallible steps first, the tracked operations are swapped in at the end
        let default_sampler =
            if state.default_sampler.sampling_rate() != strategies.default_sampling_probability {
                Some(ProbabilisticSampler::new(
                    strategies.default_sampling_probability,
                )?)
            } else {
                None
            };
        let mut samplers = HashMap::new();
        for strategy in &operations {
            let sampling_rate = strategy.probabilistic_sampling.sampling_rate;
            match state.samplers.get_mut(&strategy.operation) {
                Some(sampler) => sampler.update(lower_bound, sampling_rate)?,
                None => {
                    samplers.insert(
                        strategy.operation.clone(),
                        GuaranteedThroughputSampler::new(lower_bound, sampling_rate)?,
                    );
                }
            }
        }

        for strategy in &operations {
            if let Some(sampler) = state.samplers.remove(&strategy.operation) {
                samplers.insert(strategy.operation.clone(), sampler);
            }
        }
        state.samplers = samplers;
        state.lower_bound = lower_bound;
        if let Some(default_sampler) = default_sampler {
            state.default_sampler = default_sampler;
        }
        Ok(())
    }

    /// Number of operations with a dedicated sampler.
    pub fn operation_count(&self) -> usize {
        self.read_state().samplers.len()
    }

    /// The sampling probability used for operations without a strategy.
    pub fn default_sampling_rate(&self) -> f64 {
        self.read_state().default_sampler.sampling_rate()
    }

    /// The lower bound applied to every tracked operation.
    pub fn lower_bound(&self) -> f64 {
        self.read_state().lower_bound
    }

    /// The sampling rate and lower bound of the sampler dedicated to
    /// `operation`, if there is one.
    pub fn operation_sampling_rate(&self, operation: &str) -> Option<(f64, f64)> {
        self.read_state()
            .samplers
            .get(operation)
            .map(|sampler| (sampler.sampling_rate(), sampler.lower_bound()))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, PerOperationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn decide(&self, trace_id: TraceId, operation: &str) -> Decision {
        let (sample, tags) = self.is_sampled(trace_id, operation);
        Decision {
            sample,
            retryable: self.operation_name_late_binding,
            tags,
        }
    }
}

impl IsSampled for PerOperationSampler {
    fn is_sampled(&self, trace_id: TraceId, operation: &str) -> (bool, Vec<KeyValue>) {
        {
            let state = self.read_state();
            if let Some(sampler) = state.samplers.get(operation) {
                return sampler.is_sampled(trace_id, operation);
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .sampler_for_operation(operation, self.max_operations)
            .is_sampled(trace_id, operation)
    }
}

impl SpanSampler for PerOperationSampler {
    fn on_create_span(&self, span: &SpanParams<'_>) -> Decision {
        self.decide(span.trace_id, span.operation)
    }

    fn on_set_operation_name(&self, span: &SpanParams<'_>, operation: &str) -> Decision {
        self.decide(span.trace_id, operation)
    }

    fn on_set_tag(&self, _span: &SpanParams<'_>, _key: &Key, _value: &Value) -> Decision {
        undecided()
    }

    fn on_finish_span(&self, _span: &SpanParams<'_>) -> Decision {
        undecided()
    }
}

impl PerOperationSampler {
    /// Describes the configured rates. Unlike the `Display` output this does
    /// not change as operations are tracked.
    pub fn configuration(&self) -> String {
        let state = self.read_state();
        format!(
            "PerOperationSampler{{defaultSamplingRate={}, lowerBound={}, maxOperations={}}}",
            state.default_sampler.sampling_rate(),
            state.lower_bound,
            self.max_operations
        )
    }
}

impl fmt::Display for PerOperationSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        write!(
            f,
            "PerOperationSampler{{defaultSamplingRate={}, lowerBound={}, operations={}, maxOperations={}}}",
            state.default_sampler.sampling_rate(),
            state.lower_bound,
            state.samplers.len(),
            self.max_operations
        )
    }
}

fn validate(strategies: &PerOperationSamplingStrategies) -> RemoteSamplerResult<()> {
    validate_sampling_rate(strategies.default_sampling_probability)?;
    validate_rate_limit(strategies.default_lower_bound_traces_per_second)?;
    for strategy in &strategies.per_operation_strategies {
        validate_sampling_rate(strategy.probabilistic_sampling.sampling_rate)?;
    }
    Ok(())
}

fn capped(
    strategies: &PerOperationSamplingStrategies,
    max_operations: usize,
) -> impl Iterator<Item = &crate::remote::OperationSamplingStrategy> {
    if strategies.per_operation_strategies.len() > max_operations {
        otel_warn!(
            name: "RemoteSampler.PerOperation.TooManyOperations",
            operations = strategies.per_operation_strategies.len(),
            max_operations = max_operations
        );
    }
    strategies.per_operation_strategies.iter().take(max_operations)
}
