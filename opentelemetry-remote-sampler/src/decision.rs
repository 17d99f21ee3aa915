//! Sampling decisions and the two sampler interfaces.
//!
//! [`IsSampled`] is the simple form: a pure function of the trace id and the
//! operation name. [`SpanSampler`] is the span lifecycle form: it is asked
//! again when the operation name changes, when a tag is set and when the span
//! finishes, and it may answer with a non final ([`Decision::retryable`])
//! result. [`LegacySampler`] turns the former into the latter.
use opentelemetry::trace::TraceId;
use opentelemetry::{Key, KeyValue, Value};
use std::fmt;

/// Attribute key naming the kind of sampler that made a decision.
pub const SAMPLER_TYPE_KEY: &str = "sampler.type";
/// Attribute key holding the parameter (rate) of the sampler that made a decision.
pub const SAMPLER_PARAM_KEY: &str = "sampler.param";

pub(crate) const SAMPLER_TYPE_PROBABILISTIC: &str = "probabilistic";
pub(crate) const SAMPLER_TYPE_RATE_LIMITING: &str = "ratelimiting";

pub(crate) fn sampler_tags(sampler_type: &'static str, param: f64) -> Vec<KeyValue> {
    vec![
        KeyValue::new(SAMPLER_TYPE_KEY, sampler_type),
        KeyValue::new(SAMPLER_PARAM_KEY, param),
    ]
}

/// The outcome of asking a [`SpanSampler`] about a span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decision {
    /// Whether the trace should be recorded and exported.
    pub sample: bool,
    /// Whether the decision may still change later in the span's life.
    pub retryable: bool,
    /// Provenance of the decision, attached to the span.
    pub tags: Vec<KeyValue>,
}

impl Decision {
    fn not_sampled(retryable: bool) -> Self {
        Decision {
            sample: false,
            retryable,
            tags: Vec::new(),
        }
    }
}

/// What a [`SpanSampler`] knows about the span it decides for.
#[derive(Clone, Copy, Debug)]
pub struct SpanParams<'a> {
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// Current operation (span) name.
    pub operation: &'a str,
}

impl<'a> SpanParams<'a> {
    /// Create span parameters for a trace id and operation name.
    pub fn new(trace_id: TraceId, operation: &'a str) -> Self {
        SpanParams {
            trace_id,
            operation,
        }
    }
}

/// A sampler whose decision only depends on the trace id and operation name.
pub trait IsSampled: Send + Sync + fmt::Debug {
    /// Returns whether the trace is sampled, together with the tags describing
    /// the decision.
    fn is_sampled(&self, trace_id: TraceId, operation: &str) -> (bool, Vec<KeyValue>);
}

/// A sampler taking part in the whole span lifecycle.
///
/// Only the local root span of a trace is ever presented to a `SpanSampler`;
/// child spans inherit the decision already made for their trace.
pub trait SpanSampler: Send + Sync + fmt::Debug {
    /// Called when the span is created.
    fn on_create_span(&self, span: &SpanParams<'_>) -> Decision;

    /// Called when the span's operation name is changed after creation.
    fn on_set_operation_name(&self, span: &SpanParams<'_>, operation: &str) -> Decision;

    /// Called when a tag is set on the span.
    fn on_set_tag(&self, span: &SpanParams<'_>, key: &Key, value: &Value) -> Decision;

    /// Called when the span finishes.
    fn on_finish_span(&self, span: &SpanParams<'_>) -> Decision;
}

/// Adapts an [`IsSampled`] sampler to the [`SpanSampler`] lifecycle.
///
/// Creation and renaming delegate to the wrapped sampler and are final.
/// Tag and finish hooks are not supported and answer with a final
/// "not sampled" decision.
#[derive(Clone, Debug)]
pub struct LegacySampler<S> {
    inner: S,
}

impl<S: IsSampled> LegacySampler<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        LegacySampler { inner }
    }

    /// The wrapped sampler.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// The wrapped sampler, mutably.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn decide(&self, trace_id: TraceId, operation: &str) -> Decision {
        let (sample, tags) = self.inner.is_sampled(trace_id, operation);
        Decision {
            sample,
            retryable: false,
            tags,
        }
    }
}

impl<S: IsSampled> SpanSampler for LegacySampler<S> {
    fn on_create_span(&self, span: &SpanParams<'_>) -> Decision {
        self.decide(span.trace_id, span.operation)
    }

    fn on_set_operation_name(&self, span: &SpanParams<'_>, operation: &str) -> Decision {
        self.decide(span.trace_id, operation)
    }

    fn on_set_tag(&self, _span: &SpanParams<'_>, _key: &Key, _value: &Value) -> Decision {
        Decision::not_sampled(false)
    }

    fn on_finish_span(&self, _span: &SpanParams<'_>) -> Decision {
        Decision::not_sampled(false)
    }
}

/// Lifecycle hooks a sampler never makes a final decision on.
pub(crate) fn undecided() -> Decision {
    Decision::not_sampled(true)
}

/// The low 64 bits of a trace id, read big endian.
pub(crate) fn trace_id_low(trace_id: TraceId) -> u64 {
    u128::from_be_bytes(trace_id.to_bytes()) as u64
}
