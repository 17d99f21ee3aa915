use opentelemetry::trace::{SpanId, TraceId};

pub(crate) fn trace_id(value: u128) -> TraceId {
    TraceId::from_bytes(value.to_be_bytes())
}

pub(crate) fn span_id(value: u64) -> SpanId {
    SpanId::from_bytes(value.to_be_bytes())
}
