use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::fmt;

const RESULT_KEY: &str = "result";
const SAMPLER_KEY: &str = "sampler";

/// Instruments reporting how sampling strategy refreshes go.
#[derive(Clone)]
pub(crate) struct SamplerMetrics {
    queries: Counter<u64>,
    updates: Counter<u64>,
    parsing_failures: Counter<u64>,
    active_sampler: Gauge<u64>,
}

impl SamplerMetrics {
    pub(crate) fn new(meter: &Meter) -> Self {
        SamplerMetrics {
            queries: meter
                .u64_counter("jaeger_tracer_sampler_queries")
                .with_description("Number of times the sampling strategy was fetched")
                .build(),
            updates: meter
                .u64_counter("jaeger_tracer_sampler_updates")
                .with_description("Number of times a fetched sampling strategy was applied")
                .build(),
            parsing_failures: meter
                .u64_counter("jaeger_tracer_sampler_parsing_failures")
                .with_description("Number of fetched sampling strategies that could not be parsed")
                .build(),
            active_sampler: meter
                .u64_gauge("jaeger_tracer_sampler_active")
                .with_description("1 for the sampler currently in use, 0 for the one it replaced")
                .build(),
        }
    }

    pub(crate) fn query(&self, ok: bool) {
        self.queries.add(1, &[result(ok)]);
    }

    pub(crate) fn update(&self, ok: bool) {
        self.updates.add(1, &[result(ok)]);
    }

    pub(crate) fn parsing_failure(&self) {
        self.parsing_failures.add(1, &[]);
    }

    pub(crate) fn sampler_changed(&self, previous: &str, current: &str) {
        if previous != current {
            self.active_sampler
                .record(0, &[KeyValue::new(SAMPLER_KEY, previous.to_string())]);
        }
        self.active_sampler
            .record(1, &[KeyValue::new(SAMPLER_KEY, current.to_string())]);
    }
}

impl fmt::Debug for SamplerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SamplerMetrics")
    }
}

fn result(ok: bool) -> KeyValue {
    KeyValue::new(RESULT_KEY, if ok { "ok" } else { "err" })
}
