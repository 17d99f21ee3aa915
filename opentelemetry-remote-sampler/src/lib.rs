//! An adaptive [`ShouldSample`] implementation for the OpenTelemetry SDK that
//! follows the sampling strategies served by a [Jaeger remote sampling]
//! endpoint.
//!
//! The sampler polls `GET {endpoint}?service={service_name}` in a background
//! thread and switches between three strategies:
//!
//! - a probabilistic strategy, sampling a fixed fraction of the traces,
//!   decided from the trace id so every process agrees on the same trace;
//! - a rate limiting strategy, sampling at most a number of traces per second;
//! - per operation strategies, giving each span name its own probability and a
//!   guaranteed minimum throughput.
//!
//! Until the first strategy is fetched, a probabilistic sampler with a rate of
//! 0.001 is used. A failed refresh keeps the last applied strategy.
//!
//! # Example
//!
//! ```no_run
//! use opentelemetry_remote_sampler::RemoteSampler;
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//! use std::time::Duration;
//!
//! # #[derive(Debug)]
//! # struct Client;
//! # #[async_trait::async_trait]
//! # impl opentelemetry_http::HttpClient for Client {
//! #     async fn send_bytes(
//! #         &self,
//! #         _request: opentelemetry_http::Request<opentelemetry_http::Bytes>,
//! #     ) -> Result<opentelemetry_http::Response<opentelemetry_http::Bytes>, opentelemetry_http::HttpError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let http_client = Client;
//! let sampler = RemoteSampler::builder("checkout")
//!     .with_endpoint("http://localhost:5778/sampling")
//!     .with_update_interval(Duration::from_secs(30))
//!     .with_http_client(http_client)
//!     .build()?;
//!
//! let provider = SdkTracerProvider::builder()
//!     .with_sampler(sampler.clone())
//!     .build();
//!
//! // ...
//!
//! sampler.shutdown()?;
//! # drop(provider);
//! # Ok(())
//! # }
//! ```
//!
//! # Environment
//!
//! When `OTEL_TRACES_SAMPLER` is `jaeger_remote` or
//! `parentbased_jaeger_remote`, the builder reads the `endpoint`,
//! `pollingIntervalMs` and `initialSamplingRate` keys of
//! `OTEL_TRACES_SAMPLER_ARG`, e.g.
//! `endpoint=http://agent:5778/sampling,pollingIntervalMs=5000,initialSamplingRate=0.25`.
//!
//! # Metrics
//!
//! Refreshes are reported on the `opentelemetry-remote-sampler` meter of the
//! global meter provider, or on the meter given to
//! [`RemoteSamplerBuilder::with_meter`]:
//!
//! | Name | Kind | Attributes |
//! |------|------|------------|
//! | `jaeger_tracer_sampler_queries` | counter | `result` = `ok` / `err` |
//! | `jaeger_tracer_sampler_updates` | counter | `result` = `ok` / `err` |
//! | `jaeger_tracer_sampler_parsing_failures` | counter | |
//! | `jaeger_tracer_sampler_active` | gauge | `sampler` |
//!
//! [`ShouldSample`]: opentelemetry_sdk::trace::ShouldSample
//! [Jaeger remote sampling]: https://www.jaegertracing.io/docs/latest/sampling/#remote-sampling
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]

mod config;
mod decision;
mod error;
mod fetcher;
mod guaranteed_throughput;
mod metrics;
mod per_operation;
mod probabilistic;
mod rate_limit;
mod remote;
mod sampler;
#[cfg(test)]
mod testing;
mod updater;

pub use decision::{
    Decision, IsSampled, LegacySampler, SpanParams, SpanSampler, SAMPLER_PARAM_KEY,
    SAMPLER_TYPE_KEY,
};
pub use error::{RemoteSamplerError, RemoteSamplerResult};
pub use fetcher::{HttpSamplingStrategyFetcher, SamplingStrategyFetcher};
pub use guaranteed_throughput::GuaranteedThroughputSampler;
pub use per_operation::{PerOperationSampler, PerOperationSamplerParams, DEFAULT_MAX_OPERATIONS};
pub use probabilistic::ProbabilisticSampler;
pub use rate_limit::RateLimitingSampler;
pub use remote::{
    JsonStrategyParser, OperationSamplingStrategy, PerOperationSamplingStrategies,
    ProbabilisticSamplingStrategy, RateLimitingSamplingStrategy, SamplingStrategy,
    SamplingStrategyParser, SamplingStrategyResponse,
};
pub use sampler::{RemoteSampler, RemoteSamplerBuilder};
