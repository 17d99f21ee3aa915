use bytes::Bytes;
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_remote_sampler::{
    RemoteSampler, RemoteSamplerError, RemoteSamplerResult, SamplingStrategyFetcher,
};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::error::Error;
use std::thread;
use std::time::Duration;

const SERVICE_NAME: &str = "remote-sampler-demo";

#[derive(Debug)]
struct ReqwestFetcher {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl SamplingStrategyFetcher for ReqwestFetcher {
    fn fetch(&self, service_name: &str) -> RemoteSamplerResult<Bytes> {
        let url = url::Url::parse_with_params(&self.endpoint, &[("service", service_name)])
            .map_err(|err| RemoteSamplerError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            })?;
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| RemoteSamplerError::Fetch(err.into()))?;
        response
            .bytes()
            .map_err(|err| RemoteSamplerError::Fetch(err.into()))
    }
}

fn init_tracer_provider(sampler: RemoteSampler) -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .with_sampler(sampler)
        .build();
    global::set_tracer_provider(provider.clone());
    provider
}

fn main() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    let endpoint = std::env::var("SAMPLING_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:5778/sampling".to_string());

    let sampler = RemoteSampler::builder(SERVICE_NAME)
        .with_fetcher(ReqwestFetcher {
            client: reqwest::blocking::Client::new(),
            endpoint,
        })
        .with_initial_sampling_rate(0.0)
        .with_update_interval(Duration::from_secs(5))
        .build()?;
    let provider = init_tracer_provider(sampler.clone());
    let tracer = global::tracer(SERVICE_NAME);

    // dropped by the initial sampler
    tracer.start("before-first-refresh").end();

    if let Err(err) = sampler.update_sampler() {
        eprintln!("failed to fetch the sampling strategy: {err}");
    }
    println!("active sampler: {}", sampler.sampler_description());

    for _ in 0..5 {
        tracer.in_span("GET /checkout", |_cx| {
            tracer.in_span("SELECT orders", |_cx| {});
        });
    }

    // give the background worker a chance to pick up strategy changes
    thread::sleep(Duration::from_secs(6));
    println!("active sampler: {}", sampler.sampler_description());
    tracer.in_span("after-background-refresh", |_cx| {});

    sampler.shutdown()?;
    provider.shutdown()?;
    Ok(())
}
