use async_trait::async_trait;
use opentelemetry::trace::{Tracer, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_http::{Bytes, HttpClient, HttpError, Request, Response};
use opentelemetry_remote_sampler::{RemoteSampler, RemoteSamplerError, SAMPLER_TYPE_KEY};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
struct StrategyServer {
    status: Arc<Mutex<u16>>,
    body: Arc<Mutex<String>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StrategyServer {
    fn serve(&self, status: u16, body: &str) {
        *self.status.lock().unwrap() = status;
        *self.body.lock().unwrap() = body.to_string();
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for StrategyServer {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        self.requests
            .lock()
            .unwrap()
            .push(request.uri().to_string());
        let status = *self.status.lock().unwrap();
        let body = self.body.lock().unwrap().clone();
        Ok(Response::builder().status(status).body(Bytes::from(body))?)
    }
}

fn sampler(server: &StrategyServer) -> RemoteSampler {
    RemoteSampler::builder("checkout")
        .with_endpoint("http://jaeger-agent:5778/sampling")
        .with_http_client(server.clone())
        .with_update_interval(Duration::from_secs(3600))
        .build()
        .unwrap()
}

#[test]
fn queries_the_endpoint_for_the_service() {
    let server = StrategyServer::default();
    server.serve(
        200,
        r#"{"strategyType":"RATE_LIMITING","rateLimitingSampling":{"maxTracesPerSecond":10}}"#,
    );
    let sampler = sampler(&server);

    sampler.update_sampler().unwrap();
    assert_eq!(
        server.requests(),
        vec!["http://jaeger-agent:5778/sampling?service=checkout".to_string()]
    );
    assert_eq!(sampler.service_name(), "checkout");
    assert_eq!(
        sampler.sampler_description(),
        "RateLimitingSampler{maxTracesPerSecond=10}"
    );
    sampler.shutdown().unwrap();
}

#[test]
fn error_status_keeps_the_active_strategy() {
    let server = StrategyServer::default();
    server.serve(200, r#"{"probabilisticSampling":{"samplingRate":0.5}}"#);
    let sampler = sampler(&server);
    sampler.update_sampler().unwrap();

    server.serve(503, r#"{"probabilisticSampling":{"samplingRate":1.0}}"#);
    assert!(matches!(
        sampler.update_sampler(),
        Err(RemoteSamplerError::UnexpectedStatus(status)) if status.as_u16() == 503
    ));
    assert_eq!(
        sampler.sampler_description(),
        "ProbabilisticSampler{samplingRate=0.5}"
    );
    sampler.shutdown().unwrap();
}

#[test]
fn per_operation_strategy_end_to_end() {
    let server = StrategyServer::default();
    server.serve(
        200,
        r#"{
            "strategyType": "PROBABILISTIC",
            "operationSampling": {
                "defaultSamplingProbability": 0.0,
                "defaultLowerBoundTracesPerSecond": 0.0,
                "perOperationStrategies": [
                    {"operation": "GET /checkout", "probabilisticSampling": {"samplingRate": 1.0}}
                ]
            }
        }"#,
    );
    let sampler = sampler(&server);
    sampler.update_sampler().unwrap();
    assert!(sampler
        .sampler_description()
        .starts_with("PerOperationSampler{defaultSamplingRate=0"));

    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .with_sampler(sampler.clone())
        .build();
    let tracer = provider.tracer("remote-sampler-test");

    for _ in 0..10 {
        tracer.in_span("GET /checkout", |_cx| {
            tracer.in_span("SELECT orders", |_cx| {});
        });
    }
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 20);
    let roots: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "GET /checkout")
        .collect();
    assert_eq!(roots.len(), 10);
    assert!(roots[0]
        .attributes
        .contains(&KeyValue::new(SAMPLER_TYPE_KEY, "probabilistic")));

    // the first unknown operation gets the one credit of its lower bound,
    // the others are dropped
    exporter.reset();
    for _ in 0..10 {
        tracer.in_span("GET /health", |_cx| {});
    }
    assert!(exporter.get_finished_spans().unwrap().len() <= 1);

    sampler.shutdown().unwrap();
    let _ = provider.shutdown();
}

#[test]
fn worker_applies_strategies_in_the_background() {
    let server = StrategyServer::default();
    server.serve(200, r#"{"probabilisticSampling":{"samplingRate":0.25}}"#);
    let sampler = RemoteSampler::builder("checkout")
        .with_http_client(server.clone())
        .with_update_interval(Duration::from_millis(20))
        .build()
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sampler.sampler_description() != "ProbabilisticSampler{samplingRate=0.25}"
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        sampler.sampler_description(),
        "ProbabilisticSampler{samplingRate=0.25}"
    );
    assert!(server
        .requests()
        .iter()
        .all(|uri| uri.ends_with("?service=checkout")));

    sampler.shutdown().unwrap();
    assert!(matches!(
        sampler.shutdown(),
        Err(RemoteSamplerError::AlreadyShutdown)
    ));
}
