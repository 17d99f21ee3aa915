use crate::config::SamplerArgs;
use crate::decision::{Decision, LegacySampler, SpanParams, SpanSampler};
use crate::error::{RemoteSamplerError, RemoteSamplerResult};
use crate::fetcher::{HttpSamplingStrategyFetcher, SamplingStrategyFetcher};
use crate::metrics::SamplerMetrics;
use crate::per_operation::DEFAULT_MAX_OPERATIONS;
use crate::probabilistic::ProbabilisticSampler;
use crate::remote::{JsonStrategyParser, SamplingStrategyParser};
use crate::updater::{apply_response, ActiveSampler, UpdaterParams};
use opentelemetry::metrics::Meter;
use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{global, otel_debug, otel_error, otel_info, otel_warn};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_http::HttpClient;
use opentelemetry_sdk::trace::ShouldSample;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DEFAULT_REMOTE_SAMPLER_ENDPOINT: &str = "http://localhost:5778/sampling";
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_INITIAL_SAMPLING_RATE: f64 = 0.001;
const METER_NAME: &str = "opentelemetry-remote-sampler";

/// Builder of a [`RemoteSampler`].
///
/// The builder starts from the defaults, then from the environment when
/// `OTEL_TRACES_SAMPLER` is `jaeger_remote` or `parentbased_jaeger_remote`.
/// The keys `endpoint`, `pollingIntervalMs` and `initialSamplingRate` of
/// `OTEL_TRACES_SAMPLER_ARG` are read. Values passed to the `with_*` methods
/// take precedence.
pub struct RemoteSamplerBuilder {
    service_name: String,
    endpoint: String,
    update_interval: Duration,
    initial_sampler: Option<Box<dyn SpanSampler>>,
    initial_sampling_rate: f64,
    max_operations: usize,
    operation_name_late_binding: bool,
    http_client: Option<Arc<dyn HttpClient>>,
    fetcher: Option<Box<dyn SamplingStrategyFetcher>>,
    parser: Box<dyn SamplingStrategyParser>,
    meter: Option<Meter>,
}

impl RemoteSamplerBuilder {
    fn new(service_name: String) -> Self {
        let args = SamplerArgs::from_env();
        RemoteSamplerBuilder {
            service_name,
            endpoint: args
                .endpoint
                .unwrap_or_else(|| DEFAULT_REMOTE_SAMPLER_ENDPOINT.to_string()),
            update_interval: args.polling_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL),
            initial_sampler: None,
            initial_sampling_rate: args
                .initial_sampling_rate
                .unwrap_or(DEFAULT_INITIAL_SAMPLING_RATE),
            max_operations: DEFAULT_MAX_OPERATIONS,
            operation_name_late_binding: false,
            http_client: None,
            fetcher: None,
            parser: Box::new(JsonStrategyParser),
            meter: None,
        }
    }

    /// Sampling endpoint queried by the HTTP fetcher.
    ///
    /// Default: `http://localhost:5778/sampling`, the Jaeger agent.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Time between two strategy refreshes. Default: 60 seconds.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Sampler used until the first strategy is applied.
    ///
    /// Takes precedence over [`with_initial_sampling_rate`].
    ///
    /// [`with_initial_sampling_rate`]: RemoteSamplerBuilder::with_initial_sampling_rate
    pub fn with_initial_sampler<S: SpanSampler + 'static>(mut self, sampler: S) -> Self {
        self.initial_sampler = Some(Box::new(sampler));
        self
    }

    /// Probability of the probabilistic sampler used until the first strategy
    /// is applied. Default: 0.001.
    pub fn with_initial_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.initial_sampling_rate = sampling_rate;
        self
    }

    /// Maximum number of operations tracked by per operation strategies.
    /// Default: 2000.
    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Keep per operation decisions open until the span's name is final.
    ///
    /// Spans that are not sampled yet are then recorded, but not exported.
    pub fn with_operation_name_late_binding(mut self, enabled: bool) -> Self {
        self.operation_name_late_binding = enabled;
        self
    }

    /// HTTP client used to query the sampling endpoint.
    ///
    /// Requests are driven to completion on the poll worker thread without an
    /// async runtime. Clients that need one, like `reqwest::Client` which
    /// expects a Tokio reactor, fail every refresh; use a blocking client
    /// behind [`with_fetcher`](Self::with_fetcher) instead.
    pub fn with_http_client<C: HttpClient + 'static>(mut self, client: C) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Retrieve strategy documents with `fetcher` instead of the HTTP client.
    pub fn with_fetcher<F: SamplingStrategyFetcher + 'static>(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    /// Decode strategy documents with `parser`. Default: [`JsonStrategyParser`].
    pub fn with_parser<P: SamplingStrategyParser + 'static>(mut self, parser: P) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Meter recording the refresh metrics.
    ///
    /// Default: the `opentelemetry-remote-sampler` meter of the global meter
    /// provider.
    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Create the sampler and start polling.
    pub fn build(self) -> RemoteSamplerResult<RemoteSampler> {
        if self.service_name.is_empty() {
            return Err(RemoteSamplerError::EmptyServiceName);
        }
        if self.update_interval.is_zero() {
            return Err(RemoteSamplerError::InvalidUpdateInterval);
        }

        let fetcher: Box<dyn SamplingStrategyFetcher> = match (self.fetcher, self.http_client) {
            (Some(fetcher), _) => fetcher,
            (None, Some(client)) => {
                Box::new(HttpSamplingStrategyFetcher::new(client, &self.endpoint)?)
            }
            (None, None) => return Err(RemoteSamplerError::MissingFetcher),
        };

        let initial_sampler = match self.initial_sampler {
            Some(sampler) => ActiveSampler::Custom(sampler),
            None => ActiveSampler::Probabilistic(LegacySampler::new(ProbabilisticSampler::new(
                self.initial_sampling_rate,
            )?)),
        };

        let max_operations = match self.max_operations {
            0 => DEFAULT_MAX_OPERATIONS,
            max => max,
        };
        let meter = self.meter.unwrap_or_else(|| global::meter(METER_NAME));
        let metrics = SamplerMetrics::new(&meter);
        let configuration = initial_sampler.configuration();
        metrics.sampler_changed(&configuration, &configuration);

        RemoteSampler::new(
            SamplerState {
                service_name: self.service_name,
                sampler: RwLock::new(initial_sampler),
                fetcher,
                parser: self.parser,
                updater_params: UpdaterParams {
                    max_operations,
                    operation_name_late_binding: self.operation_name_late_binding,
                },
                metrics,
            },
            self.update_interval,
        )
    }
}

impl fmt::Debug for RemoteSamplerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSamplerBuilder")
            .field("service_name", &self.service_name)
            .field("endpoint", &self.endpoint)
            .field("update_interval", &self.update_interval)
            .field("initial_sampler", &self.initial_sampler)
            .field("initial_sampling_rate", &self.initial_sampling_rate)
            .field("max_operations", &self.max_operations)
            .field(
                "operation_name_late_binding",
                &self.operation_name_late_binding,
            )
            .field("http_client", &self.http_client)
            .field("fetcher", &self.fetcher)
            .field("parser", &self.parser)
            .finish()
    }
}

/// A sampler that keeps its sampling strategy in sync with a Jaeger remote
/// sampling endpoint.
///
/// A background thread fetches the strategy of the configured service at a
/// fixed interval and applies it. Until the first successful refresh, the
/// initial sampler decides. Failed refreshes are logged and counted, and the
/// last applied strategy stays in place.
///
/// Only root spans are decided by the strategy. Spans with a parent follow
/// the parent's sampled flag.
///
/// The backend doesn't need to be Jaeger so long as it serves the Jaeger
/// remote sampling protocol.
///
/// The worker thread stops on [`shutdown`](RemoteSampler::shutdown), or when
/// the last clone of the sampler is dropped.
#[derive(Clone)]
pub struct RemoteSampler {
    inner: Arc<RemoteSamplerInner>,
}

impl RemoteSampler {
    /// Configure a sampler for `service_name`.
    pub fn builder<T: Into<String>>(service_name: T) -> RemoteSamplerBuilder {
        RemoteSamplerBuilder::new(service_name.into())
    }

    fn new(state: SamplerState, interval: Duration) -> RemoteSamplerResult<Self> {
        let (message_sender, message_receiver): (Sender<Message>, Receiver<Message>) =
            mpsc::channel();
        let state = Arc::new(state);
        let worker_state = state.clone();

        let handle = thread::Builder::new()
            .name("OpenTelemetry.Traces.RemoteSampler".to_string())
            .spawn(move || run_worker(worker_state, message_receiver, interval))
            .map_err(|err| {
                otel_error!(
                    name: "RemoteSampler.ThreadStartError",
                    error = format!("{:?}", err)
                );
                RemoteSamplerError::Other(format!("failed to start the poll worker: {}", err))
            })?;

        Ok(RemoteSampler {
            inner: Arc::new(RemoteSamplerInner {
                state,
                message_sender: Mutex::new(message_sender),
                handle: Mutex::new(Some(handle)),
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Fetch and apply the current strategy now, in the calling thread.
    ///
    /// On error the active sampler is left as it was.
    pub fn update_sampler(&self) -> RemoteSamplerResult<()> {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(RemoteSamplerError::AlreadyShutdown);
        }
        self.inner.state.update_sampler()
    }

    /// Stop the poll worker and wait until it exited.
    ///
    /// The sampler keeps deciding with the last applied strategy afterwards.
    /// Returns [`RemoteSamplerError::AlreadyShutdown`] when called again.
    pub fn shutdown(&self) -> RemoteSamplerResult<()> {
        self.inner.shutdown()
    }

    /// The service whose strategy is polled.
    pub fn service_name(&self) -> &str {
        &self.inner.state.service_name
    }

    /// Describes the sampler currently making decisions, e.g.
    /// `ProbabilisticSampler{samplingRate=0.001}`.
    pub fn sampler_description(&self) -> String {
        self.inner.state.read_sampler().to_string()
    }
}

impl fmt::Debug for RemoteSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSampler")
            .field("service_name", &self.inner.state.service_name)
            .field("sampler", &self.sampler_description())
            .finish()
    }
}

impl ShouldSample for RemoteSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        if let Some(parent) = parent_context.filter(|cx| cx.has_active_span()) {
            let span = parent.span();
            let parent_span_context = span.span_context();
            let decision = if parent_span_context.is_sampled() {
                SamplingDecision::RecordAndSample
            } else {
                SamplingDecision::Drop
            };
            return SamplingResult {
                decision,
                attributes: Vec::new(),
                trace_state: parent_span_context.trace_state().clone(),
            };
        }

        let decision = self
            .inner
            .state
            .read_sampler()
            .on_create_span(&SpanParams::new(trace_id, name));
        SamplingResult {
            decision: sampling_decision(&decision),
            attributes: decision.tags,
            trace_state: TraceState::default(),
        }
    }
}

impl SpanSampler for RemoteSampler {
    fn on_create_span(&self, span: &SpanParams<'_>) -> Decision {
        self.inner.state.read_sampler().on_create_span(span)
    }

    fn on_set_operation_name(&self, span: &SpanParams<'_>, operation: &str) -> Decision {
        self.inner
            .state
            .read_sampler()
            .on_set_operation_name(span, operation)
    }

    fn on_set_tag(&self, span: &SpanParams<'_>, key: &Key, value: &Value) -> Decision {
        self.inner.state.read_sampler().on_set_tag(span, key, value)
    }

    fn on_finish_span(&self, span: &SpanParams<'_>) -> Decision {
        self.inner.state.read_sampler().on_finish_span(span)
    }
}

fn sampling_decision(decision: &Decision) -> SamplingDecision {
    match decision {
        Decision { sample: true, .. } => SamplingDecision::RecordAndSample,
        Decision {
            retryable: true, ..
        } => SamplingDecision::RecordOnly,
        _ => SamplingDecision::Drop,
    }
}

#[derive(Debug)]
enum Message {
    Shutdown(Sender<()>),
}

struct RemoteSamplerInner {
    state: Arc<SamplerState>,
    message_sender: Mutex<Sender<Message>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    is_shutdown: AtomicBool,
}

impl RemoteSamplerInner {
    fn shutdown(&self) -> RemoteSamplerResult<()> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(RemoteSamplerError::AlreadyShutdown);
        }

        let (response_tx, response_rx) = mpsc::channel();
        self.message_sender
            .lock()?
            .send(Message::Shutdown(response_tx))
            .map_err(|err| RemoteSamplerError::Other(err.to_string()))?;
        response_rx
            .recv()
            .map_err(|err| RemoteSamplerError::Other(err.to_string()))?;

        if let Some(handle) = self.handle.lock()?.take() {
            handle
                .join()
                .map_err(|_| RemoteSamplerError::Other("poll worker panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for RemoteSamplerInner {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            if !matches!(err, RemoteSamplerError::AlreadyShutdown) {
                otel_warn!(
                    name: "RemoteSampler.ShutdownOnDropFailed",
                    error = format!("{}", err)
                );
            }
        }
    }
}

struct SamplerState {
    service_name: String,
    sampler: RwLock<ActiveSampler>,
    fetcher: Box<dyn SamplingStrategyFetcher>,
    parser: Box<dyn SamplingStrategyParser>,
    updater_params: UpdaterParams,
    metrics: SamplerMetrics,
}

impl SamplerState {
    fn read_sampler(&self) -> std::sync::RwLockReadGuard<'_, ActiveSampler> {
        self.sampler.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_sampler(&self) -> RemoteSamplerResult<()> {
        let body = match self.fetcher.fetch(&self.service_name) {
            Ok(body) => {
                self.metrics.query(true);
                body
            }
            Err(err) => {
                self.metrics.query(false);
                otel_warn!(
                    name: "RemoteSampler.FetchFailed",
                    service_name = self.service_name.as_str(),
                    error = format!("{}", err)
                );
                return Err(err);
            }
        };

        let response = match self.parser.parse(&body) {
            Ok(response) => response,
            Err(err) => {
                self.metrics.parsing_failure();
                otel_warn!(
                    name: "RemoteSampler.ParseFailed",
                    service_name = self.service_name.as_str(),
                    error = format!("{}", err)
                );
                return Err(err);
            }
        };

        let mut sampler = self.sampler.write().unwrap_or_else(PoisonError::into_inner);
        let previous = sampler.configuration();
        let result = apply_response(&mut *sampler, response, &self.updater_params);
        let current = sampler.configuration();
        drop(sampler);

        match result {
            Ok(()) => {
                self.metrics.update(true);
                self.metrics.sampler_changed(&previous, &current);
                otel_debug!(
                    name: "RemoteSampler.Updated",
                    service_name = self.service_name.as_str(),
                    sampler = current.as_str()
                );
                Ok(())
            }
            Err(err) => {
                self.metrics.update(false);
                otel_warn!(
                    name: "RemoteSampler.UpdateFailed",
                    service_name = self.service_name.as_str(),
                    error = format!("{}", err),
                    strategy = String::from_utf8_lossy(&body).into_owned()
                );
                Err(err)
            }
        }
    }
}

fn run_worker(state: Arc<SamplerState>, messages: Receiver<Message>, interval: Duration) {
    let mut remaining_interval = interval;
    otel_info!(
        name: "RemoteSampler.ThreadStarted",
        service_name = state.service_name.as_str(),
        interval = interval.as_millis()
    );
    loop {
        match messages.recv_timeout(remaining_interval) {
            Ok(Message::Shutdown(response_sender)) => {
                otel_debug!(name: "RemoteSampler.ThreadShutdownRequested");
                let _ = response_sender.send(());
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let update_start = Instant::now();
                // failures are logged and counted by update_sampler, a panic
                // (e.g. a client that needs a Tokio reactor) must not end polling
                let result = panic::catch_unwind(AssertUnwindSafe(|| state.update_sampler()));
                if let Err(payload) = result {
                    otel_error!(
                        name: "RemoteSampler.UpdatePanicked",
                        service_name = state.service_name.as_str(),
                        error = panic_message(payload.as_ref())
                    );
                }
                remaining_interval = interval.saturating_sub(update_start.elapsed());
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    otel_info!(name: "RemoteSampler.ThreadStopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
