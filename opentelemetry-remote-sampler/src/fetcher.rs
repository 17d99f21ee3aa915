use crate::error::{RemoteSamplerError, RemoteSamplerResult};
use bytes::Bytes;
use http::Request;
use opentelemetry::otel_debug;
use opentelemetry_http::HttpClient;
use std::fmt::Debug;
use std::sync::Arc;

/// Retrieves the raw sampling strategy document for a service.
///
/// Fetchers are called from the poll worker thread, never while a sampler
/// lock is held, so blocking implementations are fine.
pub trait SamplingStrategyFetcher: Send + Sync + Debug {
    /// Fetch the strategy document of `service_name`.
    fn fetch(&self, service_name: &str) -> RemoteSamplerResult<Bytes>;
}

/// Fetches strategies with `GET {endpoint}?service={service_name}` over an
/// [`HttpClient`].
///
/// The client's future is driven to completion on the calling thread, so
/// the client must not need to run inside a specific async runtime, or must
/// bring its own (e.g. `reqwest::blocking::Client`).
#[derive(Clone, Debug)]
pub struct HttpSamplingStrategyFetcher {
    client: Arc<dyn HttpClient>,
    endpoint: url::Url,
}

impl HttpSamplingStrategyFetcher {
    /// Create a fetcher querying `endpoint` with `client`.
    ///
    /// Returns [`RemoteSamplerError::InvalidEndpoint`] if `endpoint` is not an
    /// absolute URL.
    pub fn new(client: Arc<dyn HttpClient>, endpoint: &str) -> RemoteSamplerResult<Self> {
        let endpoint =
            url::Url::parse(endpoint).map_err(|err| RemoteSamplerError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteSamplerError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "not a hierarchical url".to_string(),
            });
        }
        Ok(HttpSamplingStrategyFetcher { client, endpoint })
    }

    /// The endpoint queried, without the `service` parameter.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn request_uri(&self, service_name: &str) -> url::Url {
        let mut uri = self.endpoint.clone();
        uri.query_pairs_mut().append_pair("service", service_name);
        uri
    }
}

impl SamplingStrategyFetcher for HttpSamplingStrategyFetcher {
    fn fetch(&self, service_name: &str) -> RemoteSamplerResult<Bytes> {
        let uri = self.request_uri(service_name);
        otel_debug!(name: "RemoteSampler.Fetch", uri = uri.as_str());

        let request = Request::get(uri.as_str())
            .header(http::header::ACCEPT, "application/json")
            .body(Bytes::new())
            .map_err(|err| RemoteSamplerError::InvalidEndpoint {
                endpoint: uri.to_string(),
                reason: err.to_string(),
            })?;

        let response = futures_executor::block_on(self.client.send_bytes(request))
            .map_err(RemoteSamplerError::Fetch)?;
        if !response.status().is_success() {
            return Err(RemoteSamplerError::UnexpectedStatus(response.status()));
        }
        Ok(response.into_body())
    }
}
