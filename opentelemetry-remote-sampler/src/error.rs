use opentelemetry_http::HttpError;
use std::sync::PoisonError;
use thiserror::Error;

/// A specialized `Result` type for remote sampler operations.
pub type RemoteSamplerResult<T> = Result<T, RemoteSamplerError>;

/// Errors returned while configuring the remote sampler or refreshing its
/// sampling strategy.
///
/// None of these errors reach the span creation path: a failed refresh keeps
/// the last known-good sampler in place.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RemoteSamplerError {
    /// A sampling probability outside of `[0.0, 1.0]`.
    #[error("sampling rate must be between 0.0 and 1.0, got {0}")]
    InvalidSamplingRate(f64),

    /// A negative or non finite traces per second limit.
    #[error("max traces per second must be a finite, non-negative number, got {0}")]
    InvalidRateLimit(f64),

    /// The service name is required to query the sampling endpoint.
    #[error("service name cannot be empty")]
    EmptyServiceName,

    /// The sampling endpoint could not be turned into a request URL.
    #[error("invalid sampling endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The poll interval must be greater than zero.
    #[error("update interval must be greater than zero")]
    InvalidUpdateInterval,

    /// Neither an HTTP client nor a custom fetcher was configured.
    #[error("no http client or sampling strategy fetcher configured")]
    MissingFetcher,

    /// The HTTP client failed to complete the request.
    #[error("failed to fetch sampling strategy: {0}")]
    Fetch(#[source] HttpError),

    /// The sampling endpoint answered with a non 2xx status.
    #[error("sampling endpoint responded with status {0}")]
    UnexpectedStatus(http::StatusCode),

    /// The strategy document is not valid JSON or has the wrong shape.
    #[error("failed to parse sampling strategy: {0}")]
    Parse(#[from] serde_json::Error),

    /// The strategy document contains none of the known strategies.
    #[error("sampling strategy response contains no recognized strategy")]
    UnrecognizedStrategy,

    /// [`shutdown`](crate::RemoteSampler::shutdown) was already called.
    #[error("remote sampler is already shut down")]
    AlreadyShutdown,

    /// Other failures, e.g. the poll worker could not be started.
    #[error("{0}")]
    Other(String),
}

impl<T> From<PoisonError<T>> for RemoteSamplerError {
    fn from(err: PoisonError<T>) -> Self {
        RemoteSamplerError::Other(err.to_string())
    }
}
