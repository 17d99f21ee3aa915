//! Types of the Jaeger remote sampling protocol.
//!
//! The proto definition can be found [here](https://github.com/jaegertracing/jaeger-idl/blob/main/proto/api_v2/sampling.proto).
//! Numeric fields missing from the JSON document default to zero, as in the
//! proto3 JSON mapping.
use crate::error::RemoteSamplerResult;
use std::fmt::Debug;

/// ProbabilisticSamplingStrategy samples traces with a fixed probability.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilisticSamplingStrategy {
    /// samplingRate is the sampling probability in the range [0.0, 1.0].
    #[serde(default)]
    pub sampling_rate: f64,
}

/// RateLimitingSamplingStrategy samples a fixed number of traces per time interval.
/// The typical implementations use the leaky bucket algorithm.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingSamplingStrategy {
    /// maxTracesPerSecond is the number of traces sampled per second.
    #[serde(default)]
    pub max_traces_per_second: f64,
}

/// OperationSamplingStrategy is a sampling strategy for a given operation
/// (aka endpoint, span name). Only probabilistic sampling is currently supported.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSamplingStrategy {
    /// Name of the operation.
    pub operation: String,
    /// Probability used for this operation.
    #[serde(default)]
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
}

/// PerOperationSamplingStrategies is a combination of strategies for different endpoints
/// as well as some service-wide defaults. It is particularly useful for services whose
/// endpoints receive vastly different traffic, so that any single rate of sampling would
/// result in either too much data for some endpoints or almost no data for other endpoints.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerOperationSamplingStrategies {
    /// defaultSamplingProbability is the sampling probability for spans that do not match
    /// any of the perOperationStrategies.
    #[serde(default)]
    pub default_sampling_probability: f64,
    /// defaultLowerBoundTracesPerSecond defines a lower-bound rate limit used to ensure that
    /// there is some minimal amount of traces sampled for an endpoint that might otherwise
    /// be never sampled via probabilistic strategies. The limit is local to a service instance,
    /// so if a service is deployed with many (N) instances, the effective minimum rate of sampling
    /// will be N times higher. This setting applies to ALL operations, whether or not they match
    /// one of the perOperationStrategies.
    #[serde(default)]
    pub default_lower_bound_traces_per_second: f64,
    /// perOperationStrategies describes sampling strategies for individual operations within
    /// a given service.
    #[serde(default)]
    pub per_operation_strategies: Vec<OperationSamplingStrategy>,
    /// defaultUpperBoundTracesPerSecond defines an upper bound rate limit.
    /// However, almost no Jaeger SDKs support this parameter, and neither does this one.
    #[serde(default)]
    pub default_upper_bound_traces_per_second: f64,
}

/// SamplingStrategyResponse contains an overall sampling strategy for a given service.
/// This type should be treated as a union where only one of the strategy field is present.
///
/// The legacy `strategyType` field is not read: consumers are expected to
/// check which strategy field is present instead, starting with
/// `operationSampling`.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStrategyResponse {
    /// A single probability for the whole service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilistic_sampling: Option<ProbabilisticSamplingStrategy>,
    /// A single rate limit for the whole service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limiting_sampling: Option<RateLimitingSamplingStrategy>,
    /// Per operation probabilities with service wide defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_sampling: Option<PerOperationSamplingStrategies>,
}

/// The strategy a [`SamplingStrategyResponse`] carries.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplingStrategy {
    /// Per operation probabilities with service wide defaults.
    PerOperation(PerOperationSamplingStrategies),
    /// A single probability.
    Probabilistic(ProbabilisticSamplingStrategy),
    /// A single rate limit.
    RateLimiting(RateLimitingSamplingStrategy),
}

impl SamplingStrategyResponse {
    /// Pick the strategy carried by this response.
    ///
    /// If several fields are present, per operation strategies win over a
    /// probabilistic strategy, which wins over a rate limiting strategy.
    /// Returns `None` if no strategy is present.
    pub fn into_strategy(self) -> Option<SamplingStrategy> {
        match self {
            SamplingStrategyResponse {
                operation_sampling: Some(strategies),
                ..
            } => Some(SamplingStrategy::PerOperation(strategies)),
            SamplingStrategyResponse {
                probabilistic_sampling: Some(strategy),
                ..
            } => Some(SamplingStrategy::Probabilistic(strategy)),
            SamplingStrategyResponse {
                rate_limiting_sampling: Some(strategy),
                ..
            } => Some(SamplingStrategy::RateLimiting(strategy)),
            _ => None,
        }
    }
}

/// Turns the raw body served by the sampling endpoint into a
/// [`SamplingStrategyResponse`].
pub trait SamplingStrategyParser: Send + Sync + Debug {
    /// Parse `body`.
    fn parse(&self, body: &[u8]) -> RemoteSamplerResult<SamplingStrategyResponse>;
}

/// Parses the JSON encoding of the sampling protocol, as served by the Jaeger
/// agent and collector on their `/sampling` HTTP endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonStrategyParser;

impl SamplingStrategyParser for JsonStrategyParser {
    fn parse(&self, body: &[u8]) -> RemoteSamplerResult<SamplingStrategyResponse> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteSamplerError;

    fn parse(body: &str) -> SamplingStrategyResponse {
        JsonStrategyParser.parse(body.as_bytes()).unwrap()
    }

    #[test]
    fn parse_probabilistic() {
        let response = parse(
            r#"{"strategyType":"PROBABILISTIC","probabilisticSampling":{"samplingRate":0.5}}"#,
        );
        assert_eq!(
            response.into_strategy(),
            Some(SamplingStrategy::Probabilistic(ProbabilisticSamplingStrategy {
                sampling_rate: 0.5
            }))
        );
    }

    #[test]
    fn parse_rate_limiting() {
        let response = parse(
            r#"{"strategyType":"RATE_LIMITING","rateLimitingSampling":{"maxTracesPerSecond":2}}"#,
        );
        assert_eq!(
            response.into_strategy(),
            Some(SamplingStrategy::RateLimiting(RateLimitingSamplingStrategy {
                max_traces_per_second: 2.0
            }))
        );
    }

    #[test]
    fn parse_per_operation() {
        let response = parse(
            r#"{
                "strategyType": 0,
                "operationSampling": {
                    "defaultSamplingProbability": 0.1,
                    "defaultLowerBoundTracesPerSecond": 0.5,
                    "perOperationStrategies": [
                        {"operation": "GET /users", "probabilisticSampling": {"samplingRate": 0.9}},
                        {"operation": "GET /health", "probabilisticSampling": {}}
                    ]
                }
            }"#,
        );
        let Some(SamplingStrategy::PerOperation(strategies)) = response.into_strategy() else {
            panic!("expected per operation strategies");
        };
        assert_eq!(strategies.default_sampling_probability, 0.1);
        assert_eq!(strategies.default_lower_bound_traces_per_second, 0.5);
        assert_eq!(strategies.default_upper_bound_traces_per_second, 0.0);
        assert_eq!(strategies.per_operation_strategies.len(), 2);
        assert_eq!(strategies.per_operation_strategies[0].operation, "GET /users");
        assert_eq!(
            strategies.per_operation_strategies[1]
                .probabilistic_sampling
                .sampling_rate,
            0.0
        );
    }

    #[test]
    fn per_operation_takes_priority() {
        let response = parse(
            r#"{
                "probabilisticSampling": {"samplingRate": 0.5},
                "rateLimitingSampling": {"maxTracesPerSecond": 10},
                "operationSampling": {"defaultSamplingProbability": 0.2}
            }"#,
        );
        assert!(matches!(
            response.clone().into_strategy(),
            Some(SamplingStrategy::PerOperation(_))
        ));

        let without_operations = SamplingStrategyResponse {
            operation_sampling: None,
            ..response
        };
        assert!(matches!(
            without_operations.into_strategy(),
            Some(SamplingStrategy::Probabilistic(_))
        ));
    }

    #[test]
    fn empty_document_has_no_strategy() {
        assert_eq!(parse("{}").into_strategy(), None);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(matches!(
            JsonStrategyParser.parse(b"{\"probabilisticSampling\":"),
            Err(RemoteSamplerError::Parse(_))
        ));
        assert!(matches!(
            JsonStrategyParser.parse(br#"{"probabilisticSampling":{"samplingRate":"high"}}"#),
            Err(RemoteSamplerError::Parse(_))
        ));
    }
}
