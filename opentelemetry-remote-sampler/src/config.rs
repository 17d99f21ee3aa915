use crate::probabilistic::validate_sampling_rate;
use opentelemetry::otel_warn;
use std::env;
use std::time::Duration;

/// Sampler selected by the application.
pub(crate) const OTEL_TRACES_SAMPLER: &str = "OTEL_TRACES_SAMPLER";
/// Comma separated `key=value` arguments of the selected sampler.
pub(crate) const OTEL_TRACES_SAMPLER_ARG: &str = "OTEL_TRACES_SAMPLER_ARG";

const REMOTE_SAMPLERS: [&str; 2] = ["jaeger_remote", "parentbased_jaeger_remote"];

/// Remote sampler settings read from the environment.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SamplerArgs {
    pub(crate) endpoint: Option<String>,
    pub(crate) polling_interval: Option<Duration>,
    pub(crate) initial_sampling_rate: Option<f64>,
}

impl SamplerArgs {
    /// Arguments from `OTEL_TRACES_SAMPLER_ARG`, only read when
    /// `OTEL_TRACES_SAMPLER` selects the remote sampler.
    pub(crate) fn from_env() -> Self {
        match env::var(OTEL_TRACES_SAMPLER) {
            Ok(sampler) if REMOTE_SAMPLERS.contains(&sampler.as_str()) => env::var(OTEL_TRACES_SAMPLER_ARG)
                .map(|arg| Self::parse(&arg))
                .unwrap_or_default(),
            _ => SamplerArgs::default(),
        }
    }

    pub(crate) fn parse(arg: &str) -> Self {
        let mut args = SamplerArgs::default();
        for entry in arg.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                otel_warn!(
                    name: "RemoteSampler.Config.InvalidSamplerArgument",
                    message = "Ignoring an OTEL_TRACES_SAMPLER_ARG entry that is not a key=value pair",
                    entry = entry
                );
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "endpoint" if !value.is_empty() => args.endpoint = Some(value.to_string()),
                "pollingIntervalMs" => match value.parse::<u64>() {
                    Ok(ms) if ms > 0 => args.polling_interval = Some(Duration::from_millis(ms)),
                    _ => invalid_value(entry),
                },
                "initialSamplingRate" => match value.parse::<f64>() {
                    Ok(rate) if validate_sampling_rate(rate).is_ok() => {
                        args.initial_sampling_rate = Some(rate)
                    }
                    _ => invalid_value(entry),
                },
                "endpoint" => invalid_value(entry),
                _ => {
                    otel_warn!(
                        name: "RemoteSampler.Config.UnknownSamplerArgument",
                        message = "Ignoring an unknown OTEL_TRACES_SAMPLER_ARG key. Valid keys are: endpoint, pollingIntervalMs, initialSamplingRate",
                        entry = entry
                    );
                }
            }
        }
        args
    }
}

fn invalid_value(entry: &str) {
    otel_warn!(
        name: "RemoteSampler.Config.InvalidSamplerArgument",
        message = "Ignoring an OTEL_TRACES_SAMPLER_ARG entry with an invalid value",
        entry = entry
    );
}
