//! Environment-variable overrides for sender and batch configuration.

use std::env;
use std::time::Duration;

/// Collector endpoint, e.g. "http://localhost:9411/api/v2/spans".
pub(crate) const ENV_ENDPOINT: &str = "SPAN_RELAY_ENDPOINT";

/// Read timeout for one batch delivery, in milliseconds.
pub(crate) const ENV_TIMEOUT: &str = "SPAN_RELAY_TIMEOUT";

/// Maximum number of spans buffered before new spans are dropped.
pub(crate) const ENV_MAX_QUEUE_SIZE: &str = "SPAN_RELAY_MAX_QUEUE_SIZE";

/// Delay between two consecutive batch deliveries, in milliseconds.
pub(crate) const ENV_SCHEDULE_DELAY: &str = "SPAN_RELAY_SCHEDULE_DELAY";

/// Maximum number of spans shipped in one request.
pub(crate) const ENV_MAX_EXPORT_BATCH_SIZE: &str = "SPAN_RELAY_MAX_EXPORT_BATCH_SIZE";

pub(crate) const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9411/api/v2/spans";
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

pub(crate) fn get_endpoint() -> String {
    match env::var(ENV_ENDPOINT).ok().filter(|var| !var.is_empty()) {
        Some(endpoint) => endpoint,
        None => DEFAULT_ENDPOINT.to_string(),
    }
}

pub(crate) fn get_timeout() -> Duration {
    get_duration_millis(ENV_TIMEOUT, DEFAULT_TIMEOUT)
}

pub(crate) fn get_duration_millis(var: &str, default: Duration) -> Duration {
    match env::var(var).ok().filter(|val| !val.is_empty()) {
        Some(millis) => match millis.parse() {
            Ok(millis) => Duration::from_millis(millis),
            Err(err) => {
                tracing::warn!(
                    variable = var,
                    value = %millis,
                    error = %err,
                    "malformed duration, falling back to default"
                );
                default
            }
        },
        None => default,
    }
}

pub(crate) fn get_usize(var: &str, default: usize) -> usize {
    match env::var(var).ok().filter(|val| !val.is_empty()) {
        Some(value) => match value.parse() {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    variable = var,
                    value = %value,
                    error = %err,
                    "malformed count, falling back to default"
                );
                default
            }
        },
        None => default,
    }
}
