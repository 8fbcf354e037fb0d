use axum::{body::Body, http::Request, http::StatusCode, response::Response};
use lazy_static::lazy_static;
use prometheus::{self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::Span;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Simple request counter
    pub static ref INCOMING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("incoming_requests", "The number of HTTP requests received"),
        &["http_method"]
    ).unwrap();
    // Request counter by status code
    pub static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_response", "The number of responses sent."),
        &["status_code"]
    ).unwrap();
    // Request histogram by response time
    pub static ref RESPONSE_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("response_time", "The time taken to respond to each request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
        },
        &[],
    ).unwrap();
    // Tile cache lookups by outcome (hit, miss)
    pub static ref TILE_CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("tile_cache_lookups", "The number of rendered output cache lookups"),
        &["outcome"]
    ).unwrap();
    // Value range estimates by outcome (memo, computed)
    pub static ref ZRANGE_ESTIMATES: IntCounterVec = IntCounterVec::new(
        Opts::new("zrange_estimates", "The number of automatic value range estimates"),
        &["outcome"]
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(INCOMING_REQUESTS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RESPONSE_CODE_COLLECTOR.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RESPONSE_TIME_COLLECTOR.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(TILE_CACHE_LOOKUPS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ZRANGE_ESTIMATES.clone()))
        .unwrap();
}

/// Render the registry in the Prometheus text format.
pub async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    String::from_utf8(buffer).map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

/// Increments the prometheus counter on all incoming requests, labelled by http method
pub fn request_counter(request: &Request<Body>, _span: &Span) {
    INCOMING_REQUESTS
        .with_label_values(&[&request.method().to_string().to_ascii_uppercase()])
        .inc();
}

/// Increment the prometheus counter on all outgoing responses, labelled by status code
pub fn record_response_metrics<B>(
    response: &Response<B>,
    latency: std::time::Duration,
    _span: &Span,
) {
    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[response.status().as_str()])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[])
        .observe(latency.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_renders_text_format() {
        // Unregistered collectors still count; the registry output is text either way.
        TILE_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
        assert!(TILE_CACHE_LOOKUPS.with_label_values(&["miss"]).get() >= 1);
        assert!(metrics_handler().await.is_ok());
    }
}
