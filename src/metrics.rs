use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("broker_requests_total", "Total number of questions received").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("broker_cache_hits_total", "Total cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("broker_cache_misses_total", "Total cache misses").unwrap();
    pub static ref CACHE_ERRORS: Counter =
        register_counter!("broker_cache_errors_total", "Cache reads or writes that failed").unwrap();
    pub static ref GENERATION_ATTEMPTS: Counter =
        register_counter!("broker_generation_attempts_total", "Calls made to the generation service").unwrap();
    pub static ref GENERATION_FAILURES: Counter =
        register_counter!("broker_generation_failures_total", "Requests that failed after retries").unwrap();
    pub static ref RETRIEVAL_FAILURES: Counter =
        register_counter!("broker_retrieval_failures_total", "Knowledge base lookups that failed").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "broker_request_latency_seconds",
        "Request latency in seconds",
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    )
    .unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("broker_memory_cache_size", "Entries held by the in-memory cache").unwrap();
}

pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
