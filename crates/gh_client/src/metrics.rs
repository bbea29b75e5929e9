use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_requests_total",
        "Requests by method and status class",
        &["method", "status"]
    )
    .expect("requests total")
});

pub static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_retries_total",
        "Retries by reason",
        &["reason"]
    )
    .expect("retries")
});

pub static SLEEP_SECONDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gh_client_sleep_seconds_total",
        "Total governor sleep seconds per reason",
        &["reason"]
    )
    .expect("sleep seconds")
});

pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("gh_client_cache_hits_total", "Conditional cache hits").expect("cache hits")
});

pub static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("gh_client_cache_misses_total", "Conditional cache misses")
        .expect("cache misses")
});

pub static RATE_LIMIT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("gh_client_rate_limit", "Server-reported hourly limit").expect("rate limit")
});

pub static RATE_REMAINING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gh_client_rate_remaining",
        "Server-reported remaining hourly budget"
    )
    .expect("rate remaining")
});

pub static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gh_client_latency_seconds",
        "Request latency per method",
        &["method"]
    )
    .expect("latency")
});

pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
