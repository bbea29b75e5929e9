use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

pub static RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("poller_runs_total", "Completed poll fan-outs").expect("runs total")
});

pub static LAST_RUN_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "poller_last_run_timestamp_seconds",
        "Unix timestamp of the last poll fan-out"
    )
    .expect("last run timestamp")
});

pub static REPOS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "poller_repos_processed_total",
        "Per-repository task outcomes",
        &["status"]
    )
    .expect("repos processed")
});

pub static PULLS_OBSERVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "poller_pulls_observed_total",
        "Pull requests observed across sweeps"
    )
    .expect("pulls observed")
});

pub static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "poller_run_duration_seconds",
        "Wall time of a full poll fan-out"
    )
    .expect("run duration")
});
