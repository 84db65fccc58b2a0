use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static ANALYSIS_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static ANALYSIS_DURATION_SECONDS: OnceLock<Histogram> = OnceLock::new();
static RESULTS_SAVED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("scanbay_http_requests_total", "HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create scanbay_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "scanbay_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create scanbay_http_request_duration_seconds"),
        )
    })
}

fn analysis_runs_total() -> &'static IntCounterVec {
    ANALYSIS_RUNS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "scanbay_analysis_runs_total",
                    "Analyzer invocations by outcome.",
                ),
                &["outcome"],
            )
            .expect("create scanbay_analysis_runs_total"),
        )
    })
}

fn analysis_duration_seconds() -> &'static Histogram {
    ANALYSIS_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            Histogram::with_opts(
                HistogramOpts::new(
                    "scanbay_analysis_duration_seconds",
                    "Analyzer invocation duration in seconds.",
                )
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            )
            .expect("create scanbay_analysis_duration_seconds"),
        )
    })
}

fn results_saved_total() -> &'static IntCounter {
    RESULTS_SAVED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new("scanbay_results_saved_total", "Results persisted.")
                .expect("create scanbay_results_saved_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_analysis(outcome: &str, duration: Duration) {
    analysis_runs_total().with_label_values(&[outcome]).inc();
    analysis_duration_seconds().observe(duration.as_secs_f64());
}

pub fn inc_result_saved() {
    results_saved_total().inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = results_saved_total();
    let _ = analysis_runs_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
