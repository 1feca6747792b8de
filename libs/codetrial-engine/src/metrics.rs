// Prometheus metrics for the grading pipeline, registered in the default registry

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codetrial_submissions_total",
        "Submissions accepted by the scheduler",
        &["language"]
    )
    .expect("metric can be registered");

    pub static ref SUBMISSIONS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codetrial_submissions_finished_total",
        "Submissions that reached a terminal state",
        &["state"]
    )
    .expect("metric can be registered");

    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "codetrial_queue_depth",
        "Submissions waiting for a worker"
    )
    .expect("metric can be registered");

    pub static ref ACTIVE_SUBMISSIONS: IntGauge = register_int_gauge!(
        "codetrial_active_submissions",
        "Submissions currently running"
    )
    .expect("metric can be registered");

    pub static ref CASE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "codetrial_case_duration_seconds",
        "Wall time of one test case execution",
        &["language"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be registered");

    pub static ref SANDBOX_INTERNAL_FAULTS_TOTAL: IntCounter = register_int_counter!(
        "codetrial_sandbox_internal_faults_total",
        "Sandbox infrastructure failures, retries included"
    )
    .expect("metric can be registered");
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
