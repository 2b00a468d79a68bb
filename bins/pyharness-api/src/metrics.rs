// Prometheus metrics for the pyharness API

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use pyharness_engine::Execution;

lazy_static! {
    pub static ref EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "pyharness_executions_total",
        "Requests handled, by mode",
        &["mode"]
    )
    .expect("metric can be registered");
    pub static ref SETUP_FAILURES: IntCounter = register_int_counter!(
        "pyharness_setup_failures_total",
        "Requests whose sandbox could not be staged or started"
    )
    .expect("metric can be registered");
    pub static ref TIMEOUTS: IntCounter = register_int_counter!(
        "pyharness_timeouts_total",
        "Sandbox runs killed at the wall-clock bound"
    )
    .expect("metric can be registered");
    pub static ref RESULT_PAYLOADS: IntCounterVec = register_int_counter_vec!(
        "pyharness_result_payloads_total",
        "Outcome of extracting the test result payload",
        &["outcome"]
    )
    .expect("metric can be registered");
    pub static ref TEST_RESULTS: IntCounterVec = register_int_counter_vec!(
        "pyharness_test_results_total",
        "Individual test results, by pass/fail",
        &["result"]
    )
    .expect("metric can be registered");
    pub static ref EXECUTION_SECONDS: Histogram = register_histogram!(
        "pyharness_execution_seconds",
        "Wall-clock time spent in the sandbox",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be registered");
}

/// Record one finished execution
pub fn observe(mode: &str, execution: &Execution) {
    EXECUTIONS.with_label_values(&[mode]).inc();

    if execution.setup_failed {
        SETUP_FAILURES.inc();
        return;
    }
    if execution.timed_out {
        TIMEOUTS.inc();
    }
    EXECUTION_SECONDS.observe(execution.elapsed.as_secs_f64());
    RESULT_PAYLOADS
        .with_label_values(&[execution.outcome.as_str()])
        .inc();

    if let Some(results) = &execution.response.test_results {
        let passed = results.iter().filter(|r| r.passed).count() as u64;
        TEST_RESULTS.with_label_values(&["passed"]).inc_by(passed);
        TEST_RESULTS
            .with_label_values(&["failed"])
            .inc_by(results.len() as u64 - passed);
    }
}

/// Text exposition of the default registry
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
