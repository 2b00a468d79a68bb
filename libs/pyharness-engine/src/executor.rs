/// Request Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one ExecutionRequest into one ExecutionResponse.
///
/// **Architecture:**
/// 1. Harness generator wraps the source when test cases are present (harness.rs)
/// 2. Sandbox runs the program exactly once under the timeout (engine.rs)
/// 3. Parser extracts the delimited results (parser.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How tests are evaluated (the generated driver's job)
///
/// Only a sandbox setup failure makes `success` false. Crashes, timeouts,
/// failing tests and unparsable payloads are all reported in-band.

use crate::engine::{Artifact, Sandbox};
use crate::harness;
use crate::parser;
pub use crate::parser::ResultsOutcome;
use pyharness_common::types::{summarize, ExecutionRequest, ExecutionResponse};
use std::time::Duration;
use tracing::{info, warn};

/// Response plus internal diagnostics that never reach the client
#[derive(Debug, Clone)]
pub struct Execution {
    pub response: ExecutionResponse,
    pub outcome: ResultsOutcome,
    pub setup_failed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i64>,
    pub elapsed: Duration,
}

impl Execution {
    fn setup_failure(message: impl std::fmt::Display, outcome: ResultsOutcome) -> Self {
        Self {
            response: ExecutionResponse::setup_failure(message),
            outcome,
            setup_failed: true,
            timed_out: false,
            exit_code: None,
            elapsed: Duration::ZERO,
        }
    }
}

/// Execute a request against `sandbox`, bounded by `timeout`
pub async fn execute(
    request: &ExecutionRequest,
    sandbox: &dyn Sandbox,
    timeout: Duration,
) -> Execution {
    let wrap = request.wants_harness();
    let pending = if wrap {
        ResultsOutcome::Missing
    } else {
        ResultsOutcome::NotRequested
    };

    // Step 1: Build the artifact
    let artifact = if wrap {
        match harness::generate(&request.source_code, &request.test_cases) {
            Ok(h) => h.into_artifact(),
            Err(e) => {
                warn!(error = %e, "Failed to generate harness");
                return Execution::setup_failure(e, pending);
            }
        }
    } else {
        Artifact::program(request.source_code.as_str())
    };

    // Step 2: Run once
    let raw = match sandbox.run(&artifact, timeout).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(backend = sandbox.name(), error = %e, "Sandbox setup failed");
            return Execution::setup_failure(e, pending);
        }
    };

    // Step 3: Parse when a harness was used
    let (test_results, summary, outcome) = if wrap {
        let (results, outcome) = parser::parse_results(&raw.combined);
        if results.is_empty() {
            (Some(results), None, outcome)
        } else {
            if results.len() != request.test_cases.len() {
                warn!(
                    expected = request.test_cases.len(),
                    parsed = results.len(),
                    "Result count differs from test case count"
                );
            }
            let summary = summarize(&results);
            (Some(results), Some(summary), outcome)
        }
    } else {
        (None, None, ResultsOutcome::NotRequested)
    };

    info!(
        mode = %request.mode,
        backend = sandbox.name(),
        test_count = request.test_cases.len(),
        results = outcome.as_str(),
        summary = summary.as_deref().unwrap_or("-"),
        timed_out = raw.timed_out,
        exit_code = ?raw.exit_code,
        elapsed_ms = raw.elapsed.as_millis() as u64,
        "Execution completed"
    );

    Execution {
        response: ExecutionResponse {
            success: true,
            raw_output: raw.combined.trim().to_string(),
            test_results,
            summary,
        },
        outcome,
        setup_failed: false,
        timed_out: raw.timed_out,
        exit_code: raw.exit_code,
        elapsed: raw.elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RawOutput, SandboxError};
    use async_trait::async_trait;
    use pyharness_common::protocol::{CASES_FILE, TIMEOUT_MARKER};
    use pyharness_common::types::{Mode, TestCase};
    use std::sync::Mutex;

    /// Replays a canned output and records what it was asked to run
    struct FakeSandbox {
        output: String,
        timed_out: bool,
        fail: bool,
        seen: Mutex<Vec<Artifact>>,
    }

    impl FakeSandbox {
        fn replying(output: &str) -> Self {
            Self {
                output: output.to_string(),
                timed_out: false,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::replying("") }
        }

        fn seen(&self) -> Vec<Artifact> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn run(&self, artifact: &Artifact, _timeout: Duration) -> Result<RawOutput, SandboxError> {
            self.seen.lock().unwrap().push(artifact.clone());
            if self.fail {
                return Err(SandboxError::Staging {
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            Ok(RawOutput {
                combined: self.output.clone(),
                exit_code: if self.timed_out { None } else { Some(0) },
                timed_out: self.timed_out,
                truncated: false,
                elapsed: Duration::from_millis(3),
            })
        }
    }

    fn payload(entries: &[(&str, &str, &str, bool)]) -> String {
        let records: Vec<serde_json::Value> = entries
            .iter()
            .map(|(input, expected, actual, passed)| {
                serde_json::json!({
                    "inputExpression": input,
                    "expectedOutput": expected,
                    "actualOutput": actual,
                    "passed": passed,
                    "description": "",
                    "error": null,
                })
            })
            .collect();
        format!(
            "5\n\nTEST_RESULTS_START\n{}\nTEST_RESULTS_END\n",
            serde_json::to_string_pretty(&records).unwrap()
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_run_mode_executes_source_directly() {
        let sandbox = FakeSandbox::replying("  hello\n");
        let request = ExecutionRequest::run("print('hello')");

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert!(execution.response.success);
        assert_eq!(execution.response.raw_output, "hello");
        assert!(execution.response.test_results.is_none());
        assert!(execution.response.summary.is_none());
        assert_eq!(execution.outcome, ResultsOutcome::NotRequested);

        let seen = sandbox.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "print('hello')");
        assert!(seen[0].attachments.is_empty());
    }

    #[tokio::test]
    async fn test_test_mode_without_cases_is_a_plain_run() {
        let sandbox = FakeSandbox::replying("out");
        let request = ExecutionRequest {
            source_code: "print('out')".to_string(),
            mode: Mode::Test,
            test_cases: Vec::new(),
        };

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert!(execution.response.test_results.is_none());
        assert_eq!(sandbox.seen()[0].program, "print('out')");
    }

    #[tokio::test]
    async fn test_test_mode_wraps_parses_and_summarizes() {
        let sandbox = FakeSandbox::replying(&payload(&[
            ("add(2, 3)", "5", "5", true),
            ("add(1, 1)", "3", "2", false),
        ]));
        let request = ExecutionRequest::test(
            "def add(a, b):\n    return a + b\n",
            vec![
                TestCase::new("add(2, 3)", "5", "adds"),
                TestCase::new("add(1, 1)", "3", "wrong on purpose"),
            ],
        );

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        let results = execution.response.test_results.clone().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(execution.response.summary.as_deref(), Some("1/2 passed"));
        assert_eq!(execution.outcome, ResultsOutcome::Parsed(2));

        let seen = sandbox.seen();
        assert!(seen[0].program.starts_with("def add(a, b):"));
        assert_eq!(seen[0].attachments[0].name, CASES_FILE);
    }

    #[tokio::test]
    async fn test_summary_uses_parsed_length() {
        let sandbox = FakeSandbox::replying(&payload(&[("a", "1", "1", true)]));
        let request = ExecutionRequest::test(
            "a = 1",
            vec![TestCase::new("a", "1", ""), TestCase::new("a", "1", "")],
        );

        let execution = execute(&request, &sandbox, TIMEOUT).await;
        assert_eq!(execution.response.summary.as_deref(), Some("1/1 passed"));
    }

    #[tokio::test]
    async fn test_missing_payload_degrades() {
        let sandbox = FakeSandbox::replying("Traceback (most recent call last):\nSyntaxError\n");
        let request = ExecutionRequest::test("def broken(:", vec![TestCase::new("x", "1", "")]);

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert!(execution.response.success);
        assert_eq!(execution.response.test_results, Some(Vec::new()));
        assert!(execution.response.summary.is_none());
        assert_eq!(
            execution.response.raw_output,
            "Traceback (most recent call last):\nSyntaxError"
        );
        assert_eq!(execution.outcome, ResultsOutcome::Missing);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_distinguished() {
        let sandbox = FakeSandbox::replying("TEST_RESULTS_START\n{oops\nTEST_RESULTS_END\n");
        let request = ExecutionRequest::test("x = 1", vec![TestCase::new("x", "1", "")]);

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert_eq!(execution.response.test_results, Some(Vec::new()));
        assert_eq!(execution.outcome, ResultsOutcome::Malformed);
    }

    #[tokio::test]
    async fn test_timeout_is_not_a_failure() {
        let sandbox = FakeSandbox {
            timed_out: true,
            ..FakeSandbox::replying(&format!("tick\n{}\n", TIMEOUT_MARKER))
        };
        let request = ExecutionRequest::run("while True: print('tick')");

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert!(execution.response.success);
        assert!(execution.timed_out);
        assert!(execution.response.raw_output.ends_with(TIMEOUT_MARKER));
    }

    #[tokio::test]
    async fn test_setup_failure_is_the_only_unsuccessful_response() {
        let sandbox = FakeSandbox::failing();
        let request = ExecutionRequest::test("x = 1", vec![TestCase::new("x", "1", "")]);

        let execution = execute(&request, &sandbox, TIMEOUT).await;

        assert!(!execution.response.success);
        assert!(execution.setup_failed);
        assert!(execution.response.raw_output.starts_with("Sandbox setup failed:"));
        assert!(execution.response.raw_output.contains("disk full"));
        assert!(execution.response.test_results.is_none());
        assert!(execution.response.summary.is_none());
    }

    #[tokio::test]
    async fn test_identical_requests_yield_identical_results() {
        let sandbox = FakeSandbox::replying(&payload(&[("add(2, 3)", "5", "5", true)]));
        let request = ExecutionRequest::test("def add(a, b): return a + b", vec![TestCase::new("add(2, 3)", "5", "")]);

        let first = execute(&request, &sandbox, TIMEOUT).await;
        let second = execute(&request, &sandbox, TIMEOUT).await;

        assert_eq!(first.response, second.response);
        let seen = sandbox.seen();
        assert_eq!(seen[0], seen[1]);
    }
}
