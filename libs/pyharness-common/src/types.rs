use serde::{Deserialize, Serialize};
use std::fmt;

/// How a submission should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Execute the source as-is
    #[default]
    Run,
    /// Wrap the source in a generated harness and evaluate test cases
    Test,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Run => write!(f, "run"),
            Mode::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Opaque client-side identifier, carried but never used for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(alias = "input")]
    pub input_expression: String,
    #[serde(alias = "expected")]
    pub expected_output: String,
    #[serde(default)]
    pub description: String,
}

impl TestCase {
    pub fn new(
        input_expression: impl Into<String>,
        expected_output: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            input_expression: input_expression.into(),
            expected_output: expected_output.into(),
            description: description.into(),
        }
    }
}

/// Outcome of evaluating one test case inside the harness.
///
/// Produced in the same order as the test cases that generated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub input_expression: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(alias = "code")]
    pub source_code: String,
    #[serde(default, alias = "action")]
    pub mode: Mode,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl ExecutionRequest {
    pub fn run(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            mode: Mode::Run,
            test_cases: Vec::new(),
        }
    }

    pub fn test(source_code: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            source_code: source_code.into(),
            mode: Mode::Test,
            test_cases,
        }
    }

    /// True when the harness path applies: test mode with at least one case
    pub fn wants_harness(&self) -> bool {
        self.mode == Mode::Test && !self.test_cases.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub success: bool,
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Vec<TestResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ExecutionResponse {
    pub fn setup_failure(message: impl fmt::Display) -> Self {
        Self {
            success: false,
            raw_output: format!("Sandbox setup failed: {}", message),
            test_results: None,
            summary: None,
        }
    }
}

/// "<passed>/<total> passed"
pub fn summarize(results: &[TestResult]) -> String {
    let passed = results.iter().filter(|r| r.passed).count();
    format!("{}/{} passed", passed, results.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_camel_case() {
        let json = r#"{
            "sourceCode": "def add(a, b):\n    return a + b",
            "mode": "test",
            "testCases": [
                {"id": 1, "inputExpression": "add(2, 3)", "expectedOutput": "5", "description": "adds"}
            ]
        }"#;
        let req: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.mode, Mode::Test);
        assert_eq!(req.test_cases.len(), 1);
        assert_eq!(req.test_cases[0].input_expression, "add(2, 3)");
        assert_eq!(req.test_cases[0].id, Some(serde_json::json!(1)));
        assert!(req.wants_harness());
    }

    #[test]
    fn test_request_accepts_editor_aliases() {
        let json = r#"{
            "code": "print(5)",
            "action": "test",
            "testCases": [{"input": "print_output", "expected": "5", "description": "prints"}]
        }"#;
        let req: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.source_code, "print(5)");
        assert_eq!(req.test_cases[0].expected_output, "5");
    }

    #[test]
    fn test_missing_test_cases_default_to_empty() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"sourceCode": "print(1)", "mode": "test"}"#).unwrap();
        assert!(req.test_cases.is_empty());
        assert!(!req.wants_harness());
    }

    #[test]
    fn test_run_mode_never_wants_harness() {
        let req = ExecutionRequest {
            source_code: String::new(),
            mode: Mode::Run,
            test_cases: vec![TestCase::new("print_output", "", "")],
        };
        assert!(!req.wants_harness());
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let resp = ExecutionResponse {
            success: true,
            raw_output: "hi".to_string(),
            test_results: None,
            summary: None,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, serde_json::json!({"success": true, "rawOutput": "hi"}));
    }

    #[test]
    fn test_result_error_field_round_trips_as_optional() {
        let raw = r#"{"inputExpression": "boom()", "expectedOutput": "1",
                      "actualOutput": "Error", "passed": false, "description": "",
                      "error": "name 'boom' is not defined"}"#;
        let result: TestResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.error.as_deref(), Some("name 'boom' is not defined"));

        let raw = r#"{"inputExpression": "x", "expectedOutput": "1",
                      "actualOutput": "1", "passed": true, "description": "", "error": null}"#;
        let result: TestResult = serde_json::from_str(raw).unwrap();
        assert!(result.error.is_none());
    }

    #[test]
    fn test_summary_format() {
        let pass = TestResult {
            input_expression: "a".into(),
            expected_output: "1".into(),
            actual_output: "1".into(),
            passed: true,
            description: String::new(),
            error: None,
        };
        let fail = TestResult { passed: false, ..pass.clone() };
        assert_eq!(summarize(&[pass, fail.clone(), fail]), "1/3 passed");
        assert_eq!(summarize(&[]), "0/0 passed");
    }
}
