/// Harness protocol semantics - constants only, no runtime logic
/// Ensures the generated driver, the sandbox and the result parser never drift

/// Reserved input expression selecting the capture strategy
pub const PRINT_OUTPUT_SENTINEL: &str = "print_output";

/// Marker line emitted right before the JSON result payload
pub const RESULTS_START_MARKER: &str = "TEST_RESULTS_START";

/// Marker line emitted right after the JSON result payload
pub const RESULTS_END_MARKER: &str = "TEST_RESULTS_END";

/// actualOutput recorded for a test case whose evaluation raised
pub const ERROR_ACTUAL_OUTPUT: &str = "Error";

/// Appended to captured output when the wall-clock bound is hit
pub const TIMEOUT_MARKER: &str = "[ERROR] Execution timed out.";

/// Appended when captured output exceeds the configured cap
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// File name of the program inside the staging directory
pub const PROGRAM_FILE: &str = "main.py";

/// File name of the harness data blob inside the staging directory
pub const CASES_FILE: &str = "harness_cases.json";

/// Mount point of the staging directory inside the container
pub const SANDBOX_MOUNT: &str = "/sandbox";

/// Diagnostic line for a sandboxed process that exited non-zero
pub fn exit_status_marker(code: i64) -> String {
    let hint = match code {
        137 => " (killed: likely OOM or exceeded memory limit)",
        139 => " (killed: segmentation fault)",
        _ => "",
    };
    format!("[ERROR] Process exited with status {}{}.", code, hint)
}

/// True when an input expression selects the capture strategy
pub fn is_capture(input_expression: &str) -> bool {
    input_expression == PRINT_OUTPUT_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_dispatch_is_exact() {
        assert!(is_capture("print_output"));
        assert!(!is_capture(" print_output"));
        assert!(!is_capture("print_output()"));
        assert!(!is_capture("PRINT_OUTPUT"));
    }

    #[test]
    fn test_exit_status_marker() {
        assert_eq!(exit_status_marker(1), "[ERROR] Process exited with status 1.");
        assert!(exit_status_marker(137).contains("OOM"));
        assert!(exit_status_marker(139).contains("segmentation fault"));
    }

    #[test]
    fn test_markers_are_distinct() {
        assert_ne!(RESULTS_START_MARKER, RESULTS_END_MARKER);
        assert!(!RESULTS_START_MARKER.contains(RESULTS_END_MARKER));
        assert!(!RESULTS_END_MARKER.contains(RESULTS_START_MARKER));
    }
}
