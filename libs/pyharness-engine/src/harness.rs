/// Harness Generator - Wraps User Source in a Test Driver
///
/// **Core Responsibility:**
/// Turn (user source, ordered test cases) into a runnable Python program plus
/// the data file that program reads at startup.
///
/// **Critical Properties:**
/// - Pure transformation: no I/O, no Docker, no parsing
/// - The driver is a fixed template; caller-supplied text never becomes code
/// - Test cases and the user source reach the driver through `harness_cases.json`
///
/// **Per-Test Strategies (chosen inside the driver):**
/// - `print_output` → re-run the program with stdout redirected to a buffer
/// - anything else → evaluate the expression against the program's top-level
///   bindings with only an allow-list of pure builtins
///
/// Exceptions are isolated per test. After the last test the driver prints the
/// ordered results as JSON between the start and end markers.

use crate::engine::{Artifact, Attachment};
use pyharness_common::protocol::{
    CASES_FILE, ERROR_ACTUAL_OUTPUT, PRINT_OUTPUT_SENTINEL, RESULTS_END_MARKER,
    RESULTS_START_MARKER,
};
use pyharness_common::types::TestCase;
use serde::Serialize;

const DRIVER_TEMPLATE: &str = include_str!("python/driver.py");

/// Composite program produced for one test run
#[derive(Debug, Clone, PartialEq)]
pub struct Harness {
    /// User source verbatim, followed by the driver
    pub source: String,
    /// JSON data file staged next to the program as `harness_cases.json`
    pub cases_blob: String,
}

impl Harness {
    pub fn into_artifact(self) -> Artifact {
        Artifact {
            program: self.source,
            attachments: vec![Attachment {
                name: CASES_FILE.to_string(),
                contents: self.cases_blob,
            }],
        }
    }
}

#[derive(Serialize)]
struct CasesBlob<'a> {
    source: &'a str,
    cases: &'a [TestCase],
}

/// Render the driver with protocol constants substituted as Python string
/// literals. Only compile-time constants pass through here.
fn render_driver() -> serde_json::Result<String> {
    let literal = |value: &str| serde_json::to_string(value);

    Ok(DRIVER_TEMPLATE
        .replace("__START_MARKER__", &literal(RESULTS_START_MARKER)?)
        .replace("__END_MARKER__", &literal(RESULTS_END_MARKER)?)
        .replace("__SENTINEL__", &literal(PRINT_OUTPUT_SENTINEL)?)
        .replace("__ERROR_OUTPUT__", &literal(ERROR_ACTUAL_OUTPUT)?)
        .replace("__CASES_FILE__", &literal(CASES_FILE)?))
}

/// Generate the harness for `user_source` and `test_cases`
pub fn generate(user_source: &str, test_cases: &[TestCase]) -> serde_json::Result<Harness> {
    let driver = render_driver()?;

    let mut source = String::with_capacity(user_source.len() + driver.len() + 1);
    source.push_str(user_source);
    if !user_source.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(&driver);

    let cases_blob = serde_json::to_string(&CasesBlob {
        source: user_source,
        cases: test_cases,
    })?;

    tracing::debug!(
        test_count = test_cases.len(),
        source_bytes = source.len(),
        blob_bytes = cases_blob.len(),
        "Generated harness"
    );

    Ok(Harness { source, cases_blob })
}
