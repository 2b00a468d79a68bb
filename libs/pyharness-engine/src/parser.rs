/// Result Parser - Extracts the Delimited JSON Payload
///
/// **Contract:**
/// - Input: raw combined sandbox output
/// - Output: ordered test results, possibly empty, plus what happened
/// - Never fails its caller: a missing or malformed payload degrades to an
///   empty list so the raw output is still shown
///
/// The payload is anchored on the LAST start marker, so anything the user
/// program printed earlier cannot shadow the driver's block.

use pyharness_common::protocol::{RESULTS_END_MARKER, RESULTS_START_MARKER};
use pyharness_common::types::TestResult;
use thiserror::Error;

/// Why a payload could not be extracted. Internal diagnostic only.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("start marker not found")]
    MissingStart,
    #[error("end marker not found after start marker")]
    MissingEnd,
    #[error("payload is not a valid result list: {source}")]
    Malformed { source: serde_json::Error },
}

/// What happened to the structured results of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsOutcome {
    /// Run mode, or test mode without cases
    NotRequested,
    /// Payload found and decoded
    Parsed(usize),
    /// No complete marker pair in the output
    Missing,
    /// Markers present but the payload did not decode
    Malformed,
}

impl ResultsOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultsOutcome::NotRequested => "not_requested",
            ResultsOutcome::Parsed(_) => "parsed",
            ResultsOutcome::Missing => "missing",
            ResultsOutcome::Malformed => "malformed",
        }
    }
}

impl From<&ParseError> for ResultsOutcome {
    fn from(e: &ParseError) -> Self {
        match e {
            ParseError::Malformed { .. } => ResultsOutcome::Malformed,
            ParseError::MissingStart | ParseError::MissingEnd => ResultsOutcome::Missing,
        }
    }
}

/// Strict extraction, reporting why it failed
pub fn try_parse(raw_output: &str) -> Result<Vec<TestResult>, ParseError> {
    let start = raw_output
        .rfind(RESULTS_START_MARKER)
        .ok_or(ParseError::MissingStart)?;
    let body_start = start + RESULTS_START_MARKER.len();

    let end = raw_output[body_start..]
        .find(RESULTS_END_MARKER)
        .ok_or(ParseError::MissingEnd)?;

    let payload = raw_output[body_start..body_start + end].trim();
    serde_json::from_str(payload).map_err(|e| ParseError::Malformed { source: e })
}

/// Graceful extraction: any failure is logged and yields an empty list
pub fn parse_results(raw_output: &str) -> (Vec<TestResult>, ResultsOutcome) {
    match try_parse(raw_output) {
        Ok(results) => {
            let count = results.len();
            (results, ResultsOutcome::Parsed(count))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Test result payload unavailable");
            let outcome = ResultsOutcome::from(&e);
            (Vec::new(), outcome)
        }
    }
}
