// CLI commands for pyharness
use anyhow::{bail, Context, Result};
use pyharness_common::config::{Backend, SandboxConfig, DEFAULT_CONFIG_PATH};
use pyharness_common::protocol::{CASES_FILE, PROGRAM_FILE};
use pyharness_common::types::{ExecutionRequest, ExecutionResponse, TestCase};
use pyharness_engine::{executor, harness};
use std::fs;
use std::path::Path;

/// Overrides shared by `run` and `test`
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub backend: Option<Backend>,
    pub timeout_ms: Option<u64>,
    pub json: bool,
}

fn load_config(options: &RunOptions) -> Result<SandboxConfig> {
    let mut config = SandboxConfig::load_default()?;
    if let Some(backend) = options.backend {
        config.backend = backend;
    }
    if let Some(timeout_ms) = options.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Load an ordered list of test cases from a JSON array
pub fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let cases: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test cases in {}", path.display()))?;
    Ok(cases)
}

/// Execute a request and print the response; returns whether it fully passed
async fn execute_and_report(request: ExecutionRequest, options: &RunOptions) -> Result<bool> {
    let config = load_config(options)?;
    let sandbox = pyharness_engine::connect(&config).context("Failed to initialize sandbox")?;

    let execution = executor::execute(&request, sandbox.as_ref(), config.timeout()).await;
    let response = execution.response;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_report(&response);
    }

    if !response.success {
        bail!("Sandbox could not be started");
    }

    Ok(response
        .test_results
        .as_ref()
        .map_or(true, |results| !results.is_empty() && results.iter().all(|r| r.passed)))
}

fn print_report(response: &ExecutionResponse) {
    if !response.raw_output.is_empty() {
        println!("{}", response.raw_output);
    }

    let Some(results) = &response.test_results else {
        return;
    };

    println!();
    if results.is_empty() {
        println!("⚠ No test results could be read from the program output");
        return;
    }

    for (idx, result) in results.iter().enumerate() {
        let mark = if result.passed { "✓" } else { "✗" };
        println!("  {} Test {}: {}", mark, idx + 1, result.description);
        println!("    input:    {}", result.input_expression);
        if !result.passed {
            println!("    expected: {}", result.expected_output);
            println!("    actual:   {}", result.actual_output);
        }
        if let Some(error) = &result.error {
            println!("    error:    {}", error);
        }
    }

    if let Some(summary) = &response.summary {
        println!();
        println!("Tests: {}", summary);
    }
}

/// Run a program as-is
pub async fn run_file(file: &Path, options: &RunOptions) -> Result<bool> {
    let request = ExecutionRequest::run(read_source(file)?);
    execute_and_report(request, options).await
}

/// Run a program against test cases
pub async fn test_file(file: &Path, cases: &Path, options: &RunOptions) -> Result<bool> {
    let test_cases = load_cases(cases)?;
    if test_cases.is_empty() {
        bail!("{} contains no test cases", cases.display());
    }
    let request = ExecutionRequest::test(read_source(file)?, test_cases);
    execute_and_report(request, options).await
}

/// Write the generated harness program and its data file without running them
pub fn generate_harness(file: &Path, cases: &Path, out_dir: &Path) -> Result<()> {
    let source = read_source(file)?;
    let test_cases = load_cases(cases)?;

    let generated = harness::generate(&source, &test_cases).context("Failed to generate harness")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    fs::write(out_dir.join(PROGRAM_FILE), &generated.source)
        .context("Failed to write harness program")?;
    fs::write(out_dir.join(CASES_FILE), &generated.cases_blob)
        .context("Failed to write harness data")?;

    println!("✓ Wrote {} and {} to {}", PROGRAM_FILE, CASES_FILE, out_dir.display());
    println!("  Run with: python -u {}", out_dir.join(PROGRAM_FILE).display());
    Ok(())
}

/// Write a default config/sandbox.json under `path`
pub fn init_project(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_PATH);
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(&SandboxConfig::default())
        .context("Failed to serialize default config")?;
    fs::write(&config_path, json + "\n")
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("✓ Created {}", config_path.display());
    Ok(())
}
