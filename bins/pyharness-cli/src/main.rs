mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::RunOptions;
use pyharness_common::config::Backend;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyharness")]
#[command(about = "pyharness CLI - Run Python programs and test cases in a disposable sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program and print its output
    Run {
        /// Python source file
        file: PathBuf,

        #[command(flatten)]
        sandbox: SandboxArgs,
    },

    /// Run a program against a JSON list of test cases
    Test {
        /// Python source file
        file: PathBuf,

        /// JSON array of {inputExpression, expectedOutput, description}
        #[arg(short, long)]
        cases: PathBuf,

        #[command(flatten)]
        sandbox: SandboxArgs,
    },

    /// Write the generated harness without running it
    Generate {
        /// Python source file
        file: PathBuf,

        /// JSON array of test cases
        #[arg(short, long)]
        cases: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "harness-out")]
        out: PathBuf,
    },

    /// Write a default config/sandbox.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct SandboxArgs {
    /// Sandbox backend (docker, process)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Wall-clock timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Print the response envelope as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

impl From<SandboxArgs> for RunOptions {
    fn from(args: SandboxArgs) -> Self {
        RunOptions {
            backend: args.backend,
            timeout_ms: args.timeout_ms,
            json: args.json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let all_passed = match cli.command {
        Commands::Run { file, sandbox } => commands::run_file(&file, &sandbox.into()).await?,
        Commands::Test {
            file,
            cases,
            sandbox,
        } => commands::test_file(&file, &cases, &sandbox.into()).await?,
        Commands::Generate { file, cases, out } => {
            commands::generate_harness(&file, &cases, &out)?;
            true
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
            true
        }
    };

    if !all_passed {
        std::process::exit(1);
    }

    Ok(())
}
