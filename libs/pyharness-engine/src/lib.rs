pub mod engine;
pub mod executor;
pub mod harness;
pub mod output;
pub mod parser;


pub use engine::{connect, Artifact, DockerEngine, ProcessEngine, RawOutput, Sandbox, SandboxError};
pub use executor::{execute, Execution};
pub use parser::ResultsOutcome;
