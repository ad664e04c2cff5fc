// CodeTutor - Library module
// Code execution and runtime-detection engine for the learning platform

pub mod classification;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod language;
pub mod logging;
pub mod process;
pub mod validation;

// Re-export main types for easier access
pub use classification::{classify, Classification, OutcomeSignals};
pub use config::{EngineConfig, ResourceLimits, ScriptConfig};
pub use error::{
    exit_codes, CliError, CodeTutorError, ConfigError, ExecutionError, ProcessError, Result,
};
pub use execution::{ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use language::{
    CodeRunner, CommandProbe, ExternalRunner, LanguageCatalog, LanguageSpec, RunContext,
    RuntimeInfo, RuntimeProbe, RuntimeRegistry, ScriptRunner,
};
pub use logging::{ColorConfig, LogConfig, LogFormat};
pub use process::{ProcessConfig, ProcessEnvironment, ProcessManager, ProcessResult};
pub use validation::{
    HarnessPreparer, InputPreparer, PreparedRun, StdinPreparer, TestCase, TestCaseEvaluator,
    TestCaseResult, TestCaseStatus, ValidationResult,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

// Build information (set by build script)
pub const BUILD_DATE: &str = env!("BUILD_DATE");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
pub const GIT_BRANCH: &str = env!("GIT_BRANCH");
pub const RUST_VERSION: &str = env!("RUST_VERSION");

/// Get formatted version string with build information
pub fn version_info() -> String {
    format!(
        "{NAME} {VERSION} (commit: {GIT_COMMIT}, branch: {GIT_BRANCH}, built: {BUILD_DATE}, rustc: {RUST_VERSION})"
    )
}
