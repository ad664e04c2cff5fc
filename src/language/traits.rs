// Runner seam: every execution strategy (embedded evaluator, external toolchain)
// implements CodeRunner and turns its own failures into classified results

use async_trait::async_trait;
use std::time::Duration;

use crate::execution::ExecutionResult;

use super::catalog::LanguageSpec;
use super::registry::RuntimeInfo;

/// Everything a runner needs for one execution attempt
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub language: &'a LanguageSpec,
    pub runtime: &'a RuntimeInfo,
    pub source_code: &'a str,
    pub stdin: Option<&'a str>,
    /// Budget for the whole attempt, compile phase included
    pub timeout: Duration,
}

/// An execution strategy.
///
/// Implementations never return an error: compile errors, runtime errors,
/// timeouts and engine failures all come back as an [`ExecutionResult`]
/// carrying the matching classification.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Short name used in logs
    fn runner_name(&self) -> &str;

    async fn run(&self, ctx: RunContext<'_>) -> ExecutionResult;
}

/// Drop trailing line terminators so `print("X")` yields exactly `X`
pub fn trim_trailing_newlines(output: &str) -> String {
    output.trim_end_matches(['\n', '\r']).to_string()
}
