// External toolchain runner: temp workspace, optional compile phase, run phase

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::classification::OutcomeSignals;
use crate::config::{EngineConfig, ResourceLimits, MAX_TIMEOUT_SECS};
use crate::error::{CodeTutorError, ProcessError};
use crate::execution::ExecutionResult;
use crate::process::{ProcessConfig, ProcessEnvironment, ProcessManager, ProcessResult};

use super::catalog::{expand_template, LanguageSpec, TemplateValues};
use super::script::truncation_marker;
use super::traits::{trim_trailing_newlines, CodeRunner, RunContext};

/// Runs learner code with a host-installed interpreter or compiler
#[derive(Debug, Clone)]
pub struct ExternalRunner {
    process_manager: ProcessManager,
    limits: ResourceLimits,
    max_output_bytes: usize,
}

/// Which phase a process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Compile,
    Run,
}

impl ExternalRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            process_manager: ProcessManager::with_config(
                config.default_timeout(),
                config.max_output_bytes,
            ),
            limits: config.limits.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    async fn run_in_workspace(
        &self,
        ctx: &RunContext<'_>,
        workspace: &Path,
        start: Instant,
    ) -> ExecutionResult {
        let language = ctx.language;
        let stem = language.source_stem(ctx.source_code);
        let source_path = workspace.join(format!("{stem}.{}", language.file_extension));

        if let Err(e) = tokio::fs::write(&source_path, ctx.source_code).await {
            tracing::error!(path = %source_path.display(), "Failed to write source file: {}", e);
            return ExecutionResult::infra_error(
                "Could not prepare the execution workspace",
                elapsed_ms(start),
            );
        }

        let binary_path = workspace.join(if cfg!(windows) {
            format!("{stem}.exe")
        } else {
            stem.clone()
        });
        let runtime = ctx
            .runtime
            .executable
            .clone()
            .unwrap_or_else(|| language.command.clone());
        let values = TemplateValues {
            runtime: &runtime,
            source: &source_path,
            dir: workspace,
            binary: &binary_path,
            class: &stem,
        };

        let mut environment = ProcessEnvironment::restricted(workspace);
        environment.pass_through(&language.passthrough_env);
        environment.extend(&language.environment);
        let environment = environment.build();

        let deadline = start
            .checked_add(ctx.timeout)
            .unwrap_or_else(|| start + Duration::from_secs(MAX_TIMEOUT_SECS));

        if let Some(compile) = &language.compile {
            let command = expand_template(&compile.command, &values);
            let args: Vec<String> = compile
                .args
                .iter()
                .map(|arg| expand_template(arg, &values))
                .collect();
            tracing::debug!(language = %language.id, command = %command, "Compiling");

            let config = ProcessConfig::new(command)
                .with_args(args)
                .with_working_dir(workspace)
                .with_environment(environment.clone())
                .with_inherit_env(false)
                .with_timeout(remaining(deadline))
                .with_max_output_bytes(self.max_output_bytes)
                .with_limits(self.limits.clone());

            let result = match self.spawn(config, language, Phase::Compile, start).await {
                Ok(result) => result,
                Err(outcome) => return outcome,
            };
            if result.timed_out {
                return ExecutionResult::timeout(
                    self.format_stream(&result.stdout, result.stdout_truncated),
                    ctx.timeout,
                    elapsed_ms(start),
                );
            }
            if !result.success() {
                let stderr = self.format_stream(&result.stderr, result.stderr_truncated);
                let stdout = self.format_stream(&result.stdout, result.stdout_truncated);
                // Some compilers report diagnostics on stdout
                let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };
                let mut signals = OutcomeSignals::compile_failed();
                signals.exit_code = result.exit_code;
                return ExecutionResult::from_signals(
                    signals,
                    String::new(),
                    diagnostics,
                    elapsed_ms(start),
                );
            }
        }

        if remaining(deadline).is_zero() {
            return ExecutionResult::timeout(String::new(), ctx.timeout, elapsed_ms(start));
        }

        let command = expand_template(&language.run_command, &values);
        let args: Vec<String> = language
            .run_args
            .iter()
            .map(|arg| expand_template(arg, &values))
            .collect();
        tracing::debug!(language = %language.id, command = %command, "Running");

        let config = ProcessConfig::new(command)
            .with_args(args)
            .with_working_dir(workspace)
            .with_environment(environment)
            .with_inherit_env(false)
            .with_stdin(ctx.stdin.map(str::to_string))
            .with_timeout(remaining(deadline))
            .with_max_output_bytes(self.max_output_bytes)
            .with_limits(self.limits.clone());

        let result = match self.spawn(config, language, Phase::Run, start).await {
            Ok(result) => result,
            Err(outcome) => return outcome,
        };

        let output = self.format_stream(&result.stdout, result.stdout_truncated);
        if result.timed_out {
            let mut timeout = ExecutionResult::timeout(output, ctx.timeout, elapsed_ms(start));
            timeout.output_truncated = result.stdout_truncated;
            return timeout;
        }

        let stderr = self.format_stream(&result.stderr, result.stderr_truncated);
        let signals = OutcomeSignals::exited(result.exit_code, &stderr);
        let error = if stderr.trim().is_empty() {
            describe_exit(&result)
        } else {
            stderr
        };
        let mut outcome =
            ExecutionResult::from_signals(signals, output, error, elapsed_ms(start));
        outcome.output_truncated = result.truncated();
        outcome
    }

    /// Spawn one phase; start-up failures become a finished ExecutionResult
    async fn spawn(
        &self,
        config: ProcessConfig,
        language: &LanguageSpec,
        phase: Phase,
        start: Instant,
    ) -> std::result::Result<ProcessResult, ExecutionResult> {
        match self.process_manager.execute_async(config).await {
            Ok(result) => Ok(result),
            Err(CodeTutorError::Process(error)) => match *error {
                ProcessError::CommandNotFound { command, .. } => {
                    // Toolchain disappeared after detection, or the compiler is missing
                    tracing::warn!(language = %language.id, ?phase, command = %command, "Executable not found");
                    Err(ExecutionResult::runtime_unavailable(
                        language_hint(language),
                        elapsed_ms(start),
                    ))
                }
                other => {
                    tracing::error!(language = %language.id, ?phase, "Process failure: {}", other);
                    Err(ExecutionResult::infra_error(
                        "The execution engine failed to start the program",
                        elapsed_ms(start),
                    ))
                }
            },
            Err(other) => {
                tracing::error!(language = %language.id, ?phase, "Engine failure: {}", other);
                Err(ExecutionResult::infra_error(
                    "The execution engine failed to start the program",
                    elapsed_ms(start),
                ))
            }
        }
    }

    fn format_stream(&self, bytes: &[u8], truncated: bool) -> String {
        let mut text = trim_trailing_newlines(&String::from_utf8_lossy(bytes));
        if truncated {
            text.push_str(&truncation_marker(self.max_output_bytes));
        }
        text
    }
}

#[async_trait]
impl CodeRunner for ExternalRunner {
    fn runner_name(&self) -> &str {
        "external"
    }

    async fn run(&self, ctx: RunContext<'_>) -> ExecutionResult {
        let start = Instant::now();
        let workspace = match tempfile::Builder::new().prefix("codetutor-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("Failed to create temp workspace: {}", e);
                return ExecutionResult::infra_error(
                    "Could not prepare the execution workspace",
                    elapsed_ms(start),
                );
            }
        };

        let result = self.run_in_workspace(&ctx, workspace.path(), start).await;

        if let Err(e) = workspace.close() {
            tracing::warn!("Failed to remove temp workspace: {}", e);
        }
        result
    }
}

fn language_hint(language: &LanguageSpec) -> String {
    if language.install_hint.is_empty() {
        format!("Install {} and make sure it is on PATH", language.display_name)
    } else {
        language.install_hint.clone()
    }
}

fn describe_exit(result: &ProcessResult) -> String {
    match (result.exit_code, result.signal) {
        (Some(code), _) => format!("Process exited with code {code}"),
        (None, Some(signal)) => format!("Process terminated by signal {signal}"),
        (None, None) => "Process terminated abnormally".to_string(),
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_result(exit_code: Option<i32>, signal: Option<i32>) -> ProcessResult {
        ProcessResult {
            exit_code,
            signal,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
            timed_out: false,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(
            describe_exit(&process_result(Some(3), None)),
            "Process exited with code 3"
        );
        assert_eq!(
            describe_exit(&process_result(None, Some(9))),
            "Process terminated by signal 9"
        );
    }

    #[test]
    fn test_format_stream_marks_truncation() {
        let runner = ExternalRunner::new(&EngineConfig::default());
        let text = runner.format_stream(b"partial\n", true);
        assert!(text.starts_with("partial\n[Output truncated"));
        assert_eq!(runner.format_stream(b"done\n", false), "done");
    }

    #[test]
    fn test_remaining_saturates() {
        let past = Instant::now() - Duration::from_secs(1);
        assert!(remaining(past).is_zero());
    }
}
