// Execution engine: validates the language, checks the runtime registry,
// routes to the matching runner and guarantees a result within the deadline

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::classification::{classify, Classification, OutcomeSignals};
use crate::config::{EngineConfig, MAX_TIMEOUT_SECS};
use crate::error::{ConfigError, ExecutionError, Result};
use crate::language::catalog::{LanguageCatalog, LanguageSpec};
use crate::language::external::ExternalRunner;
use crate::language::registry::{RuntimeInfo, RuntimeRegistry};
use crate::language::script::ScriptRunner;
use crate::language::traits::{CodeRunner, RunContext};
use crate::logging::utils::execution_span;
use crate::validation::{StdinPreparer, TestCase, TestCaseEvaluator, ValidationResult};

/// One request to run a piece of code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub source_code: String,
    pub stdin: Option<String>,
    /// Falls back to the configured default when absent
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source_code: source_code.into(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Terminal result of one execution attempt.
///
/// `success` implies `classification == Success` and an empty `error`;
/// a timeout is never a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub classification: Classification,
    #[serde(default)]
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn success(output: String, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: String::new(),
            exit_code: Some(0),
            execution_time_ms,
            classification: Classification::Success,
            output_truncated: false,
        }
    }

    /// Any non-success classification; a `Success` passed here is demoted to
    /// `RuntimeError` so the success invariant cannot be broken by callers.
    pub fn failure(
        classification: Classification,
        output: String,
        error: String,
        exit_code: Option<i32>,
        execution_time_ms: u64,
    ) -> Self {
        let classification = if classification.is_success() {
            Classification::RuntimeError
        } else {
            classification
        };
        Self {
            success: false,
            output,
            error,
            exit_code,
            execution_time_ms,
            classification,
            output_truncated: false,
        }
    }

    /// Result for a finished attempt, classified from its raw signals
    pub fn from_signals(
        signals: OutcomeSignals,
        output: String,
        error: String,
        execution_time_ms: u64,
    ) -> Self {
        let classification = classify(signals);
        if classification.is_success() {
            Self::success(output, execution_time_ms)
        } else {
            Self::failure(
                classification,
                output,
                error,
                signals.exit_code,
                execution_time_ms,
            )
        }
    }

    /// Deadline expiry; `partial_output` is whatever was printed before the kill
    pub fn timeout(partial_output: String, timeout: Duration, execution_time_ms: u64) -> Self {
        Self::failure(
            classify(OutcomeSignals::timed_out()),
            partial_output,
            format!("Execution timed out after {} seconds", format_secs(timeout)),
            None,
            execution_time_ms,
        )
    }

    pub fn runtime_unavailable(install_hint: String, execution_time_ms: u64) -> Self {
        Self::failure(
            classify(OutcomeSignals::runtime_missing()),
            String::new(),
            install_hint,
            None,
            execution_time_ms,
        )
    }

    pub fn infra_error(message: &str, execution_time_ms: u64) -> Self {
        Self::failure(
            Classification::InfraError,
            String::new(),
            message.to_string(),
            None,
            execution_time_ms,
        )
    }
}

fn format_secs(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{secs:.1}")
    }
}

/// Public entry point of the engine
pub struct ExecutionEngine {
    config: Arc<EngineConfig>,
    catalog: Arc<LanguageCatalog>,
    registry: Arc<RuntimeRegistry>,
    script_runner: Arc<dyn CodeRunner>,
    external_runner: Arc<dyn CodeRunner>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = Arc::new(LanguageCatalog::from_config(&config));
        let registry = Arc::new(RuntimeRegistry::with_command_probe(
            catalog.clone(),
            config.detection_timeout(),
        ));
        Self::with_registry(config, registry)
    }

    /// Engine sharing an existing registry (and its catalog)
    pub fn with_registry(config: EngineConfig, registry: Arc<RuntimeRegistry>) -> Self {
        let script_runner = Arc::new(ScriptRunner::new(&config.script, config.max_output_bytes));
        let external_runner = Arc::new(ExternalRunner::new(&config));
        Self::with_components(config, registry, script_runner, external_runner)
    }

    pub fn with_components(
        config: EngineConfig,
        registry: Arc<RuntimeRegistry>,
        script_runner: Arc<dyn CodeRunner>,
        external_runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: registry.catalog().clone(),
            registry,
            script_runner,
            external_runner,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &LanguageCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    /// Resolve a language name or alias, or fail with `UnknownLanguage`
    pub fn resolve_language(&self, language: &str) -> Result<Arc<LanguageSpec>> {
        self.catalog.get(language).ok_or_else(|| {
            ExecutionError::UnknownLanguage {
                language: language.trim().to_string(),
                available_languages: self.catalog.ids(),
            }
            .into()
        })
    }

    pub async fn execute(
        &self,
        language: &str,
        source_code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let mut request = ExecutionRequest::new(language, source_code);
        request.timeout = timeout;
        self.execute_request(request).await
    }

    /// Run one request. Only an unknown language or an unusable timeout is
    /// an `Err`; every other outcome is a classified `ExecutionResult`.
    pub async fn execute_request(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let language = self.resolve_language(&request.language)?;
        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        if timeout.is_zero() || timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
            return Err(ConfigError::InvalidValue {
                message: "Execution timeout is out of range".to_string(),
                field: "timeout".to_string(),
                value: format!("{}s", timeout.as_secs_f64()),
                expected: format!("a positive duration of at most {MAX_TIMEOUT_SECS} seconds"),
            }
            .into());
        }

        let request_id = Uuid::new_v4().to_string();
        let span = execution_span(&request_id, &language.id, timeout);
        let result = self
            .dispatch(&language, &request, timeout)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            tracing::info!(
                classification = %result.classification,
                execution_time_ms = result.execution_time_ms,
                "Execution finished"
            );
        });
        Ok(result)
    }

    async fn dispatch(
        &self,
        language: &LanguageSpec,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> ExecutionResult {
        let start = Instant::now();
        let runtime = self.registry.get_or_detect(&language.id).await;
        if !runtime.is_available {
            tracing::info!("Runtime unavailable, skipping execution");
            return ExecutionResult::runtime_unavailable(
                runtime.install_hint.clone().unwrap_or_default(),
                start.elapsed().as_millis() as u64,
            );
        }

        let runner = if language.in_process {
            &self.script_runner
        } else {
            &self.external_runner
        };
        tracing::debug!(runner = runner.runner_name(), "Dispatching");

        let ctx = RunContext {
            language,
            runtime: &runtime,
            source_code: &request.source_code,
            stdin: request.stdin.as_deref(),
            timeout,
        };

        let budget = timeout.saturating_add(self.config.timeout_grace());
        match tokio::time::timeout(budget, runner.run(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                // Dropping the runner future kills any child it still owns
                tracing::warn!(budget_ms = budget.as_millis() as u64, "Runner overran its deadline");
                ExecutionResult::timeout(String::new(), timeout, start.elapsed().as_millis() as u64)
            }
        }
    }

    /// Score `source_code` against `test_cases`, feeding each case's input on stdin
    pub async fn validate(
        &self,
        language: &str,
        source_code: &str,
        test_cases: &[TestCase],
    ) -> Result<ValidationResult> {
        TestCaseEvaluator::new(self, Arc::new(StdinPreparer))
            .evaluate(language, source_code, test_cases)
            .await
    }

    pub async fn detect_runtime(&self, language: &str) -> RuntimeInfo {
        self.registry.get_or_detect(language).await
    }

    /// Detect several languages concurrently, preserving input order
    pub async fn detect_runtimes(&self, languages: &[String]) -> Vec<RuntimeInfo> {
        join_all(languages.iter().map(|l| self.registry.get_or_detect(l))).await
    }

    pub fn list_supported_languages(&self) -> Vec<LanguageSpec> {
        self.catalog.list()
    }

    /// Drop the cached detection so the next request probes again
    pub fn invalidate_runtime(&self, language: &str) -> bool {
        self.registry.invalidate(language)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("languages", &self.catalog.ids())
            .field("registry", &self.registry)
            .finish()
    }
}
