// Test case evaluation: runs a submission once per case and scores it

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

use crate::error::{ConfigError, Result};
use crate::execution::{ExecutionEngine, ExecutionRequest, ExecutionResult};
use crate::language::catalog::LanguageSpec;
use crate::logging::utils::validation_span;

/// A lesson test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(alias = "expected_output")]
    pub expected_output: String,
    #[serde(default = "default_visible", alias = "is_visible")]
    pub is_visible: bool,
}

fn default_visible() -> bool {
    true
}

impl TestCase {
    pub fn new(id: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            input: None,
            expected_output: expected_output.into(),
            is_visible: true,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

}

/// Load test cases from a YAML or JSON file (JSON is valid YAML)
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidTestCases {
        message: e.to_string(),
        path: path.to_path_buf(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        ConfigError::InvalidTestCases {
            message: e.to_string(),
            path: path.to_path_buf(),
        }
        .into()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestCaseStatus {
    Passed,
    Failed,
    /// Not attributable to the submission: toolchain missing or engine failure
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub test_case_id: String,
    pub description: String,
    pub status: TestCaseStatus,
    pub passed: bool,
    pub actual_output: String,
    pub expected_output: String,
    pub error: String,
}

impl TestCaseResult {
    fn from_execution(case: &TestCase, execution: &ExecutionResult) -> Self {
        let passed = execution.success && outputs_match(&execution.output, &case.expected_output);
        Self {
            test_case_id: case.id.clone(),
            description: case.description.clone(),
            status: if passed {
                TestCaseStatus::Passed
            } else {
                TestCaseStatus::Failed
            },
            passed,
            actual_output: execution.output.clone(),
            expected_output: case.expected_output.clone(),
            error: execution.error.clone(),
        }
    }

    fn error(case: &TestCase, message: String) -> Self {
        Self {
            test_case_id: case.id.clone(),
            description: case.description.clone(),
            status: TestCaseStatus::Error,
            passed: false,
            actual_output: String::new(),
            expected_output: case.expected_output.clone(),
            error: message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// 0..=100
    pub score: u32,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub total: usize,
    pub is_correct: bool,
    pub test_results: Vec<TestCaseResult>,
    /// The last execution performed, if any
    pub execution: Option<ExecutionResult>,
}

/// Source and stdin for one test case run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRun {
    pub source_code: String,
    pub stdin: Option<String>,
}

/// How a test case's input reaches the submission
pub trait InputPreparer: Send + Sync {
    fn prepare(&self, language: &LanguageSpec, source_code: &str, case: &TestCase) -> PreparedRun;
}

/// Feeds the input on stdin and leaves the code untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPreparer;

impl InputPreparer for StdinPreparer {
    fn prepare(&self, _language: &LanguageSpec, source_code: &str, case: &TestCase) -> PreparedRun {
        PreparedRun {
            source_code: source_code.to_string(),
            stdin: case.input.clone(),
        }
    }
}

/// Prepends an input shim for lessons written against `input()` (Python) or a
/// global `readline()` (JavaScript). Other languages get stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessPreparer;

impl HarnessPreparer {
    fn input_lines(input: &str) -> String {
        let lines: Vec<&str> = input.lines().filter(|l| !l.is_empty()).collect();
        serde_json::to_string(&lines).unwrap_or_else(|_| "[]".to_string())
    }

    fn python(source_code: &str, lines: &str) -> String {
        format!(
            "_harness_inputs = {lines}\n\
             _harness_index = 0\n\
             def input(prompt=''):\n\
             \x20   global _harness_index\n\
             \x20   if _harness_index < len(_harness_inputs):\n\
             \x20       value = _harness_inputs[_harness_index]\n\
             \x20       _harness_index += 1\n\
             \x20       return value\n\
             \x20   return ''\n\
             \n\
             {source_code}"
        )
    }

    fn javascript(source_code: &str, lines: &str) -> String {
        format!(
            "const _harnessInputs = {lines};\n\
             let _harnessIndex = 0;\n\
             const readline = () => (_harnessIndex < _harnessInputs.length ? _harnessInputs[_harnessIndex++] : '');\n\
             \n\
             {source_code}"
        )
    }
}

impl InputPreparer for HarnessPreparer {
    fn prepare(&self, language: &LanguageSpec, source_code: &str, case: &TestCase) -> PreparedRun {
        let Some(input) = case.input.as_deref() else {
            return StdinPreparer.prepare(language, source_code, case);
        };
        let lines = Self::input_lines(input);
        let source_code = match language.id.as_str() {
            "python" => Self::python(source_code, &lines),
            "javascript" => Self::javascript(source_code, &lines),
            _ => return StdinPreparer.prepare(language, source_code, case),
        };
        PreparedRun {
            source_code,
            stdin: None,
        }
    }
}

/// Exact comparison after trimming and normalizing line endings
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// `round(100 * passed / total)`, 0 when there is nothing to score
pub fn score(passed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((passed as f64 * 100.0) / total as f64).round() as u32
}

/// Runs a submission against test cases through an ExecutionEngine
pub struct TestCaseEvaluator<'a> {
    engine: &'a ExecutionEngine,
    preparer: Arc<dyn InputPreparer>,
}

impl<'a> TestCaseEvaluator<'a> {
    pub fn new(engine: &'a ExecutionEngine, preparer: Arc<dyn InputPreparer>) -> Self {
        Self { engine, preparer }
    }

    pub async fn evaluate(
        &self,
        language: &str,
        source_code: &str,
        test_cases: &[TestCase],
    ) -> Result<ValidationResult> {
        let spec = self.engine.resolve_language(language)?;
        let span = validation_span(&spec.id, test_cases.len());
        self.evaluate_cases(&spec, source_code, test_cases)
            .instrument(span)
            .await
    }

    async fn evaluate_cases(
        &self,
        language: &LanguageSpec,
        source_code: &str,
        test_cases: &[TestCase],
    ) -> Result<ValidationResult> {
        if test_cases.is_empty() {
            let execution = self
                .engine
                .execute_request(ExecutionRequest::new(&language.id, source_code))
                .await?;
            let ok = execution.success;
            return Ok(ValidationResult {
                score: if ok { 100 } else { 0 },
                passed: 0,
                failed: 0,
                errored: usize::from(execution.classification.is_infrastructure()),
                total: 0,
                is_correct: ok,
                test_results: Vec::new(),
                execution: Some(execution),
            });
        }

        let mut test_results = Vec::with_capacity(test_cases.len());
        let mut last_execution = None;
        let mut halted: Option<String> = None;

        for case in test_cases {
            if let Some(reason) = &halted {
                test_results.push(TestCaseResult::error(case, reason.clone()));
                continue;
            }

            let prepared = self.preparer.prepare(language, source_code, case);
            let request = ExecutionRequest::new(&language.id, prepared.source_code)
                .with_stdin(prepared.stdin);
            let execution = self.engine.execute_request(request).await?;

            if execution.classification.is_infrastructure() {
                tracing::warn!(
                    test_case = %case.id,
                    classification = %execution.classification,
                    "Stopping validation: failure is not caused by the submission"
                );
                test_results.push(TestCaseResult::error(case, execution.error.clone()));
                halted = Some(format!("Not run: {}", execution.error));
            } else {
                let result = TestCaseResult::from_execution(case, &execution);
                tracing::debug!(test_case = %case.id, passed = result.passed, "Test case evaluated");
                test_results.push(result);
            }
            last_execution = Some(execution);
        }

        let total = test_results.len();
        let passed = count(&test_results, TestCaseStatus::Passed);
        let failed = count(&test_results, TestCaseStatus::Failed);
        let errored = count(&test_results, TestCaseStatus::Error);
        let score = score(passed, total);
        tracing::info!(score, passed, failed, errored, "Validation finished");

        Ok(ValidationResult {
            score,
            passed,
            failed,
            errored,
            total,
            is_correct: passed == total,
            test_results,
            execution: last_execution,
        })
    }
}

fn count(results: &[TestCaseResult], status: TestCaseStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}
