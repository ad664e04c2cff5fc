// Outcome classification for a single execution attempt
use serde::{Deserialize, Serialize};
use std::fmt;

/// Taxonomy value assigned to one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    RuntimeUnavailable,
    /// The engine itself failed (temp dir, disk write, panicked task).
    /// Never caused by the learner's code.
    InfraError,
}

impl Classification {
    pub fn is_success(self) -> bool {
        self == Classification::Success
    }

    /// Failures that say nothing about the submitted code
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            Classification::RuntimeUnavailable | Classification::InfraError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::CompileError => "compile_error",
            Classification::RuntimeError => "runtime_error",
            Classification::Timeout => "timeout",
            Classification::RuntimeUnavailable => "runtime_unavailable",
            Classification::InfraError => "infra_error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw signals gathered by a runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSignals {
    pub exit_code: Option<i32>,
    pub stderr_non_empty: bool,
    pub timed_out: bool,
    pub compile_step_failed: bool,
    pub runtime_missing: bool,
}

impl OutcomeSignals {
    pub fn exited(exit_code: Option<i32>, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr_non_empty: !stderr.trim().is_empty(),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn compile_failed() -> Self {
        Self {
            compile_step_failed: true,
            ..Self::default()
        }
    }

    pub fn runtime_missing() -> Self {
        Self {
            runtime_missing: true,
            ..Self::default()
        }
    }
}

/// Map raw signals to a classification. First matching row wins:
///
/// | runtime_missing | timed_out | compile_step_failed | exit / stderr      | result             |
/// |-----------------|-----------|---------------------|--------------------|--------------------|
/// | true            | -         | -                   | -                  | RuntimeUnavailable |
/// | false           | true      | -                   | -                  | Timeout            |
/// | false           | false     | true                | -                  | CompileError       |
/// | false           | false     | false               | 0 / empty          | Success            |
/// | false           | false     | false               | anything else      | RuntimeError       |
pub fn classify(signals: OutcomeSignals) -> Classification {
    if signals.runtime_missing {
        Classification::RuntimeUnavailable
    } else if signals.timed_out {
        Classification::Timeout
    } else if signals.compile_step_failed {
        Classification::CompileError
    } else if signals.exit_code == Some(0) && !signals.stderr_non_empty {
        Classification::Success
    } else {
        Classification::RuntimeError
    }
}
