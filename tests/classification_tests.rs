// Comprehensive tests for outcome classification
// Walks the full signal truth table, including precedence between rows

use codetutor::classification::{classify, Classification, OutcomeSignals};

#[cfg(test)]
mod classification_tests {
    use super::*;

    fn signals(
        runtime_missing: bool,
        timed_out: bool,
        compile_step_failed: bool,
        exit_code: Option<i32>,
        stderr_non_empty: bool,
    ) -> OutcomeSignals {
        OutcomeSignals {
            exit_code,
            stderr_non_empty,
            timed_out,
            compile_step_failed,
            runtime_missing,
        }
    }

    #[test]
    fn test_truth_table() {
        let cases = [
            (signals(true, true, true, Some(0), false), Classification::RuntimeUnavailable),
            (signals(true, false, false, None, true), Classification::RuntimeUnavailable),
            (signals(false, true, true, Some(1), true), Classification::Timeout),
            (signals(false, true, false, Some(0), false), Classification::Timeout),
            (signals(false, false, true, Some(0), false), Classification::CompileError),
            (signals(false, false, false, Some(0), false), Classification::Success),
            (signals(false, false, false, Some(0), true), Classification::RuntimeError),
            (signals(false, false, false, Some(2), false), Classification::RuntimeError),
            (signals(false, false, false, None, false), Classification::RuntimeError),
        ];

        for (input, expected) in cases {
            assert_eq!(classify(input), expected, "signals: {input:?}");
        }
    }

    #[test]
    fn test_constructors_match_table_rows() {
        assert_eq!(classify(OutcomeSignals::runtime_missing()), Classification::RuntimeUnavailable);
        assert_eq!(classify(OutcomeSignals::timed_out()), Classification::Timeout);
        assert_eq!(classify(OutcomeSignals::compile_failed()), Classification::CompileError);
        assert_eq!(
            classify(OutcomeSignals::exited(Some(0), "")),
            Classification::Success
        );
        assert_eq!(
            classify(OutcomeSignals::exited(Some(0), "Traceback (most recent call last):")),
            Classification::RuntimeError
        );
    }

    #[test]
    fn test_interpreter_syntax_error_is_runtime_error() {
        // Interpreted languages have no compile phase: python reports a
        // SyntaxError on stderr with exit code 1
        let python_syntax_error = OutcomeSignals::exited(
            Some(1),
            "  File \"main.py\", line 1\n    print(\nSyntaxError: '(' was never closed",
        );
        assert_eq!(classify(python_syntax_error), Classification::RuntimeError);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Classification::CompileError.to_string(), "compile_error");
        assert_eq!(Classification::RuntimeUnavailable.as_str(), "runtime_unavailable");
        assert!(Classification::Success.is_success());
        assert!(!Classification::Timeout.is_success());
    }
}
