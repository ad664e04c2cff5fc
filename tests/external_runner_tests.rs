// Comprehensive tests for the external process runner
// Uses `sh` as a stand-in toolchain so the tests run on any unix host
#![cfg(unix)]


use codetutor::classification::Classification;
use codetutor::config::EngineConfig;
use codetutor::execution::{ExecutionEngine, ExecutionRequest};
use serial_test::serial;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use test_utils::{config_with, engine_with, fake_compiled_language, missing_language, shell_language};

fn shell_engine() -> ExecutionEngine {
    engine_with(vec![shell_language(), fake_compiled_language(), missing_language()])
}

#[tokio::test]
async fn test_hello_world() {
    let result = shell_engine()
        .execute("shell", "echo 'Hello, World!'", None)
        .await
        .unwrap();
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "Hello, World!");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.classification, Classification::Success);
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_error() {
    let result = shell_engine()
        .execute("sh", "echo partial; exit 7", None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.classification, Classification::RuntimeError);
    assert_eq!(result.exit_code, Some(7));
    assert_eq!(result.output, "partial");
    assert_eq!(result.error, "Process exited with code 7");
}

#[tokio::test]
async fn test_stderr_with_zero_exit_is_runtime_error() {
    let result = shell_engine()
        .execute("shell", "echo out; echo warning >&2", None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.classification, Classification::RuntimeError);
    assert_eq!(result.output, "out");
    assert_eq!(result.error, "warning");
}

#[tokio::test]
async fn test_syntax_error_without_compile_phase_is_runtime_error() {
    let result = shell_engine()
        .execute("shell", "if then fi (", None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.classification, Classification::RuntimeError);
}

#[tokio::test]
async fn test_stdin_reaches_program() {
    let request = ExecutionRequest::new("shell", "read a; read b; echo $((a + b))")
        .with_stdin(Some("3\n4\n".to_string()));
    let result = shell_engine().execute_request(request).await.unwrap();
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "7");
}

#[tokio::test]
async fn test_infinite_loop_times_out_with_partial_output() {
    let engine = shell_engine();
    let grace = engine.config().timeout_grace();

    let start = Instant::now();
    let result = engine
        .execute(
            "shell",
            "echo started; while true; do :; done",
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(!result.success);
    assert_eq!(result.classification, Classification::Timeout);
    assert_eq!(result.output, "started");
    assert_eq!(result.error, "Execution timed out after 1 seconds");
    assert!(elapsed < Duration::from_secs(1) + grace, "took {elapsed:?}");
}

#[tokio::test]
async fn test_compile_error() {
    let result = shell_engine()
        .execute("fakec", "echo never\n# COMPILE_ERROR", None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.classification, Classification::CompileError);
    assert_eq!(result.error, "error: bad source");
    assert_eq!(result.output, "");
}

#[tokio::test]
async fn test_compile_then_run() {
    let result = shell_engine()
        .execute("fakec", "echo compiled-and-ran", None)
        .await
        .unwrap();
    assert!(result.success, "{}", result.error);
    assert_eq!(result.output, "compiled-and-ran");
}

#[tokio::test]
async fn test_compile_ok_run_fails_is_runtime_error() {
    let result = shell_engine()
        .execute("fakec", "exit 2", None)
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::RuntimeError);
    assert_eq!(result.exit_code, Some(2));
}

#[tokio::test]
async fn test_missing_toolchain_short_circuits() {
    let result = shell_engine()
        .execute("ghostlang", "anything", None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.classification, Classification::RuntimeUnavailable);
    assert_eq!(result.error, "Install Ghost from https://ghost.invalid");
}

#[tokio::test]
async fn test_missing_compiler_is_runtime_unavailable() {
    let mut language = fake_compiled_language();
    language.id = "nocompiler".to_string();
    if let Some(compile) = language.compile.as_mut() {
        compile.command = "codetutor-missing-compiler-xyz".to_string();
    }
    let result = engine_with(vec![language])
        .execute("nocompiler", "echo hi", None)
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::RuntimeUnavailable);
}

#[tokio::test]
async fn test_output_is_capped() {
    let config = EngineConfig {
        max_output_bytes: 1_000,
        ..config_with(vec![shell_language()])
    };
    let engine = ExecutionEngine::new(config);
    let result = engine
        .execute("shell", "head -c 500000 /dev/zero | tr '\\0' 'a'", None)
        .await
        .unwrap();
    assert!(result.success, "{}", result.error);
    assert!(result.output_truncated);
    assert!(result
        .output
        .ends_with("[Output truncated - exceeded 1000 bytes limit]"));
    assert!(result.output.len() < 1_100);
}

#[tokio::test]
async fn test_workspace_is_removed_and_used_as_tmpdir() {
    let engine = shell_engine();
    let result = engine
        .execute("shell", "echo \"$TMPDIR\"; ls", None)
        .await
        .unwrap();
    assert!(result.success, "{}", result.error);

    let mut lines = result.output.lines();
    let home = PathBuf::from(lines.next().unwrap());
    assert!(home
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("codetutor-"));
    assert_eq!(lines.next(), Some("main.sh"));
    assert!(!home.exists(), "workspace should be deleted after the run");
}

#[tokio::test]
async fn test_workspace_removed_after_timeout() {
    let engine = shell_engine();
    let result = engine
        .execute(
            "shell",
            "echo \"$TMPDIR\"; sleep 30",
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::Timeout);
    let home = PathBuf::from(result.output.trim());
    assert!(!home.exists());
}

#[tokio::test]
#[serial]
async fn test_environment_is_restricted() {
    std::env::set_var("CODETUTOR_SECRET_TOKEN", "hunter2");
    let result = shell_engine()
        .execute("shell", "echo \"${CODETUTOR_SECRET_TOKEN:-unset} $NO_PROXY\"", None)
        .await
        .unwrap();
    std::env::remove_var("CODETUTOR_SECRET_TOKEN");
    assert_eq!(result.output, "unset *");
}

#[tokio::test]
#[serial]
async fn test_home_and_toolchain_variables_reach_program() {
    std::env::set_var("CODETUTOR_TOOL_ROOT", "/opt/codetutor-tool");
    let mut shell = shell_language();
    shell.passthrough_env = vec!["CODETUTOR_TOOL_ROOT".to_string()];
    let result = engine_with(vec![shell])
        .execute("shell", "echo \"$CODETUTOR_TOOL_ROOT\"; echo \"$HOME\"", None)
        .await
        .unwrap();
    std::env::remove_var("CODETUTOR_TOOL_ROOT");
    assert!(result.success, "{}", result.error);

    let mut lines = result.output.lines();
    assert_eq!(lines.next(), Some("/opt/codetutor-tool"));
    assert_eq!(
        lines.next().unwrap_or_default(),
        std::env::var("HOME").unwrap_or_default()
    );
}

#[tokio::test]
async fn test_builtin_rust_runs_when_detected() {
    let engine = ExecutionEngine::new(EngineConfig::default());
    let runtime = engine.registry().get_or_detect("rust").await;
    if !runtime.is_available {
        eprintln!("rustc not installed, skipping");
        return;
    }
    let result = engine
        .execute(
            "rust",
            "fn main() { println!(\"15\"); }",
            Some(Duration::from_secs(120)),
        )
        .await
        .unwrap();
    assert_eq!(result.classification, Classification::Success, "{}", result.error);
    assert_eq!(result.output, "15");
}

#[tokio::test]
async fn test_independent_runs_in_parallel() {
    let engine = std::sync::Arc::new(shell_engine());
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .execute("shell", &format!("sleep 1; echo {i}"), None)
                .await
                .unwrap()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.output, i.to_string());
    }
    assert!(start.elapsed() < Duration::from_secs(3));
}
