// Comprehensive process management tests
// Covers concurrent draining, deadlines, process-group kill and output caps
#![cfg(unix)]

use codetutor::error::{CodeTutorError, ProcessError};
use codetutor::process::{ProcessConfig, ProcessEnvironment, ProcessManager};
use serial_test::serial;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn sh(script: &str) -> ProcessConfig {
    ProcessConfig::new("sh").with_args(["-c", script])
}

#[tokio::test]
async fn test_process_execution_basic() {
    let manager = ProcessManager::new();
    let config = ProcessConfig::new("echo").with_args(["hello", "world"]);

    let result = manager.execute_async(config).await.unwrap();
    assert!(result.success());
    assert_eq!(result.stdout().trim(), "hello world");
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_process_execution_failure() {
    let manager = ProcessManager::new();
    let result = manager.execute_async(sh("echo oops >&2; exit 3")).await.unwrap();
    assert!(!result.success());
    assert_eq!(result.exit_code(), Some(3));
    assert_eq!(result.stderr().trim(), "oops");
}

#[tokio::test]
async fn test_command_not_found_is_error() {
    let manager = ProcessManager::new();
    let err = manager
        .execute_async(ProcessConfig::new("codetutor_command_does_not_exist_12345"))
        .await
        .unwrap_err();
    let help = err.user_message(false);
    assert!(help.contains("Help: Make sure 'codetutor_command_does_not_exist_12345'"));

    match err {
        CodeTutorError::Process(process_err) => match *process_err {
            ProcessError::CommandNotFound {
                command,
                suggestion,
            } => {
                assert_eq!(command, "codetutor_command_does_not_exist_12345");
                assert!(suggestion.unwrap().contains("on PATH"));
            }
            other => panic!("unexpected error: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_stdin_is_forwarded() {
    let manager = ProcessManager::new();
    let config = ProcessConfig::new("cat").with_stdin(Some("line one\nline two\n".to_string()));
    let result = manager.execute_async(config).await.unwrap();
    assert_eq!(result.stdout(), "line one\nline two\n");
}

#[tokio::test]
async fn test_stdin_is_closed_when_absent() {
    let manager = ProcessManager::new();
    let config = ProcessConfig::new("cat").with_timeout(Duration::from_secs(5));
    let result = manager.execute_async(config).await.unwrap();
    assert!(result.success());
    assert!(!result.timed_out);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let manager = ProcessManager::new();
    let config = sh("echo started; sleep 30").with_timeout(Duration::from_millis(500));

    let start = Instant::now();
    let result = manager.execute_async(config).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(result.timed_out);
    assert!(!result.success());
    assert_eq!(result.exit_code, None);
    assert_eq!(result.stdout().trim(), "started");
}

#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("survived");
    let script = format!("(sleep 2; touch '{}') & wait", marker.display());

    let manager = ProcessManager::new();
    let result = manager
        .execute_async(sh(&script).with_timeout(Duration::from_millis(300)))
        .await
        .unwrap();
    assert!(result.timed_out);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "background child outlived the deadline");
}

#[tokio::test]
async fn test_background_job_killed_after_normal_exit() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("survived");
    let script = format!("(sleep 3; touch '{}') & echo done", marker.display());

    let manager = ProcessManager::new();
    let result = manager
        .execute_async(sh(&script).with_timeout(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(result.success());
    assert!(!result.timed_out);
    assert_eq!(result.stdout().trim(), "done");
    assert!(result.duration < Duration::from_secs(2), "run waited on the background job");

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists(), "background job outlived the run");
}

#[tokio::test]
async fn test_large_output_does_not_deadlock() {
    // Far beyond a pipe buffer on both streams at once
    let manager = ProcessManager::with_config(Duration::from_secs(20), 10_000_000);
    let script = "i=0; while [ $i -lt 20000 ]; do echo 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx'; echo 'yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy' >&2; i=$((i+1)); done";
    let result = manager.execute_async(sh(script)).await.unwrap();
    assert!(result.success());
    assert!(!result.timed_out);
    assert_eq!(result.stdout.len(), 20_000 * 51);
    assert_eq!(result.stderr.len(), 20_000 * 51);
}

#[tokio::test]
async fn test_output_cap_truncates_and_drains() {
    let manager = ProcessManager::new();
    let config = sh("head -c 200000 /dev/zero | tr '\\0' 'a'").with_max_output_bytes(1000);
    let result = manager.execute_async(config).await.unwrap();
    assert!(result.success(), "writer must not block on a full pipe");
    assert_eq!(result.stdout.len(), 1000);
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
    assert!(result.truncated());
}

#[tokio::test]
#[serial]
async fn test_environment_is_cleared() {
    std::env::set_var("CODETUTOR_LEAK_CHECK", "visible");
    let temp_dir = TempDir::new().unwrap();
    let env: HashMap<String, String> = ProcessEnvironment::restricted(temp_dir.path()).build();

    let manager = ProcessManager::new();
    let config = sh("echo \"leak=${CODETUTOR_LEAK_CHECK:-none} tmp=$TMPDIR\"")
        .with_environment(env)
        .with_inherit_env(false);
    let result = manager.execute_async(config).await.unwrap();
    std::env::remove_var("CODETUTOR_LEAK_CHECK");

    let expected = format!("leak=none tmp={}", temp_dir.path().display());
    assert_eq!(result.stdout().trim(), expected);
}

#[tokio::test]
async fn test_working_directory() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("data.txt"), "contents").unwrap();

    let manager = ProcessManager::new();
    let config = ProcessConfig::new("cat")
        .with_args(["data.txt"])
        .with_working_dir(temp_dir.path());
    let result = manager.execute_async(config).await.unwrap();
    assert_eq!(result.stdout(), "contents");
}
