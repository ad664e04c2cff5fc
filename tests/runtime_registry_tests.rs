// Comprehensive runtime registry tests
// Detection caching, single-flight probing, aliases and invalidation


use codetutor::language::{CommandProbe, LanguageCatalog, RuntimeRegistry};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{catalog_with, missing_language, shell_language, CountingProbe};

#[tokio::test]
async fn test_in_process_language_is_always_available() {
    let probe = Arc::new(CountingProbe::new(false));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    for name in ["script", "rhai", " Script "] {
        let info = registry.get_or_detect(name).await;
        assert!(info.is_available);
        assert_eq!(info.language, "script");
        assert!(info.version.as_deref().unwrap().starts_with("built-in"));
    }
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_language() {
    let probe = Arc::new(CountingProbe::new(true));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    let info = registry.get_or_detect("unsupported-lang").await;
    assert!(!info.is_available);
    assert_eq!(
        info.install_hint.as_deref(),
        Some("Language 'unsupported-lang' is not supported")
    );
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_second_detection_uses_cache() {
    let probe = Arc::new(CountingProbe::new(true));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    let first = registry.get_or_detect("python").await;
    let second = registry.get_or_detect("py").await;
    assert_eq!(first, second);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_unavailable_result_is_cached_too() {
    let probe = Arc::new(CountingProbe::new(false));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    let info = registry.get_or_detect("java").await;
    assert!(!info.is_available);
    assert!(info.install_hint.unwrap().contains("adoptium"));
    registry.get_or_detect("java").await;
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_first_detection_is_single_flight() {
    let probe = Arc::new(CountingProbe::new(true).with_delay(Duration::from_millis(200)));
    let registry = Arc::new(RuntimeRegistry::new(
        Arc::new(LanguageCatalog::builtin()),
        probe.clone(),
    ));

    let mut handles = Vec::new();
    for alias in ["javascript", "js", "node", "nodejs", "JS", "javascript", "js", "node"] {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.get_or_detect(alias).await }));
    }
    let results = futures::future::join_all(handles).await;

    assert_eq!(probe.calls(), 1);
    for result in results {
        let info = result.unwrap();
        assert!(info.is_available);
        assert_eq!(info.language, "javascript");
    }
}

#[tokio::test]
async fn test_different_languages_probe_independently() {
    let probe = Arc::new(CountingProbe::new(true));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    registry.get_or_detect("python").await;
    registry.get_or_detect("java").await;
    registry.get_or_detect("dart").await;
    assert_eq!(probe.calls(), 3);
    assert_eq!(registry.cached_count(), 3);
}

#[tokio::test]
async fn test_invalidate_and_clear() {
    let probe = Arc::new(CountingProbe::new(true));
    let registry = RuntimeRegistry::new(Arc::new(LanguageCatalog::builtin()), probe.clone());

    registry.get_or_detect("python").await;
    registry.get_or_detect("rust").await;
    assert!(registry.invalidate("python"));
    assert!(!registry.invalidate("python"));
    assert!(registry.cached("rs").is_some());

    registry.get_or_detect("python").await;
    assert_eq!(probe.calls(), 3);

    registry.clear();
    assert_eq!(registry.cached_count(), 0);
    assert!(registry.cached("rust").is_none());
}

#[tokio::test]
async fn test_command_probe_missing_toolchain() {
    let registry = RuntimeRegistry::with_command_probe(
        catalog_with(vec![missing_language()]),
        Duration::from_secs(5),
    );
    let info = registry.get_or_detect("ghostlang").await;
    assert!(!info.is_available);
    assert_eq!(
        info.install_hint.as_deref(),
        Some("Install Ghost from https://ghost.invalid")
    );
    assert!(info.version.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_probe_reads_first_output_line() {
    let registry = RuntimeRegistry::with_command_probe(
        catalog_with(vec![shell_language()]),
        Duration::from_secs(5),
    );
    let info = registry.get_or_detect("sh").await;
    assert!(info.is_available);
    assert_eq!(info.version.as_deref(), Some("posix-sh"));
    assert_eq!(info.executable.as_deref(), Some("sh"));
    assert!(info.install_hint.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_probe_uses_fallback_command() {
    let mut language = missing_language();
    language.fallback_commands = vec!["sh".to_string()];
    language.version_args = vec!["-c".to_string(), "echo fallback".to_string()];

    let registry = RuntimeRegistry::with_command_probe(catalog_with(vec![language]), Duration::from_secs(5));
    let info = registry.get_or_detect("ghostlang").await;
    assert!(info.is_available);
    assert_eq!(info.executable.as_deref(), Some("sh"));
    assert_eq!(info.version.as_deref(), Some("fallback"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_probe_nonzero_exit_is_unavailable() {
    let mut language = shell_language();
    language.version_args = vec!["-c".to_string(), "echo broken >&2; exit 1".to_string()];

    let registry = RuntimeRegistry::with_command_probe(catalog_with(vec![language]), Duration::from_secs(5));
    let info = registry.get_or_detect("shell").await;
    assert!(!info.is_available);
    assert_eq!(info.install_hint.as_deref(), Some("Install a POSIX shell"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_probe_timeout_is_unavailable() {
    let mut language = shell_language();
    language.version_args = vec!["-c".to_string(), "sleep 10".to_string()];

    let registry = RuntimeRegistry::with_command_probe(
        catalog_with(vec![language]),
        Duration::from_millis(300),
    );
    let start = std::time::Instant::now();
    let info = registry.get_or_detect("shell").await;
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!info.is_available);
}

#[cfg(unix)]
#[tokio::test]
async fn test_version_falls_back_to_stderr() {
    let mut language = shell_language();
    language.version_args = vec!["-c".to_string(), "echo 'openjdk 21' >&2".to_string()];

    let registry = RuntimeRegistry::with_command_probe(catalog_with(vec![language]), Duration::from_secs(5));
    let info = registry.get_or_detect("shell").await;
    assert_eq!(info.version.as_deref(), Some("openjdk 21"));
}

#[tokio::test]
async fn test_command_probe_directly() {
    let probe = CommandProbe::default();
    let language = missing_language();
    let info = codetutor::language::RuntimeProbe::probe(&probe, &language).await;
    assert!(!info.is_available);
}
