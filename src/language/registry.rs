// Runtime registry: detects and caches toolchain availability per language

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::logging::utils::detection_span;

use super::catalog::{LanguageCatalog, LanguageSpec};

/// Version reported when a probe succeeds without printing anything
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Version reported for the embedded evaluator
pub const BUILT_IN_VERSION: &str = "built-in (Rhai)";

/// Availability of one language's toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub language: String,
    pub is_available: bool,
    pub version: Option<String>,
    pub install_hint: Option<String>,
    /// Candidate command that answered the probe
    pub executable: Option<String>,
}

impl RuntimeInfo {
    pub fn available(language: &str, version: String, executable: Option<String>) -> Self {
        Self {
            language: language.to_string(),
            is_available: true,
            version: Some(version),
            install_hint: None,
            executable,
        }
    }

    pub fn unavailable(language: &str, install_hint: &str) -> Self {
        let hint = if install_hint.trim().is_empty() {
            format!("Install the {language} toolchain and make sure it is on PATH")
        } else {
            install_hint.to_string()
        };
        Self {
            language: language.to_string(),
            is_available: false,
            version: None,
            install_hint: Some(hint),
            executable: None,
        }
    }

    pub fn unsupported(language: &str) -> Self {
        Self::unavailable(language, &format!("Language '{language}' is not supported"))
    }

    /// Sentinel for the embedded evaluator
    pub fn built_in(language: &str) -> Self {
        Self::available(language, BUILT_IN_VERSION.to_string(), None)
    }
}

/// Strategy for finding out whether a toolchain works
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn probe(&self, language: &LanguageSpec) -> RuntimeInfo;
}

/// Probe that resolves candidate commands on `PATH` and runs their version command
#[derive(Debug, Clone)]
pub struct CommandProbe {
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn probe_command(&self, command: &str, args: &[String]) -> Option<String> {
        let resolved = match which::which(command) {
            Ok(path) => path,
            Err(_) => {
                tracing::debug!(command, "Not found on PATH");
                return None;
            }
        };

        let child = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(command, "Version probe failed to spawn: {}", e);
                return None;
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(command, "Version probe failed: {}", e);
                return None;
            }
            Err(_) => {
                tracing::warn!(command, timeout_ms = self.timeout.as_millis() as u64, "Version probe timed out");
                return None;
            }
        };

        if !output.status.success() {
            tracing::debug!(command, code = ?output.status.code(), "Version probe exited unsuccessfully");
            return None;
        }

        // Java and Kotlin print their version on stderr
        let version = first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        Some(version)
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RuntimeProbe for CommandProbe {
    async fn probe(&self, language: &LanguageSpec) -> RuntimeInfo {
        for command in language.candidate_commands() {
            if let Some(version) = self.probe_command(command, &language.version_args).await {
                tracing::info!(language = %language.id, command, version = %version, "Runtime detected");
                return RuntimeInfo::available(&language.id, version, Some(command.to_string()));
            }
        }
        tracing::info!(language = %language.id, "Runtime not available");
        RuntimeInfo::unavailable(&language.id, &language.install_hint)
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Cache of detection results keyed by canonical language id.
///
/// Each key owns a `OnceCell`, so concurrent first-time callers for the same
/// language share one in-flight probe. Entries live until `invalidate` or `clear`.
pub struct RuntimeRegistry {
    catalog: Arc<LanguageCatalog>,
    probe: Arc<dyn RuntimeProbe>,
    cache: DashMap<String, Arc<OnceCell<RuntimeInfo>>>,
}

impl RuntimeRegistry {
    pub fn new(catalog: Arc<LanguageCatalog>, probe: Arc<dyn RuntimeProbe>) -> Self {
        Self {
            catalog,
            probe,
            cache: DashMap::new(),
        }
    }

    pub fn with_command_probe(catalog: Arc<LanguageCatalog>, timeout: Duration) -> Self {
        Self::new(catalog, Arc::new(CommandProbe::new(timeout)))
    }

    pub fn catalog(&self) -> &Arc<LanguageCatalog> {
        &self.catalog
    }

    pub async fn get_or_detect(&self, language: &str) -> RuntimeInfo {
        let key = self.catalog.normalize(language);
        let Some(spec) = self.catalog.get(&key) else {
            return RuntimeInfo::unsupported(&key);
        };
        if spec.in_process {
            return RuntimeInfo::built_in(&key);
        }

        let cell = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(info) = cell.get() {
            tracing::trace!(language = %key, "Runtime cache hit");
            return info.clone();
        }

        let probe = self.probe.clone();
        cell.get_or_init(|| {
            async move { probe.probe(&spec).await }.instrument(detection_span(&key))
        })
        .await
        .clone()
    }

    /// Cached value without probing
    pub fn cached(&self, language: &str) -> Option<RuntimeInfo> {
        let key = self.catalog.normalize(language);
        self.cache.get(&key).and_then(|cell| cell.get().cloned())
    }

    pub fn invalidate(&self, language: &str) -> bool {
        let key = self.catalog.normalize(language);
        self.cache.remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.iter().filter(|entry| entry.value().initialized()).count()
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("languages", &self.catalog.len())
            .field("cached", &self.cached_count())
            .finish()
    }
}
