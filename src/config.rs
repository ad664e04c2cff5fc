// Configuration handling for the CodeTutor engine
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CodeTutorError, ConfigError, Result};
use crate::language::catalog::LanguageSpec;

pub const DEFAULT_CONFIG_FILE: &str = "codetutor.yaml";

/// Upper bound for any execution deadline (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Modules the embedded evaluator can `import`
pub const KNOWN_SCRIPT_MODULES: &[&str] = &["math", "strings", "arrays", "maps"];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Deadline applied when a request does not carry its own
    pub default_timeout_secs: u64,
    /// Deadline for a single toolchain version probe
    pub detection_timeout_secs: u64,
    /// Extra time the dispatcher waits past the deadline before giving up on a runner
    pub timeout_grace_ms: u64,
    /// Per-stream capture cap for external processes
    pub max_output_bytes: usize,
    pub limits: ResourceLimits,
    pub script: ScriptConfig,
    /// Additional languages, or overrides of built-in entries with the same id
    pub languages: Vec<LanguageSpec>,
}

/// Limits applied to external child processes (unix only)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    pub cpu_seconds: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptConfig {
    pub allowed_imports: Vec<String>,
    pub max_call_levels: usize,
    /// Longest string a script may build, in bytes
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            detection_timeout_secs: 5,
            timeout_grace_ms: 500,
            max_output_bytes: 100_000,
            limits: ResourceLimits::default(),
            script: ScriptConfig::default(),
            languages: Vec::new(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: Some(10),
            file_size_bytes: Some(10 * 1024 * 1024),
            memory_bytes: None,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            allowed_imports: KNOWN_SCRIPT_MODULES.iter().map(|m| m.to_string()).collect(),
            max_call_levels: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CodeTutorError::Config(Box::new(ConfigError::NotFound {
                path: path.to_path_buf(),
                suggestion: Some(format!(
                    "Create a {DEFAULT_CONFIG_FILE} file or omit --config to use defaults"
                )),
            })));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_with_context(&content, Some(path))
    }

    /// Load the configuration at `path`, falling back to defaults when the
    /// default file name is absent. An explicitly named file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if !path.exists() && path == Path::new(DEFAULT_CONFIG_FILE) {
            tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
            Self::default()
        } else {
            Self::from_file(path)?
        };
        config.with_env_overrides()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_context(yaml, None)
    }

    fn from_yaml_with_context(yaml: &str, file_path: Option<&Path>) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml).map_err(|e| {
            let mut config_error = *Box::<ConfigError>::from(e);
            if let ConfigError::InvalidYaml {
                file_path: ref mut path,
                ..
            } = config_error
            {
                *path = file_path.map(PathBuf::from);
            }
            CodeTutorError::Config(Box::new(config_error))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `CODETUTOR_TIMEOUT_SECS` and `CODETUTOR_MAX_OUTPUT_BYTES`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("CODETUTOR_TIMEOUT_SECS") {
            self.default_timeout_secs = parse_env("CODETUTOR_TIMEOUT_SECS", &value)?;
        }
        if let Ok(value) = std::env::var("CODETUTOR_MAX_OUTPUT_BYTES") {
            self.max_output_bytes = parse_env("CODETUTOR_MAX_OUTPUT_BYTES", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_secs == 0 || self.default_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(invalid_value(
                "default_timeout_secs",
                &self.default_timeout_secs.to_string(),
                &format!("between 1 and {MAX_TIMEOUT_SECS} seconds"),
            ));
        }
        if self.detection_timeout_secs == 0 {
            return Err(invalid_value(
                "detection_timeout_secs",
                "0",
                "a positive number of seconds",
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(invalid_value("max_output_bytes", "0", "a positive byte count"));
        }

        for (field, value) in [
            ("script.max_string_size", self.script.max_string_size),
            ("script.max_array_size", self.script.max_array_size),
            ("script.max_map_size", self.script.max_map_size),
        ] {
            // Zero disables the limit inside the evaluator
            if value == 0 {
                return Err(invalid_value(field, "0", "a positive size"));
            }
        }

        for import in &self.script.allowed_imports {
            if !KNOWN_SCRIPT_MODULES.contains(&import.as_str()) {
                return Err(invalid_value(
                    "script.allowed_imports",
                    import,
                    &format!("one of {}", KNOWN_SCRIPT_MODULES.join(", ")),
                ));
            }
        }

        for language in &self.languages {
            if language.id.trim().is_empty() {
                return Err(invalid_value("languages[].id", "", "a non-empty language id"));
            }
            if !language.in_process && language.command.trim().is_empty() {
                return Err(invalid_value(
                    &format!("languages[{}].command", language.id),
                    "",
                    "an executable name",
                ));
            }
        }

        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn timeout_grace(&self) -> Duration {
        Duration::from_millis(self.timeout_grace_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid_value(name, value, "an unsigned integer"))
}

fn invalid_value(field: &str, value: &str, expected: &str) -> CodeTutorError {
    CodeTutorError::Config(Box::new(ConfigError::InvalidValue {
        message: format!("{field} has an unusable value"),
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }))
}
