// Static language catalog: what each supported language needs to be detected and run

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;

/// Catalog entry for one language.
///
/// Command templates may use these placeholders:
/// `{runtime}` (the executable that answered detection), `{source}` (source file),
/// `{dir}` (workspace directory), `{binary}` (compiled output path) and
/// `{class}` (source file stem, e.g. the Java class name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanguageSpec {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub in_process: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub fallback_commands: Vec<String>,
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    pub file_extension: String,
    #[serde(default)]
    pub install_hint: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub compile: Option<CompileStep>,
    #[serde(default = "default_run_command")]
    pub run_command: String,
    #[serde(default = "default_run_args")]
    pub run_args: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Host variables copied into the child so the toolchain can find its install
    #[serde(default)]
    pub passthrough_env: Vec<String>,
    /// Stem used for the source file when `entry_name_pattern` finds nothing
    #[serde(default = "default_stem")]
    pub default_stem: String,
    /// Regex whose first capture group names the source file stem
    #[serde(default)]
    pub entry_name_pattern: Option<String>,
}

/// Separate compile phase for compiled languages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompileStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

fn default_run_command() -> String {
    "{runtime}".to_string()
}

fn default_run_args() -> Vec<String> {
    vec!["{source}".to_string()]
}

fn default_stem() -> String {
    "main".to_string()
}

/// Concrete values substituted into command templates
#[derive(Debug, Clone)]
pub struct TemplateValues<'a> {
    pub runtime: &'a str,
    pub source: &'a Path,
    pub dir: &'a Path,
    pub binary: &'a Path,
    pub class: &'a str,
}

impl LanguageSpec {
    fn external(id: &str, display_name: &str, command: &str, extension: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            in_process: false,
            command: command.to_string(),
            fallback_commands: Vec::new(),
            version_args: default_version_args(),
            file_extension: extension.to_string(),
            install_hint: String::new(),
            aliases: Vec::new(),
            compile: None,
            run_command: default_run_command(),
            run_args: default_run_args(),
            environment: BTreeMap::new(),
            passthrough_env: Vec::new(),
            default_stem: default_stem(),
            entry_name_pattern: None,
        }
    }

    fn hint(mut self, hint: &str) -> Self {
        self.install_hint = hint.to_string();
        self
    }

    fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    fn version_args(mut self, args: &[&str]) -> Self {
        self.version_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    fn run(mut self, command: &str, args: &[&str]) -> Self {
        self.run_command = command.to_string();
        self.run_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    fn compile(mut self, command: &str, args: &[&str]) -> Self {
        self.compile = Some(CompileStep {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    fn with_fallbacks(mut self, commands: &[&str]) -> Self {
        self.fallback_commands = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    fn with_entry_pattern(mut self, pattern: &str, default_stem: &str) -> Self {
        self.entry_name_pattern = Some(pattern.to_string());
        self.default_stem = default_stem.to_string();
        self
    }

    fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    fn passthrough(mut self, keys: &[&str]) -> Self {
        self.passthrough_env = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Candidate executables probed in order during detection
    pub fn candidate_commands(&self) -> Vec<&str> {
        std::iter::once(self.command.as_str())
            .chain(self.fallback_commands.iter().map(String::as_str))
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Source file stem for a submission (`Main` for `public class Main`, else the default)
    pub fn source_stem(&self, source_code: &str) -> String {
        self.entry_name_pattern
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok())
            .and_then(|re| {
                re.captures(source_code)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_else(|| self.default_stem.clone())
    }
}

/// Replace `{placeholder}` markers in a command template
pub fn expand_template(template: &str, values: &TemplateValues<'_>) -> String {
    template
        .replace("{runtime}", values.runtime)
        .replace("{source}", &values.source.to_string_lossy())
        .replace("{dir}", &values.dir.to_string_lossy())
        .replace("{binary}", &values.binary.to_string_lossy())
        .replace("{class}", values.class)
}

/// Built-in language table
pub fn builtin_languages() -> Vec<LanguageSpec> {
    vec![
        LanguageSpec::external("python", "Python", "python3", "py")
            .hint("Install Python from https://python.org")
            .aliases(&["py", "python3"])
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .passthrough(&["PYENV_ROOT", "PYENV_VERSION", "VIRTUAL_ENV", "CONDA_PREFIX"])
            .with_fallbacks(&["python"]),
        LanguageSpec::external("javascript", "JavaScript", "node", "js")
            .hint("Install Node.js from https://nodejs.org")
            .aliases(&["js", "node", "nodejs"])
            .passthrough(&["NVM_DIR", "VOLTA_HOME"])
            .with_fallbacks(&["nodejs"]),
        LanguageSpec::external("java", "Java", "java", "java")
            .hint("Install Java JDK from https://adoptium.net")
            .version_args(&["-version"])
            .passthrough(&["JAVA_HOME"])
            .compile("javac", &["-d", "{dir}", "{source}"])
            .run("{runtime}", &["-cp", "{dir}", "{class}"])
            .with_entry_pattern(r"public\s+(?:final\s+)?class\s+(\w+)", "Main"),
        LanguageSpec::external("kotlin", "Kotlin", "kotlinc", "kts")
            .hint("Install Kotlin from https://kotlinlang.org/docs/command-line.html")
            .aliases(&["kt"])
            .version_args(&["-version"])
            .passthrough(&["JAVA_HOME", "KOTLIN_HOME"])
            .run("{runtime}", &["-script", "{source}"]),
        LanguageSpec::external("rust", "Rust", "rustc", "rs")
            .hint("Install Rust from https://rustup.rs")
            .aliases(&["rs"])
            .passthrough(&["RUSTUP_HOME", "CARGO_HOME", "RUSTUP_TOOLCHAIN"])
            .compile("{runtime}", &["{source}", "-o", "{binary}"])
            .run("{binary}", &[]),
        LanguageSpec::external("dart", "Dart", "dart", "dart")
            .hint("Install Dart from https://dart.dev/get-dart")
            .aliases(&["flutter"])
            .passthrough(&["PUB_CACHE", "FLUTTER_ROOT"])
            .run("{runtime}", &["run", "{source}"]),
        LanguageSpec::external("csharp", "C#", "dotnet-script", "csx")
            .hint("Install dotnet-script with: dotnet tool install -g dotnet-script")
            .aliases(&["c#", "cs"])
            .passthrough(&["DOTNET_ROOT", "DOTNET_CLI_HOME", "NUGET_PACKAGES"]),
        LanguageSpec {
            in_process: true,
            command: String::new(),
            version_args: Vec::new(),
            run_command: String::new(),
            run_args: Vec::new(),
            ..LanguageSpec::external("script", "Rhai Script", "", "rhai")
        }
        .aliases(&["rhai"]),
    ]
}

/// Immutable catalog of supported languages, keyed by canonical id
#[derive(Debug, Clone)]
pub struct LanguageCatalog {
    languages: BTreeMap<String, Arc<LanguageSpec>>,
    aliases: HashMap<String, String>,
}

impl LanguageCatalog {
    pub fn new(languages: Vec<LanguageSpec>) -> Self {
        let mut catalog = Self {
            languages: BTreeMap::new(),
            aliases: HashMap::new(),
        };
        for language in languages {
            catalog.insert(language);
        }
        catalog
    }

    pub fn builtin() -> Self {
        Self::new(builtin_languages())
    }

    /// Built-in languages plus the additions and overrides from the configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut catalog = Self::builtin();
        for language in &config.languages {
            if catalog.languages.contains_key(&language.id.to_lowercase()) {
                tracing::debug!(language = %language.id, "Overriding built-in language entry");
            }
            catalog.insert(language.clone());
        }
        catalog
    }

    fn insert(&mut self, mut language: LanguageSpec) {
        language.id = language.id.trim().to_lowercase();
        let id = language.id.clone();
        for alias in &language.aliases {
            self.aliases.insert(alias.trim().to_lowercase(), id.clone());
        }
        self.languages.insert(id, Arc::new(language));
    }

    /// Canonical key for a language name; unknown names are only trimmed and lowercased
    pub fn normalize(&self, language: &str) -> String {
        let key = language.trim().to_lowercase();
        if self.languages.contains_key(&key) {
            return key;
        }
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    pub fn get(&self, language: &str) -> Option<Arc<LanguageSpec>> {
        self.languages.get(&self.normalize(language)).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    /// Snapshot of every entry, ordered by id
    pub fn list(&self) -> Vec<LanguageSpec> {
        self.languages.values().map(|l| (**l).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

impl Default for LanguageCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
