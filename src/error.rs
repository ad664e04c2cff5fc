// Error handling framework for the CodeTutor execution engine
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodeTutorError>;

/// Main error type. Only configuration problems and engine defects travel
/// through this type; learner-facing failures are returned as results.
#[derive(Debug, Error)]
pub enum CodeTutorError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<ConfigError>),

    #[error("Execution failed: {0}")]
    Execution(#[from] Box<ExecutionError>),

    #[error("Process execution failed: {0}")]
    Process(#[from] Box<ProcessError>),

    #[error("CLI argument error: {0}")]
    Cli(#[from] Box<CliError>),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid YAML syntax: {message}")]
    InvalidYaml {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        file_path: Option<PathBuf>,
    },

    #[error("Configuration file not found: {path}")]
    NotFound {
        path: PathBuf,
        suggestion: Option<String>,
    },

    #[error("Invalid configuration value: {message}")]
    InvalidValue {
        message: String,
        field: String,
        value: String,
        expected: String,
    },

    #[error("Invalid test case file: {message}")]
    InvalidTestCases { message: String, path: PathBuf },
}

/// Errors raised by the dispatcher before anything is executed
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unknown language: {language}")]
    UnknownLanguage {
        language: String,
        available_languages: Vec<String>,
    },
}

/// Process execution errors with detailed context
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Command not found: {command}")]
    CommandNotFound {
        command: String,
        suggestion: Option<String>,
    },

    #[error("Process spawn failed: {command}")]
    SpawnFailed { command: String, error: String },

    #[error("Process wait failed: {command}")]
    WaitFailed { command: String, error: String },
}

/// CLI argument and command-line interface errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid argument: {argument}")]
    InvalidArgument {
        argument: String,
        message: String,
        suggestion: Option<String>,
    },

    #[error("Conflicting arguments: {first} and {second}")]
    ConflictingArguments {
        first: String,
        second: String,
        suggestion: String,
    },

    #[error("Missing required argument: {argument}")]
    MissingArgument { argument: String, context: String },

    #[error("Runtime error: {message}")]
    RuntimeError { message: String },
}

/// Format errors with colors and context
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Format an error with context and colors
    pub fn format_error(&self, error: &CodeTutorError) -> String {
        use tracing::error;

        match error {
            CodeTutorError::Config(_) => {
                error!(error_type = "config", error = %error, "Configuration error occurred");
            }
            CodeTutorError::Execution(_) => {
                error!(error_type = "execution", error = %error, "Execution request rejected");
            }
            CodeTutorError::Process(_) => {
                error!(error_type = "process", error = %error, "Process execution failed");
            }
            CodeTutorError::Cli(_) => {
                error!(error_type = "cli", error = %error, "CLI error occurred");
            }
            CodeTutorError::Io(_) => {
                error!(error_type = "io", error = %error, "IO operation failed");
            }
        }

        let mut output = String::new();

        if self.use_colors {
            output.push_str("\x1b[31m");
        }
        output.push_str("Error: ");
        if self.use_colors {
            output.push_str("\x1b[0m");
        }

        output.push_str(&error.to_string());

        match error {
            CodeTutorError::Config(config_err) => {
                self.add_config_context(&mut output, config_err.as_ref());
            }
            CodeTutorError::Execution(exec_err) => {
                self.add_execution_context(&mut output, exec_err.as_ref());
            }
            CodeTutorError::Process(process_err) => {
                self.add_process_context(&mut output, process_err.as_ref());
            }
            CodeTutorError::Cli(cli_err) => {
                self.add_cli_context(&mut output, cli_err.as_ref());
            }
            CodeTutorError::Io(_) => {}
        }

        output
    }

    fn add_config_context(&self, output: &mut String, error: &ConfigError) {
        match error {
            ConfigError::InvalidYaml {
                file_path: Some(path),
                line: Some(line),
                ..
            } => {
                output.push_str(&format!("\n  --> {}:{}", path.display(), line));
            }
            ConfigError::NotFound {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            ConfigError::InvalidValue { expected, .. } => {
                output.push_str(&format!("\n  Expected: {expected}"));
            }
            _ => {}
        }
    }

    fn add_execution_context(&self, output: &mut String, error: &ExecutionError) {
        if let ExecutionError::UnknownLanguage {
            available_languages,
            ..
        } = error
        {
            output.push_str(&format!(
                "\n  Supported languages: {}",
                available_languages.join(", ")
            ));
        }
    }

    fn add_process_context(&self, output: &mut String, error: &ProcessError) {
        if let ProcessError::CommandNotFound {
            suggestion: Some(suggestion),
            ..
        } = error
        {
            output.push_str(&format!("\n  Help: {suggestion}"));
        }
    }

    fn add_cli_context(&self, output: &mut String, error: &CliError) {
        match error {
            CliError::InvalidArgument {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            CliError::ConflictingArguments { suggestion, .. } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            _ => {}
        }
    }
}

/// Process exit codes used by the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const CLI_ERROR: i32 = 3;
    pub const CODE_FAILURE: i32 = 4;
    pub const RUNTIME_UNAVAILABLE: i32 = 5;
    pub const TIMEOUT_ERROR: i32 = 6;
    pub const INFRA_ERROR: i32 = 9;
}

impl CodeTutorError {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CodeTutorError::Config(_) => exit_codes::CONFIG_ERROR,
            CodeTutorError::Execution(exec_err) => match exec_err.as_ref() {
                ExecutionError::UnknownLanguage { .. } => exit_codes::CONFIG_ERROR,
            },
            CodeTutorError::Process(process_err) => match process_err.as_ref() {
                ProcessError::CommandNotFound { .. } => exit_codes::RUNTIME_UNAVAILABLE,
                _ => exit_codes::INFRA_ERROR,
            },
            CodeTutorError::Cli(_) => exit_codes::CLI_ERROR,
            CodeTutorError::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }

    /// Create a user-friendly error message with context
    pub fn user_message(&self, use_colors: bool) -> String {
        let formatter = ErrorFormatter::new(use_colors);
        formatter.format_error(self)
    }
}

impl From<serde_yaml::Error> for Box<ConfigError> {
    fn from(error: serde_yaml::Error) -> Self {
        let location = error.location();
        Box::new(ConfigError::InvalidYaml {
            message: error.to_string(),
            line: location.as_ref().map(|l| l.line() as u32),
            column: location.as_ref().map(|l| l.column() as u32),
            file_path: None,
        })
    }
}

impl From<ExecutionError> for CodeTutorError {
    fn from(error: ExecutionError) -> Self {
        CodeTutorError::Execution(Box::new(error))
    }
}

impl From<ProcessError> for CodeTutorError {
    fn from(error: ProcessError) -> Self {
        CodeTutorError::Process(Box::new(error))
    }
}

impl From<ConfigError> for CodeTutorError {
    fn from(error: ConfigError) -> Self {
        CodeTutorError::Config(Box::new(error))
    }
}
