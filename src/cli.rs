// CLI interface for CodeTutor using clap
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::classification::Classification;
use crate::config::{EngineConfig, DEFAULT_CONFIG_FILE};
use crate::error::{exit_codes, CliError, CodeTutorError, Result};
use crate::execution::{ExecutionEngine, ExecutionRequest, ExecutionResult};
use crate::language::registry::RuntimeInfo;
use crate::validation::{
    load_test_cases, HarnessPreparer, InputPreparer, StdinPreparer, TestCaseEvaluator,
    TestCaseStatus, ValidationResult,
};

#[derive(Parser)]
#[command(
    name = "codetutor",
    about = "CodeTutor - run learner code in many languages and score it against test cases",
    version = crate::VERSION,
    long_about = "CodeTutor detects installed language toolchains, runs submissions under a time budget, classifies the outcome and validates output against lesson test cases."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Control color output (auto, always, never)
    #[arg(long, global = true, value_name = "WHEN")]
    pub color: Option<String>,

    /// Log line format on stderr (pretty, json, compact)
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program and print its output
    Run {
        /// Language name or alias (python, js, java, script, ...)
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long, conflicts_with = "code")]
        file: Option<PathBuf>,

        /// Inline source code
        #[arg(short = 'e', long)]
        code: Option<String>,

        /// Text passed to the program on standard input
        #[arg(long)]
        stdin: Option<String>,

        /// Time budget in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score a program against a test case file (YAML or JSON)
    Validate {
        #[arg(short, long)]
        language: String,

        /// Source file to validate
        #[arg(short, long)]
        file: PathBuf,

        /// Test case file
        #[arg(long)]
        tests: PathBuf,

        /// Inject input through a language harness instead of stdin
        #[arg(long)]
        harness: bool,

        #[arg(long)]
        json: bool,
    },

    /// Detect installed toolchains
    Detect {
        /// Languages to probe (all when omitted)
        languages: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// List supported languages
    Languages {
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    GenerateCompletion {
        /// Shell to generate completion for
        shell: Shell,
    },
}

impl Cli {
    pub fn run(&self) -> Result<i32> {
        // Initialize logging based on verbosity
        self.init_logging();

        if self.verbose && self.quiet {
            return Err(CodeTutorError::Cli(Box::new(CliError::ConflictingArguments {
                first: "--verbose".to_string(),
                second: "--quiet".to_string(),
                suggestion: "Use either --verbose for more output or --quiet for less output, but not both".to_string(),
            })));
        }

        if let Commands::GenerateCompletion { shell } = &self.command {
            let mut cmd = Self::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut std::io::stdout());
            return Ok(exit_codes::SUCCESS);
        }

        tracing::debug!(build = %crate::version_info(), "Starting");
        let config = EngineConfig::load(&self.config)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_command(ExecutionEngine::new(config)))
    }

    async fn run_command(&self, engine: ExecutionEngine) -> Result<i32> {
        match &self.command {
            Commands::Run {
                language,
                file,
                code,
                stdin,
                timeout,
                json,
            } => {
                let source_code = read_source(file.as_deref(), code.as_deref())?;
                let mut request =
                    ExecutionRequest::new(language, source_code).with_stdin(stdin.clone());
                if let Some(secs) = timeout {
                    request = request.with_timeout(Duration::from_secs(*secs));
                }
                let result = engine.execute_request(request).await?;
                if *json {
                    print_json(&result)?;
                } else {
                    print_execution(&result);
                }
                Ok(execution_exit_code(&result))
            }
            Commands::Validate {
                language,
                file,
                tests,
                harness,
                json,
            } => {
                let source_code = read_source(Some(file.as_path()), None)?;
                let test_cases = load_test_cases(tests)?;
                let preparer: Arc<dyn InputPreparer> = if *harness {
                    Arc::new(HarnessPreparer)
                } else {
                    Arc::new(StdinPreparer)
                };
                let result = TestCaseEvaluator::new(&engine, preparer)
                    .evaluate(language, &source_code, &test_cases)
                    .await?;
                if *json {
                    print_json(&result)?;
                } else {
                    print_validation(&result);
                }
                Ok(validation_exit_code(&result))
            }
            Commands::Detect { languages, json } => {
                let languages = if languages.is_empty() {
                    engine.catalog().ids()
                } else {
                    languages.clone()
                };
                let runtimes = engine.detect_runtimes(&languages).await;
                if *json {
                    print_json(&runtimes)?;
                } else {
                    runtimes.iter().for_each(print_runtime);
                }
                let all_available = runtimes.iter().all(|r| r.is_available);
                Ok(if all_available {
                    exit_codes::SUCCESS
                } else {
                    exit_codes::RUNTIME_UNAVAILABLE
                })
            }
            Commands::Languages { json } => {
                let languages = engine.list_supported_languages();
                if *json {
                    print_json(&languages)?;
                } else {
                    for language in &languages {
                        let kind = if language.in_process {
                            "in-process"
                        } else {
                            language.command.as_str()
                        };
                        let aliases = if language.aliases.is_empty() {
                            String::new()
                        } else {
                            format!(" (aliases: {})", language.aliases.join(", "))
                        };
                        println!("{:<12} {:<14} {}{}", language.id, language.display_name, kind, aliases);
                    }
                }
                Ok(exit_codes::SUCCESS)
            }
            Commands::GenerateCompletion { .. } => Ok(exit_codes::SUCCESS),
        }
    }

    fn init_logging(&self) {
        use crate::logging::{init_logging, LogConfig, LogFormat};

        let log_config = LogConfig::from_cli(self.verbose, self.quiet, self.color.clone())
            .with_format(LogFormat::parse(self.log_format.as_deref()));

        if let Err(e) = init_logging(log_config) {
            eprintln!("Failed to initialize logging: {e}");
            // Continue execution even if logging fails
        }
    }
}

fn read_source(file: Option<&Path>, code: Option<&str>) -> Result<String> {
    match (file, code) {
        (Some(path), _) => std::fs::read_to_string(path).map_err(|e| {
            CodeTutorError::Cli(Box::new(CliError::InvalidArgument {
                argument: "--file".to_string(),
                message: format!("cannot read {}: {e}", path.display()),
                suggestion: None,
            }))
        }),
        (None, Some(code)) => Ok(code.to_string()),
        (None, None) => Err(CodeTutorError::Cli(Box::new(CliError::MissingArgument {
            argument: "--file or --code".to_string(),
            context: "run needs source code".to_string(),
        }))),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        CodeTutorError::Cli(Box::new(CliError::RuntimeError {
            message: format!("Failed to serialize result: {e}"),
        }))
    })?;
    println!("{json}");
    Ok(())
}

fn print_execution(result: &ExecutionResult) {
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    if !result.success {
        eprintln!("[{}] {}", result.classification, result.error);
    }
}

fn print_validation(result: &ValidationResult) {
    for test in &result.test_results {
        let label = match test.status {
            TestCaseStatus::Passed => "PASS",
            TestCaseStatus::Failed => "FAIL",
            TestCaseStatus::Error => "ERROR",
        };
        println!("{label:<5} {}", test.test_case_id);
        if !test.passed {
            println!("      expected: {:?}", test.expected_output);
            println!("      actual:   {:?}", test.actual_output);
            if !test.error.is_empty() {
                println!("      error:    {}", test.error);
            }
        }
    }
    println!(
        "Score: {} ({} passed, {} failed, {} errored, {} total)",
        result.score, result.passed, result.failed, result.errored, result.total
    );
}

fn print_runtime(info: &RuntimeInfo) {
    if info.is_available {
        println!(
            "{:<12} available    {}",
            info.language,
            info.version.as_deref().unwrap_or_default()
        );
    } else {
        println!(
            "{:<12} missing      {}",
            info.language,
            info.install_hint.as_deref().unwrap_or_default()
        );
    }
}

pub fn classification_exit_code(classification: Classification) -> i32 {
    match classification {
        Classification::Success => exit_codes::SUCCESS,
        Classification::CompileError | Classification::RuntimeError => exit_codes::CODE_FAILURE,
        Classification::Timeout => exit_codes::TIMEOUT_ERROR,
        Classification::RuntimeUnavailable => exit_codes::RUNTIME_UNAVAILABLE,
        Classification::InfraError => exit_codes::INFRA_ERROR,
    }
}

fn execution_exit_code(result: &ExecutionResult) -> i32 {
    classification_exit_code(result.classification)
}

fn validation_exit_code(result: &ValidationResult) -> i32 {
    if result.is_correct {
        return exit_codes::SUCCESS;
    }
    match &result.execution {
        Some(execution) if execution.classification.is_infrastructure() => {
            classification_exit_code(execution.classification)
        }
        _ => exit_codes::CODE_FAILURE,
    }
}
