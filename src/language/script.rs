// In-process runner for the embedded scripting language (Rhai)
//
// print/debug output is captured through a shared slot installed by a
// CaptureGuard for exactly one evaluation. The slot is process-wide state, so
// evaluations are serialized behind EVAL_LOCK.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, MoreStringPackage, Package,
};
use rhai::{Dynamic, Engine, EvalAltResult, Module, Position};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classification::OutcomeSignals;
use crate::config::{ScriptConfig, KNOWN_SCRIPT_MODULES};
use crate::execution::ExecutionResult;

use super::traits::{trim_trailing_newlines, CodeRunner, RunContext};

/// Serializes install -> evaluate -> restore across every ScriptRunner
static EVAL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// State of one evaluation, shared between the engine callbacks and the caller
#[derive(Debug, Default)]
struct EvalSession {
    output: Mutex<CapturedOutput>,
    input: Mutex<VecDeque<String>>,
    cancelled: AtomicBool,
}

#[derive(Debug, Default, Clone)]
struct CapturedOutput {
    text: String,
    truncated: bool,
}

impl EvalSession {
    fn new(stdin: Option<&str>) -> Self {
        let input = stdin
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default();
        Self {
            input: Mutex::new(input),
            ..Self::default()
        }
    }

    fn write_line(&self, line: &str, limit: usize) {
        let mut output = self.output.lock();
        if output.truncated {
            return;
        }
        let needed = line.len() + 1;
        if output.text.len() + needed > limit {
            let room = limit.saturating_sub(output.text.len());
            let mut cut = room.min(line.len());
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            output.text.push_str(&line[..cut]);
            output.truncated = true;
        } else {
            output.text.push_str(line);
            output.text.push('\n');
        }
    }

    fn snapshot(&self) -> CapturedOutput {
        self.output.lock().clone()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type CaptureSlot = Arc<Mutex<Option<Arc<EvalSession>>>>;

/// Installs a session into the capture slot and puts back whatever was there
/// before when dropped, on every exit path including unwinding.
struct CaptureGuard<'a> {
    slot: &'a CaptureSlot,
    previous: Option<Arc<EvalSession>>,
}

impl<'a> CaptureGuard<'a> {
    fn install(slot: &'a CaptureSlot, session: Arc<EvalSession>) -> Self {
        let previous = slot.lock().replace(session);
        Self { slot, previous }
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous.take();
    }
}

/// How an evaluation ended, before it is turned into an ExecutionResult
#[derive(Debug)]
enum EvalOutcome {
    Value(String),
    Compile(String),
    Runtime(String),
    Cancelled,
}

impl EvalOutcome {
    fn signals(&self) -> OutcomeSignals {
        match self {
            Self::Value(_) => OutcomeSignals::exited(Some(0), ""),
            Self::Compile(_) => OutcomeSignals::compile_failed(),
            // An evaluator error plays the part of a crash with a message on stderr
            Self::Runtime(message) => OutcomeSignals::exited(None, message),
            Self::Cancelled => OutcomeSignals::timed_out(),
        }
    }
}

/// Runner for the in-process language
pub struct ScriptRunner {
    engine: Arc<Engine>,
    slot: CaptureSlot,
    max_output_bytes: usize,
}

impl ScriptRunner {
    pub fn new(config: &ScriptConfig, max_output_bytes: usize) -> Self {
        let slot: CaptureSlot = Arc::new(Mutex::new(None));
        let engine = build_engine(config, slot.clone(), max_output_bytes);
        Self {
            engine: Arc::new(engine),
            slot,
            max_output_bytes,
        }
    }

    /// True while an evaluation owns the capture slot
    pub fn is_capturing(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub async fn evaluate(
        &self,
        source_code: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> ExecutionResult {
        let start = Instant::now();
        let session = Arc::new(EvalSession::new(stdin));

        let engine = self.engine.clone();
        let slot = self.slot.clone();
        let task_session = session.clone();
        let code = source_code.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            let _lock = EVAL_LOCK.lock();
            if task_session.is_cancelled() {
                return EvalOutcome::Cancelled;
            }
            let _capture = CaptureGuard::install(&slot, task_session);
            evaluate_source(&engine, &code)
        });

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                tracing::error!("Script evaluation task failed: {}", join_error);
                return ExecutionResult::infra_error(
                    "Internal error while evaluating script",
                    elapsed_ms(start),
                );
            }
            Err(_) => {
                // The engine notices the flag at its next progress callback
                session.cancel();
                EvalOutcome::Cancelled
            }
        };

        let captured = session.snapshot();
        let mut output = trim_trailing_newlines(&captured.text);
        if captured.truncated {
            output.push_str(&truncation_marker(self.max_output_bytes));
        }
        let execution_time_ms = elapsed_ms(start);

        let signals = outcome.signals();
        let mut result = match outcome {
            EvalOutcome::Value(value) => {
                if output.is_empty() {
                    output = value;
                }
                ExecutionResult::from_signals(signals, output, String::new(), execution_time_ms)
            }
            EvalOutcome::Compile(message) | EvalOutcome::Runtime(message) => {
                ExecutionResult::from_signals(signals, output, message, execution_time_ms)
            }
            EvalOutcome::Cancelled => ExecutionResult::timeout(output, timeout, execution_time_ms),
        };
        result.output_truncated = captured.truncated;
        result
    }
}

#[async_trait]
impl CodeRunner for ScriptRunner {
    fn runner_name(&self) -> &str {
        "script"
    }

    async fn run(&self, ctx: RunContext<'_>) -> ExecutionResult {
        self.evaluate(ctx.source_code, ctx.stdin, ctx.timeout).await
    }
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("max_output_bytes", &self.max_output_bytes)
            .field("capturing", &self.is_capturing())
            .finish()
    }
}

fn build_engine(config: &ScriptConfig, slot: CaptureSlot, max_output_bytes: usize) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.disable_symbol("eval");

    let print_slot = slot.clone();
    engine.on_print(move |text| match print_slot.lock().as_ref() {
        Some(session) => session.write_line(text, max_output_bytes),
        None => println!("{text}"),
    });

    let debug_slot = slot.clone();
    engine.on_debug(move |text, _source, _pos| match debug_slot.lock().as_ref() {
        Some(session) => session.write_line(text, max_output_bytes),
        None => println!("{text}"),
    });

    let progress_slot = slot.clone();
    engine.on_progress(move |_operations| {
        let cancelled = progress_slot
            .lock()
            .as_ref()
            .map_or(false, |session| session.is_cancelled());
        cancelled.then_some(Dynamic::UNIT)
    });

    let input_slot = slot;
    engine.register_fn("read_line", move || -> String {
        input_slot
            .lock()
            .as_ref()
            .and_then(|session| session.input.lock().pop_front())
            .unwrap_or_default()
    });

    engine.set_module_resolver(module_whitelist(&config.allowed_imports));
    engine
}

/// Static resolver holding only the allowed modules; any other import fails
fn module_whitelist(allowed: &[String]) -> StaticModuleResolver {
    let mut resolver = StaticModuleResolver::new();
    for name in allowed {
        let shared = match name.as_str() {
            "math" => BasicMathPackage::new().as_shared_module(),
            "strings" => MoreStringPackage::new().as_shared_module(),
            "arrays" => BasicArrayPackage::new().as_shared_module(),
            "maps" => BasicMapPackage::new().as_shared_module(),
            other => {
                tracing::warn!(
                    module = other,
                    known = ?KNOWN_SCRIPT_MODULES,
                    "Ignoring unknown script module"
                );
                continue;
            }
        };
        // The resolver stores owned modules; packages hand out shared ones
        let module: Module = shared.as_ref().clone();
        resolver.insert(name.as_str(), module);
    }
    resolver
}

fn evaluate_source(engine: &Engine, code: &str) -> EvalOutcome {
    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(parse_error) => return EvalOutcome::Compile(parse_error.to_string()),
    };

    match engine.eval_ast::<Dynamic>(&ast) {
        Ok(value) if value.is_unit() => EvalOutcome::Value(String::new()),
        Ok(value) => EvalOutcome::Value(value.to_string()),
        Err(error) => classify_eval_error(*error),
    }
}

fn classify_eval_error(error: EvalAltResult) -> EvalOutcome {
    match error {
        EvalAltResult::ErrorTerminated(..) => EvalOutcome::Cancelled,
        EvalAltResult::ErrorModuleNotFound(name, pos) => EvalOutcome::Compile(format!(
            "Module '{name}' is not available{}",
            describe_position(pos)
        )),
        EvalAltResult::ErrorParsing(..) => EvalOutcome::Compile(error.to_string()),
        other => EvalOutcome::Runtime(other.to_string()),
    }
}

fn describe_position(pos: Position) -> String {
    match (pos.line(), pos.position()) {
        (Some(line), Some(column)) => format!(" (line {line}, position {column})"),
        (Some(line), None) => format!(" (line {line})"),
        _ => String::new(),
    }
}

pub(crate) fn truncation_marker(limit: usize) -> String {
    format!("\n[Output truncated - exceeded {limit} bytes limit]")
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
