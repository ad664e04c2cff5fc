// Process management for external toolchains: spawning without a shell,
// concurrent output draining, deadline enforcement and process-tree kill

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::ResourceLimits;
use crate::error::{ProcessError, Result};

/// How long reader tasks get to finish after the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Process execution configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub environment: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub inherit_env: bool,
    pub stdin: Option<String>,
    pub max_output_bytes: Option<usize>,
    pub limits: Option<ResourceLimits>,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            environment: HashMap::new(),
            timeout: None,
            inherit_env: true,
            stdin: None,
            max_output_bytes: None,
            limits: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_environment(mut self, env: HashMap<String, String>) -> Self {
        self.environment = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = Some(limit);
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    fn display_command(&self) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().to_string()));
        parts.join(" ")
    }
}

/// Process execution result. A deadline expiry is a result, not an error:
/// `timed_out` is set and whatever output arrived before the kill is kept.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

/// Bytes collected from one stream, bounded by a cap
#[derive(Debug, Default)]
struct Accumulator {
    data: Vec<u8>,
    truncated: bool,
}

type SharedAccumulator = Arc<Mutex<Accumulator>>;

/// Kills the child's whole process group if dropped while still armed, so a
/// cancelled caller never leaves grandchildren behind.
struct ProcessGroupGuard {
    pid: Option<u32>,
    armed: bool,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid, armed: true }
    }

    /// Kill whatever is left in the group once the leader has been reaped
    fn kill_remaining(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                kill_group_sync(pid);
            }
        }
        // taskkill needs the leader alive to walk the tree; the job is gone by now
        self.armed = false;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Some(pid) = self.pid {
                tracing::debug!(pid, "Killing process group of abandoned child");
                kill_group_sync(pid);
            }
        }
    }
}

/// Main process manager
#[derive(Debug, Clone)]
pub struct ProcessManager {
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_output_bytes: 100_000,
        }
    }

    pub fn with_config(default_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            default_timeout,
            max_output_bytes,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a process to completion or deadline.
    ///
    /// Errors are reserved for failures to start the process at all;
    /// a missing executable is reported as `ProcessError::CommandNotFound`.
    pub async fn execute_async(&self, config: ProcessConfig) -> Result<ProcessResult> {
        let start_time = Instant::now();
        let timeout_duration = config.timeout.unwrap_or(self.default_timeout);
        let output_limit = config.max_output_bytes.unwrap_or(self.max_output_bytes);

        let mut cmd = self.build_command(&config);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound {
                    command: config.command.clone(),
                    suggestion: Some(format!(
                        "Make sure '{}' is installed and on PATH",
                        config.command
                    )),
                }
            } else {
                ProcessError::SpawnFailed {
                    command: config.command.clone(),
                    error: e.to_string(),
                }
            }
        })?;

        let mut group_guard = ProcessGroupGuard::new(child.id());
        tracing::debug!(
            command = %config.display_command(),
            pid = ?child.id(),
            timeout_ms = timeout_duration.as_millis() as u64,
            "Spawned process"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let input = config.stdin.clone().unwrap_or_default();
            tokio::spawn(async move {
                // The child may exit without reading; a broken pipe is expected then
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::trace!("stdin write ended early: {}", e);
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_acc = SharedAccumulator::default();
        let stderr_acc = SharedAccumulator::default();
        let readers = [
            child
                .stdout
                .take()
                .map(|s| spawn_drain(s, stdout_acc.clone(), output_limit)),
            child
                .stderr
                .take()
                .map(|s| spawn_drain(s, stderr_acc.clone(), output_limit)),
        ];

        let (exit_status, timed_out) =
            match tokio::time::timeout(timeout_duration, child.wait()).await {
                Ok(Ok(status)) => (Some(status), false),
                Ok(Err(e)) => {
                    kill_process_tree(&mut child).await;
                    return Err(ProcessError::WaitFailed {
                        command: config.command.clone(),
                        error: e.to_string(),
                    }
                    .into());
                }
                Err(_) => {
                    tracing::debug!(command = %config.command, "Deadline expired, killing process tree");
                    kill_process_tree(&mut child).await;
                    (child.wait().await.ok(), true)
                }
            };
        // Background jobs (`cmd &`) must not outlive the run
        group_guard.kill_remaining();

        // A descendant outside the group can keep a pipe open; don't wait on it forever
        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                tracing::debug!(command = %config.command, "Output reader did not finish in time");
                reader.abort();
            }
        }

        let stdout = std::mem::take(&mut *stdout_acc.lock());
        let stderr = std::mem::take(&mut *stderr_acc.lock());

        Ok(ProcessResult {
            exit_code: if timed_out {
                None
            } else {
                exit_status.and_then(|s| s.code())
            },
            signal: exit_status.and_then(exit_signal),
            stdout: stdout.data,
            stderr: stderr.data,
            duration: start_time.elapsed(),
            timed_out,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
        })
    }

    fn build_command(&self, config: &ProcessConfig) -> Command {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        if !config.inherit_env {
            cmd.env_clear();
        }
        for (key, value) in &config.environment {
            cmd.env(key, value);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if config.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            // Own process group so the whole tree can be signalled at once
            cmd.process_group(0);
            if let Some(limits) = config.limits.clone() {
                apply_resource_limits(&mut cmd, limits);
            }
        }

        cmd
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_drain<R>(reader: R, accumulator: SharedAccumulator, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = drain(reader, &accumulator, limit).await {
            tracing::debug!("Output stream closed with error: {}", e);
        }
    })
}

/// Read a stream to EOF, keeping at most `limit` bytes and discarding the rest
/// so the child never blocks on a full pipe.
async fn drain<R>(mut reader: R, accumulator: &SharedAccumulator, limit: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut acc = accumulator.lock();
        let room = limit.saturating_sub(acc.data.len());
        if room > 0 {
            acc.data.extend_from_slice(&buf[..n.min(room)]);
        }
        if n > room {
            acc.truncated = true;
        }
    }
}

#[cfg(unix)]
fn apply_resource_limits(cmd: &mut Command, limits: ResourceLimits) {
    use nix::sys::resource::{setrlimit, Resource};

    // SAFETY: the closure runs between fork and exec and only calls setrlimit,
    // which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(cpu) = limits.cpu_seconds {
                let soft = cpu as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_CPU, soft, soft + 1)?;
            }
            if let Some(size) = limits.file_size_bytes {
                let size = size as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_FSIZE, size, size)?;
            }
            if let Some(memory) = limits.memory_bytes {
                let memory = memory as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_AS, memory, memory)?;
            }
            Ok(())
        });
    }
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

/// Kill the child and everything it spawned
pub async fn kill_process_tree(child: &mut Child) {
    #[cfg(windows)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("taskkill")
                .args(["/T", "/F", "/PID", &pid.to_string()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            kill_group_sync(pid);
        }
    }

    if let Err(e) = child.start_kill() {
        // Already exited is fine
        tracing::trace!("start_kill: {}", e);
    }
}

#[cfg(unix)]
fn kill_group_sync(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::trace!(pid, "killpg: {}", e);
    }
}

#[cfg(windows)]
fn kill_group_sync(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// Environment builder for child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment {
    base_env: HashMap<String, String>,
}

impl ProcessEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal environment for learner code: host `PATH` and `HOME`, temp
    /// variables pointed at `workspace`, proxies disabled.
    ///
    /// `HOME` stays on the host value since rustup, dotnet tools and version
    /// manager shims locate their installs through it.
    pub fn restricted(workspace: &Path) -> Self {
        let mut env = Self::new();
        env.set_var("PATH", &std::env::var("PATH").unwrap_or_default());
        env.pass_through(["HOME", "USER", "LOGNAME", "LANG"]);
        let workspace = workspace.to_string_lossy();
        for key in ["TEMP", "TMP", "TMPDIR"] {
            env.set_var(key, &workspace);
        }
        env.set_var("NO_PROXY", "*").set_var("no_proxy", "*");

        #[cfg(windows)]
        {
            for key in ["SystemRoot", "USERPROFILE"] {
                if let Ok(value) = std::env::var(key) {
                    env.set_var(key, &value);
                }
            }
        }

        env
    }

    pub fn set_var(&mut self, key: &str, value: &str) -> &mut Self {
        self.base_env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn extend<'a>(&mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> &mut Self {
        for (key, value) in vars {
            self.set_var(key, value);
        }
        self
    }

    /// Copy the host value of each key that is set
    pub fn pass_through<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if let Ok(value) = std::env::var(key) {
                self.set_var(key, &value);
            }
        }
        self
    }

    pub fn build(&self) -> HashMap<String, String> {
        self.base_env.clone()
    }
}
