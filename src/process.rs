//! Child process handling shared by capture devices and external-process stages
//!
//! Every child is spawned into its own process group so that shell pipelines
//! (`sh -c "a | b"`) are signalled as a unit. A dedicated monitor thread owns
//! the [`std::process::Child`], waits for it and reports the exit through a
//! callback and an internal channel.
//!
//! Termination is two-phase everywhere: `SIGTERM` to the group, a bounded
//! wait, then `SIGKILL`.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::borrow::Cow;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default grace period between `SIGTERM` and `SIGKILL`
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// How long to wait for the monitor to observe a `SIGKILL`
const KILL_WAIT: Duration = Duration::from_secs(5);

// ==================== Command Line ====================

/// Program plus argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Run `script` through `sh -c`, needed for pipelines of several tools
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote a word for display in a POSIX shell
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

// ==================== Child Process ====================

/// Exit report delivered by the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` if waiting on the child failed
    pub status: Option<ExitStatus>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}", status),
            None => write!(f, "unknown status"),
        }
    }
}

/// How the child's standard streams are wired
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Label used for thread names and log lines
    pub label: String,
    /// Pipe stdin to the caller (otherwise `/dev/null`)
    pub pipe_stdin: bool,
    /// Hand stdout to the caller (otherwise it is logged at INFO)
    pub capture_stdout: bool,
    /// Grace period used when the handle is dropped
    pub stop_grace: Duration,
}

impl SpawnOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pipe_stdin: false,
            capture_stdout: false,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stdin(mut self) -> Self {
        self.pipe_stdin = true;
        self
    }

    pub fn with_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

/// A running child process in its own process group
pub struct ChildProcess {
    label: String,
    pid: Pid,
    exited: Arc<AtomicBool>,
    exit_rx: Receiver<ProcessExit>,
    exit: Option<ProcessExit>,
    monitor: Option<JoinHandle<()>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stop_grace: Duration,
}

impl ChildProcess {
    /// Spawn `command` and start its monitor thread.
    ///
    /// `on_exit` runs on the monitor thread as soon as the child has been reaped.
    pub fn spawn<F>(command: &CommandLine, options: SpawnOptions, on_exit: F) -> std::io::Result<Self>
    where
        F: FnOnce(ProcessExit) + Send + 'static,
    {
        let mut cmd = command.to_command();
        cmd.stdin(if options.pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

        let mut child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        tracing::info!("Started {} (pid {}): {}", options.label, pid, command);

        let stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            spawn_log_pump(&options.label, stderr, PumpLevel::Warn);
        }
        if !options.capture_stdout {
            if let Some(out) = stdout.take() {
                spawn_log_pump(&options.label, out, PumpLevel::Info);
            }
        }

        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = bounded(1);
        let monitor_exited = exited.clone();
        let monitor_label = options.label.clone();

        let monitor = std::thread::Builder::new()
            .name(format!("{}-monitor", options.label))
            .spawn(move || {
                let status = match child.wait() {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::warn!("Waiting on {} failed: {}", monitor_label, e);
                        None
                    }
                };
                let exit = ProcessExit { status };
                monitor_exited.store(true, Ordering::SeqCst);
                tracing::debug!("{} exited: {}", monitor_label, exit);
                on_exit(exit);
                let _ = exit_tx.send(exit);
            });

        let monitor = match monitor {
            Ok(handle) => handle,
            Err(e) => {
                let _ = killpg(pid, Signal::SIGKILL);
                return Err(e);
            }
        };

        Ok(Self {
            label: options.label,
            pid,
            exited,
            exit_rx,
            exit: None,
            monitor: Some(monitor),
            stdin,
            stdout,
            stop_grace: options.stop_grace,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Flag raised by the monitor once the child has been reaped
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        self.exited.clone()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Signal the whole process group. A group that is already gone is not an error.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        match killpg(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait up to `timeout` for the child to exit
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ProcessExit> {
        if let Some(exit) = self.exit {
            return Some(exit);
        }
        match self.exit_rx.recv_timeout(timeout) {
            Ok(exit) => {
                self.exit = Some(exit);
                self.join_monitor();
                Some(exit)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Monitor is gone without reporting; treat as exited with unknown status
                let exit = ProcessExit { status: None };
                self.exit = Some(exit);
                self.join_monitor();
                Some(exit)
            }
        }
    }

    /// Two-phase stop: `SIGTERM`, wait up to `grace`, then `SIGKILL`
    pub fn terminate(&mut self, grace: Duration) -> Option<ProcessExit> {
        self.stdin = None;
        if let Some(exit) = self.wait_timeout(Duration::ZERO) {
            return Some(exit);
        }

        tracing::debug!("Sending SIGTERM to {} (pid {})", self.label, self.pid);
        if let Err(e) = self.signal(Signal::SIGTERM) {
            tracing::warn!("Failed to signal {}: {}", self.label, e);
        }
        if let Some(exit) = self.wait_timeout(grace) {
            return Some(exit);
        }

        tracing::warn!(
            "{} did not exit within {:?} after SIGTERM, sending SIGKILL",
            self.label,
            grace
        );
        if let Err(e) = self.signal(Signal::SIGKILL) {
            tracing::error!("Failed to kill {}: {}", self.label, e);
        }
        let exit = self.wait_timeout(KILL_WAIT);
        if exit.is_none() {
            tracing::error!("{} (pid {}) survived SIGKILL", self.label, self.pid);
        }
        exit
    }

    fn join_monitor(&mut self) {
        if let Some(handle) = self.monitor.take() {
            if handle.join().is_err() {
                tracing::error!("{} monitor thread panicked", self.label);
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            self.terminate(self.stop_grace);
        }
    }
}

// ==================== Log Pumps ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpLevel {
    Info,
    Warn,
}

/// Forward a child's output into tracing, one event per line
pub fn spawn_log_pump<R>(label: &str, reader: R, level: PumpLevel)
where
    R: Read + Send + 'static,
{
    let label = label.to_string();
    let thread_name = format!("{}-log", label);
    let result = std::thread::Builder::new().name(thread_name).spawn(move || {
        let reader = BufReader::new(reader);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match level {
                PumpLevel::Info => tracing::info!(target: "rxchain::child", "[{}] {}", label, line),
                PumpLevel::Warn => tracing::warn!(target: "rxchain::child", "[{}] {}", label, line),
            }
        }
    });
    if let Err(e) = result {
        tracing::error!("Failed to start log pump: {}", e);
    }
}
