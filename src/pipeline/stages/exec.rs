//! External-process stage
//!
//! The child's stdin is fed from the stage inlet and its stdout is decoded into
//! blocks for the stage outlet. Three threads per stage: a writer pump, a
//! reader pump and the process monitor (plus a stderr log pump).

use crate::pipeline::conduit::{Inlet, Outlet};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::{StageInfo, RECV_POLL};
use crate::process::{ChildProcess, CommandLine, SpawnOptions, DEFAULT_STOP_GRACE};
use crate::types::{BlockDecoder, Format};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const READ_BUFFER: usize = 64 * 1024;

/// Shutdown behaviour of an external stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Wait between `SIGTERM` and `SIGKILL`
    pub stop_grace: Duration,
    /// Close stdin and let the tool flush before signalling it
    pub close_stdin_first: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
            close_stdin_first: false,
        }
    }
}

/// Declarative description of an external tool used as a stage
#[derive(Debug, Clone)]
pub struct ExecStage {
    name: String,
    command: CommandLine,
    input: Format,
    output: Format,
    options: ExecOptions,
}

impl ExecStage {
    pub fn new(name: impl Into<String>, command: CommandLine, input: Format, output: Format) -> Self {
        Self {
            name: name.into(),
            command,
            input,
            output,
            options: ExecOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn input_format(&self) -> Format {
        self.input
    }

    pub fn output_format(&self) -> Format {
        self.output
    }

    pub fn options(&self) -> ExecOptions {
        self.options
    }

    pub(crate) fn launch(
        self,
        info: &StageInfo,
        inlet: Inlet,
        outlet: Outlet,
        stop: Arc<AtomicBool>,
    ) -> PipelineResult<(ExecRuntime, Vec<JoinHandle<()>>)> {
        let label = format!("stage-{}", info.name);
        let close_input = Arc::new(AtomicBool::new(false));
        let exit_stop = stop.clone();
        let exit_closing = close_input.clone();
        let exit_label = label.clone();
        let spawn_options = SpawnOptions::new(label.clone())
            .with_stdin()
            .with_stdout()
            .with_stop_grace(self.options.stop_grace);

        let mut child = ChildProcess::spawn(&self.command, spawn_options, move |exit| {
            if !exit_stop.load(Ordering::Relaxed) && !exit_closing.load(Ordering::Relaxed) {
                tracing::warn!("External stage {} exited unexpectedly: {}", exit_label, exit);
            }
        })
        .map_err(|source| PipelineError::Spawn {
            command: self.command.to_string(),
            source,
        })?;

        let stdin = child.take_stdin();
        let stdout = child.take_stdout();
        let mut threads = Vec::with_capacity(2);

        if let Some(mut stdin) = stdin {
            let stop = stop.clone();
            let close_input = close_input.clone();
            let writer_label = label.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("{}-writer", label))
                    .spawn(move || {
                        while !stop.load(Ordering::Relaxed) && !close_input.load(Ordering::Relaxed) {
                            let Some(block) = inlet.recv_timeout(RECV_POLL) else {
                                continue;
                            };
                            if let Err(e) = stdin.write_all(&block.to_bytes()) {
                                if e.kind() != ErrorKind::BrokenPipe {
                                    tracing::warn!("{}: write to stdin failed: {}", writer_label, e);
                                }
                                break;
                            }
                        }
                        tracing::trace!("{}: closing stdin", writer_label);
                    })?,
            );
        }

        if let Some(mut stdout) = stdout {
            let stop = stop.clone();
            let output = self.output;
            let reader_label = label.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("{}-reader", label))
                    .spawn(move || {
                        let mut decoder = BlockDecoder::new(output);
                        let mut buf = vec![0u8; READ_BUFFER];
                        loop {
                            match stdout.read(&mut buf) {
                                Ok(0) => break,
                                Ok(n) => {
                                    if let Some(block) = decoder.push(&buf[..n]) {
                                        if !outlet.send(block, &stop) {
                                            break;
                                        }
                                    }
                                }
                                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                                Err(e) => {
                                    tracing::debug!("{}: read from stdout failed: {}", reader_label, e);
                                    break;
                                }
                            }
                        }
                        tracing::trace!("{}: end of output", reader_label);
                    })?,
            );
        }

        Ok((
            ExecRuntime {
                child,
                close_input,
                options: self.options,
            },
            threads,
        ))
    }
}

/// Process side of a started external stage
pub(crate) struct ExecRuntime {
    child: ChildProcess,
    close_input: Arc<AtomicBool>,
    options: ExecOptions,
}

impl ExecRuntime {
    pub(crate) fn shutdown(&mut self, stop: &AtomicBool) {
        if self.options.close_stdin_first {
            self.close_input.store(true, Ordering::Relaxed);
            if self.child.wait_timeout(self.options.stop_grace).is_some() {
                stop.store(true, Ordering::Relaxed);
                return;
            }
        }
        stop.store(true, Ordering::Relaxed);
        self.child.terminate(self.options.stop_grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::StageId;
    use crate::pipeline::stage::StageKind;
    use crate::types::Block;
    use crossbeam_channel::bounded;

    fn info(name: &str) -> StageInfo {
        StageInfo {
            id: StageId(0),
            name: name.to_string(),
            kind: StageKind::Exec,
            input: Format::Char,
            output: Format::Char,
        }
    }

    #[test]
    fn test_cat_stage_round_trip() {
        let (in_tx, in_rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let stage = ExecStage::new("cat", CommandLine::new("cat"), Format::Char, Format::Char);

        let (mut runtime, threads) = stage
            .launch(&info("cat"), Inlet::new(in_rx), Outlet::new(Some(out_tx)), stop.clone())
            .unwrap();

        in_tx.send(Block::Bytes(b"ping".to_vec())).unwrap();
        let echoed = out_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(echoed, Block::Bytes(b"ping".to_vec()));

        runtime.shutdown(&stop);
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn test_close_stdin_first_flushes() {
        let (in_tx, in_rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let stage = ExecStage::new(
            "wc",
            CommandLine::new("wc").arg("-c"),
            Format::Char,
            Format::Char,
        )
        .with_options(ExecOptions {
            stop_grace: Duration::from_secs(5),
            close_stdin_first: true,
        });

        let (mut runtime, threads) = stage
            .launch(&info("wc"), Inlet::new(in_rx), Outlet::new(Some(out_tx)), stop.clone())
            .unwrap();
        in_tx.send(Block::Bytes(b"12345".to_vec())).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        runtime.shutdown(&stop);
        for t in threads {
            t.join().unwrap();
        }
        let Block::Bytes(out) = out_rx.recv_timeout(Duration::from_secs(1)).unwrap() else {
            panic!("wrong format");
        };
        assert_eq!(String::from_utf8_lossy(&out).trim(), "5");
    }

    #[test]
    fn test_spawn_failure() {
        let stop = Arc::new(AtomicBool::new(false));
        let stage = ExecStage::new(
            "missing",
            CommandLine::new("/nonexistent/rxchain-tool"),
            Format::Char,
            Format::Char,
        );
        let result = stage.launch(&info("missing"), Inlet::detached(), Outlet::new(None), stop);
        assert!(matches!(result, Err(PipelineError::Spawn { .. })));
    }
}
