//! Send/buffer/receive pipelines.
//!
//! A [`Pipeline`] has two halves. Producer stages are chained directly with
//! OS pipes and their combined output is read by the calling thread; the
//! bytes are written into the first consumer stage, whose output in turn
//! feeds the remaining consumers. Relaying through the caller is what allows
//! byte counting (and therefore percentage progress) without an extra
//! monitoring process.
//!
//! ```text
//!  producer0 | producer1 ==> [relay, counts bytes] ==> consumer0 | consumer1
//! ```
//!
//! Every stage's standard error is drained on its own thread. After the relay
//! finishes, all stages are reaped and any non-zero exit turns the whole run
//! into [`PipelineError::Stages`] carrying every failing stage's output,
//! plus whatever the stages that exited 0 wrote to standard error.

use std::io::{self, ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{PipelineError, StageFailure};
use crate::process::StderrDrain;
use crate::Invocation;

/// Relay buffer size; matches the block size handed to `mbuffer`.
const RELAY_BUFFER_SIZE: usize = 128 * 1024;

/// A labelled pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    label: String,
    invocation: Invocation,
}

impl Stage {
    /// Creates a stage. The label identifies the stage in error messages.
    pub fn new(label: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            label: label.into(),
            invocation,
        }
    }

    /// Stage label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Command run by the stage.
    #[must_use]
    pub const fn invocation(&self) -> &Invocation {
        &self.invocation
    }
}

/// Outcome of a successful pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Bytes relayed from the producers to the consumers.
    pub bytes: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl PipelineSummary {
    /// Average relay throughput in bytes per second.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            self.bytes
        } else {
            (self.bytes as f64 / secs) as u64
        }
    }
}

/// Producer and consumer stages joined by a counting relay.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    producers: Vec<Stage>,
    consumers: Vec<Stage>,
}

struct Running {
    label: String,
    child: Child,
    stderr: Option<StderrDrain>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a producer stage.
    #[must_use]
    pub fn producer(mut self, stage: Stage) -> Self {
        self.producers.push(stage);
        self
    }

    /// Appends a consumer stage.
    #[must_use]
    pub fn consumer(mut self, stage: Stage) -> Self {
        self.consumers.push(stage);
        self
    }

    /// Producer stages in order.
    #[must_use]
    pub fn producers(&self) -> &[Stage] {
        &self.producers
    }

    /// Consumer stages in order.
    #[must_use]
    pub fn consumers(&self) -> &[Stage] {
        &self.consumers
    }

    /// Runs the pipeline to completion.
    ///
    /// `on_progress` is called from the calling thread with the cumulative
    /// number of relayed bytes after every chunk.
    pub fn run<F>(self, mut on_progress: F) -> Result<PipelineSummary, PipelineError>
    where
        F: FnMut(u64),
    {
        if self.producers.is_empty() || self.consumers.is_empty() {
            return Err(PipelineError::Empty);
        }

        let started = Instant::now();
        let mut running: Vec<Running> = Vec::with_capacity(self.producers.len() + self.consumers.len());

        let source = match spawn_producers(&self.producers, &mut running) {
            Ok(stdout) => stdout,
            Err(err) => return Err(abort(running, err)),
        };

        let sink = match spawn_consumers(&self.consumers, &mut running) {
            Ok(stdin) => stdin,
            Err(err) => {
                drop(source);
                return Err(abort(running, err));
            }
        };

        let (bytes, relay_error) = relay(source, sink, &mut on_progress);

        let failures = reap(running)?;
        if !failures.is_empty() {
            return Err(PipelineError::Stages(failures));
        }
        if let Some(err) = relay_error {
            return Err(PipelineError::Relay(err));
        }

        Ok(PipelineSummary {
            bytes,
            elapsed: started.elapsed(),
        })
    }
}

fn missing_pipe() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "stage stream was not captured")
}

fn spawn_error(stage: &Stage, source: io::Error) -> PipelineError {
    PipelineError::Spawn {
        stage: stage.label.clone(),
        source,
    }
}

/// Spawns one stage and registers it in `running`, returning its stdin and
/// stdout handles when they were requested as pipes.
fn spawn_stage(
    stage: &Stage,
    stdin: Stdio,
    stdout: Stdio,
    running: &mut Vec<Running>,
) -> Result<(Option<ChildStdin>, Option<ChildStdout>), PipelineError> {
    debug!(
        target: "snaprelay::pipeline",
        stage = %stage.label,
        command = %stage.invocation,
        "spawning stage"
    );

    let mut child = stage
        .invocation
        .to_command()
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| spawn_error(stage, source))?;

    let drain = match child.stderr.take() {
        Some(stream) => match StderrDrain::spawn(&stage.label, stream) {
            Ok(drain) => Some(drain),
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_error(stage, source));
            }
        },
        None => None,
    };

    let handles = (child.stdin.take(), child.stdout.take());
    running.push(Running {
        label: stage.label.clone(),
        child,
        stderr: drain,
    });
    Ok(handles)
}

/// Spawns the producers chained stdout-to-stdin and returns the final stdout.
fn spawn_producers(
    stages: &[Stage],
    running: &mut Vec<Running>,
) -> Result<ChildStdout, PipelineError> {
    let mut previous: Option<ChildStdout> = None;

    for stage in stages {
        let stdin = previous.take().map_or_else(Stdio::null, Stdio::from);
        let (_, stdout) = spawn_stage(stage, stdin, Stdio::piped(), running)?;
        previous = Some(stdout.ok_or_else(|| spawn_error(stage, missing_pipe()))?);
    }

    previous.ok_or(PipelineError::Empty)
}

/// Spawns the consumers chained stdout-to-stdin and returns the first stdin.
fn spawn_consumers(
    stages: &[Stage],
    running: &mut Vec<Running>,
) -> Result<ChildStdin, PipelineError> {
    let mut sink = None;
    let mut previous: Option<ChildStdout> = None;
    let last = stages.len().saturating_sub(1);

    for (index, stage) in stages.iter().enumerate() {
        let stdin = previous.take().map_or_else(Stdio::piped, Stdio::from);
        let stdout = if index == last {
            Stdio::null()
        } else {
            Stdio::piped()
        };

        let (stdin, stdout) = spawn_stage(stage, stdin, stdout, running)?;
        if index == 0 {
            sink = Some(stdin.ok_or_else(|| spawn_error(stage, missing_pipe()))?);
        }
        if index != last {
            previous = Some(stdout.ok_or_else(|| spawn_error(stage, missing_pipe()))?);
        }
    }

    sink.ok_or(PipelineError::Empty)
}

/// Copies producer output into the consumers, counting bytes.
///
/// Returns the byte count and the first I/O error, if any. Both handles are
/// dropped before returning so the stages observe EOF or a broken pipe.
fn relay<F>(
    mut source: ChildStdout,
    mut sink: ChildStdin,
    on_progress: &mut F,
) -> (u64, Option<io::Error>)
where
    F: FnMut(u64),
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    let error = loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break None,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => break Some(err),
        };

        if let Err(err) = sink.write_all(&buffer[..read]) {
            break Some(err);
        }

        total += read as u64;
        on_progress(total);
    };

    let error = match (error, sink.flush()) {
        (Some(err), _) | (None, Err(err)) => Some(err),
        (None, Ok(())) => None,
    };

    drop(sink);
    drop(source);
    (total, error)
}

/// Kills everything spawned so far after a start-up failure.
fn abort(running: Vec<Running>, err: PipelineError) -> PipelineError {
    for mut stage in running {
        let _ = stage.child.kill();
        let _ = stage.child.wait();
        stage.stderr.take();
    }
    err
}

/// Waits for every stage and collects the ones that failed.
///
/// When anything failed, stages that exited 0 but wrote to standard error are
/// kept as well, in stage order, so their text reaches the error.
fn reap(running: Vec<Running>) -> Result<Vec<StageFailure>, PipelineError> {
    let mut reported = Vec::new();
    let mut wait_error = None;

    for mut stage in running {
        let status = stage.child.wait();
        let stderr = stage.stderr.take().map(StderrDrain::collect).unwrap_or_default();

        match status {
            Ok(status) => {
                if status.success() && !stderr.is_empty() {
                    debug!(target: "snaprelay::pipeline", stage = %stage.label, stderr = %stderr, "stage output");
                }
                if !status.success() || !stderr.is_empty() {
                    reported.push(StageFailure {
                        stage: stage.label,
                        status,
                        stderr,
                    });
                }
            }
            Err(source) => {
                if wait_error.is_none() {
                    wait_error = Some(PipelineError::Wait {
                        stage: stage.label,
                        source,
                    });
                }
            }
        }
    }

    if !reported.iter().any(StageFailure::exited_unsuccessfully) {
        reported.clear();
    }
    match wait_error {
        Some(err) if reported.is_empty() => Err(err),
        _ => Ok(reported),
    }
}
