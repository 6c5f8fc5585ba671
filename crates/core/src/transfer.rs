//! Stream construction and the three transport variants.
//!
//! All variants share [`SendArgs`] and [`ReceiveArgs`]; a [`TransferRequest`]
//! bundles everything one transfer needs. [`route`] turns a request into the
//! concrete processes, and [`ProcessTransport`] runs them:
//!
//! | kind | push | pull |
//! |---|---|---|
//! | local | `send` ⇒ `receive` | same |
//! | ssh | `send \| mbuffer` ⇒ `ssh receive` | `ssh 'send \| mbuffer'` ⇒ `receive` |
//! | netcat | listener `ssh 'nc -l \| receive'`; `send \| mbuffer` ⇒ `nc -N` | listener `ssh 'send \| mbuffer \| nc -l'`; `nc -d` ⇒ `receive` |
//!
//! `⇒` marks the in-process relay that counts bytes for progress.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use zfs_io::pipeline::{Pipeline, Stage};
use zfs_io::stderr::classify;
use zfs_io::{CommandError, Invocation, Location, RemoteHost, SupervisedChild, ZfsFailure};

use crate::error::ReplicationError;
use crate::task::{Direction, MbufferSize, ReplicationTask, SendFlags, TransportKind};

/// Delay between starting a remote listener and connecting to it.
pub const LISTENER_GRACE: Duration = Duration::from_secs(3);

/// Time a remote control process gets to finish after the stream ends.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What the sender transmits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendSource {
    /// A snapshot, optionally as the delta from an earlier one.
    Snapshot {
        /// Snapshot to send (`dataset@suffix`).
        snapshot: String,
        /// Source-side incremental base (`dataset@suffix`).
        base: Option<String>,
    },
    /// Continuation of an interrupted receive.
    Resume {
        /// Token read from the receiving dataset.
        token: String,
    },
}

/// Arguments of `zfs send`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendArgs {
    source: SendSource,
    flags: SendFlags,
}

impl SendArgs {
    /// Sends `snapshot`, incrementally from `base` when given.
    #[must_use]
    pub const fn snapshot(snapshot: String, base: Option<String>, flags: SendFlags) -> Self {
        Self {
            source: SendSource::Snapshot { snapshot, base },
            flags,
        }
    }

    /// Resumes from `token`. Stream flags are encoded in the token.
    #[must_use]
    pub fn resume(token: String) -> Self {
        Self {
            source: SendSource::Resume { token },
            flags: SendFlags::default(),
        }
    }

    /// What is being sent.
    #[must_use]
    pub const fn source(&self) -> &SendSource {
        &self.source
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub fn subject(&self) -> &str {
        match &self.source {
            SendSource::Snapshot { snapshot, .. } => snapshot,
            SendSource::Resume { .. } => "resume token",
        }
    }

    /// `zfs send` invocation.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        let mut command = Invocation::new("zfs").arg("send");
        match &self.source {
            SendSource::Resume { token } => {
                command.push_arg("-t");
                command.push_arg(token);
            }
            SendSource::Snapshot { snapshot, base } => {
                if self.flags.recursive {
                    command.push_arg("-R");
                }
                if self.flags.compressed {
                    command = command.args(["-L", "-c", "-e"]);
                }
                if self.flags.raw {
                    command.push_arg("-w");
                }
                if let Some(base) = base {
                    command.push_arg(if self.flags.recursive { "-I" } else { "-i" });
                    command.push_arg(base);
                }
                command.push_arg(snapshot);
            }
        }
        command
    }

    /// Dry-run variant that only reports the stream size.
    #[must_use]
    pub fn estimate_invocation(&self) -> Invocation {
        let mut command = self.invocation();
        command.insert_arg(1, "-n");
        command.insert_arg(2, "-P");
        command
    }
}

/// Arguments of `zfs receive`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveArgs {
    dataset: String,
    force: bool,
}

impl ReceiveArgs {
    /// Receives into `dataset`, rolling it back first when `force` is set.
    pub fn new(dataset: impl Into<String>, force: bool) -> Self {
        Self {
            dataset: dataset.into(),
            force,
        }
    }

    /// Receiving dataset.
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Whether the receive is forced.
    #[must_use]
    pub const fn force(&self) -> bool {
        self.force
    }

    /// `zfs receive -s [-F] dataset`; `-s` keeps a resume token on failure.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        let mut command = Invocation::new("zfs").args(["receive", "-s"]);
        if self.force {
            command.push_arg("-F");
        }
        command.push_arg(&self.dataset);
        command
    }
}

/// Everything needed to move one stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Sender arguments.
    pub send: SendArgs,
    /// Receiver arguments.
    pub receive: ReceiveArgs,
    /// Which side is remote.
    pub direction: Direction,
    /// Data path.
    pub kind: TransportKind,
    /// Remote end of the control connection.
    pub remote: Option<RemoteHost>,
    /// Flow-control buffer size.
    pub mbuffer: MbufferSize,
    /// Data socket port for netcat.
    pub netcat_port: u16,
}

impl TransferRequest {
    /// Builds a request from the task settings.
    #[must_use]
    pub fn for_task(task: &ReplicationTask, send: SendArgs, force: bool) -> Self {
        Self {
            send,
            receive: ReceiveArgs::new(task.destination.name(), force),
            direction: task.direction,
            kind: task.transport,
            remote: task.remote().cloned(),
            mbuffer: task.mbuffer,
            netcat_port: task.netcat_port,
        }
    }

    fn mbuffer_invocation(&self) -> Invocation {
        Invocation::new("mbuffer").args([
            "-q".to_owned(),
            "-s".to_owned(),
            "128k".to_owned(),
            "-m".to_owned(),
            self.mbuffer.to_string(),
        ])
    }
}

/// Outcome of a completed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes relayed.
    pub bytes: u64,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

/// Moves a stream from the sender to the receiver.
pub trait Transport {
    /// Runs the transfer, calling `progress` with cumulative byte counts.
    fn transfer(
        &self,
        request: &TransferRequest,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferReport, ReplicationError>;
}

/// Concrete processes for one transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Remote control process started before the pipeline (netcat).
    pub listener: Option<Invocation>,
    /// Stages feeding the relay.
    pub producers: Vec<Stage>,
    /// Stages fed by the relay.
    pub consumers: Vec<Stage>,
}

impl Route {
    /// One line per process, in start order.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let listener = self
            .listener
            .iter()
            .map(|invocation| format!("remote listener: {invocation}"));
        let stages = self
            .producers
            .iter()
            .chain(&self.consumers)
            .map(|stage| format!("{}: {}", stage.label(), stage.invocation()));
        listener.chain(stages).collect()
    }

    fn pipeline(&self) -> Pipeline {
        let pipeline = self
            .producers
            .iter()
            .cloned()
            .fold(Pipeline::new(), Pipeline::producer);
        self.consumers
            .iter()
            .cloned()
            .fold(pipeline, Pipeline::consumer)
    }
}

/// Builds the processes for `request`.
pub fn route(request: &TransferRequest) -> Result<Route, ReplicationError> {
    let send = request.send.invocation();
    let receive = request.receive.invocation();

    match request.kind {
        TransportKind::Local => Ok(Route {
            listener: None,
            producers: vec![Stage::new("send", send)],
            consumers: vec![Stage::new("receive", receive)],
        }),
        TransportKind::Ssh | TransportKind::Netcat => remote_route(request, send, receive),
    }
}

fn remote_route(
    request: &TransferRequest,
    send: Invocation,
    receive: Invocation,
) -> Result<Route, ReplicationError> {
    let remote = request.remote.clone().ok_or_else(|| {
        ReplicationError::Config(format!(
            "the {} transfer method needs a remote host",
            request.kind
        ))
    })?;
    let port = request.netcat_port.to_string();
    let mbuffer = request.mbuffer_invocation();
    let host = remote.host().to_owned();
    let control = Location::Remote(remote);
    let netcat = request.kind == TransportKind::Netcat;

    let route = match (netcat, request.direction) {
        (false, Direction::Push) => Route {
            listener: None,
            producers: vec![Stage::new("send", send), Stage::new("mbuffer", mbuffer)],
            consumers: vec![Stage::new("remote receive", control.wrap(&[receive]))],
        },
        (false, Direction::Pull) => Route {
            listener: None,
            producers: vec![Stage::new("remote send", control.wrap(&[send, mbuffer]))],
            consumers: vec![Stage::new("receive", receive)],
        },
        (true, Direction::Push) => Route {
            listener: Some(control.wrap(&[
                Invocation::new("nc").args(["-l", port.as_str()]),
                receive,
            ])),
            producers: vec![Stage::new("send", send), Stage::new("mbuffer", mbuffer)],
            consumers: vec![Stage::new(
                "netcat",
                Invocation::new("nc").args(["-N", host.as_str(), port.as_str()]),
            )],
        },
        (true, Direction::Pull) => Route {
            listener: Some(control.wrap(&[
                send,
                mbuffer,
                Invocation::new("nc").args(["-l", port.as_str()]),
            ])),
            producers: vec![Stage::new(
                "netcat",
                Invocation::new("nc").args(["-d", host.as_str(), port.as_str()]),
            )],
            consumers: vec![Stage::new("receive", receive)],
        },
    };
    Ok(route)
}

/// [`Transport`] that runs real processes.
#[derive(Clone, Copy, Debug)]
pub struct ProcessTransport {
    grace: Duration,
    ack_timeout: Duration,
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self {
            grace: LISTENER_GRACE,
            ack_timeout: ACK_TIMEOUT,
        }
    }
}

impl ProcessTransport {
    /// Uses the standard grace delay and acknowledgement timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides both waits.
    #[must_use]
    pub const fn with_timing(grace: Duration, ack_timeout: Duration) -> Self {
        Self { grace, ack_timeout }
    }

    fn start_listener(&self, invocation: &Invocation) -> Result<SupervisedChild, ReplicationError> {
        let mut listener = SupervisedChild::spawn(invocation).map_err(listener_error)?;
        debug!(
            target: "snaprelay::transfer",
            grace_ms = self.grace.as_millis(),
            "waiting for remote listener"
        );
        thread::sleep(self.grace);

        if listener.has_exited() {
            return Err(match listener.wait_timeout(Duration::from_secs(1)) {
                Err(err) => listener_error(err),
                Ok(()) => ReplicationError::Transport {
                    stage: LISTENER_STAGE.into(),
                    message: "remote listener exited before the stream started".into(),
                    failure: ZfsFailure::Other,
                },
            });
        }
        Ok(listener)
    }
}

const LISTENER_STAGE: &str = "remote listener";

fn listener_error(err: CommandError) -> ReplicationError {
    ReplicationError::Transport {
        stage: LISTENER_STAGE.into(),
        failure: err.failure(),
        message: err.to_string(),
    }
}

impl Transport for ProcessTransport {
    fn transfer(
        &self,
        request: &TransferRequest,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferReport, ReplicationError> {
        let route = route(request)?;
        for line in route.describe() {
            debug!(target: "snaprelay::transfer", "{line}");
        }
        self.run_route(&route, progress)
    }
}

impl ProcessTransport {
    /// Starts the route's listener, waits out the grace delay, relays the
    /// stream and then gives the listener its acknowledgement window.
    pub fn run_route(
        &self,
        route: &Route,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferReport, ReplicationError> {
        let listener = match &route.listener {
            Some(invocation) => Some(self.start_listener(invocation)?),
            None => None,
        };

        let result = route.pipeline().run(|bytes| progress(bytes));

        let summary = match (result, listener) {
            (Ok(summary), None) => summary,
            (Ok(summary), Some(listener)) => {
                listener.wait_timeout(self.ack_timeout).map_err(listener_error)?;
                summary
            }
            (Err(err), None) => return Err(err.into()),
            (Err(err), Some(listener)) => {
                let stderr = listener.terminate();
                let pipeline_failure = err.failure();
                let listener_failure = classify(&stderr);
                if !stderr.is_empty() && pipeline_failure.max(listener_failure) != pipeline_failure {
                    return Err(ReplicationError::Transport {
                        stage: LISTENER_STAGE.into(),
                        message: stderr,
                        failure: listener_failure,
                    });
                }
                return Err(err.into());
            }
        };

        info!(
            target: "snaprelay::transfer",
            bytes = summary.bytes,
            elapsed_ms = summary.elapsed.as_millis(),
            bytes_per_second = summary.bytes_per_second(),
            "stream complete"
        );
        Ok(TransferReport {
            bytes: summary.bytes,
            elapsed: summary.elapsed,
        })
    }
}
