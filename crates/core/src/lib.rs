#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Overview
//!
//! `snaprelay_core` is the replication engine behind the `snaprelay`
//! binary. One call to [`run::Replicator::run`] performs a complete cycle
//! for a [`task::ReplicationTask`]: it finishes any interrupted receive,
//! inventories both datasets, decides between an incremental and a full
//! send, creates the new snapshot, moves it over one of three transports
//! and applies retention on both sides.
//!
//! # Design
//!
//! The engine talks to the outside world through three traits so that every
//! decision can be exercised against in-memory fakes:
//!
//! - [`host::ZfsHost`] lists, creates and destroys snapshots and reads
//!   properties. [`host::ZfsCli`] implements it with the `zfs` tool, locally
//!   or through the SSH control connection.
//! - [`transfer::Transport`] moves one stream. [`transfer::ProcessTransport`]
//!   builds the `local`, `ssh` or `netcat` process graph with [`zfs_io`].
//! - [`notify::Notifier`] receives status lines and structured events.
//!
//! Components only depend on the ones before them in the cycle:
//! [`snapshot`] → [`planner`] → [`lifecycle`] → [`resume`] / [`transfer`]
//! → [`prune`], with [`progress`] and [`notify`] used throughout.
//!
//! # Invariants
//!
//! - Snapshots are matched across hosts by GUID, never by name.
//! - A forced receive is only planned with permission and one of four
//!   recorded [`planner::ForceReason`]s.
//! - Pruning only touches snapshots the task owns and never the snapshot
//!   created in the same cycle.
//! - Reported progress never decreases within a cycle.
//!
//! # Errors
//!
//! Every failure is a [`error::ReplicationError`]; its
//! [`exit_code::HasExitCode`] mapping yields `0`, `1` or `2`. Policy
//! refusals name the setting that would unblock them.
//!
//! # Examples
//!
//! ```no_run
//! use snaprelay_core::dataset::Dataset;
//! use snaprelay_core::host::ZfsCli;
//! use snaprelay_core::notify::NullNotifier;
//! use snaprelay_core::run::Replicator;
//! use snaprelay_core::task::{
//!     Direction, MbufferSize, Policy, ReplicationTask, Retention, SendFlags, TransportKind,
//! };
//! use snaprelay_core::transfer::ProcessTransport;
//! use zfs_io::Location;
//!
//! let task = ReplicationTask {
//!     task_name: "nightly".into(),
//!     direction: Direction::Push,
//!     source: Dataset::new("tank", "data", Location::Local),
//!     destination: Dataset::new("backup", "data", Location::Local),
//!     transport: TransportKind::Local,
//!     netcat_port: 31337,
//!     send: SendFlags::default(),
//!     policy: Policy::default(),
//!     mbuffer: MbufferSize::default(),
//!     custom_name: None,
//!     source_retention: Retention::new(7, "days"),
//!     destination_retention: Retention::disabled(),
//! };
//!
//! let host = ZfsCli::new();
//! let transport = ProcessTransport::new();
//! let notifier = NullNotifier;
//! let now = time::OffsetDateTime::now_utc();
//! let code = match Replicator::new(&task, &host, &transport, &notifier, now).execute() {
//!     Ok(_) => 0,
//!     Err(code) => code.as_i32(),
//! };
//! std::process::exit(code);
//! ```

/// Datasets and pool/path joining.
pub mod dataset;
/// Errors produced by a replication run.
pub mod error;
pub mod exit_code;
pub mod host;
pub mod lifecycle;
pub mod notify;
pub mod planner;
pub mod progress;
pub mod prune;
pub mod resume;
pub mod run;
pub mod snapshot;
pub mod task;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{PolicyReason, ReplicationError};
pub use exit_code::{ExitCode, HasExitCode};
pub use run::{Replicator, RunOutcome};
