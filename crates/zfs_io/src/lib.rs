#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zfs_io` owns every interaction with external processes performed by the
//! replication engine: assembling `ssh` invocations for the control
//! connection, quoting remote command lines, running one-shot commands with
//! captured output, and wiring multi-stage send/buffer/receive pipelines.
//!
//! # Design
//!
//! - [`Invocation`] is a plain program-plus-arguments value. It can be run
//!   locally or wrapped for a remote [`Location`] through [`SshCommand`].
//! - [`run_captured`] executes a single invocation and classifies failures
//!   into [`CommandError`] values.
//! - [`pipeline::Pipeline`] connects producer stages to consumer stages. The
//!   main thread relays bytes between the two halves so callers can observe
//!   transfer progress, while every stage's standard error is drained on its
//!   own worker thread.
//! - [`stderr::classify`] is the single adapter that interprets storage-tool
//!   error text. Everything above this crate works on [`ZfsFailure`] values.
//!
//! # Invariants
//!
//! - A pipeline never returns before every stage it spawned has been reaped.
//! - Captured standard error is never lost behind a blocked pipe: drains run
//!   concurrently with the relay.
//! - Remote arguments are always single-quoted for the remote shell, so
//!   dataset names reach the remote `zfs` unmodified.

mod command;
mod error;
/// Multi-stage process pipelines with a byte-counting relay.
pub mod pipeline;
mod process;
/// POSIX shell quoting for remote command lines.
pub mod quote;
/// SSH command construction for the control connection.
pub mod ssh;
/// Classification of storage-tool error output.
pub mod stderr;

pub use command::{CommandOutput, Invocation, Location, RemoteHost, run_captured};
pub use error::{CommandError, PipelineError, StageFailure};
pub use process::SupervisedChild;
pub use ssh::SshCommand;
pub use stderr::ZfsFailure;
