#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` is the front end of the `snaprelay` binary. It reads the task
//! configuration from flags and the scheduler's environment variables,
//! validates it before anything touches a pool, installs logging and hands
//! the task to [`snaprelay_core::Replicator`].
//!
//! # Design
//!
//! [`run`] accepts an iterator of arguments together with handles for
//! standard output and error so that tests can drive the whole front end
//! in-process. Parsing goes through a `clap` command in which every option is
//! bound to an environment variable; the textual values are then converted by
//! the settings layer, which treats empty variables as unset.
//!
//! # Invariants
//!
//! - `run` never panics; failures surface as exit codes `1` or `2`.
//! - Configuration errors are reported before any external command runs.
//! - Only the dry-run plan, help and version are written to standard output;
//!   diagnostics go to standard error.
//!
//! # Examples
//!
//! ```
//! let mut stdout = Vec::new();
//! let mut stderr = Vec::new();
//! let exit_code = cli::run(["snaprelay", "--version"], &mut stdout, &mut stderr);
//!
//! assert_eq!(exit_code, 0);
//! assert!(String::from_utf8_lossy(&stdout).starts_with("snaprelay "));
//! ```

use std::ffi::OsString;
use std::io::Write;

use clap::error::ErrorKind;
use logging::{VerbosityConfig, init_tracing};
use snaprelay_core::error::ReplicationError;
use snaprelay_core::host::ZfsCli;
use snaprelay_core::notify::SystemNotifier;
use snaprelay_core::task::ReplicationTask;
use snaprelay_core::transfer::ProcessTransport;
use snaprelay_core::{ExitCode, Replicator, RunOutcome};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

mod command;
mod settings;

pub use settings::{
    DEFAULT_NETCAT_PORT, DEFAULT_SSH_PORT, DEFAULT_SSH_USER, Invocation, parse_bool,
};

/// Why the arguments could not be turned into a task.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The command line itself was malformed, or help/version was requested.
    #[error(transparent)]
    Arguments(#[from] clap::Error),
    /// The values parsed but do not describe a valid task.
    #[error(transparent)]
    Invalid(#[from] ReplicationError),
}

/// Parses arguments (and the bound environment variables) into an
/// [`Invocation`].
pub fn parse_invocation<I, S>(arguments: I) -> Result<Invocation, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from("snaprelay"));
    }
    let matches = command::clap_command().try_get_matches_from(args)?;
    Ok(settings::invocation_from_matches(&matches)?)
}

/// Parses arguments into a validated [`ReplicationTask`].
pub fn parse_task<I, S>(arguments: I) -> Result<ReplicationTask, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    parse_invocation(arguments).map(|invocation| invocation.task)
}

/// Runs the front end and returns the process exit code.
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    let invocation = match parse_invocation(arguments) {
        Ok(invocation) => invocation,
        Err(ConfigError::Arguments(err))
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            let _ = write!(stdout, "{}", err.render());
            return ExitCode::Ok.as_i32();
        }
        Err(ConfigError::Arguments(err)) => {
            let _ = write!(stderr, "{}", err.render());
            return ExitCode::Failure.as_i32();
        }
        Err(ConfigError::Invalid(err)) => {
            let _ = writeln!(stderr, "snaprelay: {err}");
            return ExitCode::Failure.as_i32();
        }
    };

    init_tracing(VerbosityConfig::from_verbose_level(invocation.verbosity));
    execute(&invocation, stdout)
}

fn execute<Out: Write>(invocation: &Invocation, stdout: &mut Out) -> i32 {
    let host = ZfsCli::new();
    let transport = ProcessTransport::new();
    let notifier = SystemNotifier::new(invocation.event_command.clone());
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());

    let outcome = Replicator::new(&invocation.task, &host, &transport, &notifier, now)
        .dry_run(invocation.dry_run)
        .execute();
    match outcome {
        Ok(RunOutcome::Planned(plan)) => {
            let _ = write!(stdout, "{plan}");
        }
        Ok(RunOutcome::Replicated {
            snapshot,
            bytes,
            pruned,
            ..
        }) => {
            info!(
                target: "snaprelay::run",
                snapshot = %snapshot,
                bytes,
                pruned = pruned.len(),
                "replication complete"
            );
        }
        Ok(RunOutcome::Resumed { bytes }) => {
            info!(target: "snaprelay::run", bytes, "interrupted receive completed");
        }
        Ok(RunOutcome::AlreadyExists { snapshot }) => {
            info!(target: "snaprelay::run", snapshot = %snapshot, "snapshot already present; nothing to do");
        }
        Err(code) => return code.as_i32(),
    }
    ExitCode::Ok.as_i32()
}
