//! Storage operations used by the engine.
//!
//! [`ZfsHost`] is the seam between the replication logic and the storage
//! tool. [`ZfsCli`] implements it by running `zfs` locally or through the
//! SSH control connection of the dataset's [`Location`].

use std::fmt;

use tracing::debug;
use zfs_io::{CommandError, CommandOutput, Invocation, Location, ZfsFailure, run_captured};

use crate::dataset::Dataset;
use crate::error::ReplicationError;
use crate::snapshot::{Inventory, parse_listing};
use crate::transfer::SendArgs;

/// User property recording which task created a snapshot.
pub const TASK_PROPERTY: &str = "com.45drives:task";

/// Result of a snapshot creation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Creation {
    /// The snapshot was created by this call.
    Created,
    /// A snapshot with that name was already present.
    AlreadyExists,
}

/// Storage operations on datasets that may live on another machine.
pub trait ZfsHost {
    /// Lists the snapshots directly under `dataset`.
    fn list_snapshots(&self, dataset: &Dataset) -> Result<Inventory, ReplicationError>;

    /// Creates `dataset@suffix`, recursively when asked.
    fn create_snapshot(
        &self,
        dataset: &Dataset,
        suffix: &str,
        recursive: bool,
    ) -> Result<Creation, ReplicationError>;

    /// Destroys one snapshot, including same-named descendant snapshots
    /// when `recursive` is set.
    fn destroy_snapshot(
        &self,
        dataset: &Dataset,
        snapshot: &str,
        recursive: bool,
    ) -> Result<(), ReplicationError>;

    /// Reads a numeric property of the dataset (`available`, `written`).
    fn numeric_property(&self, dataset: &Dataset, property: &str) -> Result<u64, ReplicationError>;

    /// Reads the pending resume token, if a receive was interrupted.
    fn resume_token(&self, dataset: &Dataset) -> Result<Option<String>, ReplicationError>;

    /// Discards the partially received state and its resume token.
    fn abort_resume(&self, dataset: &Dataset) -> Result<(), ReplicationError>;

    /// Sets a user property on `target` (a dataset or snapshot name).
    fn set_property(
        &self,
        location: &Location,
        target: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ReplicationError>;

    /// Asks the sender for the size of the stream `send` would produce.
    fn estimate_send(&self, location: &Location, send: &SendArgs) -> Result<u64, ReplicationError>;
}

type Runner = Box<dyn Fn(&Invocation) -> Result<CommandOutput, CommandError>>;

/// [`ZfsHost`] backed by the `zfs` command line tool.
pub struct ZfsCli {
    runner: Runner,
}

impl fmt::Debug for ZfsCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZfsCli").finish_non_exhaustive()
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ZfsCli {
    /// Runs commands as real child processes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(run_captured)
    }

    /// Runs commands through `runner`, which receives the final
    /// (possibly ssh-wrapped) invocation.
    pub fn with_runner<F>(runner: F) -> Self
    where
        F: Fn(&Invocation) -> Result<CommandOutput, CommandError> + 'static,
    {
        Self {
            runner: Box::new(runner),
        }
    }

    fn run(&self, location: &Location, command: Invocation) -> Result<CommandOutput, CommandError> {
        let invocation = location.wrap(std::slice::from_ref(&command));
        (self.runner)(&invocation)
    }

    fn get(&self, dataset: &Dataset, property: &str) -> Result<String, ReplicationError> {
        let command = zfs(["get", "-Hp", "-o", "value", property, dataset.name()]);
        let output = self
            .run(dataset.location(), command)
            .map_err(|source| ReplicationError::zfs("get", dataset.name(), source))?;
        Ok(output.stdout.trim().to_owned())
    }
}

fn zfs<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString>,
{
    Invocation::new("zfs").args(args)
}

impl ZfsHost for ZfsCli {
    fn list_snapshots(&self, dataset: &Dataset) -> Result<Inventory, ReplicationError> {
        let command = zfs([
            "list",
            "-H",
            "-p",
            "-t",
            "snapshot",
            "-o",
            "name,guid,creation,createtxg",
            "-d",
            "1",
            dataset.name(),
        ]);

        let output = match self.run(dataset.location(), command) {
            Ok(output) => output,
            Err(err) if err.failure() == ZfsFailure::DatasetMissing => {
                debug!(target: "snaprelay::inventory", dataset = %dataset, "dataset does not exist");
                return Ok(Inventory::Missing);
            }
            Err(source) => return Err(ReplicationError::zfs("list", dataset.name(), source)),
        };

        let snapshots =
            parse_listing(dataset.name(), &output.stdout).map_err(|err| ReplicationError::Parse {
                operation: "list",
                target: dataset.name().to_owned(),
                detail: format!("{}: {:?}", err.reason, err.line),
            })?;
        debug!(
            target: "snaprelay::inventory",
            dataset = %dataset,
            count = snapshots.len(),
            "listed snapshots"
        );
        Ok(Inventory::from_snapshots(snapshots))
    }

    fn create_snapshot(
        &self,
        dataset: &Dataset,
        suffix: &str,
        recursive: bool,
    ) -> Result<Creation, ReplicationError> {
        let name = dataset.snapshot(suffix);
        let mut command = zfs(["snapshot"]);
        if recursive {
            command.push_arg("-r");
        }
        command.push_arg(&name);

        match self.run(dataset.location(), command) {
            Ok(_) => Ok(Creation::Created),
            Err(err) if err.failure() == ZfsFailure::AlreadyExists => Ok(Creation::AlreadyExists),
            Err(source) => Err(ReplicationError::zfs("snapshot", name, source)),
        }
    }

    fn destroy_snapshot(
        &self,
        dataset: &Dataset,
        snapshot: &str,
        recursive: bool,
    ) -> Result<(), ReplicationError> {
        let mut command = zfs(["destroy"]);
        if recursive {
            command.push_arg("-r");
        }
        command.push_arg(snapshot);
        self.run(dataset.location(), command)
            .map(drop)
            .map_err(|source| ReplicationError::zfs("destroy", snapshot, source))
    }

    fn numeric_property(&self, dataset: &Dataset, property: &str) -> Result<u64, ReplicationError> {
        let value = self.get(dataset, property)?;
        value.parse::<u64>().map_err(|_| ReplicationError::Parse {
            operation: "get",
            target: dataset.name().to_owned(),
            detail: format!("{property} is not a byte count: {value:?}"),
        })
    }

    fn resume_token(&self, dataset: &Dataset) -> Result<Option<String>, ReplicationError> {
        let value = self.get(dataset, "receive_resume_token")?;
        Ok(match value.as_str() {
            "" | "-" => None,
            _ => Some(value),
        })
    }

    fn abort_resume(&self, dataset: &Dataset) -> Result<(), ReplicationError> {
        self.run(dataset.location(), zfs(["receive", "-A", dataset.name()]))
            .map(drop)
            .map_err(|source| ReplicationError::zfs("receive -A", dataset.name(), source))
    }

    fn set_property(
        &self,
        location: &Location,
        target: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ReplicationError> {
        let assignment = format!("{property}={value}");
        self.run(location, zfs(["set", assignment.as_str(), target]))
            .map(drop)
            .map_err(|source| ReplicationError::zfs("set", target, source))
    }

    fn estimate_send(&self, location: &Location, send: &SendArgs) -> Result<u64, ReplicationError> {
        let output = self
            .run(location, send.estimate_invocation())
            .map_err(|source| ReplicationError::zfs("send -n -P", send.subject(), source))?;
        parse_estimate(&output.stdout).ok_or_else(|| ReplicationError::Parse {
            operation: "send -n -P",
            target: send.subject().to_owned(),
            detail: "no size line in dry-run output".into(),
        })
    }
}

/// Extracts the total from `zfs send -n -P` output (the last `size` line).
#[must_use]
pub fn parse_estimate(text: &str) -> Option<u64> {
    text.lines().rev().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("size"), Some(value)) => value.parse().ok(),
            _ => None,
        }
    })
}
