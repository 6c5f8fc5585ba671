//! Per-run task configuration.
//!
//! A [`ReplicationTask`] is assembled once by the front end and never
//! changes during the run. [`ReplicationTask::validate`] performs the
//! semantic checks that must pass before any command is executed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use zfs_io::RemoteHost;

use crate::dataset::Dataset;
use crate::error::ReplicationError;

/// Which side of the control connection holds the source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The local dataset is sent to a (possibly remote) destination.
    #[default]
    Push,
    /// A remote source is received into a local destination.
    Pull,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(format!("unknown direction '{other}' (expected push or pull)")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

/// Data path used for the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Send piped straight into receive on this machine.
    #[default]
    Local,
    /// Stream carried over the SSH control connection.
    Ssh,
    /// Stream carried over a raw TCP socket set up through SSH.
    Netcat,
}

impl TransportKind {
    /// Reports whether the transport needs a remote host.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ssh" => Ok(Self::Ssh),
            "netcat" | "nc" => Ok(Self::Netcat),
            other => Err(format!(
                "unknown transfer method '{other}' (expected local, ssh or netcat)"
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
            Self::Netcat => "netcat",
        })
    }
}

/// Unit of a retention period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetentionUnit {
    /// 60 seconds.
    Minutes,
    /// 60 minutes.
    Hours,
    /// 24 hours.
    Days,
    /// 7 days.
    Weeks,
    /// 30 days.
    Months,
    /// 365 days.
    Years,
}

impl RetentionUnit {
    /// Length of one unit in milliseconds. Months and years are fixed
    /// approximations, not calendar arithmetic.
    #[must_use]
    pub const fn millis(self) -> u64 {
        const MINUTE: u64 = 60 * 1000;
        const DAY: u64 = 24 * 60 * MINUTE;
        match self {
            Self::Minutes => MINUTE,
            Self::Hours => 60 * MINUTE,
            Self::Days => DAY,
            Self::Weeks => 7 * DAY,
            Self::Months => 30 * DAY,
            Self::Years => 365 * DAY,
        }
    }
}

impl FromStr for RetentionUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(Self::Minutes),
            "hour" | "hours" => Ok(Self::Hours),
            "day" | "days" => Ok(Self::Days),
            "week" | "weeks" => Ok(Self::Weeks),
            "month" | "months" => Ok(Self::Months),
            "year" | "years" => Ok(Self::Years),
            other => Err(format!("unknown retention unit '{other}'")),
        }
    }
}

/// How long snapshots owned by the task are kept on one side.
///
/// The unit is stored as configured. A zero time or a unit that does not
/// parse disables pruning for that side instead of failing the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retention {
    time: u64,
    unit: String,
}

impl Retention {
    /// Creates a retention period.
    pub fn new(time: u64, unit: impl Into<String>) -> Self {
        Self {
            time,
            unit: unit.into(),
        }
    }

    /// Retention that never prunes.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Configured amount.
    #[must_use]
    pub const fn time(&self) -> u64 {
        self.time
    }

    /// Unit text as configured.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Maximum age of a kept snapshot, or `None` when pruning is disabled.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.time == 0 {
            return None;
        }
        let unit = self.unit.parse::<RetentionUnit>().ok()?;
        Some(Duration::from_millis(self.time.saturating_mul(unit.millis())))
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_age() {
            Some(_) => write!(f, "{} {}", self.time, self.unit),
            None => f.write_str("disabled"),
        }
    }
}

/// Unit suffix understood by `mbuffer -m`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MbufferUnit {
    /// Kibibytes.
    Kilo,
    /// Mebibytes.
    Mega,
    /// Gibibytes.
    #[default]
    Giga,
}

impl FromStr for MbufferUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "k" | "K" => Ok(Self::Kilo),
            "m" | "M" => Ok(Self::Mega),
            "g" | "G" => Ok(Self::Giga),
            other => Err(format!("unknown mbuffer unit '{other}' (expected k, M or G)")),
        }
    }
}

impl fmt::Display for MbufferUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kilo => "k",
            Self::Mega => "M",
            Self::Giga => "G",
        })
    }
}

/// Memory size of the flow-control buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MbufferSize {
    size: u32,
    unit: MbufferUnit,
}

impl MbufferSize {
    /// Creates a buffer size. Zero is rejected.
    pub fn new(size: u32, unit: MbufferUnit) -> Result<Self, ReplicationError> {
        if size == 0 {
            return Err(ReplicationError::Config(
                "mbuffer size must be greater than zero".into(),
            ));
        }
        Ok(Self { size, unit })
    }
}

impl Default for MbufferSize {
    fn default() -> Self {
        Self {
            size: 1,
            unit: MbufferUnit::Giga,
        }
    }
}

impl fmt::Display for MbufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.size, self.unit)
    }
}

/// Stream flags passed to `zfs send`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Replicate descendant datasets (`-R`, `-I`).
    pub recursive: bool,
    /// Send encrypted blocks as stored (`-w`).
    pub raw: bool,
    /// Send compressed blocks as stored (`-L -c -e`).
    pub compressed: bool,
}

/// Destructive actions the task is allowed to take.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    /// Allow a forced receive that rolls the destination back or replaces it.
    pub allow_overwrite: bool,
    /// Accept a pre-existing destination dataset that has no snapshots.
    pub use_existing_dest: bool,
    /// Discard a resume token whose resume attempt failed.
    pub resume_fail_allow_overwrite: bool,
}

/// Complete configuration of one replication run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationTask {
    /// Owning task name; scopes snapshot naming and pruning.
    pub task_name: String,
    /// Push or pull.
    pub direction: Direction,
    /// Dataset snapshotted and sent.
    pub source: Dataset,
    /// Dataset receiving the stream.
    pub destination: Dataset,
    /// Data path for the stream.
    pub transport: TransportKind,
    /// Raw data socket port for the netcat transport.
    pub netcat_port: u16,
    /// Stream flags.
    pub send: SendFlags,
    /// Destructive-action permissions.
    pub policy: Policy,
    /// Flow-control buffer size.
    pub mbuffer: MbufferSize,
    /// Optional prefix of created snapshot names.
    pub custom_name: Option<String>,
    /// Retention on the source side.
    pub source_retention: Retention,
    /// Retention on the destination side.
    pub destination_retention: Retention,
}

impl ReplicationTask {
    /// The remote end of the control connection, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteHost> {
        self.source
            .location()
            .remote()
            .or_else(|| self.destination.location().remote())
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        let config = |message: &str| Err(ReplicationError::Config(message.to_owned()));

        if self.task_name.trim().is_empty() {
            return config("taskName is required");
        }
        if !is_name_component(&self.task_name) {
            return config("taskName may not contain '@', '/' or whitespace");
        }
        if let Some(custom) = &self.custom_name {
            if !is_name_component(custom) {
                return config("customName may not contain '@', '/' or whitespace");
            }
        }
        if self.source.name().is_empty() {
            return config("source dataset is required");
        }
        if self.destination.name().is_empty() {
            return config("destination dataset is required");
        }
        if self.send.raw && self.send.compressed {
            return config("raw and compressed sends are mutually exclusive");
        }

        let source_remote = !self.source.location().is_local();
        let destination_remote = !self.destination.location().is_local();

        match (self.transport, self.direction) {
            (TransportKind::Local, _) if source_remote || destination_remote => {
                config("the local transfer method cannot be used with a remote host")
            }
            (TransportKind::Local, _) => {
                if self.source.name() == self.destination.name() {
                    config("source and destination must differ for a local transfer")
                } else {
                    Ok(())
                }
            }
            (_, Direction::Push) if !destination_remote => {
                config("a push over ssh or netcat needs a destination host")
            }
            (_, Direction::Pull) if !source_remote => {
                config("a pull over ssh or netcat needs a source host")
            }
            (_, Direction::Push) if source_remote => {
                config("a push sends from the local machine; the source cannot be remote")
            }
            (_, Direction::Pull) if destination_remote => {
                config("a pull receives on the local machine; the destination cannot be remote")
            }
            (TransportKind::Netcat, _) if self.netcat_port == 0 => {
                config("netcatPort must be a non-zero port")
            }
            _ => Ok(()),
        }
    }
}

fn is_name_component(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c == '@' || c == '/' || c.is_whitespace())
}
