//! Turns parsed arguments into a validated [`ReplicationTask`].

use std::ffi::OsString;
use std::str::FromStr;

use clap::ArgMatches;
use snaprelay_core::dataset::Dataset;
use snaprelay_core::error::ReplicationError;
use snaprelay_core::task::{
    Direction, MbufferSize, MbufferUnit, Policy, ReplicationTask, Retention, SendFlags,
    TransportKind,
};
use zfs_io::{Location, RemoteHost};

use crate::command::{self, Setting};

/// Netcat data port used when none is configured.
pub const DEFAULT_NETCAT_PORT: u16 = 31337;
/// SSH port used when none is configured.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// SSH user used when none is configured.
pub const DEFAULT_SSH_USER: &str = "root";

/// Everything one invocation needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Validated task.
    pub task: ReplicationTask,
    /// Plan only.
    pub dry_run: bool,
    /// Log verbosity level.
    pub verbosity: u8,
    /// Program receiving structured events.
    pub event_command: Option<OsString>,
}

/// Reads every setting from `matches` and validates the result.
pub(crate) fn invocation_from_matches(matches: &ArgMatches) -> Result<Invocation, ReplicationError> {
    let values = Values(matches);

    let task_name = values.required(&command::TASK_NAME)?;
    let direction = values.parsed(&command::DIRECTION, Direction::default())?;
    let source = values.dataset(
        &command::SOURCE_POOL,
        &command::SOURCE_DATASET,
        [&command::SOURCE_HOST, &command::SOURCE_USER, &command::SOURCE_PORT],
    )?;
    let destination = values.dataset(
        &command::DEST_POOL,
        &command::DEST_DATASET,
        [&command::DEST_HOST, &command::DEST_USER, &command::DEST_PORT],
    )?;
    let any_remote = !source.location().is_local() || !destination.location().is_local();
    let default_transport = if any_remote {
        TransportKind::Ssh
    } else {
        TransportKind::Local
    };

    let mbuffer = MbufferSize::new(
        values.number(&command::MBUFFER_SIZE, 1)?,
        values.parsed(&command::MBUFFER_UNIT, MbufferUnit::default())?,
    )?;
    let custom_name = if values.switch(&command::USE_CUSTOM_NAME)? {
        values.text(&command::CUSTOM_NAME)
    } else {
        None
    };

    let task = ReplicationTask {
        task_name,
        direction,
        source,
        destination,
        transport: values.parsed(&command::TRANSFER_METHOD, default_transport)?,
        netcat_port: values.number(&command::NETCAT_PORT, DEFAULT_NETCAT_PORT)?,
        send: SendFlags {
            recursive: values.switch(&command::RECURSIVE)?,
            raw: values.switch(&command::RAW)?,
            compressed: values.switch(&command::COMPRESSED)?,
        },
        policy: Policy {
            allow_overwrite: values.switch(&command::ALLOW_OVERWRITE)?,
            use_existing_dest: values.switch(&command::USE_EXISTING_DEST)?,
            resume_fail_allow_overwrite: values.switch(&command::RESUME_FAIL_ALLOW_OVERWRITE)?,
        },
        mbuffer,
        custom_name,
        source_retention: values.retention(
            &command::SOURCE_RETENTION_TIME,
            &command::SOURCE_RETENTION_UNIT,
        )?,
        destination_retention: values.retention(
            &command::DEST_RETENTION_TIME,
            &command::DEST_RETENTION_UNIT,
        )?,
    };
    task.validate()?;

    let verbosity = values
        .number::<u8>(&command::VERBOSITY, 0)?
        .max(matches.get_count(command::VERBOSE));

    Ok(Invocation {
        task,
        dry_run: values.switch(&command::DRY_RUN)?,
        verbosity,
        event_command: matches.get_one::<OsString>(command::EVENT_COMMAND).cloned(),
    })
}

/// Parses the boolean spellings the scheduler uses.
///
/// An empty value is `false` so that exported but unset variables keep the
/// default.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

struct Values<'a>(&'a ArgMatches);

impl Values<'_> {
    /// Trimmed non-empty value of a setting.
    fn text(&self, setting: &Setting) -> Option<String> {
        self.0
            .get_one::<String>(setting.id)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }

    fn required(&self, setting: &Setting) -> Result<String, ReplicationError> {
        self.text(setting).ok_or_else(|| {
            ReplicationError::Config(format!(
                "{} is required (--{})",
                setting.env, setting.id
            ))
        })
    }

    fn parsed<T>(&self, setting: &Setting, default: T) -> Result<T, ReplicationError>
    where
        T: FromStr<Err = String>,
    {
        self.text(setting).map_or(Ok(default), |value| {
            value
                .parse()
                .map_err(|err| ReplicationError::Config(format!("{}: {err}", setting.env)))
        })
    }

    fn number<T: FromStr>(&self, setting: &Setting, default: T) -> Result<T, ReplicationError> {
        self.text(setting).map_or(Ok(default), |value| {
            value.parse().map_err(|_| {
                ReplicationError::Config(format!(
                    "{} must be a non-negative number, got '{value}'",
                    setting.env
                ))
            })
        })
    }

    fn switch(&self, setting: &Setting) -> Result<bool, ReplicationError> {
        let value = self.text(setting).unwrap_or_default();
        parse_bool(&value).ok_or_else(|| {
            ReplicationError::Config(format!(
                "{} must be true or false, got '{value}'",
                setting.env
            ))
        })
    }

    fn dataset(
        &self,
        pool: &Setting,
        path: &Setting,
        [host, user, port]: [&Setting; 3],
    ) -> Result<Dataset, ReplicationError> {
        let pool = self.required(pool)?;
        let path = self.text(path).unwrap_or_default();
        let location = match self.text(host) {
            None => Location::Local,
            Some(host) => Location::Remote(RemoteHost::new(
                self.text(user)
                    .unwrap_or_else(|| DEFAULT_SSH_USER.to_owned()),
                host,
                self.number(port, DEFAULT_SSH_PORT)?,
            )),
        };
        Ok(Dataset::new(&pool, &path, location))
    }

    fn retention(&self, time: &Setting, unit: &Setting) -> Result<Retention, ReplicationError> {
        Ok(Retention::new(
            self.number(time, 0)?,
            self.text(unit).unwrap_or_default(),
        ))
    }
}
