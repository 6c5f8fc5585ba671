//! Argument definitions.
//!
//! Every setting has a long flag and the environment variable the scheduler
//! exports for it. Values stay textual here; [`crate::settings`] turns them
//! into typed task fields so that an empty variable means "use the default"
//! rather than a parse failure.

use clap::builder::OsStringValueParser;
use clap::{Arg, ArgAction, Command};

/// How a setting is written on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Takes a value: `--source-pool tank`.
    Text,
    /// May be bare or carry a value: `--raw` or `--raw=no`.
    Switch,
}

/// One configurable setting.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Setting {
    pub(crate) id: &'static str,
    pub(crate) env: &'static str,
    pub(crate) value_name: &'static str,
    pub(crate) help: &'static str,
    pub(crate) kind: Kind,
}

macro_rules! settings {
    ($($konst:ident => $id:literal, $env:literal, $kind:ident, $value:literal, $help:literal;)+) => {
        $(pub(crate) const $konst: Setting = Setting {
            id: $id,
            env: $env,
            value_name: $value,
            help: $help,
            kind: Kind::$kind,
        };)+

        /// All settings in help order.
        pub(crate) const SETTINGS: &[Setting] = &[$($konst),+];
    };
}

settings! {
    TASK_NAME => "task-name", "taskName", Text, "NAME",
        "Task owning the created snapshots (required).";
    DIRECTION => "direction", "zfsRepConfig_direction", Text, "push|pull",
        "Whether this machine sends or receives [default: push].";
    SOURCE_POOL => "source-pool", "zfsRepConfig_sourceDataset_pool", Text, "POOL",
        "Pool of the source dataset (required).";
    SOURCE_DATASET => "source-dataset", "zfsRepConfig_sourceDataset_dataset", Text, "PATH",
        "Path of the source dataset inside its pool.";
    SOURCE_HOST => "source-host", "zfsRepConfig_sourceDataset_host", Text, "HOST",
        "Remote source host for a pull; empty means this machine.";
    SOURCE_USER => "source-user", "zfsRepConfig_sourceDataset_user", Text, "USER",
        "SSH user on the source host [default: root].";
    SOURCE_PORT => "source-port", "zfsRepConfig_sourceDataset_port", Text, "PORT",
        "SSH port of the source host [default: 22].";
    DEST_POOL => "dest-pool", "zfsRepConfig_destDataset_pool", Text, "POOL",
        "Pool of the destination dataset (required).";
    DEST_DATASET => "dest-dataset", "zfsRepConfig_destDataset_dataset", Text, "PATH",
        "Path of the destination dataset inside its pool.";
    DEST_HOST => "dest-host", "zfsRepConfig_destDataset_host", Text, "HOST",
        "Remote destination host for a push; empty means this machine.";
    DEST_USER => "dest-user", "zfsRepConfig_destDataset_user", Text, "USER",
        "SSH user on the destination host [default: root].";
    DEST_PORT => "dest-port", "zfsRepConfig_destDataset_port", Text, "PORT",
        "SSH port of the destination host [default: 22].";
    TRANSFER_METHOD => "transfer-method", "zfsRepConfig_sendOptions_transferMethod", Text,
        "local|ssh|netcat",
        "Data path [default: ssh with a remote host, local otherwise].";
    NETCAT_PORT => "netcat-port", "zfsRepConfig_sendOptions_netcatPort", Text, "PORT",
        "Raw data socket port of the netcat transport [default: 31337].";
    RECURSIVE => "recursive", "zfsRepConfig_sendOptions_recursive_flag", Switch, "BOOL",
        "Snapshot and replicate descendant datasets.";
    RAW => "raw", "zfsRepConfig_sendOptions_raw_flag", Switch, "BOOL",
        "Send encrypted blocks as stored.";
    COMPRESSED => "compressed", "zfsRepConfig_sendOptions_compressed_flag", Switch, "BOOL",
        "Send compressed blocks as stored.";
    ALLOW_OVERWRITE => "allow-overwrite", "zfsRepConfig_sendOptions_allowOverwrite", Switch,
        "BOOL",
        "Allow a forced receive that rolls back or replaces the destination.";
    USE_EXISTING_DEST => "use-existing-dest", "zfsRepConfig_sendOptions_useExistingDest",
        Switch, "BOOL",
        "Accept an existing destination dataset that has no snapshots.";
    RESUME_FAIL_ALLOW_OVERWRITE => "resume-fail-allow-overwrite",
        "zfsRepConfig_sendOptions_resumeFailAllowOverwrite", Switch, "BOOL",
        "Discard the saved state of a receive that cannot be resumed.";
    MBUFFER_SIZE => "mbuffer-size", "zfsRepConfig_sendOptions_mbufferSize", Text, "SIZE",
        "Flow-control buffer size [default: 1].";
    MBUFFER_UNIT => "mbuffer-unit", "zfsRepConfig_sendOptions_mbufferUnit", Text, "k|M|G",
        "Flow-control buffer unit [default: G].";
    USE_CUSTOM_NAME => "use-custom-name", "zfsRepConfig_sendOptions_customName_flag", Switch,
        "BOOL",
        "Prefix created snapshot names with --custom-name.";
    CUSTOM_NAME => "custom-name", "zfsRepConfig_sendOptions_customName", Text, "PREFIX",
        "Snapshot name prefix.";
    SOURCE_RETENTION_TIME => "source-retention-time",
        "zfsRepConfig_snapRetention_source_retentionTime", Text, "N",
        "Keep this task's source snapshots for N units; 0 keeps them all.";
    SOURCE_RETENTION_UNIT => "source-retention-unit",
        "zfsRepConfig_snapRetention_source_retentionUnit", Text, "UNIT",
        "minutes, hours, days, weeks, months or years.";
    DEST_RETENTION_TIME => "dest-retention-time",
        "zfsRepConfig_snapRetention_destination_retentionTime", Text, "N",
        "Keep this task's destination snapshots for N units; 0 keeps them all.";
    DEST_RETENTION_UNIT => "dest-retention-unit",
        "zfsRepConfig_snapRetention_destination_retentionUnit", Text, "UNIT",
        "minutes, hours, days, weeks, months or years.";
    DRY_RUN => "dry-run", "SNAPRELAY_DRY_RUN", Switch, "BOOL",
        "Print the plan without creating, sending or pruning anything.";
    VERBOSITY => "verbosity", "SNAPRELAY_VERBOSE", Text, "LEVEL",
        "Numeric log verbosity [default: 0].";
}

pub(crate) const EVENT_COMMAND: &str = "event-command";
pub(crate) const VERBOSE: &str = "verbose";

const ABOUT: &str = "Replicates one ZFS dataset to another through snapshots.";

const AFTER_HELP: &str = "Every option may also be supplied through the environment \
variable shown next to it; a flag on the command line wins.\n\n\
Exit status: 0 on success, 1 on failure, 2 when replication policy refused \
to overwrite destination data.";

/// Builds the `snaprelay` command definition.
pub(crate) fn clap_command() -> Command {
    Command::new("snaprelay")
        .version(env!("CARGO_PKG_VERSION"))
        .about(ABOUT)
        .after_help(AFTER_HELP)
        .args(SETTINGS.iter().map(setting_arg))
        .arg(
            Arg::new(EVENT_COMMAND)
                .long(EVENT_COMMAND)
                .env("SNAPRELAY_EVENT_COMMAND")
                .value_name("PROGRAM")
                .help("Program receiving each event as one JSON argument.")
                .value_parser(OsStringValueParser::new()),
        )
        .arg(
            Arg::new(VERBOSE)
                .short('v')
                .long(VERBOSE)
                .help("Increase log verbosity; repeat for more.")
                .action(ArgAction::Count),
        )
}

fn setting_arg(setting: &Setting) -> Arg {
    let arg = Arg::new(setting.id)
        .long(setting.id)
        .env(setting.env)
        .value_name(setting.value_name)
        .help(setting.help)
        .action(ArgAction::Set);
    match setting.kind {
        Kind::Text => arg,
        Kind::Switch => arg
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true"),
    }
}
