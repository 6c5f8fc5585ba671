//! Snapshot records, inventories and the task naming convention.
//!
//! Snapshots created by a task are named
//! `dataset@[customName-]taskName-YYYY.MM.DD-HH.MM.SS`. The same convention
//! decides which snapshots a task owns and may prune.

use std::collections::HashSet;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Timestamp layout embedded in snapshot names.
const STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year].[month].[day]-[hour].[minute].[second]");

/// Length of a rendered timestamp (`2024.05.01-13.45.00`).
const STAMP_LEN: usize = 19;

/// One snapshot as reported by the storage tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    name: String,
    guid: String,
    creation: i64,
    order_key: u64,
}

impl Snapshot {
    /// Creates a snapshot record.
    pub fn new(name: impl Into<String>, guid: impl Into<String>, creation: i64, order_key: u64) -> Self {
        Self {
            name: name.into(),
            guid: guid.into(),
            creation,
            order_key,
        }
    }

    /// Full name, `dataset@suffix`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lineage identifier, stable across hosts.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Creation time in seconds since the epoch.
    #[must_use]
    pub const fn creation(&self) -> i64 {
        self.creation
    }

    /// Creation transaction group, or the creation time when unavailable.
    #[must_use]
    pub const fn order_key(&self) -> u64 {
        self.order_key
    }

    /// Part after `@`.
    #[must_use]
    pub fn suffix(&self) -> &str {
        self.name.split_once('@').map_or("", |(_, suffix)| suffix)
    }

    /// Part before `@`.
    #[must_use]
    pub fn dataset(&self) -> &str {
        self.name.split_once('@').map_or(self.name.as_str(), |(dataset, _)| dataset)
    }

    /// Sort key: creation second, then transaction group for same-second ties.
    #[must_use]
    pub const fn sort_key(&self) -> (i64, u64) {
        (self.creation, self.order_key)
    }
}

/// What a dataset listing found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inventory {
    /// The dataset does not exist.
    Missing,
    /// The dataset exists but has no snapshots.
    Empty,
    /// Snapshots ordered oldest first.
    Snapshots(Vec<Snapshot>),
}

impl Inventory {
    /// Builds an inventory for an existing dataset, sorting the snapshots.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<Snapshot>) -> Self {
        if snapshots.is_empty() {
            return Self::Empty;
        }
        snapshots.sort_by_key(Snapshot::sort_key);
        Self::Snapshots(snapshots)
    }

    /// Snapshots, oldest first; empty unless [`Inventory::Snapshots`].
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        match self {
            Self::Snapshots(snapshots) => snapshots,
            Self::Missing | Self::Empty => &[],
        }
    }

    /// Reports whether the dataset was found.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots().last()
    }

    /// GUIDs of every snapshot.
    #[must_use]
    pub fn guids(&self) -> HashSet<&str> {
        self.snapshots().iter().map(Snapshot::guid).collect()
    }

    /// Snapshot with the given GUID.
    #[must_use]
    pub fn by_guid(&self, guid: &str) -> Option<&Snapshot> {
        self.snapshots().iter().find(|snapshot| snapshot.guid == guid)
    }

    /// Snapshot with the given suffix.
    #[must_use]
    pub fn by_suffix(&self, suffix: &str) -> Option<&Snapshot> {
        self.snapshots().iter().find(|snapshot| snapshot.suffix() == suffix)
    }
}

/// A listing line that could not be interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingError {
    /// Offending line.
    pub line: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// Parses `zfs list -H -p -o name,guid,creation,createtxg` output.
///
/// Columns may be separated by tabs or runs of spaces. The transaction
/// group column is optional; without it the creation time orders ties.
/// Lines for other datasets (descendants) are skipped.
pub fn parse_listing(dataset: &str, text: &str) -> Result<Vec<Snapshot>, ListingError> {
    let prefix = format!("{dataset}@");
    let mut snapshots = Vec::new();

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        if !name.starts_with(&prefix) {
            continue;
        }

        let error = |reason| ListingError {
            line: line.to_owned(),
            reason,
        };
        let guid = fields.next().ok_or_else(|| error("missing guid column"))?;
        let creation = fields
            .next()
            .ok_or_else(|| error("missing creation column"))?
            .parse::<i64>()
            .map_err(|_| error("creation is not a number of seconds"))?;
        let order_key = match fields.next().map(str::parse::<u64>) {
            Some(Ok(txg)) => txg,
            _ => u64::try_from(creation).unwrap_or_default(),
        };

        snapshots.push(Snapshot::new(name, guid, creation, order_key));
    }

    Ok(snapshots)
}

/// Formats a timestamp the way snapshot names embed it.
#[must_use]
pub fn format_stamp(at: OffsetDateTime) -> String {
    at.format(STAMP_FORMAT).unwrap_or_else(|_| {
        format!(
            "{:04}.{:02}.{:02}-{:02}.{:02}.{:02}",
            at.year(),
            u8::from(at.month()),
            at.day(),
            at.hour(),
            at.minute(),
            at.second()
        )
    })
}

/// Builds the suffix of the snapshot created at `at`.
#[must_use]
pub fn snapshot_suffix(custom_name: Option<&str>, task_name: &str, at: OffsetDateTime) -> String {
    let stamp = format_stamp(at);
    match custom_name.filter(|name| !name.is_empty()) {
        Some(custom) => format!("{custom}-{task_name}-{stamp}"),
        None => format!("{task_name}-{stamp}"),
    }
}

/// Reports whether `suffix` was produced by the task `task_name`.
///
/// The head before the timestamp must be exactly `task_name` or
/// `custom_name-task_name`. A bare task name stays owned after a custom name
/// is configured; any other prefix belongs to a different task.
#[must_use]
pub fn is_owned_by(suffix: &str, custom_name: Option<&str>, task_name: &str) -> bool {
    if task_name.is_empty() || suffix.len() < STAMP_LEN + 1 {
        return false;
    }
    let split = suffix.len() - STAMP_LEN;
    if !suffix.is_char_boundary(split) {
        return false;
    }
    let (head, stamp) = suffix.split_at(split);
    if PrimitiveDateTime::parse(stamp, STAMP_FORMAT).is_err() {
        return false;
    }
    let Some(head) = head.strip_suffix('-') else {
        return false;
    };
    if head == task_name {
        return true;
    }
    custom_name
        .filter(|custom| !custom.is_empty())
        .and_then(|custom| head.strip_prefix(custom))
        .and_then(|rest| rest.strip_prefix('-'))
        == Some(task_name)
}
