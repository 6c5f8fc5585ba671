//! Incremental-versus-full planning.
//!
//! The planner compares the two inventories by GUID, never by name, and
//! decides whether the stream is incremental and whether the receive must
//! be forced. Forcing is destructive, so every forced plan carries the
//! [`ForceReason`] that justified it.
//!
//! | destination | decision |
//! |---|---|
//! | missing | full send |
//! | empty, reuse + overwrite allowed | full send, forced |
//! | empty, reuse without overwrite | refuse |
//! | empty otherwise | full send |
//! | no common GUID, overwrite allowed | full send, forced |
//! | no common GUID | refuse |
//! | common GUID | incremental from the newest common snapshot |
//!
//! An incremental plan is forced (or refused) when the destination is ahead
//! of the base, and forced when overwrite is allowed and the destination
//! was written to since its latest snapshot.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{PolicyReason, ReplicationError};
use crate::snapshot::{Inventory, Snapshot};
use crate::task::Policy;

/// Why a forced receive is justified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForceReason {
    /// The destination exists without snapshots and may be overwritten.
    EmptyExistingDestination,
    /// The destination has snapshots but none in common with the source.
    NoCommonSnapshot,
    /// The destination has snapshots after the base that the source lacks.
    DestinationAhead,
    /// The destination was modified after its latest snapshot.
    WrittenSinceSnapshot,
}

impl fmt::Display for ForceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmptyExistingDestination => "destination exists without snapshots",
            Self::NoCommonSnapshot => "no common snapshot with the destination",
            Self::DestinationAhead => "destination has snapshots the source does not",
            Self::WrittenSinceSnapshot => "destination was written since its latest snapshot",
        })
    }
}

/// Transfer decision for this run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferPlan {
    /// Source-side snapshot the stream is relative to.
    pub incremental_base: Option<String>,
    /// Why the receive is forced, if it is.
    pub force: Option<ForceReason>,
}

impl TransferPlan {
    /// Reports whether the receive rolls the destination back.
    #[must_use]
    pub const fn force_overwrite(&self) -> bool {
        self.force.is_some()
    }
}

impl fmt::Display for TransferPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.incremental_base {
            Some(base) => write!(f, "incremental from {base}")?,
            None => f.write_str("full send")?,
        }
        if let Some(reason) = self.force {
            write!(f, ", forced ({reason})")?;
        }
        Ok(())
    }
}

/// Plans the transfer of a new snapshot of `source` into `destination`.
///
/// `written` reads the destination's "bytes written since the latest
/// snapshot"; it is only called for an incremental plan that is not already
/// forced and where overwriting is allowed. A failed read is logged and
/// ignored.
pub fn plan<W>(
    source: &Inventory,
    destination: &Inventory,
    policy: &Policy,
    destination_name: &str,
    written: W,
) -> Result<TransferPlan, ReplicationError>
where
    W: FnOnce() -> Result<u64, ReplicationError>,
{
    let refuse = |reason| {
        Err(ReplicationError::Policy {
            reason,
            dataset: destination_name.to_owned(),
        })
    };

    match destination {
        Inventory::Missing => {
            debug!(target: "snaprelay::plan", "destination missing, full send");
            return Ok(TransferPlan::default());
        }
        Inventory::Empty => {
            return match (policy.use_existing_dest, policy.allow_overwrite) {
                (true, true) => Ok(TransferPlan {
                    incremental_base: None,
                    force: Some(ForceReason::EmptyExistingDestination),
                }),
                (true, false) => refuse(PolicyReason::EmptyExistingDestination),
                (false, _) => Ok(TransferPlan::default()),
            };
        }
        Inventory::Snapshots(_) => {}
    }

    let Some(common) = newest_common(source, destination) else {
        return if policy.allow_overwrite {
            warn!(
                target: "snaprelay::plan",
                destination = destination_name,
                "no common snapshot, destination will be overwritten"
            );
            Ok(TransferPlan {
                incremental_base: None,
                force: Some(ForceReason::NoCommonSnapshot),
            })
        } else {
            refuse(PolicyReason::NoCommonSnapshot)
        };
    };

    // The base argument must name the source's copy of the common snapshot.
    let base = source
        .by_guid(common.guid())
        .map(|snapshot| snapshot.name().to_owned());
    debug!(
        target: "snaprelay::plan",
        guid = common.guid(),
        base = base.as_deref().unwrap_or_default(),
        "found common snapshot"
    );

    let mut plan = TransferPlan {
        incremental_base: base,
        force: None,
    };

    if destination_ahead(source, destination, common) {
        if !policy.allow_overwrite {
            return refuse(PolicyReason::DestinationAhead);
        }
        plan.force = Some(ForceReason::DestinationAhead);
        return Ok(plan);
    }

    if policy.allow_overwrite {
        match written() {
            Ok(0) => {}
            Ok(bytes) => {
                debug!(target: "snaprelay::plan", bytes, "destination modified since latest snapshot");
                plan.force = Some(ForceReason::WrittenSinceSnapshot);
            }
            Err(err) => {
                warn!(target: "snaprelay::plan", error = %err, "could not read destination written bytes");
            }
        }
    }

    Ok(plan)
}

/// Newest destination snapshot whose GUID the source also has.
fn newest_common<'a>(source: &Inventory, destination: &'a Inventory) -> Option<&'a Snapshot> {
    let source_guids = source.guids();
    destination
        .snapshots()
        .iter()
        .filter(|snapshot| source_guids.contains(snapshot.guid()))
        .max_by_key(|snapshot| snapshot.sort_key())
}

/// Reports whether the destination has a snapshot newer than `base` that
/// the source has never had.
fn destination_ahead(source: &Inventory, destination: &Inventory, base: &Snapshot) -> bool {
    let source_guids = source.guids();
    destination
        .snapshots()
        .iter()
        .filter(|snapshot| snapshot.sort_key() > base.sort_key())
        .any(|snapshot| !source_guids.contains(snapshot.guid()))
}

#[cfg(test)]
mod tests;
