//! Creation and verification of the snapshot sent by this run.

use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::ReplicationError;
use crate::host::{Creation, TASK_PROPERTY, ZfsHost};
use crate::snapshot::Inventory;

/// Fails early when the pool holding `dataset` has no free space.
///
/// The check is best effort: a failed query is logged and the run goes on.
pub fn check_free_space(host: &dyn ZfsHost, dataset: &Dataset) -> Result<(), ReplicationError> {
    match host.numeric_property(dataset, "available") {
        Ok(0) => Err(ReplicationError::NoSpace(dataset.to_string())),
        Ok(available) => {
            debug!(target: "snaprelay::snapshot", dataset = %dataset, available, "free space");
            Ok(())
        }
        Err(err) => {
            warn!(target: "snaprelay::snapshot", dataset = %dataset, error = %err, "could not read free space");
            Ok(())
        }
    }
}

/// Creates `dataset@suffix` and tags it with the owning task.
///
/// [`Creation::AlreadyExists`] means another invocation got there first;
/// the caller ends the run successfully.
pub fn create_snapshot(
    host: &dyn ZfsHost,
    dataset: &Dataset,
    suffix: &str,
    recursive: bool,
    task_name: &str,
) -> Result<Creation, ReplicationError> {
    let name = dataset.snapshot(suffix);
    let creation = host.create_snapshot(dataset, suffix, recursive)?;
    if creation == Creation::AlreadyExists {
        info!(target: "snaprelay::snapshot", snapshot = %name, "snapshot already exists, nothing to do");
        return Ok(creation);
    }

    info!(target: "snaprelay::snapshot", snapshot = %name, "created snapshot");
    if let Err(err) = host.set_property(dataset.location(), &name, TASK_PROPERTY, task_name) {
        warn!(target: "snaprelay::snapshot", snapshot = %name, error = %err, "could not tag snapshot");
    }
    Ok(creation)
}

/// Refuses to send when the destination already holds a snapshot with this
/// run's suffix, which would otherwise be clobbered.
pub fn check_collision(
    destination: &Inventory,
    dataset: &Dataset,
    suffix: &str,
) -> Result<(), ReplicationError> {
    match destination.by_suffix(suffix) {
        Some(existing) => Err(ReplicationError::NameCollision {
            dataset: dataset.to_string(),
            snapshot: existing.name().to_owned(),
        }),
        None => Ok(()),
    }
}

/// Confirms that `dataset@suffix` arrived on the destination.
pub fn verify_received(
    host: &dyn ZfsHost,
    dataset: &Dataset,
    suffix: &str,
) -> Result<(), ReplicationError> {
    let inventory = host.list_snapshots(dataset)?;
    if inventory.by_suffix(suffix).is_some() {
        debug!(target: "snaprelay::snapshot", dataset = %dataset, suffix, "snapshot verified on destination");
        Ok(())
    } else {
        Err(ReplicationError::Verification {
            dataset: dataset.to_string(),
            snapshot: dataset.snapshot(suffix),
        })
    }
}
