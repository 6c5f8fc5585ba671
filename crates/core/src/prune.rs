//! Retention pruning.
//!
//! Only snapshots owned by the task (see [`is_owned_by`]) are candidates, and
//! the snapshot created by the current run never is. Deletion stops at the
//! first failure.

use std::time::Duration;

use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::ReplicationError;
use crate::host::ZfsHost;
use crate::progress::{ProgressTracker, ProgressWindow};
use crate::snapshot::{Inventory, Snapshot, is_owned_by};
use crate::task::Retention;

/// One side's pruning pass.
#[derive(Clone, Copy, Debug)]
pub struct PruneRequest<'a> {
    /// Dataset to prune.
    pub dataset: &'a Dataset,
    /// How long owned snapshots are kept.
    pub retention: &'a Retention,
    /// Owning task.
    pub task_name: &'a str,
    /// Custom name prefix the task stamps on its snapshots.
    pub custom_name: Option<&'a str>,
    /// Suffix of the snapshot created by this run.
    pub excluded_suffix: &'a str,
    /// Destroy same-named descendant snapshots too.
    pub recursive: bool,
    /// Current time in seconds since the epoch.
    pub now: i64,
    /// Share of the progress range this pass reports into.
    pub window: ProgressWindow,
}

/// Snapshots of `inventory` that have outlived `max_age`.
#[must_use]
pub fn select_expired<'a>(
    inventory: &'a Inventory,
    custom_name: Option<&str>,
    task_name: &str,
    excluded_suffix: &str,
    max_age: Duration,
    now: i64,
) -> Vec<&'a Snapshot> {
    inventory
        .snapshots()
        .iter()
        .filter(|snapshot| snapshot.suffix() != excluded_suffix)
        .filter(|snapshot| is_owned_by(snapshot.suffix(), custom_name, task_name))
        .filter(|snapshot| {
            let age = u64::try_from(now.saturating_sub(snapshot.creation())).unwrap_or(0);
            Duration::from_secs(age) > max_age
        })
        .collect()
}

/// Deletes expired snapshots and returns their names.
///
/// Progress always ends at the end of the request's window, including when
/// retention is disabled or nothing has expired.
pub fn prune(
    host: &dyn ZfsHost,
    request: &PruneRequest<'_>,
    tracker: &mut ProgressTracker<'_>,
) -> Result<Vec<String>, ReplicationError> {
    let destroyed = prune_expired(host, request, tracker);
    tracker.finish(request.window);
    destroyed
}

fn prune_expired(
    host: &dyn ZfsHost,
    request: &PruneRequest<'_>,
    tracker: &mut ProgressTracker<'_>,
) -> Result<Vec<String>, ReplicationError> {
    let Some(max_age) = request.retention.max_age() else {
        debug!(
            target: "snaprelay::prune",
            dataset = %request.dataset,
            retention = %request.retention,
            "retention disabled"
        );
        return Ok(Vec::new());
    };

    let inventory = host.list_snapshots(request.dataset)?;
    let expired = select_expired(
        &inventory,
        request.custom_name,
        request.task_name,
        request.excluded_suffix,
        max_age,
        request.now,
    );
    let total = expired.len() as u64;
    debug!(target: "snaprelay::prune", dataset = %request.dataset, expired = total, "selected snapshots to prune");

    let mut destroyed = Vec::with_capacity(expired.len());
    for (done, snapshot) in (1..).zip(&expired) {
        host.destroy_snapshot(request.dataset, snapshot.name(), request.recursive)
            .map_err(|source| ReplicationError::Prune {
                snapshot: snapshot.name().to_owned(),
                source: Box::new(source),
            })?;
        info!(target: "snaprelay::prune", snapshot = snapshot.name(), "destroyed expired snapshot");
        destroyed.push(snapshot.name().to_owned());
        tracker.report(request.window, done, total);
    }
    Ok(destroyed)
}
