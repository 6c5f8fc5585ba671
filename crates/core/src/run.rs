//! One replication cycle from start to finish.
//!
//! [`Replicator::run`] drives the components in order: resume, inventory,
//! plan, snapshot creation, transfer, verification, pruning. Each step
//! either continues, ends the cycle successfully, or returns an error;
//! [`Replicator::execute`] turns errors into a failure event and an exit
//! code.

use std::fmt;

use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::dataset::Dataset;
use crate::error::ReplicationError;
use crate::exit_code::{ExitCode, HasExitCode};
use crate::host::{Creation, ZfsHost};
use crate::lifecycle::{check_collision, check_free_space, create_snapshot, verify_received};
use crate::notify::{Event, EventKind, Notifier};
use crate::planner::{TransferPlan, plan};
use crate::progress::{ProgressTracker, ProgressWindow};
use crate::prune::{PruneRequest, prune};
use crate::resume::{ResumeContext, ResumeOutcome, resume_interrupted};
use crate::snapshot::{Inventory, snapshot_suffix};
use crate::task::{ReplicationTask, Retention, TransportKind};
use crate::transfer::{SendArgs, TransferRequest, Transport, route};

/// How a successful cycle ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new snapshot was created, sent and retention applied.
    Replicated {
        /// Snapshot created on the source.
        snapshot: String,
        /// Transfer decision.
        plan: TransferPlan,
        /// Bytes relayed.
        bytes: u64,
        /// Snapshots destroyed by retention, source side first.
        pruned: Vec<String>,
    },
    /// An interrupted receive was completed instead.
    Resumed {
        /// Bytes relayed.
        bytes: u64,
    },
    /// The snapshot for this second already existed; another invocation
    /// owns the cycle.
    AlreadyExists {
        /// Existing snapshot.
        snapshot: String,
    },
    /// Dry run: what would have happened.
    Planned(DryRun),
}

/// Result of a dry run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DryRun {
    /// Snapshot that would be created.
    pub snapshot: String,
    /// Transfer decision.
    pub plan: TransferPlan,
    /// Whether an interrupted receive would be resumed first.
    pub pending_resume: bool,
    /// Processes the transfer would start.
    pub commands: Vec<String>,
}

impl fmt::Display for DryRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pending_resume {
            writeln!(f, "pending resume token would be resumed first")?;
        }
        writeln!(f, "snapshot: {}", self.snapshot)?;
        writeln!(f, "plan: {}", self.plan)?;
        for command in &self.commands {
            writeln!(f, "{command}")?;
        }
        Ok(())
    }
}

/// Runs one cycle of a task.
pub struct Replicator<'a> {
    task: &'a ReplicationTask,
    host: &'a dyn ZfsHost,
    transport: &'a dyn Transport,
    notifier: &'a dyn Notifier,
    now: OffsetDateTime,
    dry_run: bool,
}

impl<'a> Replicator<'a> {
    /// Creates a replicator; `now` stamps the snapshot and ages retention.
    pub fn new(
        task: &'a ReplicationTask,
        host: &'a dyn ZfsHost,
        transport: &'a dyn Transport,
        notifier: &'a dyn Notifier,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            task,
            host,
            transport,
            notifier,
            now,
            dry_run: false,
        }
    }

    /// Only plans; nothing is created, sent or destroyed.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn suffix(&self) -> String {
        snapshot_suffix(self.task.custom_name.as_deref(), &self.task.task_name, self.now)
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(
            kind,
            self.now,
            self.task.source.name(),
            self.task.destination.name(),
        )
    }

    /// Runs the cycle and maps failures to an exit code.
    ///
    /// Every failure is logged and published as a
    /// [`EventKind::ReplicationFailed`] event before the code is returned.
    pub fn execute(&self) -> Result<RunOutcome, ExitCode> {
        self.run().map_err(|err| {
            let code = err.exit_code();
            error!(
                target: "snaprelay::run",
                task = %self.task.task_name,
                exit_code = code.as_i32(),
                "{err}"
            );
            self.notifier.event(
                &self
                    .event(EventKind::ReplicationFailed)
                    .message(format!(
                        "task {} failed replicating {} to {}",
                        self.task.task_name, self.task.source, self.task.destination
                    ))
                    .snapshot(self.task.source.snapshot(&self.suffix()))
                    .error(err.to_string()),
            );
            code
        })
    }

    /// Runs the cycle.
    pub fn run(&self) -> Result<RunOutcome, ReplicationError> {
        let task = self.task;
        task.validate()?;
        self.notifier.ready(&format!(
            "replicating {} to {} ({})",
            task.source, task.destination, task.transport
        ));
        let mut tracker = ProgressTracker::new(self.notifier);

        if self.dry_run {
            return self.plan_only().map(RunOutcome::Planned);
        }

        let context = ResumeContext {
            host: self.host,
            transport: self.transport,
            notifier: self.notifier,
            now: self.now,
        };
        let resumed = resume_interrupted(task, &context, &mut |bytes| {
            tracker.report_bytes(ProgressWindow::TRANSFER, bytes, None);
        })?;
        if let ResumeOutcome::Resumed(report) = resumed {
            tracker.finish(ProgressWindow::DESTINATION_PRUNE);
            return Ok(RunOutcome::Resumed {
                bytes: report.bytes,
            });
        }

        let (destination_inventory, transfer_plan) = self.inventory_and_plan()?;
        let suffix = self.suffix();
        let snapshot = task.source.snapshot(&suffix);
        let request = self.request(&snapshot, &transfer_plan);
        info!(target: "snaprelay::run", snapshot = %snapshot, plan = %transfer_plan, "planned transfer");

        check_free_space(self.host, &task.source)?;
        if create_snapshot(
            self.host,
            &task.source,
            &suffix,
            task.send.recursive,
            &task.task_name,
        )? == Creation::AlreadyExists
        {
            tracker.finish(ProgressWindow::DESTINATION_PRUNE);
            return Ok(RunOutcome::AlreadyExists { snapshot });
        }
        check_collision(&destination_inventory, &task.destination, &suffix)?;
        tracker.report(ProgressWindow::new(0, 10), 1, 1);

        let estimate = match self.host.estimate_send(task.source.location(), &request.send) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(target: "snaprelay::run", error = %err, "no size estimate; reporting throughput only");
                None
            }
        };
        let report = self.transport.transfer(&request, &mut |bytes| {
            tracker.report_bytes(ProgressWindow::TRANSFER, bytes, estimate);
        })?;
        tracker.finish(ProgressWindow::TRANSFER);

        if task.transport == TransportKind::Netcat {
            verify_received(self.host, &task.destination, &suffix)?;
        }

        let mut pruned = self.prune_side(
            &task.source,
            &task.source_retention,
            &suffix,
            ProgressWindow::SOURCE_PRUNE,
            &mut tracker,
        )?;
        pruned.extend(self.prune_side(
            &task.destination,
            &task.destination_retention,
            &suffix,
            ProgressWindow::DESTINATION_PRUNE,
            &mut tracker,
        )?);

        self.notifier.event(
            &self
                .event(EventKind::ReplicationSucceeded)
                .message(format!(
                    "replicated {snapshot} to {} ({})",
                    task.destination, transfer_plan
                ))
                .snapshot(snapshot.clone()),
        );
        Ok(RunOutcome::Replicated {
            snapshot,
            plan: transfer_plan,
            bytes: report.bytes,
            pruned,
        })
    }

    fn inventory_and_plan(&self) -> Result<(Inventory, TransferPlan), ReplicationError> {
        let task = self.task;
        let source_inventory = self.host.list_snapshots(&task.source)?;
        if source_inventory == Inventory::Missing {
            return Err(ReplicationError::SourceMissing(task.source.to_string()));
        }
        let destination_inventory = self.host.list_snapshots(&task.destination)?;
        let transfer_plan = plan(
            &source_inventory,
            &destination_inventory,
            &task.policy,
            &task.destination.to_string(),
            || self.host.numeric_property(&task.destination, "written"),
        )?;
        Ok((destination_inventory, transfer_plan))
    }

    fn request(&self, snapshot: &str, transfer_plan: &TransferPlan) -> TransferRequest {
        let send = SendArgs::snapshot(
            snapshot.to_owned(),
            transfer_plan.incremental_base.clone(),
            self.task.send,
        );
        TransferRequest::for_task(self.task, send, transfer_plan.force_overwrite())
    }

    fn plan_only(&self) -> Result<DryRun, ReplicationError> {
        let pending_resume = matches!(self.host.resume_token(&self.task.destination), Ok(Some(_)));
        let (_, transfer_plan) = self.inventory_and_plan()?;
        let snapshot = self.task.source.snapshot(&self.suffix());
        let request = self.request(&snapshot, &transfer_plan);
        let commands = route(&request)?.describe();
        Ok(DryRun {
            snapshot,
            plan: transfer_plan,
            pending_resume,
            commands,
        })
    }

    fn prune_side(
        &self,
        dataset: &Dataset,
        retention: &Retention,
        suffix: &str,
        window: ProgressWindow,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<Vec<String>, ReplicationError> {
        let request = PruneRequest {
            dataset,
            retention,
            task_name: &self.task.task_name,
            custom_name: self.task.custom_name.as_deref(),
            excluded_suffix: suffix,
            recursive: self.task.send.recursive,
            now: self.now.unix_timestamp(),
            window,
        };
        prune(self.host, &request, tracker)
    }
}
