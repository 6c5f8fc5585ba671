//! In-memory fakes for engine tests.
//!
//! [`FakeHost`] keeps datasets and snapshots in memory and records every
//! storage call as a command-like line. [`FakeTransport`] "receives" a
//! stream by copying the sent snapshot into the destination dataset of the
//! same [`FakeHost`]. [`RecordingNotifier`] keeps everything it is told.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use zfs_io::{Location, ZfsFailure};

use crate::dataset::Dataset;
use crate::error::ReplicationError;
use crate::host::{Creation, ZfsHost};
use crate::notify::{Event, EventKind, Notifier};
use crate::snapshot::{Inventory, Snapshot};
use crate::task::{
    Direction, MbufferSize, Policy, ReplicationTask, Retention, SendFlags, TransportKind,
};
use crate::transfer::{SendArgs, SendSource, TransferReport, TransferRequest, Transport};

/// A valid local push of `tank/data` into `backup/data` owned by `nightly`.
pub(crate) fn sample_task() -> ReplicationTask {
    ReplicationTask {
        task_name: "nightly".into(),
        direction: Direction::Push,
        source: Dataset::new("tank", "data", Location::Local),
        destination: Dataset::new("backup", "data", Location::Local),
        transport: TransportKind::Local,
        netcat_port: 31337,
        send: SendFlags::default(),
        policy: Policy::default(),
        mbuffer: MbufferSize::default(),
        custom_name: None,
        source_retention: Retention::disabled(),
        destination_retention: Retention::disabled(),
    }
}

#[derive(Default)]
struct FakeDataset {
    snapshots: Vec<Snapshot>,
    available: u64,
    written: u64,
    resume_token: Option<String>,
}

/// In-memory [`ZfsHost`]; datasets are keyed by name, locations ignored.
pub(crate) struct FakeHost {
    now: i64,
    datasets: RefCell<BTreeMap<String, FakeDataset>>,
    failing: RefCell<HashSet<&'static str>>,
    log: RefCell<Vec<String>>,
    estimate: Cell<Option<u64>>,
    next_txg: Cell<u64>,
}

impl FakeHost {
    /// New snapshots are stamped with `now` (seconds since the epoch).
    pub(crate) fn new(now: i64) -> Self {
        Self {
            now,
            datasets: RefCell::new(BTreeMap::new()),
            failing: RefCell::new(HashSet::new()),
            log: RefCell::new(Vec::new()),
            estimate: Cell::new(Some(1 << 20)),
            next_txg: Cell::new(1),
        }
    }

    pub(crate) fn add_dataset(&self, name: &str) {
        self.datasets
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert_with(|| FakeDataset {
                available: 1 << 40,
                ..FakeDataset::default()
            });
    }

    pub(crate) fn add_snapshot(&self, dataset: &str, suffix: &str, guid: &str, creation: i64) {
        self.add_dataset(dataset);
        let txg = self.txg();
        self.with_dataset(dataset, |entry| {
            entry
                .snapshots
                .push(Snapshot::new(format!("{dataset}@{suffix}"), guid, creation, txg));
        });
    }

    pub(crate) fn set_available(&self, dataset: &str, bytes: u64) {
        self.with_dataset(dataset, |entry| entry.available = bytes);
    }

    pub(crate) fn set_written(&self, dataset: &str, bytes: u64) {
        self.with_dataset(dataset, |entry| entry.written = bytes);
    }

    pub(crate) fn set_resume_token(&self, dataset: &str, token: &str) {
        self.with_dataset(dataset, |entry| entry.resume_token = Some(token.to_owned()));
    }

    pub(crate) fn resume_token_of(&self, dataset: &str) -> Option<String> {
        self.datasets
            .borrow()
            .get(dataset)
            .and_then(|entry| entry.resume_token.clone())
    }

    pub(crate) fn set_estimate(&self, estimate: Option<u64>) {
        self.estimate.set(estimate);
    }

    /// Makes every later call of `operation` fail. Operations are the
    /// first word(s) of the logged line (`list`, `snapshot`, `destroy`,
    /// `get`, `set`, `receive -A`, `estimate`).
    pub(crate) fn fail_on(&self, operation: &'static str) {
        self.failing.borrow_mut().insert(operation);
    }

    pub(crate) fn exists(&self, dataset: &str) -> bool {
        self.datasets.borrow().contains_key(dataset)
    }

    /// Suffixes of `dataset`, oldest first.
    pub(crate) fn suffixes(&self, dataset: &str) -> Vec<String> {
        let snapshots = self
            .datasets
            .borrow()
            .get(dataset)
            .map(|entry| entry.snapshots.clone())
            .unwrap_or_default();
        Inventory::from_snapshots(snapshots)
            .snapshots()
            .iter()
            .map(|snapshot| snapshot.suffix().to_owned())
            .collect()
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn snapshot_named(&self, name: &str) -> Option<Snapshot> {
        let (dataset, _) = name.split_once('@')?;
        self.datasets
            .borrow()
            .get(dataset)?
            .snapshots
            .iter()
            .find(|snapshot| snapshot.name() == name)
            .cloned()
    }

    /// Applies a received full or incremental stream of `source` to
    /// `destination`.
    fn receive(&self, source: &str, destination: &str, force: bool, base: Option<&str>) {
        let Some(sent) = self.snapshot_named(source) else {
            return;
        };
        let base_guid = base.and_then(|base| self.snapshot_named(base)).map(|s| s.guid().to_owned());
        self.add_dataset(destination);
        let txg = self.txg();
        self.with_dataset(destination, |entry| {
            if force {
                match &base_guid {
                    None => entry.snapshots.clear(),
                    Some(guid) => {
                        entry.snapshots.sort_by_key(Snapshot::sort_key);
                        if let Some(position) =
                            entry.snapshots.iter().position(|s| s.guid() == guid)
                        {
                            entry.snapshots.truncate(position + 1);
                        }
                    }
                }
            }
            entry.written = 0;
            entry.snapshots.push(Snapshot::new(
                format!("{destination}@{}", sent.suffix()),
                sent.guid(),
                sent.creation(),
                txg,
            ));
        });
    }

    fn clear_token(&self, dataset: &str) {
        self.with_dataset(dataset, |entry| entry.resume_token = None);
    }

    fn with_dataset(&self, dataset: &str, apply: impl FnOnce(&mut FakeDataset)) {
        if let Some(entry) = self.datasets.borrow_mut().get_mut(dataset) {
            apply(entry);
        }
    }

    fn txg(&self) -> u64 {
        let txg = self.next_txg.get();
        self.next_txg.set(txg + 1);
        txg
    }

    fn call(&self, operation: &'static str, line: String) -> Result<(), ReplicationError> {
        let failing = self.failing.borrow().contains(operation);
        self.log.borrow_mut().push(line.clone());
        if failing {
            return Err(ReplicationError::Parse {
                operation,
                target: line,
                detail: "injected failure".into(),
            });
        }
        Ok(())
    }
}

fn recursive_flag(recursive: bool) -> &'static str {
    if recursive { "-r " } else { "" }
}

impl ZfsHost for FakeHost {
    fn list_snapshots(&self, dataset: &Dataset) -> Result<Inventory, ReplicationError> {
        self.call("list", format!("list {}", dataset.name()))?;
        Ok(match self.datasets.borrow().get(dataset.name()) {
            None => Inventory::Missing,
            Some(entry) => Inventory::from_snapshots(entry.snapshots.clone()),
        })
    }

    fn create_snapshot(
        &self,
        dataset: &Dataset,
        suffix: &str,
        recursive: bool,
    ) -> Result<Creation, ReplicationError> {
        let name = dataset.snapshot(suffix);
        self.call("snapshot", format!("snapshot {}{name}", recursive_flag(recursive)))?;
        if !self.exists(dataset.name()) {
            return Err(ReplicationError::SourceMissing(dataset.name().to_owned()));
        }
        if self.snapshot_named(&name).is_some() {
            return Ok(Creation::AlreadyExists);
        }
        let guid = format!("N{}", self.next_txg.get());
        self.add_snapshot(dataset.name(), suffix, &guid, self.now);
        Ok(Creation::Created)
    }

    fn destroy_snapshot(
        &self,
        dataset: &Dataset,
        snapshot: &str,
        recursive: bool,
    ) -> Result<(), ReplicationError> {
        self.call("destroy", format!("destroy {}{snapshot}", recursive_flag(recursive)))?;
        let mut removed = false;
        self.with_dataset(dataset.name(), |entry| {
            let before = entry.snapshots.len();
            entry.snapshots.retain(|s| s.name() != snapshot);
            removed = entry.snapshots.len() < before;
        });
        if removed {
            Ok(())
        } else {
            Err(ReplicationError::Parse {
                operation: "destroy",
                target: snapshot.to_owned(),
                detail: "no such snapshot".into(),
            })
        }
    }

    fn numeric_property(&self, dataset: &Dataset, property: &str) -> Result<u64, ReplicationError> {
        self.call("get", format!("get {property} {}", dataset.name()))?;
        let datasets = self.datasets.borrow();
        let entry = datasets
            .get(dataset.name())
            .ok_or_else(|| ReplicationError::Parse {
                operation: "get",
                target: dataset.name().to_owned(),
                detail: "dataset does not exist".into(),
            })?;
        Ok(match property {
            "available" => entry.available,
            "written" => entry.written,
            _ => 0,
        })
    }

    fn resume_token(&self, dataset: &Dataset) -> Result<Option<String>, ReplicationError> {
        self.call("get", format!("get receive_resume_token {}", dataset.name()))?;
        Ok(self.resume_token_of(dataset.name()))
    }

    fn abort_resume(&self, dataset: &Dataset) -> Result<(), ReplicationError> {
        self.call("receive -A", format!("receive -A {}", dataset.name()))?;
        self.clear_token(dataset.name());
        Ok(())
    }

    fn set_property(
        &self,
        _location: &Location,
        target: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ReplicationError> {
        self.call("set", format!("set {property}={value} {target}"))
    }

    fn estimate_send(&self, _location: &Location, send: &SendArgs) -> Result<u64, ReplicationError> {
        self.call("estimate", format!("estimate {}", send.subject()))?;
        self.estimate.get().ok_or_else(|| ReplicationError::Parse {
            operation: "send -n -P",
            target: send.subject().to_owned(),
            detail: "no size line".into(),
        })
    }
}

/// [`Transport`] that applies streams to a [`FakeHost`].
pub(crate) struct FakeTransport {
    host: Rc<FakeHost>,
    failures: RefCell<VecDeque<ZfsFailure>>,
    requests: RefCell<Vec<TransferRequest>>,
    deliver: Cell<bool>,
}

impl FakeTransport {
    pub(crate) fn new(host: Rc<FakeHost>) -> Self {
        Self {
            host,
            failures: RefCell::new(VecDeque::new()),
            requests: RefCell::new(Vec::new()),
            deliver: Cell::new(true),
        }
    }

    /// Makes the next transfer fail with `failure`.
    pub(crate) fn fail_next(&self, failure: ZfsFailure) {
        self.failures.borrow_mut().push_back(failure);
    }

    /// Reports success without changing the destination.
    pub(crate) fn drop_streams(&self) {
        self.deliver.set(false);
    }

    pub(crate) fn requests(&self) -> Vec<TransferRequest> {
        self.requests.borrow().clone()
    }
}

/// Bytes every fake transfer reports.
pub(crate) const FAKE_STREAM_BYTES: u64 = 1 << 20;

impl Transport for FakeTransport {
    fn transfer(
        &self,
        request: &TransferRequest,
        progress: &mut dyn FnMut(u64),
    ) -> Result<TransferReport, ReplicationError> {
        self.requests.borrow_mut().push(request.clone());
        if let Some(failure) = self.failures.borrow_mut().pop_front() {
            return Err(ReplicationError::Transport {
                stage: "receive".into(),
                message: format!("simulated {failure:?} failure"),
                failure,
            });
        }

        progress(FAKE_STREAM_BYTES / 2);
        progress(FAKE_STREAM_BYTES);

        if self.deliver.get() {
            let destination = request.receive.dataset();
            match request.send.source() {
                SendSource::Resume { .. } => self.host.clear_token(destination),
                SendSource::Snapshot { snapshot, base } => self.host.receive(
                    snapshot,
                    destination,
                    request.receive.force(),
                    base.as_deref(),
                ),
            }
        }

        Ok(TransferReport {
            bytes: FAKE_STREAM_BYTES,
            elapsed: Duration::from_millis(5),
        })
    }
}

/// [`Notifier`] that keeps everything.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    readies: RefCell<Vec<String>>,
    statuses: RefCell<Vec<String>>,
    events: RefCell<Vec<Event>>,
}

impl RecordingNotifier {
    pub(crate) fn readies(&self) -> Vec<String> {
        self.readies.borrow().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<String> {
        self.statuses.borrow().clone()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub(crate) fn event_kinds(&self) -> Vec<EventKind> {
        self.events.borrow().iter().map(|event| event.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn ready(&self, status: &str) {
        self.readies.borrow_mut().push(status.to_owned());
    }

    fn status(&self, line: &str) {
        self.statuses.borrow_mut().push(line.to_owned());
    }

    fn event(&self, event: &Event) {
        self.events.borrow_mut().push(event.clone());
    }
}
