//! Status and event notifications.
//!
//! Both channels are best effort: a notifier never returns an error and a
//! delivery failure never changes the outcome of a run. The sink is passed
//! explicitly to every component that reports, so tests can record what was
//! sent and production can forward to the service manager.
//!
//! - The status channel carries single free-form lines (`READY=1` and
//!   `STATUS=...` under systemd when built with the `sd-notify` feature).
//! - The event channel carries a structured [`Event`] serialised as JSON and
//!   handed to an operator-configured command.

use std::ffi::OsString;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use zfs_io::{Invocation, SupervisedChild};

/// Kind of a structured event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A snapshot was created and transferred.
    ReplicationSucceeded,
    /// The run ended with an error.
    ReplicationFailed,
    /// An interrupted receive was completed.
    ResumeSucceeded,
    /// Resuming an interrupted receive failed.
    ResumeFailed,
    /// A resume token was discarded so a fresh send could run.
    ResumeTokenCleared,
}

/// Event severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine.
    Info,
    /// Needs attention but the run continued or can be retried.
    Warning,
    /// The run failed.
    Error,
}

/// Structured event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// What happened.
    pub kind: EventKind,
    /// Short title.
    pub subject: String,
    /// Human-readable description.
    pub message: String,
    /// Source dataset name.
    pub source_dataset: String,
    /// Destination dataset name.
    pub destination_dataset: String,
    /// Snapshot concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Error text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Creates an event stamped with `at`. The severity follows the kind.
    pub fn new(
        kind: EventKind,
        at: OffsetDateTime,
        source_dataset: impl Into<String>,
        destination_dataset: impl Into<String>,
    ) -> Self {
        let (subject, severity) = match kind {
            EventKind::ReplicationSucceeded => ("Replication succeeded", Severity::Info),
            EventKind::ReplicationFailed => ("Replication failed", Severity::Error),
            EventKind::ResumeSucceeded => ("Resumed replication succeeded", Severity::Info),
            EventKind::ResumeFailed => ("Resumed replication failed", Severity::Warning),
            EventKind::ResumeTokenCleared => ("Resume token cleared", Severity::Warning),
        };
        Self {
            timestamp: at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string()),
            kind,
            subject: subject.to_owned(),
            message: String::new(),
            source_dataset: source_dataset.into(),
            destination_dataset: destination_dataset.into(),
            snapshot: None,
            severity,
            error: None,
        }
    }

    /// Sets the human-readable message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the snapshot name.
    #[must_use]
    pub fn snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    /// Attaches error text.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// JSON rendering of the event.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sink for status lines and events.
pub trait Notifier {
    /// Signals that configuration is valid and work is starting.
    fn ready(&self, status: &str);

    /// Publishes a one-line status.
    fn status(&self, line: &str);

    /// Publishes a structured event.
    fn event(&self, event: &Event);
}

/// Notifier that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn ready(&self, _status: &str) {}

    fn status(&self, _line: &str) {}

    fn event(&self, _event: &Event) {}
}

/// Time an event command gets to finish before it is killed.
pub const EVENT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Production notifier.
///
/// Status lines go to the service manager when the `sd-notify` feature is
/// enabled and `NOTIFY_SOCKET` is set. Events are logged and, when an event
/// command is configured, passed to it as a single JSON argument.
#[derive(Clone, Debug, Default)]
pub struct SystemNotifier {
    #[cfg(all(feature = "sd-notify", target_os = "linux"))]
    service_manager: bool,
    event_command: Option<OsString>,
}

impl SystemNotifier {
    /// Creates a notifier, optionally forwarding events to `event_command`.
    #[must_use]
    pub fn new(event_command: Option<OsString>) -> Self {
        Self {
            #[cfg(all(feature = "sd-notify", target_os = "linux"))]
            service_manager: std::env::var_os("NOTIFY_SOCKET").is_some(),
            event_command: event_command.filter(|command| !command.is_empty()),
        }
    }

    #[cfg(all(feature = "sd-notify", target_os = "linux"))]
    fn send_state(&self, states: &[sd_notify::NotifyState<'_>]) {
        if !self.service_manager {
            return;
        }
        if let Err(err) = sd_notify::notify(false, states) {
            debug!(target: "snaprelay::notify", error = %err, "service manager notification failed");
        }
    }

    fn run_event_command(&self, event: &Event) {
        let Some(program) = &self.event_command else {
            return;
        };
        let invocation = Invocation::new(program.clone()).arg(event.to_json());
        let outcome =
            SupervisedChild::spawn(&invocation).and_then(|child| child.wait_timeout(EVENT_COMMAND_TIMEOUT));
        if let Err(err) = outcome {
            warn!(target: "snaprelay::notify", error = %err, "event command failed");
        }
    }
}

impl Notifier for SystemNotifier {
    fn ready(&self, status: &str) {
        debug!(target: "snaprelay::notify", status, "ready");
        #[cfg(all(feature = "sd-notify", target_os = "linux"))]
        self.send_state(&[
            sd_notify::NotifyState::Ready,
            sd_notify::NotifyState::Status(status),
        ]);
    }

    fn status(&self, line: &str) {
        #[cfg(all(feature = "sd-notify", target_os = "linux"))]
        self.send_state(&[sd_notify::NotifyState::Status(line)]);
        #[cfg(not(all(feature = "sd-notify", target_os = "linux")))]
        let _ = line;
    }

    fn event(&self, event: &Event) {
        match event.severity {
            Severity::Error => warn!(
                target: "snaprelay::notify",
                kind = ?event.kind,
                error = event.error.as_deref().unwrap_or_default(),
                "{}: {}", event.subject, event.message
            ),
            Severity::Info | Severity::Warning => debug!(
                target: "snaprelay::notify",
                kind = ?event.kind,
                "{}: {}", event.subject, event.message
            ),
        }
        self.run_event_command(event);
    }
}
