//! Completion of interrupted receives.
//!
//! A receive started with `-s` leaves a resume token on the destination when
//! it is cut short. The next run must deal with that token before anything
//! else: a fresh send into a dataset holding partial state fails.
//!
//! | resume attempt | outcome |
//! |---|---|
//! | succeeds | the run ends here |
//! | destination modified since its last snapshot | policy refusal, whatever the settings |
//! | any other failure, `resumeFailAllowOverwrite` | token cleared, normal run continues |
//! | any other failure | token kept for the next run, normal run continues |

use time::OffsetDateTime;
use tracing::{info, warn};
use zfs_io::ZfsFailure;

use crate::error::{PolicyReason, ReplicationError};
use crate::host::ZfsHost;
use crate::notify::{Event, EventKind, Notifier};
use crate::task::ReplicationTask;
use crate::transfer::{SendArgs, TransferReport, TransferRequest, Transport};

/// What the resume step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No interrupted receive was pending.
    NoToken,
    /// The interrupted receive was completed; the run is over.
    Resumed(TransferReport),
    /// Resuming failed and the normal run should continue.
    FellThrough {
        /// Whether the token was discarded.
        cleared: bool,
    },
}

impl ResumeOutcome {
    /// Reports whether the run is complete.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Resumed(_))
    }
}

/// Everything the resume step reports through.
pub struct ResumeContext<'a> {
    /// Storage operations.
    pub host: &'a dyn ZfsHost,
    /// Stream transport.
    pub transport: &'a dyn Transport,
    /// Event sink.
    pub notifier: &'a dyn Notifier,
    /// Timestamp for events.
    pub now: OffsetDateTime,
}

/// Resumes a pending receive on the task's destination, if there is one.
pub fn resume_interrupted(
    task: &ReplicationTask,
    context: &ResumeContext<'_>,
    progress: &mut dyn FnMut(u64),
) -> Result<ResumeOutcome, ReplicationError> {
    let destination = &task.destination;
    let token = match context.host.resume_token(destination) {
        Ok(Some(token)) => token,
        Ok(None) => return Ok(ResumeOutcome::NoToken),
        Err(err) if err.failure() == ZfsFailure::DatasetMissing => {
            return Ok(ResumeOutcome::NoToken);
        }
        Err(err) => {
            warn!(target: "snaprelay::resume", dataset = %destination, error = %err, "could not read resume token");
            return Ok(ResumeOutcome::NoToken);
        }
    };

    info!(target: "snaprelay::resume", dataset = %destination, "resuming interrupted receive");
    let request = TransferRequest::for_task(task, SendArgs::resume(token), false);
    let event = |kind| {
        Event::new(kind, context.now, task.source.name(), destination.name())
    };

    let err = match context.transport.transfer(&request, progress) {
        Ok(report) => {
            context.notifier.event(
                &event(EventKind::ResumeSucceeded)
                    .message(format!("completed interrupted receive into {destination}")),
            );
            return Ok(ResumeOutcome::Resumed(report));
        }
        Err(err) => err,
    };

    context.notifier.event(
        &event(EventKind::ResumeFailed)
            .message(format!("could not resume receive into {destination}"))
            .error(err.to_string()),
    );

    if err.failure() == ZfsFailure::DestinationModified {
        return Err(ReplicationError::Policy {
            reason: PolicyReason::DestinationModifiedDuringResume,
            dataset: destination.to_string(),
        });
    }

    if !task.policy.resume_fail_allow_overwrite {
        warn!(
            target: "snaprelay::resume",
            dataset = %destination,
            error = %err,
            "resume failed; keeping the token for a later attempt"
        );
        return Ok(ResumeOutcome::FellThrough { cleared: false });
    }

    context.host.abort_resume(destination)?;
    warn!(target: "snaprelay::resume", dataset = %destination, error = %err, "resume failed; token cleared");
    context.notifier.event(
        &event(EventKind::ResumeTokenCleared)
            .message(format!("discarded partial receive state on {destination}"))
            .error(err.to_string()),
    );
    Ok(ResumeOutcome::FellThrough { cleared: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeHost, FakeTransport, RecordingNotifier, sample_task};
    use crate::transfer::SendSource;
    use std::rc::Rc;

    struct Fixture {
        host: Rc<FakeHost>,
        transport: FakeTransport,
        notifier: RecordingNotifier,
    }

    impl Fixture {
        fn new() -> Self {
            let host = Rc::new(FakeHost::new(1_000));
            host.add_snapshot("tank/data", "base", "G1", 10);
            host.add_snapshot("backup/data", "base", "G1", 10);
            Self {
                transport: FakeTransport::new(Rc::clone(&host)),
                host,
                notifier: RecordingNotifier::default(),
            }
        }

        fn run(&self, task: &ReplicationTask) -> Result<ResumeOutcome, ReplicationError> {
            let context = ResumeContext {
                host: &*self.host,
                transport: &self.transport,
                notifier: &self.notifier,
                now: OffsetDateTime::UNIX_EPOCH,
            };
            resume_interrupted(task, &context, &mut |_| {})
        }
    }

    #[test]
    fn no_token_means_nothing_to_do() {
        let fixture = Fixture::new();
        assert_eq!(fixture.run(&sample_task()).expect("resume"), ResumeOutcome::NoToken);
        assert!(fixture.transport.requests().is_empty());
    }

    #[test]
    fn missing_destination_has_no_token() {
        let fixture = Fixture::new();
        let mut task = sample_task();
        task.destination = crate::dataset::Dataset::named("backup/new", zfs_io::Location::Local);
        assert_eq!(fixture.run(&task).expect("resume"), ResumeOutcome::NoToken);
    }

    #[test]
    fn successful_resume_completes_the_run() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        let outcome = fixture.run(&sample_task()).expect("resume");
        assert!(outcome.is_complete());

        let requests = fixture.transport.requests();
        assert_eq!(
            requests[0].send.source(),
            &SendSource::Resume {
                token: "1-abc".into()
            }
        );
        assert!(!requests[0].receive.force());
        assert_eq!(fixture.notifier.event_kinds(), [EventKind::ResumeSucceeded]);
    }

    #[test]
    fn modified_destination_is_a_hard_stop() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        fixture.transport.fail_next(ZfsFailure::DestinationModified);
        let mut task = sample_task();
        task.policy.resume_fail_allow_overwrite = true;
        task.policy.allow_overwrite = true;

        let err = fixture.run(&task).unwrap_err();
        assert_eq!(
            err.policy_reason(),
            Some(PolicyReason::DestinationModifiedDuringResume)
        );
        assert_eq!(fixture.host.resume_token_of("backup/data").as_deref(), Some("1-abc"));
    }

    #[test]
    fn other_failure_keeps_token_by_default() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        fixture.transport.fail_next(ZfsFailure::ConnectionFailed);

        let outcome = fixture.run(&sample_task()).expect("fall through");
        assert_eq!(outcome, ResumeOutcome::FellThrough { cleared: false });
        assert_eq!(fixture.host.resume_token_of("backup/data").as_deref(), Some("1-abc"));
        assert_eq!(fixture.notifier.event_kinds(), [EventKind::ResumeFailed]);
    }

    #[test]
    fn other_failure_clears_token_when_allowed() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        fixture.transport.fail_next(ZfsFailure::ResumeTokenInvalid);
        let mut task = sample_task();
        task.policy.resume_fail_allow_overwrite = true;

        let outcome = fixture.run(&task).expect("fall through");
        assert_eq!(outcome, ResumeOutcome::FellThrough { cleared: true });
        assert_eq!(fixture.host.resume_token_of("backup/data"), None);
        assert_eq!(
            fixture.notifier.event_kinds(),
            [EventKind::ResumeFailed, EventKind::ResumeTokenCleared]
        );
    }

    #[test]
    fn failure_to_clear_aborts() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        fixture.host.fail_on("receive -A");
        fixture.transport.fail_next(ZfsFailure::Other);
        let mut task = sample_task();
        task.policy.resume_fail_allow_overwrite = true;

        assert!(fixture.run(&task).is_err());
    }

    #[test]
    fn unreadable_token_is_ignored() {
        let fixture = Fixture::new();
        fixture.host.set_resume_token("backup/data", "1-abc");
        fixture.host.fail_on("get");
        assert_eq!(fixture.run(&sample_task()).expect("resume"), ResumeOutcome::NoToken);
    }
}
