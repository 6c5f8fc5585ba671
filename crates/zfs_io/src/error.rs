use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::stderr::{ZfsFailure, classify, classify_all};

/// Failure of a single one-shot command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The program exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    Failed {
        /// Rendered command line.
        command: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// The program did not finish within its allotted time and was killed.
    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    TimedOut {
        /// Rendered command line.
        command: String,
        /// Time allowed.
        timeout: Duration,
    },
    /// Waiting on or reading from the program failed.
    #[error("I/O error while running `{command}`: {source}")]
    Io {
        /// Rendered command line.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    /// Returns captured standard error for failed commands.
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn failure(&self) -> ZfsFailure {
        self.stderr().map_or(ZfsFailure::Other, classify)
    }
}

/// One pipeline stage that exited unsuccessfully.
///
/// When a pipeline fails, stages that exited successfully but wrote to
/// standard error are recorded too: a shell-composed stage reports only its
/// last command's status, so an inner failure may hide behind exit status 0.
#[derive(Clone, Debug)]
pub struct StageFailure {
    /// Stage label (`send`, `mbuffer`, `receive`, ...).
    pub stage: String,
    /// Exit status of the stage.
    pub status: ExitStatus,
    /// Captured standard error of the stage, trimmed.
    pub stderr: String,
}

impl StageFailure {
    /// Reports whether the stage itself exited non-zero.
    #[must_use]
    pub fn exited_unsuccessfully(&self) -> bool {
        !self.status.success()
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stderr.is_empty() {
            write!(f, "{} failed ({})", self.stage, self.status)
        } else if self.status.success() {
            write!(f, "{}: {}", self.stage, self.stderr)
        } else {
            write!(f, "{} failed ({}): {}", self.stage, self.status, self.stderr)
        }
    }
}

/// Failure of a multi-stage pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipeline must have at least one producer and one consumer.
    #[error("pipeline needs at least one producer and one consumer stage")]
    Empty,
    /// A stage could not be started.
    #[error("failed to start {stage}: {source}")]
    Spawn {
        /// Stage label.
        stage: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// Waiting for a stage to exit failed.
    #[error("failed to wait for {stage}: {source}")]
    Wait {
        /// Stage label.
        stage: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// One or more stages exited unsuccessfully.
    #[error("{}", primary_message(.0))]
    Stages(Vec<StageFailure>),
    /// Every stage succeeded but relaying bytes between them failed.
    #[error("relay between pipeline stages failed: {0}")]
    Relay(#[source] io::Error),
    /// A supporting process (remote listener) failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Renders the primary failure followed by every other stage's error text.
fn primary_message(failures: &[StageFailure]) -> String {
    let Some(index) = primary_index(failures) else {
        return "pipeline failed".to_owned();
    };
    let mut message = failures[index].to_string();
    for (other, failure) in failures.iter().enumerate() {
        if other != index && !failure.stderr.is_empty() {
            message.push_str("; ");
            message.push_str(&failure.stage);
            message.push_str(": ");
            message.push_str(&failure.stderr);
        }
    }
    message
}

/// Picks the failure that explains the pipeline: the stage whose stderr
/// classifies most specifically, then a stage that exited non-zero, then the
/// first stage that said anything, then the earliest stage.
fn primary_index(failures: &[StageFailure]) -> Option<usize> {
    let mut best: Option<(usize, (u8, bool, bool))> = None;
    for (index, failure) in failures.iter().enumerate() {
        let rank = (
            classify(&failure.stderr).precedence(),
            failure.exited_unsuccessfully(),
            !failure.stderr.is_empty(),
        );
        if best.is_none_or(|(_, current)| rank > current) {
            best = Some((index, rank));
        }
    }
    best.map(|(index, _)| index)
}

impl PipelineError {
    /// Returns the stage failure that best explains the error.
    #[must_use]
    pub fn primary_stage(&self) -> Option<&StageFailure> {
        match self {
            Self::Stages(failures) => primary_index(failures).map(|index| &failures[index]),
            _ => None,
        }
    }

    /// Label of the stage the error is attributed to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Spawn { stage, .. } | Self::Wait { stage, .. } => stage,
            Self::Stages(_) => self.primary_stage().map_or("pipeline", |f| f.stage.as_str()),
            Self::Command(_) => "control",
            Self::Empty | Self::Relay(_) => "pipeline",
        }
    }

    /// Classifies the failure across every stage's captured output.
    #[must_use]
    pub fn failure(&self) -> ZfsFailure {
        match self {
            Self::Stages(failures) => classify_all(failures.iter().map(|f| f.stderr.as_str())),
            Self::Command(err) => err.failure(),
            _ => ZfsFailure::Other,
        }
    }
}
