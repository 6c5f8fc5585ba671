//! The storage tool reports every failure as free-form text on standard
//! error. This module is the only place that text is interpreted; callers
//! match on [`ZfsFailure`] instead of searching strings themselves.

/// Typed interpretation of a storage-tool failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZfsFailure {
    /// The dataset or snapshot named in the command does not exist.
    DatasetMissing,
    /// A snapshot or dataset with the requested name already exists.
    AlreadyExists,
    /// An incremental receive was refused because the destination was
    /// written to after its most recent snapshot.
    DestinationModified,
    /// A resumable send could not use the supplied token.
    ResumeTokenInvalid,
    /// The pool ran out of space.
    OutOfSpace,
    /// The control connection itself failed.
    ConnectionFailed,
    /// Anything not covered above.
    Other,
}

impl ZfsFailure {
    /// Ranks kinds so the most specific explanation wins when several
    /// pipeline stages fail at once.
    pub(crate) const fn precedence(self) -> u8 {
        match self {
            Self::DestinationModified => 6,
            Self::ResumeTokenInvalid => 5,
            Self::OutOfSpace => 4,
            Self::DatasetMissing => 3,
            Self::AlreadyExists => 2,
            Self::ConnectionFailed => 1,
            Self::Other => 0,
        }
    }

    /// Returns the more specific of two classifications.
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

/// Classifies captured standard error text.
#[must_use]
pub fn classify(stderr: &str) -> ZfsFailure {
    // zfs wraps long messages; "modified\nsince" must still match.
    let text = stderr
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    if text.contains("has been modified since most recent snapshot")
        || text.contains("destination has been modified")
    {
        ZfsFailure::DestinationModified
    } else if text.contains("resume token")
        || text.contains("cannot resume send")
        || text.contains("used in the initial send no longer exists")
    {
        ZfsFailure::ResumeTokenInvalid
    } else if text.contains("out of space") || text.contains("no space left on device") {
        ZfsFailure::OutOfSpace
    } else if text.contains("dataset does not exist") || text.contains("could not find any snapshots") {
        ZfsFailure::DatasetMissing
    } else if text.contains("dataset already exists") || text.contains("snapshot already exists") {
        ZfsFailure::AlreadyExists
    } else if text.starts_with("ssh:")
        || text.contains("connection refused")
        || text.contains("could not resolve hostname")
        || text.contains("permission denied (publickey")
        || text.contains("host key verification failed")
        || text.contains("connection timed out")
    {
        ZfsFailure::ConnectionFailed
    } else {
        ZfsFailure::Other
    }
}

/// Classifies several captured outputs, keeping the most specific kind.
#[must_use]
pub fn classify_all<'a, I>(outputs: I) -> ZfsFailure
where
    I: IntoIterator<Item = &'a str>,
{
    outputs
        .into_iter()
        .map(classify)
        .fold(ZfsFailure::Other, ZfsFailure::max)
}
