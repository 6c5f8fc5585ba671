//! Process exit codes reported by a replication run.
//!
//! Every error type in the engine maps onto one of three codes through
//! [`HasExitCode`]. The binary converts the final value into a
//! [`std::process::ExitCode`].
//!
//! ```
//! use snaprelay_core::exit_code::ExitCode;
//!
//! assert_eq!(ExitCode::PolicyRefusal.as_i32(), 2);
//! assert_eq!(ExitCode::Ok.description(), "success");
//! ```

use std::fmt;

/// Exit codes returned by the `snaprelay` binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// The cycle completed, including the idempotent duplicate-start case
    /// where this run's snapshot already existed.
    Ok = 0,

    /// Configuration, transport, storage or pruning failure.
    Failure = 1,

    /// The run stopped because continuing would destroy destination data
    /// without operator consent.
    ///
    /// Returned for a missing common snapshot, a destination that is ahead
    /// of the source, an empty pre-existing destination without overwrite
    /// permission, and a failed resume against a modified destination.
    PolicyRefusal = 2,
}

impl ExitCode {
    /// Returns the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns a human-readable description of this exit code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::Failure => "replication failed",
            Self::PolicyRefusal => "refused by replication policy",
        }
    }

    /// Returns `true` if this represents a successful exit.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Creates an exit code from an i32 value.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Failure),
            2 => Some(Self::PolicyRefusal),
            _ => None,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.as_i32().clamp(0, 255) as u8)
    }
}

/// Types that determine how the process exits.
pub trait HasExitCode {
    /// Returns the exit code associated with this value.
    fn exit_code(&self) -> ExitCode;
}

impl HasExitCode for ExitCode {
    fn exit_code(&self) -> ExitCode {
        *self
    }
}
