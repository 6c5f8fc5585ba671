//! Verbosity levels and their filter directives.

/// Maximum meaningful verbosity; higher values are clamped.
const MAX_LEVEL: u8 = 2;

/// Requested diagnostic verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VerbosityConfig {
    level: u8,
}

impl VerbosityConfig {
    /// Creates a configuration from a `-v` count.
    #[must_use]
    pub const fn from_verbose_level(level: u8) -> Self {
        let level = if level > MAX_LEVEL { MAX_LEVEL } else { level };
        Self { level }
    }

    /// Effective level after clamping.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.level
    }

    /// Filter directive for this level.
    ///
    /// Level 0 shows informational lines, level 1 adds the engine's debug
    /// output (issued commands, plan details) and level 2 traces everything.
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self.level {
            0 => "info",
            1 => "info,snaprelay=debug",
            _ => "trace",
        }
    }
}
