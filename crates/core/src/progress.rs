//! Percentage progress composed from sequential phases.
//!
//! Each phase owns a [`ProgressWindow`] of the 0..=100 range. The
//! [`ProgressTracker`] clamps every report into the active window and never
//! lets the percentage go backwards, so phases that finish early or report
//! nothing still compose into one monotonic sequence.

use tracing::info;

use crate::notify::Notifier;

/// Slice of the overall percentage owned by one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressWindow {
    /// First percentage of the window.
    pub base: u8,
    /// Width of the window in percentage points.
    pub span: u8,
}

impl ProgressWindow {
    /// Stream transfer.
    pub const TRANSFER: Self = Self::new(10, 70);
    /// Pruning on the source side.
    pub const SOURCE_PRUNE: Self = Self::new(80, 10);
    /// Pruning on the destination side.
    pub const DESTINATION_PRUNE: Self = Self::new(90, 10);

    /// Creates a window; the end is capped at 100.
    #[must_use]
    pub const fn new(base: u8, span: u8) -> Self {
        let base = if base > 100 { 100 } else { base };
        let span = if span > 100 - base { 100 - base } else { span };
        Self { base, span }
    }

    /// Last percentage of the window.
    #[must_use]
    pub const fn end(self) -> u8 {
        self.base + self.span
    }

    /// Percentage reached after `done` of `total` units of work.
    #[must_use]
    pub fn at(self, done: u64, total: u64) -> u8 {
        if total == 0 {
            return self.end();
        }
        let done = done.min(total);
        let offset = u128::from(self.span) * u128::from(done) / u128::from(total);
        // offset <= span, so the sum stays within the window.
        self.base + u8::try_from(offset).unwrap_or(self.span)
    }
}

/// Monotonic percentage reporter.
pub struct ProgressTracker<'a> {
    notifier: &'a dyn Notifier,
    percent: u8,
    logged_bytes: Option<u64>,
}

/// Byte distance between throughput-only reports.
const THROUGHPUT_STEP: u64 = 256 * 1024 * 1024;

impl<'a> ProgressTracker<'a> {
    /// Starts at 0%.
    pub fn new(notifier: &'a dyn Notifier) -> Self {
        Self {
            notifier,
            percent: 0,
            logged_bytes: None,
        }
    }

    /// Last reported percentage.
    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.percent
    }

    /// Reports `done` of `total` within `window`.
    ///
    /// Returns `false` when the percentage did not advance, in which case
    /// nothing is emitted.
    pub fn report(&mut self, window: ProgressWindow, done: u64, total: u64) -> bool {
        self.advance(window.at(done, total), None)
    }

    /// Reports transferred bytes against the size estimate.
    ///
    /// Without an estimate only the byte count is reported, every
    /// 256 MiB, and the percentage stays at the start of the window.
    pub fn report_bytes(&mut self, window: ProgressWindow, bytes: u64, estimate: Option<u64>) -> bool {
        match estimate {
            Some(total) if total > 0 => {
                let percent = window.at(bytes, total);
                let detail = format!("{} of {}", format_bytes(bytes), format_bytes(total));
                self.advance(percent, Some(&detail))
            }
            _ => {
                if self
                    .logged_bytes
                    .is_some_and(|logged| bytes < logged.saturating_add(THROUGHPUT_STEP))
                {
                    return false;
                }
                self.logged_bytes = Some(bytes);
                let percent = self.percent.max(window.base);
                let detail = format!("{} sent", format_bytes(bytes));
                self.emit(percent, Some(&detail));
                true
            }
        }
    }

    /// Marks `window` complete.
    pub fn finish(&mut self, window: ProgressWindow) -> bool {
        self.advance(window.end(), None)
    }

    fn advance(&mut self, percent: u8, detail: Option<&str>) -> bool {
        if percent <= self.percent {
            return false;
        }
        self.emit(percent, detail);
        true
    }

    fn emit(&mut self, percent: u8, detail: Option<&str>) {
        self.percent = percent;
        let line = match detail {
            Some(detail) => format!("snaprelay: {percent}% ({detail})"),
            None => format!("snaprelay: {percent}%"),
        };
        info!(target: "snaprelay::progress", "{line}");
        self.notifier.status(&line);
    }
}

/// Renders a byte count with binary units (`1.2 GiB`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
