#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` installs the process-wide `tracing` subscriber used by the
//! `snaprelay` binary. Diagnostics are written as plain lines to standard
//! error so that the supervisor hosting the job can capture them verbatim.
//!
//! # Design
//!
//! - [`VerbosityConfig`] turns the `-v` count (or `SNAPRELAY_VERBOSE`) into
//!   an [`EnvFilter`](tracing_subscriber::EnvFilter) directive.
//! - [`init_tracing`] layers that filter under a `fmt` layer without ANSI
//!   colour or timestamps; the journal timestamps lines itself.
//!
//! # Invariants
//!
//! - `RUST_LOG`, when set and valid, replaces the computed directive.
//! - Initialisation never panics. A second call is a no-op and reports
//!   `false`, which keeps test binaries that share a process well-behaved.
//!
//! # Examples
//!
//! ```
//! use logging::VerbosityConfig;
//!
//! let config = VerbosityConfig::from_verbose_level(1);
//! assert_eq!(config.directive(), "info,snaprelay=debug");
//! ```

mod config;
mod tracing_bridge;

pub use config::VerbosityConfig;
pub use tracing_bridge::{build_filter, init_tracing};
