//! Subscriber installation.
//!
//! ```rust,ignore
//! use logging::{VerbosityConfig, init_tracing};
//!
//! init_tracing(VerbosityConfig::from_verbose_level(1));
//! tracing::debug!(target: "snaprelay::plan", "incremental from tank/data@a");
//! ```

use std::io;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::config::VerbosityConfig;

/// Builds the event filter for `config`.
///
/// A valid `RUST_LOG` takes precedence; an invalid one is ignored in favour
/// of the verbosity-derived directive.
#[must_use]
pub fn build_filter(config: VerbosityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()))
}

/// Installs the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(config: VerbosityConfig) -> bool {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time()
        .with_target(config.level() > 0);

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_ignored() {
        let _ = init_tracing(VerbosityConfig::default());
        assert!(!init_tracing(VerbosityConfig::from_verbose_level(2)));
    }

    #[test]
    fn filter_renders_verbosity_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_filter(VerbosityConfig::from_verbose_level(1));
        assert!(filter.to_string().contains("snaprelay=debug"));
    }
}
