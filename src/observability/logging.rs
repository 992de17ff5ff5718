//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//! - Let `RUST_LOG` override the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Traffic mirroring logs on the `httpl::traffic` target at debug level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Log target used when traffic mirroring is enabled.
pub const TRAFFIC_TARGET: &str = "httpl::traffic";

/// Filter directive for the configured level, plus the traffic target when
/// mirroring is on.
pub fn filter_directive(config: &ObservabilityConfig) -> String {
    if config.log_traffic {
        format!("{},{}=debug", config.log_level, TRAFFIC_TARGET)
    } else {
        config.log_level.clone()
    }
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
