//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! mediator, bridges, resolvers produce:
//!     → logging.rs (structured log events, traffic mirror target)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → tracing subscriber installed by the binary (stderr)
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Structured fields (domain, authority, status) rather than formatted strings
//! - Traffic mirroring is a config toggle, off by default
//! - Metrics are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
