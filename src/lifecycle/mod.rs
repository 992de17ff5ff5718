//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Mediator → builtin resolvers → services → bridges
//!
//! Shutdown (Wiring::shutdown):
//!     Terminate bridges → outstanding requests fail as terminated
//! ```

pub mod startup;

pub use startup::{build_mediator, StartupError, Wiring};
