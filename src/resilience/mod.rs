//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Mediator::dispatch
//!     → timeouts.rs (race handler against timeout and caller abort)
//!     → settled DispatchResult
//! ```
//!
//! # Design Decisions
//! - Every dispatch settles exactly once
//! - A settled request never observes a later answer

pub mod timeouts;
