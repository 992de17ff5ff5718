//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MediatorConfig (validated, immutable)
//!     → lifecycle::startup wires services and bridges from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BridgeConfig;
pub use schema::MediatorConfig;
pub use schema::ObservabilityConfig;
pub use schema::ServiceConfig;
