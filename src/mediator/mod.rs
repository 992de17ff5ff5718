//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Request (method, uri, headers, body)
//!     → uri.rs (scheme / authority / path split)
//!     → router.rs (authority or scheme lookup)
//!     → Handler::receive (service, resolver or bridge)
//!     → Return: settled Response or DispatchError
//! ```
//!
//! # Design Decisions
//! - One explicit Mediator instance, passed to whatever dispatches
//! - Handlers are capabilities, not subclasses; bridges and local
//!   services implement the same trait
//! - Deterministic: same registry and URI always resolve the same handler

pub mod handler;
pub mod router;
pub mod service;
pub mod uri;

pub use handler::{
    handler_fn, DispatchError, DispatchResult, Handler, HandlerError, HandlerResult, RegistryError,
};
pub use router::{Mediator, MediatorOptions};
pub use service::StaticService;
