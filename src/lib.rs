//! HTTP-style message dispatch between in-process services, isolated
//! execution contexts and remote hosts.

pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod mediator;
pub mod message;
pub mod observability;
pub mod resilience;
pub mod schemes;

pub use config::schema::MediatorConfig;
pub use lifecycle::{build_mediator, Wiring};
pub use mediator::{DispatchError, DispatchResult, Handler, Mediator};
pub use message::{Link, Request, Response};
