//! URI scheme resolvers.
//!
//! Each resolver is an ordinary [`Handler`](crate::mediator::Handler):
//! `data`, `nav`, `http` and `https` are registered by scheme, the proxy
//! under the reserved `proxy` authority. [`Agent`] walks links from the
//! caller's side.

pub mod agent;
pub mod data;
pub mod nav;
pub mod proxy;
pub mod remote;

pub use agent::Agent;
pub use data::DataResolver;
pub use nav::NavResolver;
pub use proxy::{ProxyResolver, PROXY_AUTHORITY};
pub use remote::RemoteResolver;
