//! Uniform message model.
//!
//! # Data Flow
//! ```text
//! caller options / builder
//!     → request.rs (method, URL, query, merged headers, timeout, abort)
//!     → [mediator dispatch]
//!     → response.rs (status, reason, headers, body, parsed links)
//!
//! headers.rs: canonical keys shared by both message kinds
//! link.rs:    structured Link header grammar
//! ```

pub mod headers;
pub mod link;
pub mod request;
pub mod response;

pub use headers::HeaderMap;
pub use link::{Link, LinkParam};
pub use request::{AbortHandle, Request, RequestOptions};
pub use response::Response;
