//! The handler capability and dispatch error types.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;

use crate::mediator::Mediator;
use crate::message::{Request, Response};

/// Anything that can answer a request: in-process services, URI scheme
/// resolvers and channel-backed bridges.
pub trait Handler: Send + Sync {
    /// Produce the response for `request`. `mediator` is the router that
    /// resolved this handler, for handlers that dispatch onward.
    fn receive<'a>(&'a self, request: Request, mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult>;
}

pub type HandlerResult = Result<Response, HandlerError>;

/// Result of a dispatch.
pub type DispatchResult = Result<Response, DispatchError>;

/// How a dispatched request failed to produce a success response.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The handler answered with an error status.
    #[error("{} {}", .0.status, .0.reason.as_deref().unwrap_or(""))]
    Failed(Box<Response>),

    /// Cancelled by the caller or timed out.
    #[error("request aborted")]
    Aborted,

    /// The bridge channel closed while the request was outstanding.
    #[error("bridge channel terminated")]
    Terminated,
}

impl DispatchError {
    pub fn not_found() -> Self {
        Self::Failed(Box::new(Response::not_found()))
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Failed(response) => response.status,
            Self::Aborted => 0,
            Self::Terminated => 503,
        }
    }

    /// The response a caller observes for this failure.
    pub fn into_response(self) -> Response {
        match self {
            Self::Failed(response) => *response,
            Self::Aborted => Response::aborted(),
            Self::Terminated => Response::new(503, "service unavailable"),
        }
    }
}

/// Classify a handler's response into a dispatch result.
pub fn settle(response: Response) -> DispatchResult {
    match response.status {
        0 => Err(DispatchError::Aborted),
        s if s < 400 => Ok(response),
        _ => Err(DispatchError::Failed(Box::new(response))),
    }
}

/// Errors a handler can raise.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A nested dispatch failed; passed through unchanged.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The handler itself failed.
    #[error("handler fault: {0}")]
    Fault(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closure adapter for simple in-process handlers.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        (self.f)(request).boxed()
    }
}

/// Error raised when registering handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler already registered for '{0}'")]
    Duplicate(String),

    #[error("invalid registration key '{0}'")]
    InvalidKey(String),
}
