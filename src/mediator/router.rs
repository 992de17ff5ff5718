//! Authority registry and dispatch.
//!
//! # Responsibilities
//! - Store handlers keyed by authority (or `#name`) and by URI scheme
//! - Resolve a request's target to exactly one handler
//! - Settle every dispatch to one response or one failure
//!
//! # Design Decisions
//! - Registry is read lock-free; registration swaps in a new map
//! - Duplicate registration is a configuration fault, never an overwrite
//! - Unresolved authority is an explicit 404, not a silent default
//! - Handler faults and panics stop at this boundary as 500 responses

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures_util::FutureExt;

use crate::mediator::handler::{
    settle, DispatchError, DispatchResult, Handler, HandlerError, RegistryError,
};
use crate::mediator::uri::{self, Target};
use crate::message::{Request, Response};
use crate::observability::metrics;
use crate::resilience::timeouts::settle_within;

type Registry = HashMap<String, Arc<dyn Handler>>;

/// Dispatch-time options.
#[derive(Debug, Clone, Default)]
pub struct MediatorOptions {
    /// Mirror every request/response pair to the `httpl::traffic` log target.
    pub traffic_log: bool,
    /// Record dispatch counters and latency.
    pub metrics: bool,
    /// Applied to requests that carry no timeout of their own.
    pub default_timeout: Option<Duration>,
}

/// Routes requests to registered handlers.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    authorities: ArcSwap<Registry>,
    schemes: ArcSwap<Registry>,
    options: MediatorOptions,
}

impl Mediator {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, MediatorOptions::default())
    }

    pub fn with_options(name: impl Into<String>, options: MediatorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                authorities: ArcSwap::from_pointee(Registry::new()),
                schemes: ArcSwap::from_pointee(Registry::new()),
                options,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a handler for an authority such as `test.com` or `#hist`.
    pub fn register(&self, authority: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let key = authority.trim().to_lowercase();
        if key == "#" || !uri::is_authority(&key) {
            return Err(RegistryError::InvalidKey(authority.to_string()));
        }
        insert(&self.inner.authorities, key, handler)?;
        tracing::debug!(mediator = %self.inner.name, authority = %authority, "Handler registered");
        Ok(())
    }

    /// Register a resolver for every URI of `scheme`, e.g. `data` or `nav`.
    pub fn register_scheme(&self, scheme: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let key = scheme.trim().to_lowercase();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return Err(RegistryError::InvalidKey(scheme.to_string()));
        }
        insert(&self.inner.schemes, key, handler)?;
        tracing::debug!(mediator = %self.inner.name, scheme = %scheme, "Scheme resolver registered");
        Ok(())
    }

    /// Remove an authority's handler. Returns false if none was registered.
    pub fn unregister(&self, authority: &str) -> bool {
        let key = authority.trim().to_lowercase();
        let mut removed = false;
        self.inner.authorities.rcu(|current| {
            let mut next = Registry::clone(current);
            removed = next.remove(&key).is_some();
            next
        });
        removed
    }

    /// Registered authorities, sorted.
    pub fn authorities(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.authorities.load().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The handler a target resolves to, if any.
    pub fn resolve(&self, target: &Target) -> Option<Arc<dyn Handler>> {
        if target.is_local() {
            self.inner.authorities.load().get(&target.authority).cloned()
        } else {
            self.inner.schemes.load().get(&target.scheme).cloned()
        }
    }

    /// Dispatch a request and wait for it to settle.
    ///
    /// Never panics and never hangs past the request timeout: the result is
    /// the handler's response, or a [`DispatchError`] whose
    /// [`into_response`](DispatchError::into_response) is what the caller sees.
    pub async fn dispatch(&self, mut request: Request) -> DispatchResult {
        let started = Instant::now();
        if request.timeout.is_none() {
            request.timeout = self.inner.options.default_timeout;
        }
        let timeout = request.timeout;
        let cancelled = request.abort_handle().subscribe();
        let target = request.target();
        let traffic = self.inner.options.traffic_log;

        if traffic {
            tracing::debug!(
                target: "httpl::traffic",
                mediator = %self.inner.name,
                method = %request.method,
                uri = %request.uri(),
                "request"
            );
        }

        let result = settle_within(self.route(request, &target), timeout, cancelled).await;

        if traffic {
            match &result {
                Ok(response) => tracing::debug!(
                    target: "httpl::traffic",
                    mediator = %self.inner.name,
                    status = response.status,
                    reason = ?response.reason,
                    "response"
                ),
                Err(error) => tracing::debug!(
                    target: "httpl::traffic",
                    mediator = %self.inner.name,
                    status = error.status(),
                    error = %error,
                    "response"
                ),
            }
        }
        if self.inner.options.metrics {
            let status = match &result {
                Ok(response) => response.status,
                Err(error) => error.status(),
            };
            metrics::record_dispatch(&target.scheme, status, started);
        }
        result
    }

    /// Dispatch and flatten the outcome into the response the caller observes.
    pub async fn fetch(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(error) => error.into_response(),
        }
    }

    async fn route(&self, request: Request, target: &Target) -> DispatchResult {
        let Some(handler) = self.resolve(target) else {
            tracing::debug!(
                mediator = %self.inner.name,
                scheme = %target.scheme,
                authority = %target.authority,
                "No handler registered"
            );
            return Err(DispatchError::not_found());
        };

        match AssertUnwindSafe(handler.receive(request, self)).catch_unwind().await {
            Ok(Ok(response)) => settle(response),
            Ok(Err(HandlerError::Dispatch(error))) => Err(error),
            Ok(Err(error)) => {
                tracing::error!(authority = %target.authority, error = %error, "Handler fault");
                Err(DispatchError::Failed(Box::new(Response::internal_error())))
            }
            Err(_) => {
                tracing::error!(authority = %target.authority, "Handler panicked");
                Err(DispatchError::Failed(Box::new(Response::internal_error())))
            }
        }
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("name", &self.inner.name)
            .field("authorities", &self.authorities())
            .finish()
    }
}

fn insert(registry: &ArcSwap<Registry>, key: String, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
    let mut duplicate = false;
    registry.rcu(|current| {
        let mut next = Registry::clone(current);
        duplicate = next.contains_key(&key);
        if !duplicate {
            next.insert(key.clone(), Arc::clone(&handler));
        }
        next
    });
    if duplicate {
        return Err(RegistryError::Duplicate(key));
    }
    Ok(())
}
