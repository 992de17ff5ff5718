//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build the mediator with the configured dispatch options
//! - Register the scheme resolvers, the proxy, static services and bridges
//!
//! # Design Decisions
//! - Fail fast: any registration or bridge error aborts startup
//! - Built-in resolvers register first, so configuration cannot shadow them
//! - Bridges start last; requests sent before their handshake completes are buffered

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::bridge::{BridgeError, ChannelBridge, ContextSpawner};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::MediatorConfig;
use crate::mediator::{Mediator, MediatorOptions, RegistryError, StaticService};
use crate::schemes::{DataResolver, NavResolver, ProxyResolver, RemoteResolver, PROXY_AUTHORITY};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ValidationError>),

    #[error("failed to register '{key}': {source}")]
    Registry {
        key: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to start bridge {label}: {source}")]
    Bridge {
        label: String,
        #[source]
        source: BridgeError,
    },
}

/// A wired mediator and the bridges registered on it.
#[derive(Debug)]
pub struct Wiring {
    pub mediator: Mediator,
    pub bridges: Vec<ChannelBridge>,
}

impl Wiring {
    /// Terminate every bridge.
    pub fn shutdown(&self) {
        for bridge in &self.bridges {
            bridge.terminate();
        }
        tracing::info!(mediator = %self.mediator.name(), bridges = self.bridges.len(), "Mediator shut down");
    }
}

pub fn mediator_options(config: &MediatorConfig) -> MediatorOptions {
    MediatorOptions {
        traffic_log: config.observability.log_traffic,
        metrics: config.observability.metrics_enabled,
        default_timeout: config.timeouts.request_ms.map(Duration::from_millis),
    }
}

fn registry_error(key: &str) -> impl FnOnce(RegistryError) -> StartupError {
    let key = key.to_string();
    move |source| StartupError::Registry { key, source }
}

/// Register the scheme resolvers and the proxy.
pub fn register_builtins(mediator: &Mediator) -> Result<(), StartupError> {
    mediator.register_scheme("data", Arc::new(DataResolver)).map_err(registry_error("data"))?;
    mediator.register_scheme("nav", Arc::new(NavResolver)).map_err(registry_error("nav"))?;
    let remote = Arc::new(RemoteResolver::new());
    mediator.register_scheme("http", remote.clone()).map_err(registry_error("http"))?;
    mediator.register_scheme("https", remote).map_err(registry_error("https"))?;
    mediator
        .register(PROXY_AUTHORITY, Arc::new(ProxyResolver))
        .map_err(registry_error(PROXY_AUTHORITY))?;
    Ok(())
}

/// Build a mediator from configuration.
///
/// Must be called within a Tokio runtime when `config` has bridges.
pub fn build_mediator(config: &MediatorConfig, spawner: &dyn ContextSpawner) -> Result<Wiring, StartupError> {
    validate_config(config).map_err(StartupError::Config)?;

    let mediator = Mediator::with_options(config.name.clone(), mediator_options(config));
    register_builtins(&mediator)?;

    for service in &config.services {
        mediator
            .register(&service.authority, Arc::new(StaticService::from_config(service)))
            .map_err(registry_error(&service.authority))?;
        tracing::info!(authority = %service.authority, routes = service.routes.len(), "Static service registered");
    }

    let mut bridges = Vec::with_capacity(config.bridges.len());
    for bridge_config in &config.bridges {
        let label = bridge_config.label();
        let bridge = ChannelBridge::builder(bridge_config.clone())
            .spawn(spawner)
            .map_err(|source| StartupError::Bridge {
                label: label.clone(),
                source,
            })?;
        mediator
            .register(&label, Arc::new(bridge.clone()))
            .map_err(registry_error(&label))?;
        tracing::info!(domain = %label, src = %bridge_config.src, shared = bridge_config.shared, "Bridge registered");
        bridges.push(bridge);
    }

    tracing::info!(
        mediator = %mediator.name(),
        authorities = ?mediator.authorities(),
        "Mediator ready"
    );
    Ok(Wiring { mediator, bridges })
}
