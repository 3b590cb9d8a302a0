//! Plugin-based provider registry
//!
//! The registry allows DNS providers and mail-routing services to be
//! registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mailfwd_core::registry::ProviderRegistry;
//! use mailfwd_core::config::DnsProviderConfig;
//!
//! let registry = ProviderRegistry::with_builtins();
//! mailfwd_provider_cloudflare::register(&registry);
//!
//! let config = DnsProviderConfig::Cloudflare { ... };
//! let provider = registry.create_dns_provider(&config)?;
//! ```

use crate::config::{DnsProviderConfig, RoutingServiceConfig};
use crate::error::{Error, Result};
use crate::memory::{MemoryDnsFactory, MemoryRoutingFactory};
use crate::traits::{DnsProvider, DnsProviderFactory, MailRoutingFactory, MailRoutingService};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Provider registry for plugin-based provider creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes. A poisoned lock still holds a consistent map
/// (inserts are single operations), so it is recovered rather than
/// propagated.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered DNS provider factories
    dns_providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,

    /// Registered mail-routing factories
    routing_services: RwLock<HashMap<String, Box<dyn MailRoutingFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-memory implementations registered as "memory"
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_dns_provider("memory", Box::new(MemoryDnsFactory));
        registry.register_routing_service("memory", Box::new(MemoryRoutingFactory));
        registry
    }

    /// Register a DNS provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_dns_provider(
        &self,
        name: impl Into<String>,
        factory: Box<dyn DnsProviderFactory>,
    ) {
        self.dns_providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Register a mail-routing service factory
    ///
    /// # Parameters
    ///
    /// - `name`: Service type name (e.g., "mailgun")
    /// - `factory`: Factory object for creating service instances
    pub fn register_routing_service(
        &self,
        name: impl Into<String>,
        factory: Box<dyn MailRoutingFactory>,
    ) {
        self.routing_services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub fn create_dns_provider(&self, config: &DnsProviderConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.type_name();
        let providers = self
            .dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = providers.get(provider_type).ok_or_else(|| {
            Error::config(format!("Unknown DNS provider type: {}", provider_type))
        })?;

        factory.create(config)
    }

    /// Create a mail-routing service from configuration
    pub fn create_routing_service(
        &self,
        config: &RoutingServiceConfig,
    ) -> Result<Box<dyn MailRoutingService>> {
        let service_type = config.type_name();
        let services = self
            .routing_services
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = services.get(service_type).ok_or_else(|| {
            Error::config(format!("Unknown routing service type: {}", service_type))
        })?;

        factory.create(config)
    }

    /// List all registered DNS provider types
    pub fn list_dns_providers(&self) -> Vec<String> {
        let providers = self
            .dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers.keys().cloned().collect()
    }

    /// List all registered routing service types
    pub fn list_routing_services(&self) -> Vec<String> {
        let services = self
            .routing_services
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        services.keys().cloned().collect()
    }

    /// Check if a DNS provider type is registered
    pub fn has_dns_provider(&self, name: &str) -> bool {
        self.dns_providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a routing service type is registered
    pub fn has_routing_service(&self, name: &str) -> bool {
        self.routing_services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
