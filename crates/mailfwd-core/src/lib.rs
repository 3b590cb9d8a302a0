// # mailfwd-core
//
// Core library for the mail-forwarding reconciler.
//
// ## Architecture Overview
//
// This library converges external infrastructure toward a declared
// forwarding configuration:
// - **DnsProvider**: Trait for hosted zones and record sets
// - **MailRoutingService**: Trait for routing domains, credentials and routes
// - **FunctionHost**: Trait for deploying the mail-gateway configuration
// - **Reconciler**: Core engine that orchestrates the config → infrastructure flow
// - **ProviderRegistry**: Plugin-based registry for providers and services
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Diffing is pure; providers only talk to APIs
// 2. **Declarative**: Every run reads state fresh and applies the difference
// 3. **Plugin-Based**: Providers are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Idempotency**: A second run against converged state changes nothing

pub mod apply;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod memory;
pub mod poll;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    AddressMapping, DnsProviderConfig, DomainSpec, ForwardingConfig, RawConfig,
    ReconcilerSettings, RoutingServiceConfig, Target, normalize,
};
pub use engine::{ReconcileEvent, Reconciler, RunReport};
pub use error::{Error, Result};
pub use gateway::GatewayConfig;
pub use memory::{MemoryDnsProvider, MemoryMailRouting};
pub use registry::ProviderRegistry;
pub use traits::{DnsProvider, FileFunctionHost, FunctionHost, MailRoutingService};
