//! Configuration blob consumed by the mail-gateway function

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{ForwardingConfig, Target};

/// Per-domain entry of the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDomain {
    /// Domain name
    pub name: String,
    /// Fallback targets for unmapped addresses
    pub default_targets: Vec<Target>,
}

/// Resolved mapping handed verbatim to the gateway
///
/// Targets serialize tagged by kind: `{"type": "email", ...}` or
/// `{"type": "command", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Source address to ordered targets
    pub mappings: IndexMap<String, Vec<Target>>,
    /// Domains with their fallbacks
    pub domains: Vec<GatewayDomain>,
    /// Bucket holding raw messages
    pub bucket: String,
    /// Key prefix inside the bucket
    pub bucket_prefix: String,
    /// Receiving region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl GatewayConfig {
    /// Build the blob from a normalized configuration
    pub fn from_config(config: &ForwardingConfig) -> Self {
        Self {
            mappings: config.mappings.as_map().clone(),
            domains: config
                .domains
                .iter()
                .map(|domain| GatewayDomain {
                    name: domain.name.clone(),
                    default_targets: domain.default_targets.clone(),
                })
                .collect(),
            bucket: config.gateway.bucket.clone(),
            bucket_prefix: config.gateway.bucket_prefix.clone(),
            region: config.gateway.region.clone(),
        }
    }
}

impl From<&ForwardingConfig> for GatewayConfig {
    fn from(config: &ForwardingConfig) -> Self {
        Self::from_config(config)
    }
}
