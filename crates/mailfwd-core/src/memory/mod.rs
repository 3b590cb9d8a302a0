//! In-memory providers
//!
//! Fully functional, non-persistent implementations of [`DnsProvider`] and
//! [`MailRoutingService`] for rehearsing a configuration and for tests.
//!
//! [`DnsProvider`]: crate::DnsProvider
//! [`MailRoutingService`]: crate::MailRoutingService

pub mod dns;
pub mod routing;

pub use dns::MemoryDnsProvider;
pub use routing::MemoryMailRouting;

use crate::config::{DnsProviderConfig, RoutingServiceConfig};
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory, MailRoutingFactory, MailRoutingService};

/// Factory for [`MemoryDnsProvider`]
pub struct MemoryDnsFactory;

impl DnsProviderFactory for MemoryDnsFactory {
    fn create(&self, config: &DnsProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            DnsProviderConfig::Memory => Ok(Box::new(MemoryDnsProvider::new())),
            other => Err(Error::config(format!(
                "Memory factory cannot build a '{}' DNS provider",
                other.type_name()
            ))),
        }
    }
}

/// Factory for [`MemoryMailRouting`]
pub struct MemoryRoutingFactory;

impl MailRoutingFactory for MemoryRoutingFactory {
    fn create(&self, config: &RoutingServiceConfig) -> Result<Box<dyn MailRoutingService>> {
        match config {
            RoutingServiceConfig::Memory => Ok(Box::new(MemoryMailRouting::new())),
            other => Err(Error::config(format!(
                "Memory factory cannot build a '{}' routing service",
                other.type_name()
            ))),
        }
    }
}
