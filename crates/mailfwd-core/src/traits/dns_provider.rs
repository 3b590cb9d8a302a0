// # DNS Provider Trait
//
// Defines the capability interface over a DNS zone provider.
//
// ## Implementations
//
// - Cloudflare: `mailfwd-provider-cloudflare` crate
// - In-memory: `mailfwd_core::memory::MemoryDnsProvider`
//
// ## Usage
//
// ```rust,ignore
// use mailfwd_core::DnsProvider;
//
// let zones = provider.list_zones().await?;
// let records = provider.list_records(&zones[0].id).await?;
// let change = provider.apply_changes(&zones[0].id, &changes).await?;
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS record type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// IPv4 address
    A,
    /// IPv6 address
    Aaaa,
    /// Canonical name
    Cname,
    /// Mail exchange
    Mx,
    /// Name server
    Ns,
    /// Start of authority
    Soa,
    /// Free text
    Txt,
    /// Any other type, kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl RecordType {
    /// Parse a provider's record type label
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "A" => Self::A,
            "AAAA" => Self::Aaaa,
            "CNAME" => Self::Cname,
            "MX" => Self::Mx,
            "NS" => Self::Ns,
            "SOA" => Self::Soa,
            "TXT" => Self::Txt,
            other => Self::Other(other.to_string()),
        }
    }

    /// Provider-facing label
    pub fn as_str(&self) -> &str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Cname => "CNAME",
            Self::Mx => "MX",
            Self::Ns => "NS",
            Self::Soa => "SOA",
            Self::Txt => "TXT",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hosted zone as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// Provider-assigned zone identifier
    pub id: String,
    /// Zone apex without trailing dot (e.g. "example.com")
    pub name: String,
}

/// Opaque identifier of a submitted change batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub String);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Propagation status of a change batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Accepted but not yet applied on all name servers
    Pending,
    /// Applied ("change accepted" signal)
    Settled,
}

/// Result of creating a zone
#[derive(Debug, Clone)]
pub struct ZoneCreation {
    /// The new zone
    pub zone: HostedZone,
    /// Change batch that must settle before records are written
    pub change_id: ChangeId,
    /// Name servers the registrar must delegate to
    pub name_servers: Vec<String>,
}

/// One logical record set (all values for a name+type)
///
/// Values are kept in provider wire form: TXT values carry their quotes and
/// MX values are `"<priority> <host>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Fully qualified name without trailing dot
    pub name: String,
    /// Record type
    pub record_type: RecordType,
    /// Time-to-live in seconds
    pub ttl: u32,
    /// Record values
    pub values: Vec<String>,
    /// Provider-specific identifiers backing this set (may be empty)
    #[serde(default)]
    pub ids: Vec<String>,
}

/// A record set read from the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRecord {
    /// Zone the record lives in
    pub zone_id: String,
    /// The record set
    #[serde(flatten)]
    pub set: RecordSet,
}

/// Whether a change creates or deletes a whole record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    /// Create a record set
    Create,
    /// Delete a record set
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("CREATE"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// A single create/delete of a whole record set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Create or delete
    pub action: ChangeAction,
    /// The record set concerned
    pub record: RecordSet,
}

impl Change {
    /// Build a create change
    pub fn create(record: RecordSet) -> Self {
        Self {
            action: ChangeAction::Create,
            record,
        }
    }

    /// Build a delete change
    pub fn delete(record: RecordSet) -> Self {
        Self {
            action: ChangeAction::Delete,
            record,
        }
    }
}

/// Trait for DNS zone provider implementations
///
/// # Trust Level: Untrusted
///
/// Providers execute single API calls and report the outcome. They do not
/// retry, sleep, poll or decide what to change; the reconciler owns all of
/// that. A rate-limit rejection must be reported as
/// [`Error::Throttled`](crate::Error::Throttled) so the reconciler can back
/// off, and a missing entity as [`Error::NotFound`](crate::Error::NotFound).
///
/// # Thread Safety
///
/// Implementations must be thread-safe; zones are applied concurrently.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List every hosted zone visible to the credentials
    async fn list_zones(&self) -> Result<Vec<HostedZone>, crate::Error>;

    /// Create a public hosted zone
    async fn create_zone(&self, name: &str) -> Result<ZoneCreation, crate::Error>;

    /// List all record sets in a zone
    ///
    /// A provider that stores one row per value may return several
    /// [`ObservedRecord`]s for the same name+type; the differ merges them.
    async fn list_records(&self, zone_id: &str) -> Result<Vec<ObservedRecord>, crate::Error>;

    /// Submit a batch of changes to one zone
    ///
    /// Changes are applied in order. The returned id is polled through
    /// [`DnsProvider::change_status`].
    async fn apply_changes(
        &self,
        zone_id: &str,
        changes: &[Change],
    ) -> Result<ChangeId, crate::Error>;

    /// Report whether a submitted batch has settled
    async fn change_status(&self, change_id: &ChangeId) -> Result<ChangeStatus, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    fn create(
        &self,
        config: &crate::config::DnsProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_round_trips_labels() {
        assert_eq!(RecordType::parse("mx"), RecordType::Mx);
        assert_eq!(RecordType::parse("TXT").as_str(), "TXT");
        assert_eq!(RecordType::parse("srv"), RecordType::Other("SRV".into()));
    }
}
