// # Mail Routing Service Trait
//
// Defines the capability interface over the service that receives mail for
// the configured domains and matches it against address rules.
//
// ## Implementations
//
// - Mailgun: `mailfwd-routing-mailgun` crate
// - In-memory: `mailfwd_core::memory::MemoryMailRouting`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::routes::{ObservedRoute, RouteRule};
use crate::traits::dns_provider::RecordType;

/// What the service does with messages it classifies as spam
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamAction {
    /// Deliver untouched
    #[default]
    Disabled,
    /// Deliver with a spam header
    Tag,
    /// Drop
    Block,
}

impl SpamAction {
    /// Provider-facing label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Tag => "tag",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for SpamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification state of a registered domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    /// DNS verified, mail flowing
    Active,
    /// Waiting for DNS verification
    Unverified,
    /// Disabled by the provider
    Disabled,
    /// Unrecognized provider state
    #[serde(untagged)]
    Other(String),
}

impl DomainState {
    /// Parse a provider state label
    pub fn parse(label: &str) -> Self {
        match label {
            "active" => Self::Active,
            "unverified" => Self::Unverified,
            "disabled" => Self::Disabled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the domain has finished verification
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// DNS record the service asks the domain owner to publish for sending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingRecord {
    /// Record type (TXT, CNAME, ...)
    pub record_type: RecordType,
    /// Fully qualified record name
    pub name: String,
    /// Raw record value
    pub value: String,
}

/// Inbound mail endpoint the MX record must point at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingRecord {
    /// MX preference
    pub priority: u16,
    /// Mail exchanger host
    pub value: String,
}

/// A domain as registered at the mail-routing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDomain {
    /// Domain name
    pub name: String,
    /// Verification state
    pub state: DomainState,
    /// Spam handling
    pub spam_action: SpamAction,
    /// Records required for sending (SPF, DKIM, tracking)
    pub sending_records: Vec<SendingRecord>,
    /// Records required for receiving (MX)
    pub receiving_records: Vec<ReceivingRecord>,
}

impl RoutingDomain {
    /// Current DKIM selector, taken from the `<selector>._domainkey.` record
    pub fn dkim_selector(&self) -> Option<String> {
        self.sending_records
            .iter()
            .find(|record| record.name.contains("._domainkey"))
            .and_then(|record| record.name.split('.').next())
            .filter(|selector| !selector.is_empty())
            .map(str::to_string)
    }

    /// Rename DKIM records to use `selector`
    pub fn apply_dkim_selector(&mut self, selector: &str) {
        let target = format!("{}._domainkey.{}", selector, self.name);
        for record in &mut self.sending_records {
            if record.name.contains("._domainkey") {
                record.name.clone_from(&target);
            }
        }
    }
}

/// Summary entry of the domain list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSummary {
    /// Domain name
    pub name: String,
    /// Verification state
    pub state: DomainState,
}

/// Parameters for registering a domain
#[derive(Clone, PartialEq, Eq)]
pub struct DomainRegistration {
    /// Domain name
    pub name: String,
    /// Spam handling
    pub spam_action: SpamAction,
    /// Domain-wide SMTP password
    pub smtp_password: Option<String>,
}

impl fmt::Debug for DomainRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainRegistration")
            .field("name", &self.name)
            .field("spam_action", &self.spam_action)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Additional SMTP login for a domain
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpCredential {
    /// Login (local part or full address)
    pub login: String,
    /// Password
    pub password: String,
}

impl SmtpCredential {
    /// Login must have at least 3 characters, password 5 to 32
    pub fn is_valid(&self) -> bool {
        self.login.chars().count() >= 3 && (5..=32).contains(&self.password.chars().count())
    }
}

impl fmt::Debug for SmtpCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredential")
            .field("login", &self.login)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Trait for mail-routing service implementations
///
/// # Trust Level: Untrusted
///
/// Same contract as [`DnsProvider`](crate::DnsProvider): one API call per
/// method, no retry or sleeping, throttling reported as
/// [`Error::Throttled`](crate::Error::Throttled) and a missing domain as
/// [`Error::NotFound`](crate::Error::NotFound).
#[async_trait]
pub trait MailRoutingService: Send + Sync {
    /// Fetch one domain with its DNS requirements
    async fn get_domain(&self, name: &str) -> Result<RoutingDomain, crate::Error>;

    /// Register a domain
    async fn create_domain(
        &self,
        registration: &DomainRegistration,
    ) -> Result<RoutingDomain, crate::Error>;

    /// Remove a domain
    async fn delete_domain(&self, name: &str) -> Result<(), crate::Error>;

    /// List all registered domains
    async fn list_domains(&self) -> Result<Vec<DomainSummary>, crate::Error>;

    /// Pin the DKIM selector of a domain
    async fn set_authentication_selector(
        &self,
        domain: &str,
        selector: &str,
    ) -> Result<(), crate::Error>;

    /// Add an SMTP credential to a domain
    async fn create_credential(
        &self,
        domain: &str,
        credential: &SmtpCredential,
    ) -> Result<(), crate::Error>;

    /// List all routes
    async fn list_routes(&self) -> Result<Vec<ObservedRoute>, crate::Error>;

    /// Create a route, returning its provider id
    async fn create_route(&self, rule: &RouteRule) -> Result<String, crate::Error>;

    /// Delete a route by provider id
    async fn delete_route(&self, id: &str) -> Result<(), crate::Error>;

    /// Ask the service to re-check a domain's DNS
    async fn verify_domain(&self, name: &str) -> Result<DomainState, crate::Error>;

    /// Get the service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}

/// Helper trait for constructing mail-routing services from configuration
pub trait MailRoutingFactory: Send + Sync {
    /// Create a MailRoutingService instance from configuration
    fn create(
        &self,
        config: &crate::config::RoutingServiceConfig,
    ) -> Result<Box<dyn MailRoutingService>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_with_dkim(name: &str) -> RoutingDomain {
        RoutingDomain {
            name: "example.com".into(),
            state: DomainState::Unverified,
            spam_action: SpamAction::Disabled,
            sending_records: vec![SendingRecord {
                record_type: RecordType::Txt,
                name: name.into(),
                value: "k=rsa; p=MIGf".into(),
            }],
            receiving_records: Vec::new(),
        }
    }

    #[test]
    fn dkim_selector_is_first_label() {
        let domain = domain_with_dkim("mx._domainkey.example.com");
        assert_eq!(domain.dkim_selector().as_deref(), Some("mx"));
    }

    #[test]
    fn apply_dkim_selector_renames_record() {
        let mut domain = domain_with_dkim("k1._domainkey.example.com");
        domain.apply_dkim_selector("pic");
        assert_eq!(domain.sending_records[0].name, "pic._domainkey.example.com");
    }

    #[test]
    fn credential_bounds() {
        let ok = SmtpCredential {
            login: "bot".into(),
            password: "secret".into(),
        };
        let short_login = SmtpCredential {
            login: "ab".into(),
            password: "secret".into(),
        };
        let long_password = SmtpCredential {
            login: "bot".into(),
            password: "x".repeat(33),
        };
        assert!(ok.is_valid());
        assert!(!short_login.is_valid());
        assert!(!long_password.is_valid());
        assert!(!format!("{:?}", ok).contains("secret"));
    }
}
