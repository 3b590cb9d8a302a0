//! Configuration types for the mailfwd system
//!
//! [`RawConfig`] is what users write (lenient shapes, see [`raw`]);
//! [`normalize`] turns it into an immutable [`ForwardingConfig`] that the
//! reconciler consumes. Normalization never mutates its input.

pub mod raw;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dns::txt;
use crate::poll::PollPolicy;
use crate::retry::RetryPolicy;
use crate::traits::{SmtpCredential, SpamAction};

pub use raw::{RawConfig, normalize};

/// Normalize an address or address pattern (trim + lowercase)
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Normalize a domain or zone name (trim, lowercase, no trailing dot)
pub fn normalize_domain(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}

/// Domain part of an address (text after the last `@`)
pub fn domain_of(address: &str) -> Option<&str> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

/// A forwarding destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// Redeliver to another mailbox
    Email {
        /// Destination address
        address: String,
    },
    /// Run a command on a remote host with the message
    Command {
        /// Command line to execute
        command: String,
        /// Host to execute on
        host: String,
        /// Credentials reference for the host
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<String>,
    },
}

impl Target {
    /// Email target for `address`
    pub fn email(address: impl Into<String>) -> Self {
        Self::Email {
            address: address.into(),
        }
    }

    /// Address of an email target; commands have none
    pub fn email_address(&self) -> Option<&str> {
        match self {
            Self::Email { address } => Some(address),
            Self::Command { .. } => None,
        }
    }
}

/// Ordered mapping from source address (or pattern) to targets
///
/// Keys are normalized and unique; insertion order is forwarding priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressMapping(IndexMap<String, Vec<Target>>);

impl AddressMapping {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge targets into `source`, keeping first-seen order and dropping duplicates
    pub fn merge(&mut self, source: &str, targets: impl IntoIterator<Item = Target>) {
        let entry = self.0.entry(normalize_address(source)).or_default();
        for target in targets {
            if !entry.contains(&target) {
                entry.push(target);
            }
        }
    }

    /// Targets of `source`, if mapped
    pub fn get(&self, source: &str) -> Option<&[Target]> {
        self.0.get(source).map(Vec::as_slice)
    }

    /// Iterate entries in priority order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Target])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of source addresses
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying ordered map
    pub fn as_map(&self) -> &IndexMap<String, Vec<Target>> {
        &self.0
    }
}

impl<S: AsRef<str>> FromIterator<(S, Vec<Target>)> for AddressMapping {
    fn from_iter<I: IntoIterator<Item = (S, Vec<Target>)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (source, targets) in iter {
            mapping.merge(source.as_ref(), targets);
        }
        mapping
    }
}

/// DMARC disposition requested for failing mail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmarcDisposition {
    /// Monitor only
    #[default]
    None,
    /// Deliver to spam
    Quarantine,
    /// Refuse
    Reject,
}

/// Anti-spoofing (DMARC) settings for a domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmarcPolicy {
    /// Requested disposition
    #[serde(default)]
    pub policy: DmarcDisposition,
    /// Aggregate report address
    #[serde(default)]
    pub report_to: Option<String>,
}

impl DmarcPolicy {
    /// TXT value with relaxed DKIM/SPF alignment
    pub fn record_value(&self) -> String {
        let policy = match self.policy {
            DmarcDisposition::None => "none",
            DmarcDisposition::Quarantine => "quarantine",
            DmarcDisposition::Reject => "reject",
        };
        let mut value = format!("v=DMARC1; p={}; adkim=r; aspf=r", policy);
        if let Some(report_to) = &self.report_to {
            value.push_str("; rua=mailto:");
            value.push_str(report_to);
        }
        value
    }
}

/// One configured domain
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Domain name (normalized)
    pub name: String,
    /// Hosted zone to use instead of the domain itself
    pub zone_override: Option<String>,
    /// Whether DNS records are managed for this domain
    pub setup_dns: bool,
    /// Extra SPF includes
    pub additional_senders: Vec<String>,
    /// Extra apex TXT values
    pub additional_txt_records: Vec<String>,
    /// Fallback targets for unmapped addresses of this domain
    pub default_targets: Vec<Target>,
    /// Spam handling at the routing service
    pub spam_policy: SpamAction,
    /// Recreate the routing registration on every run
    pub force_recreate: bool,
    /// Domain-wide SMTP password
    pub smtp_password: Option<String>,
    /// Additional SMTP logins
    pub credentials: Vec<SmtpCredential>,
    /// Anti-spoofing record
    pub dmarc: Option<DmarcPolicy>,
}

impl DomainSpec {
    /// Spec with defaults for `name`
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: normalize_domain(name.as_ref()),
            zone_override: None,
            setup_dns: true,
            additional_senders: Vec::new(),
            additional_txt_records: Vec::new(),
            default_targets: Vec::new(),
            spam_policy: SpamAction::Disabled,
            force_recreate: false,
            smtp_password: None,
            credentials: Vec::new(),
            dmarc: None,
        }
    }

    /// Set the fallback targets
    pub fn with_default_targets(mut self, targets: Vec<Target>) -> Self {
        self.default_targets = targets;
        self
    }

    /// Set extra SPF includes
    pub fn with_additional_senders(mut self, senders: Vec<String>) -> Self {
        self.additional_senders = senders;
        self
    }

    /// Use another hosted zone
    pub fn with_zone(mut self, zone: impl AsRef<str>) -> Self {
        self.zone_override = Some(normalize_domain(zone.as_ref()));
        self
    }

    /// Zone name used for lookup
    pub fn zone_name(&self) -> &str {
        self.zone_override.as_deref().unwrap_or(&self.name)
    }

    /// SMTP password if it satisfies the provider's bounds (5 to 32 chars)
    pub fn usable_smtp_password(&self) -> Option<&str> {
        self.smtp_password
            .as_deref()
            .filter(|password| (5..=32).contains(&password.chars().count()))
    }
}

impl fmt::Debug for DomainSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainSpec")
            .field("name", &self.name)
            .field("zone_override", &self.zone_override)
            .field("setup_dns", &self.setup_dns)
            .field("additional_senders", &self.additional_senders)
            .field("additional_txt_records", &self.additional_txt_records)
            .field("default_targets", &self.default_targets)
            .field("spam_policy", &self.spam_policy)
            .field("force_recreate", &self.force_recreate)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "<REDACTED>"))
            .field("credentials", &self.credentials)
            .field("dmarc", &self.dmarc)
            .finish()
    }
}

/// Where the gateway finds raw messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Object store bucket holding inbound messages
    #[serde(default)]
    pub bucket: String,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub bucket_prefix: String,
    /// Region of the receiving endpoint
    #[serde(default)]
    pub region: Option<String>,
}

/// Normalized, immutable configuration for one reconciliation run
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Configured domains (unique names)
    pub domains: Vec<DomainSpec>,
    /// Address mapping
    pub mappings: AddressMapping,
    /// Gateway settings
    pub gateway: GatewaySettings,
    /// Engine settings
    pub settings: ReconcilerSettings,
}

impl ForwardingConfig {
    /// Fallback targets keyed by domain name
    pub fn domain_defaults(&self) -> BTreeMap<String, Vec<Target>> {
        self.domains
            .iter()
            .filter(|domain| !domain.default_targets.is_empty())
            .map(|domain| (domain.name.clone(), domain.default_targets.clone()))
            .collect()
    }

    /// Look up a configured domain
    pub fn domain(&self, name: &str) -> Option<&DomainSpec> {
        self.domains.iter().find(|domain| domain.name == name)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<(), crate::Error> {
        let mut seen = std::collections::BTreeSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.name.as_str()) {
                return Err(crate::Error::validation(format!(
                    "Domain configured twice: {}",
                    domain.name
                )));
            }
        }
        self.settings.validate()
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Delete routing domains that are no longer configured
    #[serde(default)]
    pub remove_missing_domains: bool,

    /// Always recreate existing routing domains
    #[serde(default)]
    pub replace_existing_domains: bool,

    /// Re-apply the previous DKIM selector after a domain is recreated
    #[serde(default = "default_true")]
    pub preserve_dkim_selector: bool,

    /// Remove every route before reconciling routes
    #[serde(default)]
    pub force_route_deletion: bool,

    /// Compute and report changes without applying them
    #[serde(default)]
    pub dry_run: bool,

    /// TTL for created record sets (seconds)
    #[serde(default = "default_record_ttl")]
    pub record_ttl: u32,

    /// Maximum bytes per quoted TXT string
    #[serde(default = "default_txt_chunk_size")]
    pub txt_chunk_size: usize,

    /// SPF includes at or above this count are not published
    #[serde(default = "default_sender_lookup_limit")]
    pub sender_lookup_limit: usize,

    /// Backoff for throttled provider calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Attempts to register a missing domain before aborting the run
    #[serde(default = "default_domain_setup_attempts")]
    pub domain_setup_attempts: u32,

    /// Waiting for deletions to disappear
    #[serde(default = "default_deletion_poll")]
    pub deletion_poll: PollPolicy,

    /// Waiting for DNS change batches to settle
    #[serde(default = "default_change_poll")]
    pub change_poll: PollPolicy,

    /// Waiting for domains to verify
    #[serde(default = "default_verification_poll")]
    pub verification_poll: PollPolicy,

    /// Pause between verification triggers (milliseconds)
    #[serde(default = "default_verify_trigger_spacing_ms")]
    pub verify_trigger_spacing_ms: u64,

    /// Zones applied in parallel
    #[serde(default = "default_zone_concurrency")]
    pub zone_concurrency: usize,

    /// Capacity of the reconcile event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcilerSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::config("retry.max_attempts must be > 0"));
        }
        if self.domain_setup_attempts == 0 {
            return Err(crate::Error::config("domain_setup_attempts must be > 0"));
        }
        for (name, poll) in [
            ("deletion_poll", &self.deletion_poll),
            ("change_poll", &self.change_poll),
            ("verification_poll", &self.verification_poll),
        ] {
            if poll.max_attempts == 0 {
                return Err(crate::Error::config(format!(
                    "{}.max_attempts must be > 0",
                    name
                )));
            }
        }
        if !(txt::MIN_CHUNK_SIZE..=255).contains(&self.txt_chunk_size) {
            return Err(crate::Error::config(format!(
                "txt_chunk_size must be between {} and 255",
                txt::MIN_CHUNK_SIZE
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(crate::Error::config(
                "retry.jitter_factor must be between 0.0 and 1.0",
            ));
        }
        if self.zone_concurrency == 0 {
            return Err(crate::Error::config("zone_concurrency must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            remove_missing_domains: false,
            replace_existing_domains: false,
            preserve_dkim_selector: true,
            force_route_deletion: false,
            dry_run: false,
            record_ttl: default_record_ttl(),
            txt_chunk_size: default_txt_chunk_size(),
            sender_lookup_limit: default_sender_lookup_limit(),
            retry: RetryPolicy::default(),
            domain_setup_attempts: default_domain_setup_attempts(),
            deletion_poll: default_deletion_poll(),
            change_poll: default_change_poll(),
            verification_poll: default_verification_poll(),
            verify_trigger_spacing_ms: default_verify_trigger_spacing_ms(),
            zone_concurrency: default_zone_concurrency(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_record_ttl() -> u32 {
    300
}

fn default_txt_chunk_size() -> usize {
    240
}

fn default_sender_lookup_limit() -> usize {
    5
}

fn default_domain_setup_attempts() -> u32 {
    10
}

fn default_deletion_poll() -> PollPolicy {
    PollPolicy::new(500, 120)
}

fn default_change_poll() -> PollPolicy {
    PollPolicy::new(2_000, 150)
}

fn default_verification_poll() -> PollPolicy {
    PollPolicy::new(15_000, 20)
}

fn default_verify_trigger_spacing_ms() -> u64 {
    1_100
}

fn default_zone_concurrency() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// DNS provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DnsProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token
        api_token: String,
        /// Account ID (required to create zones)
        account_id: Option<String>,
        /// Log mutations instead of sending them
        #[serde(default)]
        dry_run: bool,
    },

    /// In-memory provider (rehearsals and tests)
    Memory,

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl DnsProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            DnsProviderConfig::Cloudflare { api_token, .. } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
            DnsProviderConfig::Custom { factory, config } => {
                validate_custom("DNS provider", factory, config)
            }
            DnsProviderConfig::Memory => Ok(()),
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            DnsProviderConfig::Cloudflare { .. } => "cloudflare",
            DnsProviderConfig::Memory => "memory",
            DnsProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl fmt::Debug for DnsProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloudflare {
                account_id,
                dry_run,
                ..
            } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("account_id", account_id)
                .field("dry_run", dry_run)
                .finish(),
            Self::Memory => f.write_str("Memory"),
            Self::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .finish_non_exhaustive(),
        }
    }
}

/// Mail-routing service configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingServiceConfig {
    /// Mailgun
    Mailgun {
        /// Private API key
        api_key: String,
        /// "us" (default) or "eu"
        #[serde(default)]
        region: Option<String>,
    },

    /// In-memory service (rehearsals and tests)
    Memory,

    /// Custom service
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl RoutingServiceConfig {
    /// Validate the service configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RoutingServiceConfig::Mailgun { api_key, region } => {
                if api_key.is_empty() {
                    return Err(crate::Error::config("Mailgun API key cannot be empty"));
                }
                match region.as_deref() {
                    None | Some("us" | "eu") => Ok(()),
                    Some(other) => Err(crate::Error::config(format!(
                        "Unknown Mailgun region '{}', expected 'us' or 'eu'",
                        other
                    ))),
                }
            }
            RoutingServiceConfig::Custom { factory, config } => {
                validate_custom("routing service", factory, config)
            }
            RoutingServiceConfig::Memory => Ok(()),
        }
    }

    /// Get the service type name
    pub fn type_name(&self) -> &str {
        match self {
            RoutingServiceConfig::Mailgun { .. } => "mailgun",
            RoutingServiceConfig::Memory => "memory",
            RoutingServiceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl fmt::Debug for RoutingServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailgun { region, .. } => f
                .debug_struct("Mailgun")
                .field("api_key", &"<REDACTED>")
                .field("region", region)
                .finish(),
            Self::Memory => f.write_str("Memory"),
            Self::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .finish_non_exhaustive(),
        }
    }
}

fn validate_custom(
    kind: &str,
    factory: &str,
    config: &serde_json::Value,
) -> Result<(), crate::Error> {
    if factory.is_empty() {
        return Err(crate::Error::config(format!(
            "Custom {} factory cannot be empty",
            kind
        )));
    }
    if config.is_null() {
        return Err(crate::Error::config(format!(
            "Custom {} config cannot be null",
            kind
        )));
    }
    Ok(())
}
