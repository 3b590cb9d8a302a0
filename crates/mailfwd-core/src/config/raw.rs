//! Lenient user-facing configuration shapes and their normalization

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::{
    AddressMapping, DmarcPolicy, DomainSpec, ForwardingConfig, GatewaySettings,
    ReconcilerSettings, Target, normalize_address, normalize_domain,
};
use crate::error::{Error, Result};
use crate::traits::{SmtpCredential, SpamAction};

/// A single value or a list of values
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Bare value
    One(T),
    /// List
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// A target as written by users: bare address or tagged object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
    /// `"someone@example.org"`
    Address(String),
    /// `{ "type": "email" | "command", ... }`
    Tagged(Target),
}

/// Per-domain fallback: `true` inherits the global default, `false` disables
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDefaultTo {
    /// Inherit (`true`) or none (`false`)
    Inherit(bool),
    /// Explicit targets
    Targets(OneOrMany<RawTarget>),
}

/// A domain entry: bare name or object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDomain {
    /// `"example.com"`
    Name(String),
    /// Full entry
    Entry(RawDomainEntry),
}

/// Object form of a domain entry
#[derive(Debug, Clone, Deserialize)]
pub struct RawDomainEntry {
    /// Domain name
    #[serde(alias = "name")]
    pub domain: String,
    /// Hosted zone override
    #[serde(default, alias = "zoneName")]
    pub zone: Option<String>,
    /// Manage DNS records (default true)
    #[serde(default, alias = "setupDNS", alias = "setupDns")]
    pub setup_dns: Option<bool>,
    /// Extra SPF includes
    #[serde(default, alias = "additionalSenders")]
    pub additional_senders: Option<OneOrMany<String>>,
    /// Extra apex TXT values
    #[serde(default, alias = "additionalTxtRecords")]
    pub additional_txt_records: Vec<String>,
    /// Fallback targets
    #[serde(default, alias = "defaultTo")]
    pub default_to: Option<RawDefaultTo>,
    /// Shorthand for `spam_action: block`
    #[serde(default, alias = "blockSpam")]
    pub block_spam: Option<bool>,
    /// Spam handling
    #[serde(default, alias = "spamAction")]
    pub spam_action: Option<SpamAction>,
    /// Recreate on every run
    #[serde(default, alias = "forceRecreate")]
    pub force: bool,
    /// Domain-wide SMTP password
    #[serde(default, alias = "smtpPassword")]
    pub smtp_password: Option<String>,
    /// Additional SMTP logins
    #[serde(default)]
    pub credentials: Vec<SmtpCredential>,
    /// Anti-spoofing record
    #[serde(default)]
    pub dmarc: Option<DmarcPolicy>,
}

/// Mapping section: one object or a list merged in order
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawMappings {
    /// Single object
    One(IndexMap<String, OneOrMany<RawTarget>>),
    /// Several objects
    Many(Vec<IndexMap<String, OneOrMany<RawTarget>>>),
}

/// Configuration file as written by users
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Global fallback targets
    #[serde(default, alias = "defaultTo")]
    pub default_to: Option<OneOrMany<RawTarget>>,
    /// Domains
    #[serde(default)]
    pub domains: Vec<RawDomain>,
    /// Address mappings
    #[serde(default)]
    pub mappings: Option<RawMappings>,
    /// Bucket holding inbound messages
    #[serde(default)]
    pub bucket: String,
    /// Key prefix inside the bucket
    #[serde(default, alias = "bucketPrefix")]
    pub bucket_prefix: String,
    /// Receiving region
    #[serde(default)]
    pub region: Option<String>,
    /// Engine settings
    #[serde(default)]
    pub settings: ReconcilerSettings,
}

impl RawConfig {
    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Build an immutable [`ForwardingConfig`] from raw input
///
/// Pure: `raw` is only read. Fails on duplicate domains, empty mapping keys,
/// malformed addresses and empty commands.
pub fn normalize(raw: &RawConfig) -> Result<ForwardingConfig> {
    let global_default = match &raw.default_to {
        Some(targets) => resolve_targets(targets.clone().into_vec())?,
        None => Vec::new(),
    };

    let mut seen = BTreeSet::new();
    let mut domains = Vec::with_capacity(raw.domains.len());
    for entry in &raw.domains {
        let domain = normalize_domain_entry(entry, &global_default)?;
        if domain.name.is_empty() {
            return Err(Error::validation("Domain name cannot be empty"));
        }
        if !seen.insert(domain.name.clone()) {
            return Err(Error::validation(format!(
                "Domain configured twice: {}",
                domain.name
            )));
        }
        domains.push(domain);
    }

    let mut mappings = AddressMapping::new();
    let sections = match &raw.mappings {
        None => Vec::new(),
        Some(RawMappings::One(section)) => vec![section],
        Some(RawMappings::Many(sections)) => sections.iter().collect(),
    };
    for section in sections {
        for (source, targets) in section {
            let key = normalize_address(source);
            if key.is_empty() {
                return Err(Error::validation("Mapping source cannot be empty"));
            }
            mappings.merge(&key, resolve_targets(targets.clone().into_vec())?);
        }
    }

    let config = ForwardingConfig {
        domains,
        mappings,
        gateway: GatewaySettings {
            bucket: raw.bucket.trim().to_string(),
            bucket_prefix: raw.bucket_prefix.trim().to_string(),
            region: raw.region.as_ref().map(|r| r.trim().to_string()),
        },
        settings: raw.settings.clone(),
    };
    config.validate()?;
    Ok(config)
}

fn normalize_domain_entry(entry: &RawDomain, global_default: &[Target]) -> Result<DomainSpec> {
    let entry = match entry {
        RawDomain::Name(name) => {
            return Ok(DomainSpec::new(name).with_default_targets(global_default.to_vec()));
        }
        RawDomain::Entry(entry) => entry,
    };

    let default_targets = match &entry.default_to {
        None | Some(RawDefaultTo::Inherit(true)) => global_default.to_vec(),
        Some(RawDefaultTo::Inherit(false)) => Vec::new(),
        Some(RawDefaultTo::Targets(targets)) => resolve_targets(targets.clone().into_vec())?,
    };

    let spam_policy = match (entry.spam_action, entry.block_spam) {
        (Some(action), _) => action,
        (None, Some(true)) => SpamAction::Block,
        (None, _) => SpamAction::Disabled,
    };

    let additional_senders = entry
        .additional_senders
        .clone()
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|sender| sender.trim().to_string())
        .filter(|sender| !sender.is_empty())
        .collect();

    let additional_txt_records = entry
        .additional_txt_records
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();

    Ok(DomainSpec {
        name: normalize_domain(&entry.domain),
        zone_override: entry
            .zone
            .as_deref()
            .map(normalize_domain)
            .filter(|zone| !zone.is_empty()),
        setup_dns: entry.setup_dns.unwrap_or(true),
        additional_senders,
        additional_txt_records,
        default_targets,
        spam_policy,
        force_recreate: entry.force,
        smtp_password: entry.smtp_password.clone(),
        credentials: entry.credentials.clone(),
        dmarc: entry.dmarc.clone(),
    })
}

fn resolve_targets(raw: Vec<RawTarget>) -> Result<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::with_capacity(raw.len());
    for target in raw {
        let target = match target {
            RawTarget::Address(address) => Target::email(normalize_address(&address)),
            RawTarget::Tagged(Target::Email { address }) => {
                Target::email(normalize_address(&address))
            }
            RawTarget::Tagged(Target::Command {
                command,
                host,
                credentials,
            }) => {
                if command.trim().is_empty() {
                    return Err(Error::validation("Command target has an empty command"));
                }
                Target::Command {
                    command,
                    host: host.trim().to_string(),
                    credentials,
                }
            }
        };
        if let Some(address) = target.email_address() {
            validate_address(address)?;
        }
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

fn validate_address(address: &str) -> Result<()> {
    let well_formed = address
        .rsplit_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
        && !address.chars().any(char::is_whitespace);
    if well_formed {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Malformed target address: '{}'",
            address
        )))
    }
}
