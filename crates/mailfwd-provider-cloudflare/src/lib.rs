// # Cloudflare DNS Provider
//
// This crate provides a Cloudflare implementation of the mailfwd
// `DnsProvider` trait.
//
// ## Behavior
//
// - One logical API operation per trait method (list calls follow pages)
// - Full error propagation to the reconciler, which owns retries and backoff
// - HTTP timeout configured (30 seconds)
// - HTTP status mapping: 401/403 authentication, 404 not found,
//   429 throttled, anything else a provider error
// - Change batches go through the atomic batch endpoint and are applied
//   synchronously, so every returned change id is already settled
// - Dry-run mode: reads hit the API, writes are logged and skipped
//
// ## Trust Level: Untrusted (DNS Provider)
//
// **Forbidden Capabilities**:
// - Spawn tasks or threads
// - Implement retry logic
// - Make scheduling decisions
// - Cache state beyond a single request
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - Provider fails fast if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones`
// - Create Zone: POST `/zones`
// - List DNS Records: GET `/zones/:zone_id/dns_records`
// - Batch DNS Records: POST `/zones/:zone_id/dns_records/batch`

use async_trait::async_trait;
use mailfwd_core::config::DnsProviderConfig;
use mailfwd_core::traits::{
    Change, ChangeAction, ChangeId, ChangeStatus, DnsProvider, DnsProviderFactory, HostedZone,
    ObservedRecord, RecordSet, RecordType, ZoneCreation,
};
use mailfwd_core::{Error, Result};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for list endpoints
const PAGE_SIZE: u32 = 100;

/// Cloudflare DNS provider
///
/// # Trust Level: Untrusted
///
/// This provider is isolated, stateless, and single-shot. All coordination
/// (retries, backoff, polling) is owned by the reconciler.
///
/// # Record Model
///
/// Cloudflare stores one row per value. [`list_records`] returns one
/// [`ObservedRecord`] per row, carrying the row id in `ids`; the differ
/// merges rows into sets. Deleting a set deletes every id it carries.
///
/// [`list_records`]: DnsProvider::list_records
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Account ID (required for zone creation)
    account_id: Option<String>,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip writes
    dry_run: bool,

    /// Sequence for synthetic change ids
    batches: AtomicU64,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("account_id", &self.account_id)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `account_id`: Account to create zones in
    /// - `dry_run`: If true, perform GET requests but skip writes
    ///
    /// # Errors
    ///
    /// Fails if the token is empty or the HTTP client cannot be built.
    pub fn new(
        api_token: impl Into<String>,
        account_id: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            account_id,
            client,
            dry_run,
            batches: AtomicU64::new(0),
        })
    }

    fn next_change_id(&self, zone_id: &str) -> ChangeId {
        let sequence = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        ChangeId(format!("cf-{}-{}", zone_id, sequence))
    }

    /// Send a request and unwrap the v4 envelope
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: HTTP request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), what, &error_text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("cloudflare", format!("{}: failed to parse response: {}", what, e)))?;
        envelope_result(body, what)
    }

    /// GET every page of a list endpoint
    async fn get_all(&self, path: &str, what: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{}{}", CLOUDFLARE_API_BASE, path);
            let request = self
                .client
                .get(&url)
                .query(&[("page", page), ("per_page", PAGE_SIZE)]);
            let result = self.send(request, what).await?;
            let rows = result
                .as_array()
                .ok_or_else(|| Error::provider("cloudflare", format!("{}: result is not an array", what)))?;
            let count = rows.len();
            items.extend(rows.iter().cloned());
            if count < PAGE_SIZE as usize {
                return Ok(items);
            }
            page += 1;
        }
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: u16, what: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "{}: invalid API token or insufficient permissions (status {})",
            what, status
        )),
        404 => Error::not_found(format!("{}: {}", what, body)),
        429 => Error::throttled(format!("{}: rate limit exceeded", what)),
        500..=599 => Error::provider(
            "cloudflare",
            format!("{}: server error (transient) {} - {}", what, status, body),
        ),
        _ => Error::provider("cloudflare", format!("{}: {} - {}", what, status, body)),
    }
}

/// Extract `result` from a `{success, errors, result}` envelope
fn envelope_result(mut body: Value, what: &str) -> Result<Value> {
    if body["success"].as_bool() == Some(false) {
        let messages: Vec<String> = body["errors"]
            .as_array()
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|error| error["message"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        return Err(Error::provider(
            "cloudflare",
            format!("{}: {}", what, messages.join("; ")),
        ));
    }
    Ok(body["result"].take())
}

/// Convert one `dns_records` row
///
/// MX priority is folded into the value (`"<priority> <host>"`).
fn record_from_row(zone_id: &str, row: &Value) -> Option<ObservedRecord> {
    let id = row["id"].as_str()?;
    let name = row["name"].as_str()?;
    let record_type = RecordType::parse(row["type"].as_str()?);
    let content = row["content"].as_str()?;
    let value = match record_type {
        RecordType::Mx => format!("{} {}", row["priority"].as_u64().unwrap_or(0), content),
        _ => content.to_string(),
    };
    let ttl = row["ttl"].as_u64().and_then(|ttl| u32::try_from(ttl).ok()).unwrap_or(1);

    Some(ObservedRecord {
        zone_id: zone_id.to_string(),
        set: RecordSet {
            name: name.trim_end_matches('.').to_lowercase(),
            record_type,
            ttl,
            values: vec![value],
            ids: vec![id.to_string()],
        },
    })
}

/// Split an MX value into (priority, host)
fn split_mx(value: &str) -> Result<(u16, &str)> {
    let (priority, host) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::validation(format!("MX value '{}' has no priority", value)))?;
    let priority = priority
        .parse()
        .map_err(|_| Error::validation(format!("MX priority '{}' is not a number", priority)))?;
    Ok((priority, host.trim()))
}

/// Build the body of a batch request
///
/// Deletes reference row ids; each create expands to one row per value.
fn batch_payload(changes: &[Change]) -> Result<Value> {
    let mut deletes = Vec::new();
    let mut posts = Vec::new();

    for change in changes {
        let record = &change.record;
        match change.action {
            ChangeAction::Delete => {
                if record.ids.is_empty() {
                    return Err(Error::validation(format!(
                        "cannot delete {} {} without record ids",
                        record.record_type, record.name
                    )));
                }
                deletes.extend(record.ids.iter().map(|id| json!({ "id": id })));
            }
            ChangeAction::Create => {
                for value in &record.values {
                    let row = match record.record_type {
                        RecordType::Mx => {
                            let (priority, host) = split_mx(value)?;
                            json!({
                                "type": "MX",
                                "name": record.name,
                                "content": host,
                                "priority": priority,
                                "ttl": record.ttl,
                            })
                        }
                        _ => json!({
                            "type": record.record_type.as_str(),
                            "name": record.name,
                            "content": value,
                            "ttl": record.ttl,
                        }),
                    };
                    posts.push(row);
                }
            }
        }
    }

    Ok(json!({ "deletes": deletes, "posts": posts }))
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_zones(&self) -> Result<Vec<HostedZone>> {
        let rows = self.get_all("/zones", "list zones").await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(HostedZone {
                    id: row["id"].as_str()?.to_string(),
                    name: row["name"].as_str()?.trim_end_matches('.').to_lowercase(),
                })
            })
            .collect())
    }

    /// Create a full-setup zone
    ///
    /// ```http
    /// POST /zones
    /// { "name": "example.com", "account": { "id": "..." }, "type": "full" }
    /// ```
    async fn create_zone(&self, name: &str) -> Result<ZoneCreation> {
        let account_id = self
            .account_id
            .as_deref()
            .ok_or_else(|| Error::config("Cloudflare account ID is required to create zones"))?;
        let payload = json!({
            "name": name,
            "account": { "id": account_id },
            "type": "full",
        });

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would create zone {}", name);
            let zone = HostedZone {
                id: format!("dry-run-{}", name),
                name: name.to_string(),
            };
            let change_id = self.next_change_id(&zone.id);
            return Ok(ZoneCreation {
                zone,
                change_id,
                name_servers: Vec::new(),
            });
        }

        let url = format!("{}/zones", CLOUDFLARE_API_BASE);
        let result = self
            .send(self.client.post(&url).json(&payload), "create zone")
            .await?;

        let id = result["id"]
            .as_str()
            .ok_or_else(|| Error::provider("cloudflare", "create zone: result.id is not a string"))?;
        let name_servers = result["name_servers"]
            .as_array()
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|server| server.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!("Created Cloudflare zone {} ({})", name, id);
        let zone = HostedZone {
            id: id.to_string(),
            name: name.to_string(),
        };
        let change_id = self.next_change_id(&zone.id);
        Ok(ZoneCreation {
            zone,
            change_id,
            name_servers,
        })
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<ObservedRecord>> {
        let rows = self
            .get_all(&format!("/zones/{}/dns_records", zone_id), "list records")
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| record_from_row(zone_id, row))
            .collect())
    }

    /// Submit changes through the batch endpoint
    ///
    /// The batch is atomic: either every delete and create lands or none.
    async fn apply_changes(&self, zone_id: &str, changes: &[Change]) -> Result<ChangeId> {
        let payload = batch_payload(changes)?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send batch to zone {} with payload: {}",
                zone_id,
                payload
            );
            return Ok(self.next_change_id(zone_id));
        }

        let url = format!("{}/zones/{}/dns_records/batch", CLOUDFLARE_API_BASE, zone_id);
        self.send(self.client.post(&url).json(&payload), "apply DNS batch")
            .await?;
        tracing::debug!("Applied {} change(s) to Cloudflare zone {}", changes.len(), zone_id);
        Ok(self.next_change_id(zone_id))
    }

    async fn change_status(&self, _change_id: &ChangeId) -> Result<ChangeStatus> {
        Ok(ChangeStatus::Settled)
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &DnsProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            DnsProviderConfig::Cloudflare {
                api_token,
                account_id,
                dry_run,
            } => {
                if *dry_run {
                    tracing::warn!(
                        "Cloudflare provider running in DRY-RUN mode - no changes will be made"
                    );
                }
                Ok(Box::new(CloudflareProvider::new(
                    api_token.clone(),
                    account_id.clone(),
                    *dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use mailfwd_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mailfwd_provider_cloudflare::register(&registry);
/// assert!(registry.has_dns_provider("cloudflare"));
/// ```
pub fn register(registry: &mailfwd_core::ProviderRegistry) {
    registry.register_dns_provider("cloudflare", Box::new(CloudflareFactory));
}
