// # Mailgun Routing Service
//
// This crate provides a Mailgun implementation of the mailfwd
// `MailRoutingService` trait.
//
// ## Behavior
//
// - One API call per trait method (list calls follow `skip` pages)
// - Full error propagation to the reconciler, which owns retries, polling
//   and the domain-creation attempt budget
// - HTTP timeout configured (30 seconds)
// - HTTP status mapping: 401/403 authentication, 404 not found,
//   429 throttled, anything else a provider error
// - Writes are sent as `application/x-www-form-urlencoded`
//
// ## Trust Level: Untrusted (Mail Routing Service)
//
// **Forbidden Capabilities**:
// - Spawn tasks or threads
// - Implement retry logic
// - Make scheduling decisions
//
// ## Security Requirements
//
// - API key and SMTP passwords NEVER appear in logs
// - Service fails fast if the key is empty
//
// ## API Reference
//
// - Mailgun API v3: https://documentation.mailgun.com/docs/mailgun/api-reference/
// - Domains: `/domains`, `/domains/:name`, `/domains/:name/verify`,
//   `/domains/:name/dkim_selector`, `/domains/:name/credentials`
// - Routes: `/routes`, `/routes/:id`

use async_trait::async_trait;
use mailfwd_core::config::RoutingServiceConfig;
use mailfwd_core::routes::{ObservedRoute, RouteRule};
use mailfwd_core::traits::{
    DomainRegistration, DomainState, DomainSummary, MailRoutingFactory, MailRoutingService,
    ReceivingRecord, RecordType, RoutingDomain, SendingRecord, SmtpCredential, SpamAction,
};
use mailfwd_core::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// API base for the US region
const MAILGUN_API_BASE_US: &str = "https://api.mailgun.net/v3";

/// API base for the EU region
const MAILGUN_API_BASE_EU: &str = "https://api.eu.mailgun.net/v3";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for list endpoints (the API maximum)
const LIST_LIMIT: usize = 1000;

/// Mailgun routing service
///
/// # Trust Level: Untrusted
///
/// Stateless and single-shot; all coordination is owned by the reconciler.
pub struct MailgunService {
    /// Private API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// Regional API base URL
    base_url: &'static str,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for MailgunService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailgunService")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl MailgunService {
    /// Create a new Mailgun service
    ///
    /// # Parameters
    ///
    /// - `api_key`: Private API key
    /// - `region`: `"eu"` selects the EU endpoint, anything else the US one
    ///
    /// # Errors
    ///
    /// Fails if the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, region: Option<&str>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("Mailgun API key cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url_for(region),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send an authenticated request and parse the JSON body
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .basic_auth("api", Some(&self.api_key))
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

        response
            .json()
            .await
            .map_err(|e| Error::provider("mailgun", format!("{}: failed to parse response: {}", what, e)))
    }

    /// GET every page of a `{ items: [...] }` list endpoint
    async fn get_all(&self, path: &str, what: &str) -> Result<Vec<Value>> {
        let url = self.url(path);
        let url = url.as_str();
        collect_pages(LIST_LIMIT, move |skip| {
            let request = self
                .client
                .get(url)
                .query(&[("limit", LIST_LIMIT), ("skip", skip)]);
            self.send(request, what)
        })
        .await
    }
}

/// Follow `skip` offsets until a page comes back short
async fn collect_pages<F, Fut>(limit: usize, mut fetch: F) -> Result<Vec<Value>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut items = Vec::new();
    loop {
        let mut body = fetch(items.len()).await?;
        let page = match body["items"].take() {
            Value::Array(page) => page,
            Value::Null => Vec::new(),
            _ => return Err(Error::provider("mailgun", "list response items is not an array")),
        };
        let count = page.len();
        items.extend(page);
        if count < limit {
            return Ok(items);
        }
    }
}

fn base_url_for(region: Option<&str>) -> &'static str {
    match region {
        Some(region) if region.eq_ignore_ascii_case("eu") => MAILGUN_API_BASE_EU,
        _ => MAILGUN_API_BASE_US,
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: u16, what: &str, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => Error::auth(format!("{}: invalid API key (status {})", what, status)),
        404 => Error::not_found(format!("{}: {}", what, message)),
        429 => Error::throttled(format!("{}: rate limit exceeded", what)),
        _ => Error::provider("mailgun", format!("{}: {} - {}", what, status, message)),
    }
}

/// Priorities arrive as numbers or numeric strings
fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn spam_action(value: &Value) -> SpamAction {
    match value.as_str() {
        Some("tag") => SpamAction::Tag,
        Some("block") => SpamAction::Block,
        _ => SpamAction::Disabled,
    }
}

/// Parse a domain document (`GET /domains/:name`, `POST /domains`, `PUT .../verify`)
fn domain_from_body(body: &Value) -> Result<RoutingDomain> {
    let domain = &body["domain"];
    let name = domain["name"]
        .as_str()
        .ok_or_else(|| Error::provider("mailgun", "domain response has no domain.name"))?;

    let sending_records = body["sending_dns_records"]
        .as_array()
        .map(|records| {
            records
                .iter()
                .filter_map(|record| {
                    Some(SendingRecord {
                        record_type: RecordType::parse(record["record_type"].as_str()?),
                        name: record["name"].as_str()?.to_lowercase(),
                        value: record["value"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let receiving_records = body["receiving_dns_records"]
        .as_array()
        .map(|records| {
            records
                .iter()
                .filter(|record| record["record_type"].as_str() == Some("MX"))
                .filter_map(|record| {
                    Some(ReceivingRecord {
                        priority: u16::try_from(as_u64(&record["priority"])?).ok()?,
                        value: record["value"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RoutingDomain {
        name: name.to_lowercase(),
        state: DomainState::parse(domain["state"].as_str().unwrap_or_default()),
        spam_action: spam_action(&domain["spam_action"]),
        sending_records,
        receiving_records,
    })
}

/// Parse one entry of `GET /routes`
fn route_from_item(item: &Value) -> Option<ObservedRoute> {
    let actions = item["actions"]
        .as_array()?
        .iter()
        .filter_map(|action| action.as_str().map(str::to_string))
        .collect();
    Some(ObservedRoute {
        id: item["id"].as_str()?.to_string(),
        rule: RouteRule {
            expression: item["expression"].as_str()?.to_string(),
            actions,
            priority: u32::try_from(as_u64(&item["priority"])?).ok()?,
        },
    })
}

/// Form fields for `POST /routes`; `action` repeats once per action
fn route_form(rule: &RouteRule) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("priority", rule.priority.to_string()),
        ("expression", rule.expression.clone()),
    ];
    form.extend(rule.actions.iter().map(|action| ("action", action.clone())));
    form
}

#[async_trait]
impl MailRoutingService for MailgunService {
    async fn get_domain(&self, name: &str) -> Result<RoutingDomain> {
        let body = self
            .send(self.client.get(self.url(&format!("/domains/{}", name))), "get domain")
            .await?;
        domain_from_body(&body)
    }

    async fn create_domain(&self, registration: &DomainRegistration) -> Result<RoutingDomain> {
        let mut form = vec![
            ("name", registration.name.clone()),
            ("spam_action", registration.spam_action.as_str().to_string()),
        ];
        if let Some(password) = &registration.smtp_password {
            form.push(("smtp_password", password.clone()));
        }

        let body = self
            .send(self.client.post(self.url("/domains")).form(&form), "create domain")
            .await?;
        tracing::info!("Registered Mailgun domain {}", registration.name);
        domain_from_body(&body)
    }

    async fn delete_domain(&self, name: &str) -> Result<()> {
        self.send(
            self.client.delete(self.url(&format!("/domains/{}", name))),
            "delete domain",
        )
        .await?;
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<DomainSummary>> {
        let items = self.get_all("/domains", "list domains").await?;
        Ok(items
            .iter()
            .filter_map(|item| {
                Some(DomainSummary {
                    name: item["name"].as_str()?.to_lowercase(),
                    state: DomainState::parse(item["state"].as_str().unwrap_or_default()),
                })
            })
            .collect())
    }

    async fn set_authentication_selector(&self, domain: &str, selector: &str) -> Result<()> {
        let body = self
            .send(
                self.client
                    .put(self.url(&format!("/domains/{}/dkim_selector", domain)))
                    .form(&[("dkim_selector", selector)]),
                "set DKIM selector",
            )
            .await?;
        tracing::debug!(
            "DKIM selector for {}: {}",
            domain,
            body["message"].as_str().unwrap_or("updated")
        );
        Ok(())
    }

    async fn create_credential(&self, domain: &str, credential: &SmtpCredential) -> Result<()> {
        self.send(
            self.client
                .post(self.url(&format!("/domains/{}/credentials", domain)))
                .form(&[
                    ("login", credential.login.as_str()),
                    ("password", credential.password.as_str()),
                ]),
            "create credential",
        )
        .await?;
        Ok(())
    }

    async fn list_routes(&self) -> Result<Vec<ObservedRoute>> {
        let items = self.get_all("/routes", "list routes").await?;
        Ok(items.iter().filter_map(route_from_item).collect())
    }

    async fn create_route(&self, rule: &RouteRule) -> Result<String> {
        let body = self
            .send(
                self.client.post(self.url("/routes")).form(&route_form(rule)),
                "create route",
            )
            .await?;
        body["route"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::provider("mailgun", "create route: response has no route.id"))
    }

    async fn delete_route(&self, id: &str) -> Result<()> {
        self.send(
            self.client.delete(self.url(&format!("/routes/{}", id))),
            "delete route",
        )
        .await?;
        Ok(())
    }

    async fn verify_domain(&self, name: &str) -> Result<DomainState> {
        let body = self
            .send(
                self.client.put(self.url(&format!("/domains/{}/verify", name))),
                "verify domain",
            )
            .await?;
        Ok(DomainState::parse(
            body["domain"]["state"].as_str().unwrap_or_default(),
        ))
    }

    fn service_name(&self) -> &'static str {
        "mailgun"
    }
}

/// Factory for creating Mailgun services
pub struct MailgunFactory;

impl MailRoutingFactory for MailgunFactory {
    fn create(&self, config: &RoutingServiceConfig) -> Result<Box<dyn MailRoutingService>> {
        match config {
            RoutingServiceConfig::Mailgun { api_key, region } => Ok(Box::new(
                MailgunService::new(api_key.clone(), region.as_deref())?,
            )),
            _ => Err(Error::config("Invalid config for Mailgun service")),
        }
    }
}

/// Register the Mailgun service with a registry
///
/// # Example
///
/// ```rust
/// use mailfwd_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mailfwd_routing_mailgun::register(&registry);
/// assert!(registry.has_routing_service("mailgun"));
/// ```
pub fn register(registry: &mailfwd_core::ProviderRegistry) {
    registry.register_routing_service("mailgun", Box::new(MailgunFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factory_creation() {
        let config = RoutingServiceConfig::Mailgun {
            api_key: "key-test".to_string(),
            region: Some("eu".to_string()),
        };
        let service = MailgunFactory.create(&config).unwrap();
        assert_eq!(service.service_name(), "mailgun");
    }

    #[test]
    fn test_factory_missing_key() {
        let config = RoutingServiceConfig::Mailgun {
            api_key: String::new(),
            region: None,
        };
        assert!(MailgunFactory.create(&config).is_err());
        assert!(MailgunFactory.create(&RoutingServiceConfig::Memory).is_err());
    }

    #[test]
    fn test_region_selects_endpoint() {
        assert_eq!(base_url_for(Some("EU")), MAILGUN_API_BASE_EU);
        assert_eq!(base_url_for(Some("us")), MAILGUN_API_BASE_US);
        assert_eq!(base_url_for(None), MAILGUN_API_BASE_US);
    }

    #[test]
    fn test_api_key_not_exposed_in_debug() {
        let service = MailgunService::new("key-secret-12345", None).unwrap();
        let debug_str = format!("{:?}", service);
        assert!(!debug_str.contains("key-secret"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(429, "op", "").is_throttled());
        assert!(status_error(404, "op", r#"{"message":"Domain not found"}"#).is_not_found());
        assert!(matches!(status_error(401, "op", ""), Error::Authentication(_)));
        let err = status_error(400, "create route", r#"{"message":"Invalid expression"}"#);
        assert!(err.to_string().contains("Invalid expression"));
    }

    #[test]
    fn test_domain_document() {
        let body = json!({
            "domain": { "name": "Example.com", "state": "unverified", "spam_action": "tag" },
            "receiving_dns_records": [
                { "record_type": "MX", "priority": "10", "value": "mxa.mailgun.org", "valid": "unknown" },
                { "record_type": "MX", "priority": 10, "value": "mxb.mailgun.org", "valid": "unknown" }
            ],
            "sending_dns_records": [
                { "record_type": "TXT", "name": "example.com", "value": "v=spf1 include:mailgun.org ~all" },
                { "record_type": "TXT", "name": "k1._domainkey.example.com", "value": "k=rsa; p=MIGf" },
                { "record_type": "CNAME", "name": "email.example.com", "value": "mailgun.org" }
            ]
        });

        let domain = domain_from_body(&body).unwrap();
        assert_eq!(domain.name, "example.com");
        assert_eq!(domain.state, DomainState::Unverified);
        assert_eq!(domain.spam_action, SpamAction::Tag);
        assert_eq!(domain.receiving_records.len(), 2);
        assert_eq!(domain.receiving_records[0].priority, 10);
        assert_eq!(domain.dkim_selector().as_deref(), Some("k1"));
        assert_eq!(domain.sending_records[2].record_type, RecordType::Cname);
    }

    #[test]
    fn test_route_item_and_form() {
        let item = json!({
            "id": "4f3bad2335335426750048c6",
            "priority": 10,
            "expression": "match_recipient(\"info@example.com\")",
            "actions": ["forward(\"bob@gmail.com\")", "stop()"],
            "description": ""
        });
        let route = route_from_item(&item).unwrap();
        assert_eq!(route.rule.actions.len(), 2);

        let form = route_form(&route.rule);
        assert_eq!(form[0], ("priority", "10".to_string()));
        assert_eq!(form.iter().filter(|(key, _)| *key == "action").count(), 2);
    }

    #[tokio::test]
    async fn test_list_follows_skip_until_short_page() {
        let pages = [
            json!({ "items": [{ "id": "r1" }, { "id": "r2" }] }),
            json!({ "items": [{ "id": "r3" }, { "id": "r4" }] }),
            json!({ "items": [{ "id": "r5" }] }),
        ];
        let mut offsets = Vec::new();

        let items = collect_pages(2, |skip| {
            offsets.push(skip);
            let page = pages[skip / 2].clone();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(items[4]["id"], "r5");
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_list_stops_on_empty_page() {
        let mut calls = 0;
        let items = collect_pages(2, |skip| {
            calls += 1;
            let page = if skip == 0 {
                json!({ "items": [{ "id": "a" }, { "id": "b" }] })
            } else {
                json!({ "items": [] })
            };
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(calls, 2);
    }
}
