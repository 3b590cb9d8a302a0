// # Memory Mail Routing
//
// In-memory implementation of MailRoutingService.
//
// Registering a domain issues a fresh DKIM selector (`s<generation>`), the
// way hosted services rotate keys when a domain is recreated. Domains stay
// unverified until they have been asked to verify often enough
// (`verify_after`), which lets tests exercise convergence and timeouts.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::routes::{ObservedRoute, RouteRule};
use crate::traits::{
    DomainRegistration, DomainState, DomainSummary, MailRoutingService, ReceivingRecord,
    RecordType, RoutingDomain, SendingRecord, SmtpCredential,
};

#[derive(Debug, Default)]
struct RoutingState {
    domains: BTreeMap<String, RoutingDomain>,
    verify_counts: BTreeMap<String, u32>,
    credentials: BTreeMap<String, Vec<String>>,
    routes: Vec<ObservedRoute>,
    failing_lookups: BTreeSet<String>,
    failing_creates: BTreeSet<String>,
    denied_creates: BTreeSet<String>,
    lost_create_responses: BTreeSet<String>,
    generation: u64,
    next_route: u64,
}

/// In-memory mail-routing service
#[derive(Debug, Clone)]
pub struct MemoryMailRouting {
    state: Arc<RwLock<RoutingState>>,
    verify_after: Option<u32>,
    throttle_remaining: Arc<AtomicUsize>,
    mutations: Arc<AtomicUsize>,
    create_domain_calls: Arc<AtomicUsize>,
    delete_domain_calls: Arc<AtomicUsize>,
    verify_calls: Arc<AtomicUsize>,
    selector_calls: Arc<AtomicUsize>,
}

impl Default for MemoryMailRouting {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMailRouting {
    /// Create a service whose domains verify on the first trigger
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RoutingState::default())),
            verify_after: Some(1),
            throttle_remaining: Arc::new(AtomicUsize::new(0)),
            mutations: Arc::new(AtomicUsize::new(0)),
            create_domain_calls: Arc::new(AtomicUsize::new(0)),
            delete_domain_calls: Arc::new(AtomicUsize::new(0)),
            verify_calls: Arc::new(AtomicUsize::new(0)),
            selector_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Domains become active after `triggers` verify calls; `None` never
    pub fn verify_after(mut self, triggers: Option<u32>) -> Self {
        self.verify_after = triggers;
        self
    }

    /// Make `get_domain` fail for `name`
    pub async fn fail_lookup(&self, name: &str) {
        self.state
            .write()
            .await
            .failing_lookups
            .insert(name.to_string());
    }

    /// Make `create_domain` fail for `name`
    pub async fn fail_create(&self, name: &str) {
        self.state
            .write()
            .await
            .failing_creates
            .insert(name.to_string());
    }

    /// Make `create_domain` for `name` fail authentication
    pub async fn deny_create(&self, name: &str) {
        self.state
            .write()
            .await
            .denied_creates
            .insert(name.to_string());
    }

    /// Register `name` on the next create but report that create as failed
    pub async fn lose_create_response(&self, name: &str) {
        self.state
            .write()
            .await
            .lost_create_responses
            .insert(name.to_string());
    }

    /// Report the next `count` calls as throttled
    pub fn throttle_next(&self, count: usize) {
        self.throttle_remaining.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a registered domain
    pub async fn domain(&self, name: &str) -> Option<RoutingDomain> {
        self.state.read().await.domains.get(name).cloned()
    }

    /// Current routes
    pub async fn routes(&self) -> Vec<ObservedRoute> {
        self.state.read().await.routes.clone()
    }

    /// Logins created for a domain
    pub async fn credentials(&self, domain: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .credentials
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a route directly, bypassing the API
    pub async fn insert_route(&self, rule: RouteRule) -> String {
        let mut state = self.state.write().await;
        Self::push_route(&mut state, rule)
    }

    /// Number of mutating calls
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Number of create_domain calls
    pub fn create_domain_calls(&self) -> usize {
        self.create_domain_calls.load(Ordering::SeqCst)
    }

    /// Number of delete_domain calls
    pub fn delete_domain_calls(&self) -> usize {
        self.delete_domain_calls.load(Ordering::SeqCst)
    }

    /// Number of verify_domain calls
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Number of set_authentication_selector calls
    pub fn selector_calls(&self) -> usize {
        self.selector_calls.load(Ordering::SeqCst)
    }

    fn check_throttle(&self) -> Result<(), Error> {
        let throttled = self
            .throttle_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            Err(Error::throttled("memory routing service rate limit"))
        } else {
            Ok(())
        }
    }

    fn mutate(&self) -> Result<(), Error> {
        self.check_throttle()?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn push_route(state: &mut RoutingState, rule: RouteRule) -> String {
        state.next_route += 1;
        let id = format!("route-{}", state.next_route);
        state.routes.push(ObservedRoute {
            id: id.clone(),
            rule,
        });
        id
    }

    fn build_domain(registration: &DomainRegistration, generation: u64) -> RoutingDomain {
        let name = registration.name.clone();
        RoutingDomain {
            state: DomainState::Unverified,
            spam_action: registration.spam_action,
            sending_records: vec![
                SendingRecord {
                    record_type: RecordType::Txt,
                    name: name.clone(),
                    value: "v=spf1 include:mailgun.org ~all".into(),
                },
                SendingRecord {
                    record_type: RecordType::Txt,
                    name: format!("s{}._domainkey.{}", generation, name),
                    value: format!("k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQ{}", "x".repeat(360)),
                },
                SendingRecord {
                    record_type: RecordType::Cname,
                    name: format!("email.{}", name),
                    value: "mailgun.org".into(),
                },
            ],
            receiving_records: vec![
                ReceivingRecord {
                    priority: 10,
                    value: "mxa.mailgun.org".into(),
                },
                ReceivingRecord {
                    priority: 10,
                    value: "mxb.mailgun.org".into(),
                },
            ],
            name,
        }
    }
}

#[async_trait]
impl MailRoutingService for MemoryMailRouting {
    async fn get_domain(&self, name: &str) -> Result<RoutingDomain, Error> {
        self.check_throttle()?;
        let state = self.state.read().await;
        if state.failing_lookups.contains(name) {
            return Err(Error::provider("memory", format!("lookup of {} failed", name)));
        }
        state
            .domains
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("domain {}", name)))
    }

    async fn create_domain(&self, registration: &DomainRegistration) -> Result<RoutingDomain, Error> {
        self.mutate()?;
        self.create_domain_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if state.denied_creates.contains(&registration.name) {
            return Err(Error::auth(format!(
                "not allowed to create {}",
                registration.name
            )));
        }
        if state.failing_creates.contains(&registration.name) {
            return Err(Error::provider(
                "memory",
                format!("creating {} failed", registration.name),
            ));
        }
        if state.domains.contains_key(&registration.name) {
            return Err(Error::provider(
                "memory",
                format!("domain {} already exists", registration.name),
            ));
        }
        state.generation += 1;
        let domain = Self::build_domain(registration, state.generation);
        state.domains.insert(domain.name.clone(), domain.clone());
        state.verify_counts.remove(&domain.name);
        if let Some(password) = &registration.smtp_password {
            if !password.is_empty() {
                state
                    .credentials
                    .entry(domain.name.clone())
                    .or_default()
                    .push(format!("postmaster@{}", domain.name));
            }
        }
        if state.lost_create_responses.remove(&domain.name) {
            return Err(Error::http(format!(
                "connection reset while creating {}",
                domain.name
            )));
        }
        Ok(domain)
    }

    async fn delete_domain(&self, name: &str) -> Result<(), Error> {
        self.mutate()?;
        self.delete_domain_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        state
            .domains
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("domain {}", name)))?;
        state.credentials.remove(name);
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<DomainSummary>, Error> {
        self.check_throttle()?;
        Ok(self
            .state
            .read()
            .await
            .domains
            .values()
            .map(|domain| DomainSummary {
                name: domain.name.clone(),
                state: domain.state.clone(),
            })
            .collect())
    }

    async fn set_authentication_selector(&self, domain: &str, selector: &str) -> Result<(), Error> {
        self.mutate()?;
        self.selector_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let entry = state
            .domains
            .get_mut(domain)
            .ok_or_else(|| Error::not_found(format!("domain {}", domain)))?;
        entry.apply_dkim_selector(selector);
        Ok(())
    }

    async fn create_credential(&self, domain: &str, credential: &SmtpCredential) -> Result<(), Error> {
        self.mutate()?;
        let mut state = self.state.write().await;
        if !state.domains.contains_key(domain) {
            return Err(Error::not_found(format!("domain {}", domain)));
        }
        let logins = state.credentials.entry(domain.to_string()).or_default();
        if logins.contains(&credential.login) {
            return Err(Error::provider(
                "memory",
                format!("credential {} already exists", credential.login),
            ));
        }
        logins.push(credential.login.clone());
        Ok(())
    }

    async fn list_routes(&self) -> Result<Vec<ObservedRoute>, Error> {
        self.check_throttle()?;
        Ok(self.state.read().await.routes.clone())
    }

    async fn create_route(&self, rule: &RouteRule) -> Result<String, Error> {
        self.mutate()?;
        let mut state = self.state.write().await;
        Ok(Self::push_route(&mut state, rule.clone()))
    }

    async fn delete_route(&self, id: &str) -> Result<(), Error> {
        self.mutate()?;
        let mut state = self.state.write().await;
        let position = state
            .routes
            .iter()
            .position(|route| route.id == id)
            .ok_or_else(|| Error::not_found(format!("route {}", id)))?;
        state.routes.remove(position);
        Ok(())
    }

    async fn verify_domain(&self, name: &str) -> Result<DomainState, Error> {
        self.check_throttle()?;
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let count = {
            let count = state.verify_counts.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let verify_after = self.verify_after;
        let domain = state
            .domains
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("domain {}", name)))?;
        if verify_after.is_some_and(|needed| count >= needed) {
            domain.state = DomainState::Active;
        }
        Ok(domain.state.clone())
    }

    fn service_name(&self) -> &'static str {
        "memory"
    }
}
