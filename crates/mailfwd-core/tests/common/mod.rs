//! Fixtures and common utilities for reconciler contract tests
//!
//! Everything runs against the in-memory providers with millisecond
//! retry and polling budgets.

#![allow(dead_code)]

use mailfwd_core::config::{
    AddressMapping, DomainSpec, ForwardingConfig, GatewaySettings, ReconcilerSettings, Target,
};
use mailfwd_core::poll::PollPolicy;
use mailfwd_core::retry::RetryPolicy;
use mailfwd_core::traits::HostedZone;
use mailfwd_core::{MemoryDnsProvider, MemoryMailRouting, ReconcileEvent, Reconciler};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Settings with tight budgets so failure paths finish quickly
pub fn fast_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        },
        domain_setup_attempts: 3,
        deletion_poll: PollPolicy::new(1, 20),
        change_poll: PollPolicy::new(1, 20),
        verification_poll: PollPolicy::new(1, 5),
        verify_trigger_spacing_ms: 0,
        ..ReconcilerSettings::default()
    }
}

/// One domain with a catch-all and two explicit mappings
pub fn single_domain_config(domain: &str) -> ForwardingConfig {
    let mut mappings = AddressMapping::new();
    mappings.merge(
        &format!("info@{}", domain),
        vec![Target::email("alice@gmail.com")],
    );
    mappings.merge(
        &format!("sales@{}", domain),
        vec![Target::email("bob@gmail.com"), Target::email("carol@gmail.com")],
    );

    ForwardingConfig {
        domains: vec![
            DomainSpec::new(domain).with_default_targets(vec![Target::email("owner@gmail.com")]),
        ],
        mappings,
        gateway: GatewaySettings {
            bucket: "inbound-mail".into(),
            bucket_prefix: "raw/".into(),
            region: Some("us-east-1".into()),
        },
        settings: fast_settings(),
    }
}

/// Config with one plain domain per name and no mappings
pub fn domains_config(names: &[&str]) -> ForwardingConfig {
    ForwardingConfig {
        domains: names.iter().map(|name| DomainSpec::new(name)).collect(),
        mappings: AddressMapping::new(),
        gateway: GatewaySettings::default(),
        settings: fast_settings(),
    }
}

/// In-memory providers plus the reconciler driving them
pub struct Harness {
    pub dns: MemoryDnsProvider,
    pub routing: MemoryMailRouting,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_routing(MemoryMailRouting::new())
    }

    pub fn with_routing(routing: MemoryMailRouting) -> Self {
        Self {
            dns: MemoryDnsProvider::new(),
            routing,
            cancel: CancellationToken::new(),
        }
    }

    /// Pre-create hosted zones
    pub async fn zones(&self, names: &[&str]) -> Vec<HostedZone> {
        let mut zones = Vec::new();
        for name in names {
            zones.push(self.dns.add_zone(name).await);
        }
        zones
    }

    /// Build a reconciler sharing this harness's providers
    pub fn reconciler(&self, config: ForwardingConfig) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
        Reconciler::new(
            Arc::new(self.dns.clone()),
            Arc::new(self.routing.clone()),
            config,
            self.cancel.clone(),
        )
        .expect("valid configuration")
    }

    /// Total mutating calls across both providers
    pub fn mutations(&self) -> usize {
        self.dns.mutation_count() + self.routing.mutation_count()
    }
}

/// Drain every event currently queued
pub fn drain(rx: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
