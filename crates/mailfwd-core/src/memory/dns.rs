// # Memory DNS Provider
//
// In-memory implementation of DnsProvider.
//
// Holds zones and record sets in a map behind a RwLock. It enforces the
// same rule real providers do: a (name, type) holds at most one record set,
// so a create over an existing set fails. Change batches are atomic.
//
// ## When to Use
//
// - Rehearsing a configuration (`MAILFWD_DNS_PROVIDER=memory`)
// - Tests, including failure and throttling injection

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{
    Change, ChangeAction, ChangeId, ChangeStatus, DnsProvider, HostedZone, ObservedRecord,
    RecordSet, ZoneCreation,
};

#[derive(Debug, Default)]
struct DnsState {
    zones: Vec<HostedZone>,
    records: HashMap<String, Vec<RecordSet>>,
    pending: HashMap<String, u32>,
    failing_zones: BTreeSet<String>,
    next_id: u64,
}

/// In-memory DNS provider
#[derive(Debug, Clone, Default)]
pub struct MemoryDnsProvider {
    state: Arc<RwLock<DnsState>>,
    throttle_remaining: Arc<AtomicUsize>,
    pending_polls: Arc<AtomicU32>,
    apply_calls: Arc<AtomicUsize>,
    applied_changes: Arc<AtomicUsize>,
    create_zone_calls: Arc<AtomicUsize>,
}

impl MemoryDnsProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hosted zone and return it
    pub async fn add_zone(&self, name: &str) -> HostedZone {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let zone = HostedZone {
            id: format!("zone-{}", state.next_id),
            name: name.trim_end_matches('.').to_lowercase(),
        };
        state.zones.push(zone.clone());
        state.records.entry(zone.id.clone()).or_default();
        zone
    }

    /// Insert a record set directly, bypassing the change API
    pub async fn insert_record(&self, zone_id: &str, set: RecordSet) {
        self.state
            .write()
            .await
            .records
            .entry(zone_id.to_string())
            .or_default()
            .push(set);
    }

    /// Current record sets of a zone
    pub async fn records(&self, zone_id: &str) -> Vec<RecordSet> {
        self.state
            .read()
            .await
            .records
            .get(zone_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Find a zone by name
    pub async fn zone(&self, name: &str) -> Option<HostedZone> {
        self.state
            .read()
            .await
            .zones
            .iter()
            .find(|zone| zone.name == name)
            .cloned()
    }

    /// Reject every change batch for `zone_id`
    pub async fn fail_zone(&self, zone_id: &str) {
        self.state
            .write()
            .await
            .failing_zones
            .insert(zone_id.to_string());
    }

    /// Report the next `count` calls as throttled
    pub fn throttle_next(&self, count: usize) {
        self.throttle_remaining.store(count, Ordering::SeqCst);
    }

    /// Report each new change as pending for `polls` status checks
    pub fn settle_after(&self, polls: u32) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    /// Number of apply_changes calls (including rejected ones)
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of individual changes committed
    pub fn applied_changes(&self) -> usize {
        self.applied_changes.load(Ordering::SeqCst)
    }

    /// Number of mutating calls (zone creation and change batches)
    pub fn mutation_count(&self) -> usize {
        self.apply_calls() + self.create_zone_calls.load(Ordering::SeqCst)
    }

    fn check_throttle(&self) -> Result<(), Error> {
        let throttled = self
            .throttle_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            Err(Error::throttled("memory DNS provider rate limit"))
        } else {
            Ok(())
        }
    }

    fn register_change(&self, state: &mut DnsState) -> ChangeId {
        state.next_id += 1;
        let id = format!("change-{}", state.next_id);
        state
            .pending
            .insert(id.clone(), self.pending_polls.load(Ordering::SeqCst));
        ChangeId(id)
    }
}

fn same_set(a: &RecordSet, b: &RecordSet) -> bool {
    a.name.eq_ignore_ascii_case(&b.name) && a.record_type == b.record_type && a.values == b.values
}

#[async_trait]
impl DnsProvider for MemoryDnsProvider {
    async fn list_zones(&self) -> Result<Vec<HostedZone>, Error> {
        self.check_throttle()?;
        Ok(self.state.read().await.zones.clone())
    }

    async fn create_zone(&self, name: &str) -> Result<ZoneCreation, Error> {
        self.check_throttle()?;
        self.create_zone_calls.fetch_add(1, Ordering::SeqCst);
        if self.zone(name).await.is_some() {
            return Err(Error::provider("memory", format!("zone {} already exists", name)));
        }
        let zone = self.add_zone(name).await;
        let mut state = self.state.write().await;
        let change_id = self.register_change(&mut state);
        Ok(ZoneCreation {
            zone,
            change_id,
            name_servers: vec!["ns1.memory.invalid".into(), "ns2.memory.invalid".into()],
        })
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<ObservedRecord>, Error> {
        self.check_throttle()?;
        let state = self.state.read().await;
        let sets = state
            .records
            .get(zone_id)
            .ok_or_else(|| Error::not_found(format!("zone {}", zone_id)))?;
        Ok(sets
            .iter()
            .map(|set| ObservedRecord {
                zone_id: zone_id.to_string(),
                set: set.clone(),
            })
            .collect())
    }

    async fn apply_changes(&self, zone_id: &str, changes: &[Change]) -> Result<ChangeId, Error> {
        self.check_throttle()?;
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write().await;
        if state.failing_zones.contains(zone_id) {
            return Err(Error::provider("memory", format!("zone {} rejected the batch", zone_id)));
        }

        let mut sets = state
            .records
            .get(zone_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("zone {}", zone_id)))?;

        for change in changes {
            match change.action {
                ChangeAction::Delete => {
                    let position = sets
                        .iter()
                        .position(|set| same_set(set, &change.record))
                        .ok_or_else(|| {
                            Error::provider(
                                "memory",
                                format!(
                                    "cannot delete missing {} {}",
                                    change.record.record_type, change.record.name
                                ),
                            )
                        })?;
                    sets.remove(position);
                }
                ChangeAction::Create => {
                    let exists = sets.iter().any(|set| {
                        set.name.eq_ignore_ascii_case(&change.record.name)
                            && set.record_type == change.record.record_type
                    });
                    if exists {
                        return Err(Error::provider(
                            "memory",
                            format!(
                                "{} {} already exists",
                                change.record.record_type, change.record.name
                            ),
                        ));
                    }
                    sets.push(change.record.clone());
                }
            }
        }

        state.records.insert(zone_id.to_string(), sets);
        self.applied_changes.fetch_add(changes.len(), Ordering::SeqCst);
        Ok(self.register_change(&mut state))
    }

    async fn change_status(&self, change_id: &ChangeId) -> Result<ChangeStatus, Error> {
        self.check_throttle()?;
        let mut state = self.state.write().await;
        match state.pending.get_mut(&change_id.0) {
            None => Err(Error::not_found(format!("change {}", change_id))),
            Some(0) => Ok(ChangeStatus::Settled),
            Some(remaining) => {
                *remaining -= 1;
                Ok(ChangeStatus::Pending)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RecordType;

    fn mx(values: &[&str]) -> RecordSet {
        RecordSet {
            name: "example.com".into(),
            record_type: RecordType::Mx,
            ttl: 300,
            values: values.iter().map(|v| v.to_string()).collect(),
            ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_over_existing_set_is_rejected_atomically() {
        let provider = MemoryDnsProvider::new();
        let zone = provider.add_zone("example.com").await;
        provider.insert_record(&zone.id, mx(&["10 old"])).await;

        let result = provider
            .apply_changes(&zone.id, &[Change::create(mx(&["10 new"]))])
            .await;
        assert!(result.is_err());
        assert_eq!(provider.records(&zone.id).await, vec![mx(&["10 old"])]);

        provider
            .apply_changes(
                &zone.id,
                &[Change::delete(mx(&["10 old"])), Change::create(mx(&["10 new"]))],
            )
            .await
            .unwrap();
        assert_eq!(provider.records(&zone.id).await, vec![mx(&["10 new"])]);
    }

    #[tokio::test]
    async fn changes_settle_after_configured_polls() {
        let provider = MemoryDnsProvider::new();
        provider.settle_after(2);
        let zone = provider.add_zone("example.com").await;

        let id = provider
            .apply_changes(&zone.id, &[Change::create(mx(&["10 mx"]))])
            .await
            .unwrap();
        assert_eq!(provider.change_status(&id).await.unwrap(), ChangeStatus::Pending);
        assert_eq!(provider.change_status(&id).await.unwrap(), ChangeStatus::Pending);
        assert_eq!(provider.change_status(&id).await.unwrap(), ChangeStatus::Settled);
    }

    #[tokio::test]
    async fn throttles_requested_number_of_calls() {
        let provider = MemoryDnsProvider::new();
        provider.throttle_next(2);
        assert!(provider.list_zones().await.unwrap_err().is_throttled());
        assert!(provider.list_zones().await.unwrap_err().is_throttled());
        assert!(provider.list_zones().await.is_ok());
    }
}
