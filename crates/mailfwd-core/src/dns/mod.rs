//! DNS record differ
//!
//! Builds the desired record sets of each domain ([`records`]), diffs them
//! against the provider ([`diff`]) and groups the resulting changes per
//! hosted zone ([`ZoneBatch`]).

pub mod diff;
pub mod records;
pub mod txt;

pub use diff::{RecordDiff, diff_records, normalize_value, teardown_changes};
pub use records::{
    Comparison, DesiredRecord, DomainRecords, desired_records, spf_include, verification_record,
};

use crate::config::normalize_domain;
use crate::traits::{Change, HostedZone};

/// Longest zone whose name is `name` or a label-aligned suffix of it
pub fn resolve_zone<'a>(zones: &'a [HostedZone], name: &str) -> Option<&'a HostedZone> {
    let name = normalize_domain(name);
    zones
        .iter()
        .filter(|zone| {
            let zone_name = normalize_domain(&zone.name);
            !zone_name.is_empty()
                && (name == zone_name || name.ends_with(&format!(".{}", zone_name)))
        })
        .max_by_key(|zone| normalize_domain(&zone.name).len())
}

/// All changes destined for one hosted zone
#[derive(Debug, Clone, Default)]
pub struct ZoneBatch {
    /// Provider zone id
    pub zone_id: String,
    /// Zone apex
    pub zone_name: String,
    /// Domains contributing changes
    pub domains: Vec<String>,
    /// Deletes, submitted first
    pub cleanup: Vec<Change>,
    /// Creates, submitted once the cleanup has settled
    pub setup: Vec<Change>,
}

impl ZoneBatch {
    /// Empty batch for a zone
    pub fn new(zone: &HostedZone) -> Self {
        Self {
            zone_id: zone.id.clone(),
            zone_name: normalize_domain(&zone.name),
            ..Self::default()
        }
    }

    /// Add the changes of one domain
    pub fn absorb(&mut self, domain: &str, diff: RecordDiff) {
        self.domains.push(domain.to_string());
        self.cleanup.extend(diff.cleanup);
        self.setup.extend(diff.setup);
    }

    /// Number of changes in the batch
    pub fn change_count(&self) -> usize {
        self.cleanup.len() + self.setup.len()
    }

    /// Whether the batch changes nothing
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: &str, name: &str) -> HostedZone {
        HostedZone {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn longest_suffix_wins() {
        let zones = vec![
            zone("z1", "example.com"),
            zone("z2", "mail.example.com."),
            zone("z3", "ample.com"),
        ];
        assert_eq!(resolve_zone(&zones, "mail.example.com").unwrap().id, "z2");
        assert_eq!(resolve_zone(&zones, "eu.mail.example.com").unwrap().id, "z2");
        assert_eq!(resolve_zone(&zones, "example.com").unwrap().id, "z1");
    }

    #[test]
    fn suffix_must_align_to_labels() {
        let zones = vec![zone("z3", "ample.com")];
        assert!(resolve_zone(&zones, "example.com").is_none());
    }

    #[test]
    fn batch_counts_changes() {
        let mut batch = ZoneBatch::new(&zone("z1", "Example.com."));
        assert!(batch.is_empty());
        assert_eq!(batch.zone_name, "example.com");

        let set = crate::traits::RecordSet {
            name: "example.com".into(),
            record_type: crate::traits::RecordType::Mx,
            ttl: 300,
            values: vec!["10 mx.example.net".into()],
            ids: Vec::new(),
        };
        batch.absorb(
            "example.com",
            RecordDiff {
                cleanup: vec![Change::delete(set.clone())],
                setup: vec![Change::create(set)],
            },
        );
        assert_eq!(batch.change_count(), 2);
        assert_eq!(batch.domains, vec!["example.com".to_string()]);
    }
}
