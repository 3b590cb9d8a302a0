//! Record set diffing
//!
//! Providers are treated as supporting only create/delete of whole record
//! sets. When the observed values of a (name, type) differ from the desired
//! ones, every observed set is deleted and the full desired set is created.

use std::collections::{BTreeMap, BTreeSet};

use crate::apply::ApplyOrder;
use crate::config::normalize_domain;
use crate::dns::records::{Comparison, DesiredRecord};
use crate::dns::txt;
use crate::traits::{Change, ObservedRecord, RecordType};

/// Changes needed for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDiff {
    /// Deletes of stale record sets
    pub cleanup: Vec<Change>,
    /// Creates of desired record sets
    pub setup: Vec<Change>,
}

impl RecordDiff {
    /// A name+type holds a single set, so old sets go before new ones
    pub const ORDER: ApplyOrder = ApplyOrder::for_kind(false);

    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.cleanup.is_empty() && self.setup.is_empty()
    }

    /// Total number of changes
    pub fn len(&self) -> usize {
        self.cleanup.len() + self.setup.len()
    }
}

type RecordKey = (String, RecordType);

fn key_of(name: &str, record_type: &RecordType) -> RecordKey {
    (normalize_domain(name), record_type.clone())
}

/// Canonical form of a value for comparison
pub fn normalize_value(record_type: &RecordType, value: &str) -> String {
    match record_type {
        RecordType::Txt => txt::reassemble(value),
        RecordType::Mx | RecordType::Cname | RecordType::Ns => value
            .split_whitespace()
            .map(|part| part.trim_end_matches('.').to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
        _ => value.trim().to_string(),
    }
}

fn observed_matches(desired: &DesiredRecord, observed: &[&ObservedRecord]) -> bool {
    let observed_values = observed.iter().flat_map(|record| record.set.values.iter());
    match desired.comparison {
        Comparison::ValueSet => {
            let want: BTreeSet<String> = desired
                .values
                .iter()
                .map(|v| normalize_value(&desired.record_type, v))
                .collect();
            let have: BTreeSet<String> = observed_values
                .map(|v| normalize_value(&desired.record_type, v))
                .collect();
            want == have
        }
        Comparison::Concatenated => {
            let want = txt::reassemble_all(&desired.values);
            let have: String = observed_values.map(|v| txt::reassemble(v)).collect();
            want == have
        }
    }
}

/// Compare desired record sets against what the provider reports
///
/// Observed records not named by any desired record are left alone.
pub fn diff_records(desired: &[DesiredRecord], observed: &[ObservedRecord]) -> RecordDiff {
    let mut by_key: BTreeMap<RecordKey, Vec<&ObservedRecord>> = BTreeMap::new();
    for record in observed {
        by_key
            .entry(key_of(&record.set.name, &record.set.record_type))
            .or_default()
            .push(record);
    }

    let mut diff = RecordDiff::default();
    for want in desired {
        let have = by_key
            .get(&key_of(&want.name, &want.record_type))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if want.values.is_empty() {
            diff.cleanup
                .extend(have.iter().map(|record| Change::delete(record.set.clone())));
            continue;
        }

        if !have.is_empty() && observed_matches(want, have) {
            continue;
        }

        diff.cleanup
            .extend(have.iter().map(|record| Change::delete(record.set.clone())));
        diff.setup.push(Change::create(want.to_record_set()));
    }
    diff
}

/// Deletes for every managed record of a domain being torn down
///
/// Managed means: MX at the domain, apex TXT sets carrying an SPF policy,
/// and TXT sets at any of `extra_names` (DKIM key, DMARC).
pub fn teardown_changes(
    domain: &str,
    extra_names: &[String],
    observed: &[ObservedRecord],
) -> Vec<Change> {
    let domain = normalize_domain(domain);
    let extra: BTreeSet<String> = extra_names.iter().map(|n| normalize_domain(n)).collect();

    observed
        .iter()
        .filter(|record| {
            let name = normalize_domain(&record.set.name);
            match record.set.record_type {
                RecordType::Mx => name == domain,
                RecordType::Txt if name == domain => record
                    .set
                    .values
                    .iter()
                    .any(|v| txt::reassemble(v).starts_with("v=spf")),
                RecordType::Txt => extra.contains(&name),
                _ => false,
            }
        })
        .map(|record| Change::delete(record.set.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChangeAction, RecordSet};

    fn observed(name: &str, record_type: RecordType, values: &[&str]) -> ObservedRecord {
        ObservedRecord {
            zone_id: "z1".into(),
            set: RecordSet {
                name: name.into(),
                record_type,
                ttl: 300,
                values: values.iter().map(|v| v.to_string()).collect(),
                ids: Vec::new(),
            },
        }
    }

    fn desired(
        name: &str,
        record_type: RecordType,
        values: &[&str],
        comparison: Comparison,
    ) -> DesiredRecord {
        DesiredRecord {
            zone_id: "z1".into(),
            name: name.into(),
            record_type,
            ttl: 300,
            values: values.iter().map(|v| v.to_string()).collect(),
            comparison,
        }
    }

    #[test]
    fn mx_growth_replaces_whole_set() {
        let want = desired(
            "example.com",
            RecordType::Mx,
            &["10 mx1.example.net", "20 mx2.example.net"],
            Comparison::ValueSet,
        );
        let have = observed("example.com", RecordType::Mx, &["10 mx1.example.net"]);

        let diff = diff_records(&[want], &[have]);

        assert_eq!(diff.cleanup.len(), 1);
        assert_eq!(diff.cleanup[0].action, ChangeAction::Delete);
        assert_eq!(diff.cleanup[0].record.values, vec!["10 mx1.example.net"]);
        assert_eq!(diff.setup.len(), 1);
        assert_eq!(diff.setup[0].action, ChangeAction::Create);
        assert_eq!(
            diff.setup[0].record.values,
            vec!["10 mx1.example.net", "20 mx2.example.net"]
        );
    }

    #[test]
    fn matching_sets_produce_nothing() {
        let want = desired(
            "example.com",
            RecordType::Mx,
            &["10 mx1.example.net", "20 mx2.example.net"],
            Comparison::ValueSet,
        );
        // Different order, trailing dot and case
        let have = observed(
            "Example.com.",
            RecordType::Mx,
            &["20 MX2.example.net.", "10 mx1.example.net"],
        );
        assert!(diff_records(&[want], &[have]).is_empty());
    }

    #[test]
    fn empty_desired_only_deletes() {
        let want = desired("example.com", RecordType::Mx, &[], Comparison::ValueSet);
        let have = observed("example.com", RecordType::Mx, &["10 old.example.net"]);

        let diff = diff_records(&[want], &[have]);
        assert_eq!(diff.cleanup.len(), 1);
        assert!(diff.setup.is_empty());
    }

    #[test]
    fn missing_record_is_created() {
        let want = desired(
            "example.com",
            RecordType::Txt,
            &["\"v=spf1 include:mailgun.org ~all\""],
            Comparison::ValueSet,
        );
        let diff = diff_records(&[want], &[]);
        assert!(diff.cleanup.is_empty());
        assert_eq!(diff.setup.len(), 1);
    }

    #[test]
    fn chunked_verification_matches_split_observation() {
        let key = format!("k=rsa; p={}", "Q".repeat(491));
        assert_eq!(key.len(), 500);

        let want = desired(
            "mx._domainkey.example.com",
            RecordType::Txt,
            &[&txt::encode(&key, 240)],
            Comparison::Concatenated,
        );
        let parts = txt::chunk(&key, 240);
        assert_eq!(parts.len(), 3);
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        let have = observed("mx._domainkey.example.com", RecordType::Txt, &parts);

        assert!(diff_records(&[want], &[have]).is_empty());
    }

    #[test]
    fn duplicate_observed_sets_are_all_deleted() {
        let want = desired(
            "example.com",
            RecordType::Mx,
            &["10 new.example.net"],
            Comparison::ValueSet,
        );
        let diff = diff_records(
            &[want],
            &[
                observed("example.com", RecordType::Mx, &["10 a.example.net"]),
                observed("example.com", RecordType::Mx, &["20 b.example.net"]),
            ],
        );
        assert_eq!(diff.cleanup.len(), 2);
        assert_eq!(diff.setup.len(), 1);
    }

    #[test]
    fn unrelated_records_are_ignored() {
        let want = desired(
            "example.com",
            RecordType::Mx,
            &["10 mx.example.net"],
            Comparison::ValueSet,
        );
        let diff = diff_records(
            &[want],
            &[
                observed("example.com", RecordType::Mx, &["10 mx.example.net"]),
                observed("www.example.com", RecordType::Cname, &["example.com"]),
            ],
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn teardown_selects_managed_records() {
        let records = vec![
            observed("example.com", RecordType::Mx, &["10 mx.example.net"]),
            observed("example.com", RecordType::Txt, &["\"v=spf1 include:x ~all\""]),
            observed("example.com", RecordType::Txt, &["\"site-verification=abc\""]),
            observed("mx._domainkey.example.com", RecordType::Txt, &["\"k=rsa; p=x\""]),
            observed("www.example.com", RecordType::A, &["192.0.2.1"]),
        ];
        let changes = teardown_changes(
            "example.com",
            &["mx._domainkey.example.com".to_string()],
            &records,
        );
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.action == ChangeAction::Delete));
    }
}
