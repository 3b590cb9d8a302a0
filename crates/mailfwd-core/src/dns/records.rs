//! Desired record sets for one domain

use crate::config::{DomainSpec, ReconcilerSettings, normalize_domain};
use crate::dns::txt;
use crate::traits::{RecordSet, RecordType, RoutingDomain};

/// How observed values are compared with desired ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Order-independent set of normalized values
    ValueSet,
    /// All values reassembled into one string (chunked TXT)
    Concatenated,
}

/// Complete declaration of one record set (by name and type)
///
/// Empty `values` means the record set must not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRecord {
    /// Zone the record belongs to
    pub zone_id: String,
    /// Fully qualified name
    pub name: String,
    /// Record type
    pub record_type: RecordType,
    /// TTL in seconds
    pub ttl: u32,
    /// Values in provider wire form
    pub values: Vec<String>,
    /// Comparison mode
    pub comparison: Comparison,
}

impl DesiredRecord {
    /// Record set to submit on create
    pub fn to_record_set(&self) -> RecordSet {
        RecordSet {
            name: self.name.clone(),
            record_type: self.record_type.clone(),
            ttl: self.ttl,
            values: self.values.clone(),
            ids: Vec::new(),
        }
    }
}

/// Desired records plus anything worth telling the operator
#[derive(Debug, Clone, Default)]
pub struct DomainRecords {
    /// Managed record sets
    pub records: Vec<DesiredRecord>,
    /// Non-fatal notes (skipped SPF, missing verification key)
    pub warnings: Vec<String>,
}

// `v=spf<digit> include:<sender>`
fn spf_include_pattern(value: &str) -> Option<&str> {
    let rest = value.trim().strip_prefix("v=spf")?;
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.strip_prefix(' ')?.strip_prefix("include:")?;
    rest.split_whitespace().next().filter(|s| !s.is_empty())
}

/// Base SPF include advertised by the routing service (`v=spf1 include:X ...`)
pub fn spf_include(routing: &RoutingDomain) -> Option<String> {
    routing
        .sending_records
        .iter()
        .filter(|record| record.record_type == RecordType::Txt && record.value.contains("v=spf"))
        .find_map(|record| spf_include_pattern(&record.value))
        .map(str::to_string)
}

/// Name and raw value of the DKIM key record (`k=rsa`)
pub fn verification_record(routing: &RoutingDomain) -> Option<(String, String)> {
    routing
        .sending_records
        .iter()
        .find(|record| record.record_type == RecordType::Txt && record.value.contains("k=rsa"))
        .map(|record| (normalize_domain(&record.name), record.value.clone()))
}

/// Build the managed record sets of `domain`
///
/// - MX at the domain, one `"<priority> <host>"` value per receiving endpoint
///   (empty when the service advertises none, which deletes stale MX)
/// - Apex TXT with the SPF policy and any additional values; omitted when
///   there is nothing to publish
/// - The DKIM key TXT, chunked
/// - `_dmarc.<domain>` TXT when a policy is configured
pub fn desired_records(
    domain: &DomainSpec,
    routing: &RoutingDomain,
    zone_id: &str,
    settings: &ReconcilerSettings,
) -> DomainRecords {
    let mut out = DomainRecords::default();
    let ttl = settings.record_ttl;
    let chunk = settings.txt_chunk_size;

    let mut receiving = routing.receiving_records.clone();
    receiving.sort_by_key(|record| record.priority);
    out.records.push(DesiredRecord {
        zone_id: zone_id.to_string(),
        name: domain.name.clone(),
        record_type: RecordType::Mx,
        ttl,
        values: receiving
            .iter()
            .map(|record| format!("{} {}", record.priority, record.value))
            .collect(),
        comparison: Comparison::ValueSet,
    });

    let mut apex_txt = Vec::new();
    if let Some(include) = spf_include(routing) {
        let senders: Vec<String> = std::iter::once(include)
            .chain(domain.additional_senders.iter().cloned())
            .map(|sender| format!("include:{}", sender))
            .collect();
        let policy = format!("v=spf1 {} ~all", senders.join(" "));

        if senders.len() >= settings.sender_lookup_limit {
            let warning = format!(
                "{}: SPF record skipped, {} includes reach the lookup limit of {} ({})",
                domain.name,
                senders.len(),
                settings.sender_lookup_limit,
                policy
            );
            out.warnings.push(warning);
        } else {
            apex_txt.push(txt::encode(&policy, chunk));
        }
    }
    apex_txt.extend(
        domain
            .additional_txt_records
            .iter()
            .filter(|value| !value.trim().is_empty())
            .map(|value| txt::encode(value, chunk)),
    );
    if !apex_txt.is_empty() {
        out.records.push(DesiredRecord {
            zone_id: zone_id.to_string(),
            name: domain.name.clone(),
            record_type: RecordType::Txt,
            ttl,
            values: apex_txt,
            comparison: Comparison::ValueSet,
        });
    }

    match verification_record(routing) {
        Some((name, value)) => out.records.push(DesiredRecord {
            zone_id: zone_id.to_string(),
            name,
            record_type: RecordType::Txt,
            ttl,
            values: vec![txt::encode(&value, chunk)],
            comparison: Comparison::Concatenated,
        }),
        None => out.warnings.push(format!(
            "{}: routing service advertised no DKIM key record",
            domain.name
        )),
    }

    if let Some(dmarc) = &domain.dmarc {
        out.records.push(DesiredRecord {
            zone_id: zone_id.to_string(),
            name: format!("_dmarc.{}", domain.name),
            record_type: RecordType::Txt,
            ttl,
            values: vec![txt::encode(&dmarc.record_value(), chunk)],
            comparison: Comparison::ValueSet,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DmarcDisposition, DmarcPolicy};
    use crate::traits::{DomainState, ReceivingRecord, SendingRecord, SpamAction};

    fn routing_domain(name: &str) -> RoutingDomain {
        RoutingDomain {
            name: name.to_string(),
            state: DomainState::Unverified,
            spam_action: SpamAction::Disabled,
            sending_records: vec![
                SendingRecord {
                    record_type: RecordType::Txt,
                    name: name.to_string(),
                    value: "v=spf1 include:mailgun.org ~all".into(),
                },
                SendingRecord {
                    record_type: RecordType::Txt,
                    name: format!("mx._domainkey.{}", name),
                    value: format!("k=rsa; p={}", "A".repeat(400)),
                },
            ],
            receiving_records: vec![
                ReceivingRecord {
                    priority: 20,
                    value: "mxb.mailgun.org".into(),
                },
                ReceivingRecord {
                    priority: 10,
                    value: "mxa.mailgun.org".into(),
                },
            ],
        }
    }

    #[test]
    fn builds_mx_spf_and_dkim() {
        let domain = DomainSpec::new("example.com");
        let records = desired_records(
            &domain,
            &routing_domain("example.com"),
            "z1",
            &ReconcilerSettings::default(),
        );

        assert!(records.warnings.is_empty());
        assert_eq!(records.records.len(), 3);

        let mx = &records.records[0];
        assert_eq!(mx.values, vec!["10 mxa.mailgun.org", "20 mxb.mailgun.org"]);

        let spf = &records.records[1];
        assert_eq!(spf.values, vec!["\"v=spf1 include:mailgun.org ~all\""]);

        let dkim = &records.records[2];
        assert_eq!(dkim.name, "mx._domainkey.example.com");
        assert_eq!(dkim.comparison, Comparison::Concatenated);
        assert_eq!(dkim.values.len(), 1);
        assert_eq!(dkim.values[0].matches("\" \"").count(), 1);
    }

    #[test]
    fn spf_skipped_at_lookup_limit() {
        let domain = DomainSpec::new("example.com").with_additional_senders(vec![
            "a.com".into(),
            "b.com".into(),
            "c.com".into(),
            "d.com".into(),
        ]);
        let records = desired_records(
            &domain,
            &routing_domain("example.com"),
            "z1",
            &ReconcilerSettings::default(),
        );

        assert_eq!(records.warnings.len(), 1);
        assert!(records.warnings[0].contains("SPF record skipped"));
        assert!(
            records
                .records
                .iter()
                .all(|r| !(r.name == "example.com" && r.record_type == RecordType::Txt))
        );
    }

    #[test]
    fn four_includes_still_published() {
        let domain = DomainSpec::new("example.com").with_additional_senders(vec![
            "a.com".into(),
            "b.com".into(),
            "c.com".into(),
        ]);
        let records = desired_records(
            &domain,
            &routing_domain("example.com"),
            "z1",
            &ReconcilerSettings::default(),
        );
        assert!(records.warnings.is_empty());
        assert!(records.records[1].values[0].contains("include:c.com"));
    }

    #[test]
    fn dmarc_record_when_configured() {
        let mut domain = DomainSpec::new("example.com");
        domain.dmarc = Some(DmarcPolicy {
            policy: DmarcDisposition::Quarantine,
            report_to: None,
        });
        let records = desired_records(
            &domain,
            &routing_domain("example.com"),
            "z1",
            &ReconcilerSettings::default(),
        );
        let dmarc = records.records.last().unwrap();
        assert_eq!(dmarc.name, "_dmarc.example.com");
        assert_eq!(
            txt::reassemble(&dmarc.values[0]),
            "v=DMARC1; p=quarantine; adkim=r; aspf=r"
        );
    }

    #[test]
    fn spf_include_parses_versioned_policy() {
        let routing = routing_domain("example.com");
        assert_eq!(spf_include(&routing).as_deref(), Some("mailgun.org"));
    }
}
