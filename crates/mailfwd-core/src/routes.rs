//! Route rules and the route differ
//!
//! Each mapping key gets three exact-match rules (recipient, `Cc`, `Bcc`) at
//! priority 10; each domain with email fallback targets gets the same three
//! as catch-all patterns at priority 20. Rules are identified by a
//! fingerprint over their content, never by provider id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use crate::apply::ApplyOrder;
use crate::config::{AddressMapping, DomainSpec, Target};

/// Priority of exact address rules
pub const MAPPING_PRIORITY: u32 = 10;

/// Priority of per-domain catch-all rules
pub const DEFAULT_PRIORITY: u32 = 20;

/// Which part of the message a rule inspects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchExpression {
    /// Envelope recipient
    Recipient(String),
    /// A header value
    Header {
        /// Header name
        name: String,
        /// Pattern
        pattern: String,
    },
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recipient(pattern) => write!(f, "match_recipient(\"{}\")", pattern),
            Self::Header { name, pattern } => {
                write!(f, "match_header(\"{}\", \"{}\")", name, pattern)
            }
        }
    }
}

/// What a rule does on match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Forward to every destination
    Forward(Vec<String>),
    /// Stop evaluating lower-priority rules
    Stop,
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward(destinations) => write!(f, "forward(\"{}\")", destinations.join(",")),
            Self::Stop => f.write_str("stop()"),
        }
    }
}

/// An address-matching rule at the routing service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteRule {
    /// Filter expression
    pub expression: String,
    /// Actions, in order
    pub actions: Vec<String>,
    /// Lower runs first
    pub priority: u32,
}

impl RouteRule {
    /// Build a rule from typed parts
    pub fn new(expression: &MatchExpression, actions: &[RouteAction], priority: u32) -> Self {
        Self {
            expression: expression.to_string(),
            actions: actions.iter().map(ToString::to_string).collect(),
            priority,
        }
    }

    /// Content fingerprint (hex SHA-256 of a JSON tuple)
    ///
    /// JSON string escaping keeps field boundaries unambiguous.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(&(&self.expression, &self.actions, self.priority))
            .unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// A rule as stored at the routing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRoute {
    /// Provider id
    pub id: String,
    /// Rule content
    #[serde(flatten)]
    pub rule: RouteRule,
}

fn rules_for(pattern: &str, destinations: Vec<String>, priority: u32) -> [RouteRule; 3] {
    let actions = [RouteAction::Forward(destinations), RouteAction::Stop];
    [
        RouteRule::new(&MatchExpression::Recipient(pattern.to_string()), &actions, priority),
        RouteRule::new(
            &MatchExpression::Header {
                name: "Cc".into(),
                pattern: pattern.to_string(),
            },
            &actions,
            priority,
        ),
        RouteRule::new(
            &MatchExpression::Header {
                name: "Bcc".into(),
                pattern: pattern.to_string(),
            },
            &actions,
            priority,
        ),
    ]
}

fn email_destinations(targets: &[Target]) -> Vec<String> {
    targets
        .iter()
        .filter_map(Target::email_address)
        .map(str::to_string)
        .collect()
}

/// Desired rules for the whole configuration
///
/// Command targets are executed by the gateway only; a source whose targets
/// are all commands yields no rules.
pub fn desired_routes(mappings: &AddressMapping, domains: &[DomainSpec]) -> Vec<RouteRule> {
    let mut rules = Vec::new();
    for (source, targets) in mappings.iter() {
        let destinations = email_destinations(targets);
        if !destinations.is_empty() {
            rules.extend(rules_for(source, destinations, MAPPING_PRIORITY));
        }
    }
    for domain in domains {
        let destinations = email_destinations(&domain.default_targets);
        if !destinations.is_empty() {
            rules.extend(rules_for(
                &format!(".*@{}", domain.name),
                destinations,
                DEFAULT_PRIORITY,
            ));
        }
    }
    rules
}

/// Route changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDiff {
    /// Rules to create
    pub to_create: Vec<RouteRule>,
    /// Observed routes to delete
    pub to_delete: Vec<ObservedRoute>,
}

impl RouteDiff {
    /// Duplicate routes only cost a redundant match, so new rules go in first
    pub const ORDER: ApplyOrder = ApplyOrder::for_kind(true);

    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compare desired rules with observed routes by fingerprint
///
/// Observed duplicates beyond the first copy of a desired rule are deleted.
pub fn diff_routes(desired: &[RouteRule], observed: &[ObservedRoute]) -> RouteDiff {
    let wanted: HashSet<String> = desired.iter().map(RouteRule::fingerprint).collect();

    let mut kept: HashSet<String> = HashSet::new();
    let mut to_delete = Vec::new();
    for route in observed {
        let hash = route.rule.fingerprint();
        if wanted.contains(&hash) && kept.insert(hash) {
            continue;
        }
        to_delete.push(route.clone());
    }

    let mut queued: HashSet<String> = HashSet::new();
    let to_create = desired
        .iter()
        .filter(|rule| {
            let hash = rule.fingerprint();
            !kept.contains(&hash) && queued.insert(hash)
        })
        .cloned()
        .collect();

    RouteDiff {
        to_create,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(expression: &str, priority: u32) -> RouteRule {
        RouteRule {
            expression: expression.into(),
            actions: vec!["forward(\"a@x.org\")".into(), "stop()".into()],
            priority,
        }
    }

    fn observed(id: &str, rule: RouteRule) -> ObservedRoute {
        ObservedRoute {
            id: id.into(),
            rule,
        }
    }

    #[test]
    fn diff_by_fingerprint() {
        let r1 = rule("match_recipient(\"one@x.com\")", 10);
        let r2 = rule("match_recipient(\"two@x.com\")", 10);
        let r3 = rule("match_recipient(\"three@x.com\")", 10);

        let diff = diff_routes(
            &[r1.clone(), r2.clone()],
            &[observed("id-1", r1), observed("id-3", r3)],
        );

        assert_eq!(diff.to_create, vec![r2]);
        assert_eq!(diff.to_delete.len(), 1);
        assert_eq!(diff.to_delete[0].id, "id-3");
    }

    #[test]
    fn observed_duplicates_are_pruned() {
        let r1 = rule("match_recipient(\"one@x.com\")", 10);
        let diff = diff_routes(
            &[r1.clone()],
            &[observed("a", r1.clone()), observed("b", r1)],
        );
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_delete.len(), 1);
        assert_eq!(diff.to_delete[0].id, "b");
    }

    #[test]
    fn fingerprint_is_unambiguous() {
        let a = RouteRule {
            expression: "x:y".into(),
            actions: vec!["z".into()],
            priority: 1,
        };
        let b = RouteRule {
            expression: "x".into(),
            actions: vec!["y:z".into()],
            priority: 1,
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), rule("x:y", 2).fingerprint());
    }

    #[test]
    fn desired_routes_cover_three_match_kinds() {
        let mut mappings = AddressMapping::new();
        mappings.merge(
            "info@example.com",
            vec![Target::email("a@x.org"), Target::email("b@x.org")],
        );
        let domains = vec![
            DomainSpec::new("example.com").with_default_targets(vec![Target::email("c@x.org")]),
        ];

        let rules = desired_routes(&mappings, &domains);

        assert_eq!(rules.len(), 6);
        assert_eq!(rules[0].expression, "match_recipient(\"info@example.com\")");
        assert_eq!(rules[1].expression, "match_header(\"Cc\", \"info@example.com\")");
        assert_eq!(rules[2].expression, "match_header(\"Bcc\", \"info@example.com\")");
        assert_eq!(rules[0].actions, vec!["forward(\"a@x.org,b@x.org\")", "stop()"]);
        assert!(rules[..3].iter().all(|r| r.priority == MAPPING_PRIORITY));
        assert_eq!(rules[3].expression, "match_recipient(\".*@example.com\")");
        assert!(rules[3..].iter().all(|r| r.priority == DEFAULT_PRIORITY));
    }

    #[test]
    fn command_only_sources_have_no_routes() {
        let mut mappings = AddressMapping::new();
        mappings.merge(
            "hook@example.com",
            vec![Target::Command {
                command: "notify".into(),
                host: "ops".into(),
                credentials: None,
            }],
        );
        assert!(desired_routes(&mappings, &[]).is_empty());
    }
}
