//! Forwarding graph validation
//!
//! Nodes are addresses. An address with an explicit mapping has an edge to
//! each of its email targets; an unmapped address falls back to its
//! domain's default targets. Command targets leave the address space and
//! are never edges. Any address that can reach itself would bounce mail
//! around forever, so the whole run is rejected before anything is mutated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{AddressMapping, Target, domain_of};
use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

struct ForwardingGraph<'a> {
    mappings: &'a AddressMapping,
    domain_defaults: &'a BTreeMap<String, Vec<Target>>,
}

impl<'a> ForwardingGraph<'a> {
    fn successors(&self, address: &str) -> Vec<&'a str> {
        let targets = match self.mappings.get(address) {
            Some(targets) => targets,
            None => match domain_of(address).and_then(|d| self.domain_defaults.get(d)) {
                Some(defaults) => defaults.as_slice(),
                None => return Vec::new(),
            },
        };
        targets.iter().filter_map(Target::email_address).collect()
    }

    fn roots(&self) -> BTreeSet<&'a str> {
        let mut roots: BTreeSet<&str> = self.mappings.iter().map(|(source, _)| source).collect();
        roots.extend(
            self.domain_defaults
                .values()
                .flatten()
                .filter_map(Target::email_address),
        );
        roots
    }
}

/// Reject mappings in which an address can forward back to itself
///
/// Returns [`Error::ForwardingCycle`] naming every address that sits on a
/// cycle. Diamond-shaped fan-in is fine.
pub fn validate(
    mappings: &AddressMapping,
    domain_defaults: &BTreeMap<String, Vec<Target>>,
) -> Result<()> {
    let graph = ForwardingGraph {
        mappings,
        domain_defaults,
    };

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut on_cycle: BTreeSet<String> = BTreeSet::new();

    for root in graph.roots() {
        if marks.contains_key(root) {
            continue;
        }

        // Iterative DFS: (node, successors, next successor index)
        let mut stack: Vec<(&str, Vec<&str>, usize)> = vec![(root, graph.successors(root), 0)];
        marks.insert(root, Mark::OnStack);

        while let Some((node, successors, next)) = stack.last_mut() {
            let Some(&child) = successors.get(*next) else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                continue;
            };
            *next += 1;

            match marks.get(child) {
                None => {
                    marks.insert(child, Mark::OnStack);
                    let successors = graph.successors(child);
                    stack.push((child, successors, 0));
                }
                Some(Mark::OnStack) => {
                    let start = stack
                        .iter()
                        .position(|(n, _, _)| *n == child)
                        .unwrap_or(0);
                    on_cycle.extend(stack[start..].iter().map(|(n, _, _)| n.to_string()));
                }
                Some(Mark::Done) => {}
            }
        }
    }

    if on_cycle.is_empty() {
        Ok(())
    } else {
        Err(Error::ForwardingCycle {
            addresses: on_cycle,
        })
    }
}
