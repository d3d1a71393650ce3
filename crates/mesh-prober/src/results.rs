//! Result aggregation.
//!
//! [`ResultsMap`] is keyed by a fixed-depth composite key instead of
//! implicitly created nested maps. The nested form only exists at the
//! serialization boundary, see [`ResultsMap::to_nested`].

use crate::matrix::{Test, UnreachablePair};
use common::types::{EntityId, ProbeKind};
use std::collections::{BTreeMap, BTreeSet};

/// Probe kind -> outcome.
pub type ProbeResults = BTreeMap<ProbeKind, bool>;

/// Destination cluster -> namespace -> name -> probe results.
pub type DestinationResults = BTreeMap<String, BTreeMap<String, BTreeMap<String, ProbeResults>>>;

/// Source cluster -> namespace -> name -> destination results.
///
/// Entities without a cluster are keyed by the empty string.
pub type NestedResults = BTreeMap<String, BTreeMap<String, BTreeMap<String, DestinationResults>>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    pub source: EntityId,
    pub destination: EntityId,
    pub probe: ProbeKind,
}

impl ResultKey {
    pub fn new(source: &EntityId, destination: &EntityId, probe: ProbeKind) -> Self {
        Self {
            source: source.clone(),
            destination: destination.clone(),
            probe,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsMap {
    results: BTreeMap<ResultKey, bool>,
    unreachable: BTreeSet<UnreachablePair>,
}

impl ResultsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous outcome for the key, if any.
    pub fn insert(&mut self, key: ResultKey, success: bool) -> Option<bool> {
        self.results.insert(key, success)
    }

    /// `None` when the probe was not attempted.
    pub fn lookup(&self, source: &EntityId, destination: &EntityId, probe: ProbeKind) -> Option<bool> {
        self.results
            .get(&ResultKey::new(source, destination, probe))
            .copied()
    }

    pub fn mark_unreachable(&mut self, pair: UnreachablePair) {
        self.unreachable.insert(pair);
    }

    /// Whether the pair was excluded because no route exists between the
    /// two clusters.
    pub fn is_unreachable(&self, source: &EntityId, destination: &EntityId) -> bool {
        self.unreachable.contains(&UnreachablePair {
            source: source.clone(),
            destination: destination.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, bool)> {
        self.results.iter().map(|(key, ok)| (key, *ok))
    }

    pub fn unreachable(&self) -> impl Iterator<Item = &UnreachablePair> {
        self.unreachable.iter()
    }

    /// (successes, failures)
    pub fn tally(&self) -> (usize, usize) {
        let passed = self.results.values().filter(|ok| **ok).count();
        (passed, self.results.len() - passed)
    }

    /// Nested, plain-data form for the report document.
    pub fn to_nested(&self) -> NestedResults {
        let mut nested = NestedResults::new();
        for (key, ok) in &self.results {
            nested
                .entry(cluster_key(&key.source))
                .or_default()
                .entry(key.source.namespace.clone())
                .or_default()
                .entry(key.source.name.clone())
                .or_default()
                .entry(cluster_key(&key.destination))
                .or_default()
                .entry(key.destination.namespace.clone())
                .or_default()
                .entry(key.destination.name.clone())
                .or_default()
                .insert(key.probe, *ok);
        }
        nested
    }

    /// Rebuild from the document form.
    pub fn from_nested(nested: &NestedResults, unreachable: &[UnreachablePair]) -> Self {
        let mut map = Self::new();
        for (src_cluster, namespaces) in nested {
            for (src_namespace, names) in namespaces {
                for (src_name, destinations) in names {
                    let source = entity_id(src_cluster, src_namespace, src_name);
                    for (dst_cluster, dst_namespaces) in destinations {
                        for (dst_namespace, dst_names) in dst_namespaces {
                            for (dst_name, probes) in dst_names {
                                let destination = entity_id(dst_cluster, dst_namespace, dst_name);
                                for (probe, ok) in probes {
                                    map.insert(ResultKey::new(&source, &destination, *probe), *ok);
                                }
                            }
                        }
                    }
                }
            }
        }
        for pair in unreachable {
            map.mark_unreachable(pair.clone());
        }
        map
    }
}

fn cluster_key(id: &EntityId) -> String {
    id.cluster.clone().unwrap_or_default()
}

fn entity_id(cluster: &str, namespace: &str, name: &str) -> EntityId {
    EntityId {
        cluster: (!cluster.is_empty()).then(|| cluster.to_string()),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Fold executed tests into a [`ResultsMap`]. Tests that never ran are
/// left out, so they look up as "not attempted".
pub fn create_results_map(tests: &[Test]) -> ResultsMap {
    let mut map = ResultsMap::new();
    for test in tests {
        if let Some(ok) = test.result().as_bool() {
            map.insert(
                ResultKey::new(&test.source().id, &test.destination().id, test.kind()),
                ok,
            );
        }
    }
    map
}
