//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions over generated test matrices.

use common::types::{EntityKind, ProbeKind};
use mesh_prober::matrix::Test;

/// Custom assertions for a generated test matrix
///
/// # Example
/// ```rust,ignore
/// plan.tests
///     .assert_no_self_tests()
///     .assert_services_are_local()
///     .assert_no_tests_between("cluster-b", "cluster-a");
/// ```
pub trait MatrixAssertions {
    /// Assert that no test targets its own source
    fn assert_no_self_tests(&self) -> &Self;

    /// Assert that every service destination lives in the source's cluster
    fn assert_services_are_local(&self) -> &Self;

    /// Assert that no source in `source_cluster` probes `destination_cluster`
    fn assert_no_tests_between(&self, source_cluster: &str, destination_cluster: &str) -> &Self;

    /// Assert the total number of tests
    fn assert_test_count(&self, expected: usize) -> &Self;

    /// Assert that at least one `kind` test targets the destination named `destination`
    fn assert_probe_for(&self, destination: &str, kind: ProbeKind) -> &Self;
}

impl MatrixAssertions for [Test] {
    fn assert_no_self_tests(&self) -> &Self {
        for test in self {
            assert_ne!(
                test.source().id,
                test.destination().id,
                "Test targets its own source: {test}"
            );
        }
        self
    }

    fn assert_services_are_local(&self) -> &Self {
        for test in self
            .iter()
            .filter(|t| t.destination().kind == EntityKind::Service)
        {
            assert_eq!(
                test.source().id.cluster(),
                test.destination().id.cluster(),
                "Service probed across clusters: {test}"
            );
        }
        self
    }

    fn assert_no_tests_between(&self, source_cluster: &str, destination_cluster: &str) -> &Self {
        let offending: Vec<String> = self
            .iter()
            .filter(|t| {
                t.source().id.cluster() == Some(source_cluster)
                    && t.destination().id.cluster() == Some(destination_cluster)
            })
            .map(ToString::to_string)
            .collect();
        assert!(
            offending.is_empty(),
            "Expected no tests from {source_cluster} to {destination_cluster}, got {offending:?}"
        );
        self
    }

    fn assert_test_count(&self, expected: usize) -> &Self {
        assert_eq!(
            self.len(),
            expected,
            "Expected {expected} tests, got: {:#?}",
            self.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        self
    }

    fn assert_probe_for(&self, destination: &str, kind: ProbeKind) -> &Self {
        assert!(
            self.iter()
                .any(|t| t.destination().id.name == destination && t.kind() == kind),
            "Expected a {kind} test targeting {destination}"
        );
        self
    }
}
