//! # Mesh Prober Test Utilities
//!
//! Shared test utilities for Mesh Prober integration tests.
//!
//! This crate provides:
//! - Fixed cluster names, addresses and CIDRs
//! - A mesh builder producing a matching configuration document and mock
//!   inventory (`TestMeshBuilder`)
//! - Suite and resource declaration helpers
//! - Custom assertions over generated test matrices (`MatrixAssertions`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mp_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mesh = two_cluster_mesh();
//!     let registry = load_clusters(&mesh.config(), &mesh.inventory()).await.unwrap();
//!
//!     let sets = build_entities(&registry, &mesh.config().probes, &[]).unwrap();
//!     let plan = build_test_matrix(&sets.sources, &sets.destinations, &registry).unwrap();
//!
//!     plan.tests
//!         .assert_no_self_tests()
//!         .assert_services_are_local();
//! }
//! ```

pub mod assertions;
pub mod mesh_builder;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use mesh_builder::*;
pub use test_ids::*;
