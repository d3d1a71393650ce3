//! Environment Integration Test Suite
//!
//! This crate runs Mesh Prober against real clusters. Tests validate that
//! discovery sees the mesh, that remapped addresses are usable, and that
//! suites leave no resources behind.
//!
//! # Features
//!
//! - `smoke`: Discovery and matrix generation only, nothing is created (30s)
//! - `flows`: Full suites including resource provisioning and probes (2-5min)
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. Peered clusters reachable through the kubeconfigs named in the document
//! 2. `MESH_PROBER_CONFIG` pointing at a configuration document
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Smoke tests only
//! MESH_PROBER_CONFIG=test.yaml cargo test -p env-tests --features smoke
//!
//! # Full suites
//! MESH_PROBER_CONFIG=test.yaml cargo test -p env-tests --features all
//! ```

pub mod cluster;
pub mod eventual;
