//! Mesh Prober Library
//!
//! Network reachability testing across federated clusters whose pod
//! networks are remapped at cluster boundaries. A run:
//!
//! - discovers pods, services and remapped CIDRs in every cluster
//! - builds a static matrix of (source, destination, probe) tests
//! - provisions each suite's temporary policies and firewall rules
//! - executes the probes with bounded parallelism
//! - renders the results as a colored matrix and optionally serializes them
//!
//! # Architecture
//!
//! ```text
//! discovery -> matrix -> lifecycle { engine } -> results -> report
//! ```
//!
//! The cluster control planes are reached only through three collaborator
//! traits ([`inventory::ClusterInventory`], [`provisioner::ResourceProvisioner`],
//! [`probes::ProbeExecutor`]), each with a Kubernetes implementation and an
//! in-memory mock.
//!
//! # Modules
//!
//! - `remap` - CIDR prefix translation
//! - `models` - Clusters, workloads and the remap table
//! - `inventory` / `discovery` - Cluster inventory and registry construction
//! - `matrix` - Test generation and topology exclusion rules
//! - `resources` / `provisioner` / `lifecycle` - Test-scoped resources
//! - `probes` / `engine` - Probe execution
//! - `results` / `report` - Aggregation, rendering and the report document

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod discovery;
pub mod engine;
pub mod errors;
pub mod inventory;
pub mod kube_client;
pub mod lifecycle;
pub mod matrix;
pub mod models;
pub mod probes;
pub mod provisioner;
pub mod remap;
pub mod report;
pub mod resources;
pub mod results;
pub mod runner;
