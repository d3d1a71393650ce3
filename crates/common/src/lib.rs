//! Common types shared across Mesh Prober components.

#![warn(clippy::pedantic)]

/// Module for entity and probe value types
pub mod types;

/// Module for the test plan configuration document
pub mod config;
