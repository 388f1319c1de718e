//! Integration tests for the OpenFGA operator
//!
//! These tests run against a real API server (kind works well) and tell the
//! story of how users declare stores and models through Kubernetes.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading, updating and deleting
//!   Store, Model and OpenFGAStore resources through the Kubernetes API
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
