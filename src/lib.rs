//! OpenFGA Operator - keeps OpenFGA stores and authorization models in sync with
//! Kubernetes resources
//!
//! The operator watches `Store`, `Model` and `OpenFGAStore` custom resources and
//! drives an external OpenFGA server toward the declared state. Resolved
//! identifiers are published on resource status and injected into annotated
//! workloads as environment variables.
//!
//! # Architecture
//!
//! Every controller is level-triggered: it re-reads the current state of its
//! resource, plans the actions needed to converge, performs them and records
//! the outcome on status. Controllers never call each other; a Model waits for
//! its Store purely by observing the Store's status.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Store, Model, OpenFGAStore)
//! - [`controller`] - Reconciliation logic for every resource kind
//! - [`fga`] - OpenFGA API client and model DSL translation
//! - [`runner`] - Controller wiring and watch registration
//! - [`validation`] - Offline validation of OpenFGAStore bundles
//! - [`events`] - Kubernetes Event publishing
//! - [`leader`] - Lease-based leader election
//! - [`health`] - Liveness and readiness endpoints
//! - [`metrics`] - Reconcile counters for Prometheus scraping
//! - [`config`] - Operator configuration
//! - [`retry`] - Backoff helpers
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod fga;
pub mod health;
pub mod leader;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Resource Contract Constants
// =============================================================================
// These values are part of the contract with users (annotations, env vars) and
// with the API server (group, finalizer). They must not change between releases.

/// API group of all custom resources served by the operator
pub const API_GROUP: &str = "openfga.zeiss.com";

/// Finalizer guarding backend cleanup for Stores and Models
pub const FINALIZER: &str = "openfga.zeiss.com/finalizer";

/// Prefix for workload annotations understood by the injector
pub const MODEL_ANNOTATION_PREFIX: &str = "openfga.zeiss.com/model.";

/// Annotation (without prefix) naming the Model a workload depends on
pub const MODEL_REF_KEY: &str = "ref";

/// Marker annotation written once identifiers were injected into a workload
pub const MODEL_UPDATED_ANNOTATION: &str = "openfga.zeiss.com/model.updated-at";

/// Environment variable carrying the authorization model id
pub const ENV_MODEL_INSTANCE_ID: &str = "OPENFGA_MODEL_INSTANCE_ID";

/// Environment variable carrying the store id
pub const ENV_MODEL_STORE_ID: &str = "OPENFGA_MODEL_STORE_ID";

/// Field manager used for every write the operator performs
pub const FIELD_MANAGER: &str = "openfga-operator";

/// Default OpenFGA API endpoint when none is configured
pub const DEFAULT_OPENFGA_URL: &str = "http://host.docker.internal:8080";

/// Lease name used for leader election
pub const LEADER_LEASE_NAME: &str = "c7669820.zeiss.com";
