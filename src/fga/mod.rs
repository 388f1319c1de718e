//! OpenFGA backend access
//!
//! Reconcilers talk to OpenFGA only through [`FgaClient`], which keeps each
//! operation to a single backend call and hides the DSL/JSON translation.
//! [`HttpFgaClient`] is the production implementation.

pub mod dsl;
mod http;
pub mod schema;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use http::HttpFgaClient;

use crate::Error;

/// Trait abstracting the OpenFGA API
///
/// Errors carry enough detail for callers to tell permanent failures
/// ([`Error::Translation`], non-retryable [`Error::Backend`]) from transient
/// ones via [`Error::is_retryable`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FgaClient: Send + Sync {
    /// Create a store and return its server-assigned id
    async fn create_store(&self, name: &str) -> Result<String, Error>;

    /// Delete a store; a store that no longer exists counts as deleted
    async fn delete_store(&self, store_id: &str) -> Result<(), Error>;

    /// Translate `model` from DSL, write it as a new version and return the version id
    async fn write_model(&self, store_id: &str, model: &str) -> Result<String, Error>;

    /// Read a model version back as DSL
    ///
    /// A version the server does not know yields an error for which
    /// [`Error::is_not_found`] holds.
    async fn read_model(&self, store_id: &str, model_id: &str) -> Result<String, Error>;
}
