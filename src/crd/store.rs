//! Store Custom Resource Definition
//!
//! A Store is a named authorization namespace on the OpenFGA server. The
//! operator creates it once, records the server-assigned id on status and
//! deletes it when the resource is deleted.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Phase;

/// Specification for a Store
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openfga.zeiss.com",
    version = "v1alpha1",
    kind = "Store",
    plural = "stores",
    shortname = "fgas",
    status = "StoreStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Store ID","type":"string","jsonPath":".status.storeID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// Name of the store on the OpenFGA server (defaults to metadata.name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Observed state of a Store
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Id assigned by the OpenFGA server; never changes once set
    #[serde(default, rename = "storeID")]
    pub store_id: String,

    /// Suspends reconciliation while true (deletion is still honoured)
    #[serde(default)]
    pub control_paused: bool,

    /// Human-readable detail about the current phase; `null` clears it
    #[serde(default)]
    pub message: Option<String>,
}

impl StoreStatus {
    /// Builder: set the phase
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Builder: set the backend store id
    pub fn with_store_id(mut self, id: impl Into<String>) -> Self {
        self.store_id = id.into();
        self
    }

    /// Builder: set or clear the message
    pub fn message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

impl Store {
    /// Name used for the store on the OpenFGA server
    pub fn backend_name(&self) -> String {
        self.spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Backend store id, if one was recorded
    pub fn store_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.store_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Whether reconciliation is suspended
    pub fn is_paused(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.control_paused)
    }
}
