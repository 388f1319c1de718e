//! Model Custom Resource Definition
//!
//! A Model carries an authorization model in the OpenFGA DSL and references
//! the Store it is published into.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Phase, StoreRef};

/// Specification for a Model
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openfga.zeiss.com",
    version = "v1alpha1",
    kind = "Model",
    plural = "models",
    shortname = "fgam",
    status = "ModelStatus",
    namespaced,
    printcolumn = r#"{"name":"Store","type":"string","jsonPath":".spec.storeRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Instance","type":"string","jsonPath":".status.instanceID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Store the model is published into
    pub store_ref: StoreRef,

    /// Authorization model in the OpenFGA DSL
    pub model: String,
}

/// Observed state of a Model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Id of the published authorization model version
    #[serde(default, rename = "instanceID")]
    pub instance_id: String,

    /// Suspends reconciliation while true (deletion is still honoured)
    #[serde(default)]
    pub control_paused: bool,

    /// Store id the current version was published into
    #[serde(default, rename = "storeID")]
    pub store_id: String,

    /// Human-readable detail about the current phase; `null` clears it
    #[serde(default)]
    pub message: Option<String>,
}

impl ModelStatus {
    /// Builder: set the phase
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Builder: record a published version
    pub fn published(
        mut self,
        store_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        self.store_id = store_id.into();
        self.instance_id = instance_id.into();
        self
    }

    /// Builder: set or clear the message
    pub fn message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

impl Model {
    /// Published model id, if any
    pub fn instance_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.instance_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Whether reconciliation is suspended
    pub fn is_paused(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.control_paused)
    }
}
