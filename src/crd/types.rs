//! Shared types used by the operator's CRDs

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coarse lifecycle state shared by every resource kind
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Never reconciled
    #[default]
    #[serde(rename = "")]
    None,
    /// Waiting for a dependency (e.g. the referenced Store has no id yet)
    Pending,
    /// Backend resource is being created
    Creating,
    /// Backend state matches the declared spec
    Synchronized,
    /// Last attempt failed; see status message and events
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, ""),
            Self::Pending => write!(f, "Pending"),
            Self::Creating => write!(f, "Creating"),
            Self::Synchronized => write!(f, "Synchronized"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Reference to a Store in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StoreRef {
    /// Name of the Store resource
    pub name: String,
}

/// Schema for free-form JSON objects (condition contexts)
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
