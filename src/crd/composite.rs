//! OpenFGAStore Custom Resource Definition
//!
//! An OpenFGAStore bundles a store, its authorization model, relationship
//! tuples and model tests in the layout of an OpenFGA store file. Either it
//! owns its backend store, or it binds to an existing Store via `storeRef`.
//!
//! Tuples and tests are consumed by bundle validation only; the controller
//! never writes tuples to the server.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{preserve_unknown_fields, Phase, StoreRef};

/// Specification for an OpenFGAStore
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openfga.zeiss.com",
    version = "v1alpha1",
    kind = "OpenFGAStore",
    plural = "openfgastores",
    shortname = "fgastore",
    status = "OpenFGAStoreStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Store ID","type":"string","jsonPath":".status.storeID"}"#,
    printcolumn = r#"{"name":"Instance","type":"string","jsonPath":".status.instanceID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenFGAStoreSpec {
    /// Bind to an existing Store instead of creating a backend store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_ref: Option<StoreRef>,

    /// Store definition in OpenFGA store-file layout
    pub store: StoreDefinition,
}

/// Store, model, tuples and tests as found in an OpenFGA store file
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreDefinition {
    /// Backend store name
    pub name: String,

    /// Inline authorization model DSL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Path to a model DSL file, relative to the bundle
    #[serde(default, alias = "model_file", skip_serializing_if = "Option::is_none")]
    pub model_file: Option<String>,

    /// Relationship tuples
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tuples: Vec<TupleKey>,

    /// Path to a YAML or JSON tuple list, relative to the bundle
    #[serde(default, alias = "tuple_file", skip_serializing_if = "Option::is_none")]
    pub tuple_file: Option<String>,

    /// Model tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<ModelTest>,
}

/// A relationship tuple
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TupleKey {
    /// Subject, e.g. `user:anne` or `group:eng#member`
    pub user: String,
    /// Relation on the object
    pub relation: String,
    /// Object, e.g. `document:roadmap`
    pub object: String,
    /// Condition attached to the tuple
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TupleCondition>,
}

/// Condition reference on a tuple
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TupleCondition {
    /// Name of a condition defined in the model
    pub name: String,
    /// Parameter values bound at write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub context: Option<serde_json::Value>,
}

/// A named group of assertions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelTest {
    /// Test name, unique within the bundle
    pub name: String,
    /// What the test covers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Extra tuples visible only to this test
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tuples: Vec<TupleKey>,
    /// Check assertions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check: Vec<CheckTest>,
    /// ListObjects assertions
    #[serde(default, alias = "list_objects", skip_serializing_if = "Vec::is_empty")]
    pub list_objects: Vec<ListObjectsTest>,
    /// ListUsers assertions
    #[serde(default, alias = "list_users", skip_serializing_if = "Vec::is_empty")]
    pub list_users: Vec<ListUsersTest>,
}

/// Expected results of Check for one user and object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CheckTest {
    /// Subject being checked
    pub user: String,
    /// Object being checked
    pub object: String,
    /// Request context for conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub context: Option<serde_json::Value>,
    /// Relation to expected outcome
    pub assertions: BTreeMap<String, bool>,
}

/// Expected results of ListObjects for one user and object type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ListObjectsTest {
    /// Subject
    pub user: String,
    /// Object type to list
    #[serde(rename = "type")]
    pub object_type: String,
    /// Request context for conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub context: Option<serde_json::Value>,
    /// Relation to expected objects
    pub assertions: BTreeMap<String, Vec<String>>,
}

/// Expected results of ListUsers for one object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersTest {
    /// Object whose users are listed
    pub object: String,
    /// Kinds of users to return
    #[serde(alias = "user_filter")]
    pub user_filter: Vec<UserFilter>,
    /// Request context for conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub context: Option<serde_json::Value>,
    /// Relation to expected users
    pub assertions: BTreeMap<String, ListUsersAssertion>,
}

/// User type filter for ListUsers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct UserFilter {
    /// User type
    #[serde(rename = "type")]
    pub user_type: String,
    /// Userset relation, e.g. `member` for `group#member`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Expected users for one relation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ListUsersAssertion {
    /// Users expected in the result
    pub users: Vec<String>,
}

/// Observed state of an OpenFGAStore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenFGAStoreStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Backend store id (owned or bound)
    #[serde(default, rename = "storeID")]
    pub store_id: String,

    /// Backend store this resource created and must delete; empty when bound
    #[serde(default, rename = "ownedStoreID")]
    pub owned_store_id: String,

    /// Suspends reconciliation while true (deletion is still honoured)
    #[serde(default)]
    pub control_paused: bool,

    /// Id of the published authorization model version
    #[serde(default, rename = "instanceID")]
    pub instance_id: String,

    /// Human-readable detail about the current phase; `null` clears it
    #[serde(default)]
    pub message: Option<String>,
}

impl OpenFGAStoreStatus {
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

    /// Builder: record the backend store this resource created
    pub fn with_owned_store_id(mut self, id: impl Into<String>) -> Self {
        self.owned_store_id = id.into();
        self
    }

    /// Builder: set the published model id
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Builder: set or clear the message
    pub fn message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

impl OpenFGAStore {
    /// Whether the spec asks for an owned backend store
    pub fn wants_own_store(&self) -> bool {
        self.spec.store_ref.is_none()
    }

    /// Backend store created by this resource, if any
    ///
    /// Ownership is recorded at creation time and does not follow later
    /// edits to `storeRef`.
    pub fn owned_store_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.owned_store_id.as_str())
            .filter(|id| !id.is_empty())
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
