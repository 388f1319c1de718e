//! OpenFGA wire types
//!
//! JSON shapes of the OpenFGA HTTP API, limited to what the operator sends and
//! reads. Unknown fields in responses are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Schema version written for every model
pub const SCHEMA_VERSION: &str = "1.1";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An authorization model in its JSON form
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Server-assigned id (empty when writing)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Schema version, "1.1"
    pub schema_version: String,
    /// Type definitions in declaration order
    #[serde(default, deserialize_with = "null_as_default")]
    pub type_definitions: Vec<TypeDefinition>,
    /// Conditions by name
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub conditions: BTreeMap<String, Condition>,
}

/// A type and its relations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Relation rewrites by relation name
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub relations: BTreeMap<String, Userset>,
    /// Directly assignable user types per relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Type metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Per-relation metadata
    #[serde(default, deserialize_with = "null_as_default")]
    pub relations: BTreeMap<String, RelationMetadata>,
}

/// Relation metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// User types that may be written directly for this relation
    #[serde(default, deserialize_with = "null_as_default")]
    pub directly_related_user_types: Vec<RelationReference>,
}

/// A directly related user type: `user`, `user:*`, `group#member`, with optional condition
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationReference {
    /// User type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Userset relation (`group#member`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Present for public access (`user:*`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<Wildcard>,
    /// Condition name (`user with cond`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
}

/// Marker object for wildcard references
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Wildcard {}

/// Relation rewrite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Userset {
    /// Directly assigned users
    This(Wildcard),
    /// Another relation on the same object
    ComputedUserset(ObjectRelation),
    /// A relation on objects related through a tupleset relation
    TupleToUserset(TupleToUserset),
    /// Any child grants
    Union(Usersets),
    /// All children grant
    Intersection(Usersets),
    /// Base grants and subtract does not
    Difference(Difference),
}

/// Relation reference inside a rewrite
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRelation {
    /// Unused by schema 1.1, kept for round trips
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object: String,
    /// Relation name
    #[serde(default)]
    pub relation: String,
}

impl ObjectRelation {
    /// Reference the given relation
    pub fn relation(name: impl Into<String>) -> Self {
        Self {
            object: String::new(),
            relation: name.into(),
        }
    }
}

/// `computed from tupleset`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleToUserset {
    /// Relation whose tuples point at the related objects
    pub tupleset: ObjectRelation,
    /// Relation evaluated on the related objects
    pub computed_userset: ObjectRelation,
}

/// Child list of a union or intersection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usersets {
    /// Operands
    #[serde(default, deserialize_with = "null_as_default")]
    pub child: Vec<Userset>,
}

/// `base but not subtract`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// Granting side
    pub base: Box<Userset>,
    /// Excluded side
    pub subtract: Box<Userset>,
}

/// A CEL condition
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition name
    pub name: String,
    /// CEL expression
    pub expression: String,
    /// Parameter types by parameter name
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: BTreeMap<String, ConditionParamType>,
}

/// Type of a condition parameter
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionParamType {
    /// `TYPE_NAME_*` constant
    pub type_name: String,
    /// Element type for maps and lists
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub generic_types: Vec<ConditionParamType>,
}

/// `POST /stores` request
#[derive(Debug, Serialize)]
pub struct CreateStoreRequest<'a> {
    /// Store name
    pub name: &'a str,
}

/// `POST /stores` response
#[derive(Debug, Deserialize)]
pub struct CreateStoreResponse {
    /// Server-assigned store id
    pub id: String,
}

/// `POST /stores/{id}/authorization-models` response
#[derive(Debug, Deserialize)]
pub struct WriteAuthorizationModelResponse {
    /// Id of the new model version
    pub authorization_model_id: String,
}

/// `GET /stores/{id}/authorization-models/{model_id}` response
#[derive(Debug, Deserialize)]
pub struct ReadAuthorizationModelResponse {
    /// The stored model
    pub authorization_model: AuthorizationModel,
}

/// Error body returned by the API
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. "validation_error"
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}
