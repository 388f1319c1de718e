//! Custom Resource Definitions for the OpenFGA operator
//!
//! This module contains all CRD definitions served under `openfga.zeiss.com`.

mod composite;
mod model;
mod store;
mod types;

pub use composite::{
    CheckTest, ListObjectsTest, ListUsersAssertion, ListUsersTest, ModelTest, OpenFGAStore,
    OpenFGAStoreSpec, OpenFGAStoreStatus, StoreDefinition, TupleCondition, TupleKey, UserFilter,
};
pub use model::{Model, ModelSpec, ModelStatus};
pub use store::{Store, StoreSpec, StoreStatus};
pub use types::{Phase, StoreRef};
