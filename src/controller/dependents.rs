//! Watch mappers from a changed object to the objects that depend on it
//!
//! The indexes are recomputed from reflector snapshots on every event, so
//! they are never out of sync with the cache they read.

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};

use super::workload::model_reference;
use crate::crd::{Model, OpenFGAStore, Store};

fn same_namespace<A: ResourceExt, B: ResourceExt>(a: &A, b: &B) -> bool {
    a.namespace() == b.namespace()
}

fn object_ref<K>(obj: &K) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let reference = ObjectRef::new(&obj.name_any());
    match obj.namespace() {
        Some(ns) => reference.within(&ns),
        None => reference,
    }
}

/// Models whose `storeRef` names `store`
pub fn models_referencing(store: &Store, models: &[Arc<Model>]) -> Vec<ObjectRef<Model>> {
    let name = store.name_any();
    models
        .iter()
        .filter(|m| same_namespace(m.as_ref(), store) && m.spec.store_ref.name == name)
        .map(|m| object_ref(m.as_ref()))
        .collect()
}

/// OpenFGAStores bound to `store` through `storeRef`
pub fn composites_referencing(
    store: &Store,
    composites: &[Arc<OpenFGAStore>],
) -> Vec<ObjectRef<OpenFGAStore>> {
    let name = store.name_any();
    composites
        .iter()
        .filter(|c| {
            same_namespace(c.as_ref(), store)
                && c.spec.store_ref.as_ref().is_some_and(|r| r.name == name)
        })
        .map(|c| object_ref(c.as_ref()))
        .collect()
}

/// Workloads whose model annotation names `model`
pub fn workloads_for_model<K>(model: &Model, workloads: &[Arc<K>]) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let name = model.name_any();
    workloads
        .iter()
        .filter(|w| {
            same_namespace(w.as_ref(), model) && model_reference(w.meta()) == Some(name.as_str())
        })
        .map(|w| object_ref(w.as_ref()))
        .collect()
}

/// Workloads reaching `store` through any Model that references it
pub fn workloads_for_store<K>(
    store: &Store,
    models: &[Arc<Model>],
    workloads: &[Arc<K>],
) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let mut affected: Vec<ObjectRef<K>> = models
        .iter()
        .filter(|m| same_namespace(m.as_ref(), store) && m.spec.store_ref.name == store.name_any())
        .flat_map(|m| workloads_for_model(m, workloads))
        .collect();
    affected.sort_by(|a, b| a.name.cmp(&b.name));
    affected.dedup();
    affected
}
