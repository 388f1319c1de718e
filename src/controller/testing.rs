//! In-memory API server and OpenFGA server for reconciler scenarios
//!
//! The fake cluster enforces the two behaviours the reconcilers rely on:
//! resourceVersion checks on writes (409 on mismatch) and finalizer-gated
//! deletion.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use kube::{Resource, ResourceExt};

use super::client::{KubeClient, MetadataUpdate, ResourceKind};
use super::workload::{Workload, WorkloadKind};
use crate::crd::{
    Model, ModelSpec, ModelStatus, OpenFGAStore, OpenFGAStoreSpec, OpenFGAStoreStatus, Store,
    StoreDefinition, StoreRef, StoreSpec, StoreStatus,
};
use crate::fga::{dsl, FgaClient};
use crate::Error;

pub const NAMESPACE: &str = "default";

pub const SAMPLE_DSL: &str = "model
  schema 1.1

type user

type document
  relations
    define owner: [user]
    define viewer: [user] or owner
";

pub const SAMPLE_DSL_V2: &str = "model
  schema 1.1

type user

type document
  relations
    define owner: [user]
    define editor: [user] or owner
    define viewer: [user] or editor
";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

pub fn sample_store(name: &str) -> Store {
    Store {
        metadata: meta(name),
        spec: StoreSpec::default(),
        status: None,
    }
}

pub fn sample_model(name: &str, store: &str, model: &str) -> Model {
    Model {
        metadata: meta(name),
        spec: ModelSpec {
            store_ref: StoreRef {
                name: store.to_string(),
            },
            model: model.to_string(),
        },
        status: None,
    }
}

pub fn sample_composite(
    name: &str,
    store_ref: Option<&str>,
    model: Option<&str>,
) -> OpenFGAStore {
    OpenFGAStore {
        metadata: meta(name),
        spec: OpenFGAStoreSpec {
            store_ref: store_ref.map(|s| StoreRef {
                name: s.to_string(),
            }),
            store: StoreDefinition {
                name: name.to_string(),
                model: model.map(str::to_string),
                ..Default::default()
            },
        },
        status: None,
    }
}

pub fn annotated_deployment(name: &str, model: Option<&str>) -> Workload {
    let mut metadata = meta(name);
    if let Some(m) = model {
        let key = format!("{}{}", crate::MODEL_ANNOTATION_PREFIX, crate::MODEL_REF_KEY);
        metadata.annotations = Some([(key, m.to_string())].into_iter().collect());
    }
    Workload::Deployment(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

/// A Store that was already created on the server as `id`
pub fn synchronized_store(name: &str, id: &str) -> Store {
    let mut store = sample_store(name);
    store.metadata.finalizers = Some(vec![crate::FINALIZER.to_string()]);
    store.status = Some(
        StoreStatus::default()
            .with_phase(crate::crd::Phase::Synchronized)
            .with_store_id(id),
    );
    store
}

pub fn conflict() -> Error {
    api_error(409, "Conflict")
}

type Key = (String, String);

#[derive(Default)]
struct ClusterState {
    stores: BTreeMap<Key, Store>,
    models: BTreeMap<Key, Model>,
    composites: BTreeMap<Key, OpenFGAStore>,
    workloads: BTreeMap<(WorkloadKind, String, String), Workload>,
    version: u64,
    metadata_failures: VecDeque<Error>,
    workload_failures: VecDeque<Error>,
    workload_replacements: usize,
}

impl ClusterState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

fn key<K: ResourceExt>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn stamp(meta: &mut ObjectMeta, version: String) {
    meta.resource_version = Some(version);
    if meta.uid.is_none() {
        meta.uid = Some(format!("uid-{}", meta.name.clone().unwrap_or_default()));
    }
}

fn apply_metadata<K: Resource>(
    objects: &mut BTreeMap<Key, K>,
    key: Key,
    update: &MetadataUpdate,
    version: String,
) -> Result<(), Error> {
    let Some(obj) = objects.get_mut(&key) else {
        return Err(api_error(404, "NotFound"));
    };
    if update.resource_version.is_some() && obj.meta().resource_version != update.resource_version {
        return Err(conflict());
    }
    let meta = obj.meta_mut();
    meta.finalizers = Some(update.finalizers.clone());
    if let Some(owners) = &update.owner_references {
        meta.owner_references = Some(owners.clone());
    }
    stamp(meta, version);
    if meta.deletion_timestamp.is_some() && update.finalizers.is_empty() {
        objects.remove(&key);
    }
    Ok(())
}

fn mark_deleted<K: Resource>(objects: &mut BTreeMap<Key, K>, key: Key, version: String) {
    let Some(obj) = objects.get_mut(&key) else {
        return;
    };
    let meta = obj.meta_mut();
    if meta.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
        meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
        stamp(meta, version);
    } else {
        objects.remove(&key);
    }
}

/// API server stand-in holding Stores, Models, OpenFGAStores and workloads
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn insert_store(&self, mut store: Store) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        stamp(&mut store.metadata, version);
        state.stores.insert(key(&store), store);
    }

    pub fn insert_model(&self, mut model: Model) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        stamp(&mut model.metadata, version);
        state.models.insert(key(&model), model);
    }

    pub fn insert_composite(&self, mut composite: OpenFGAStore) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        stamp(&mut composite.metadata, version);
        state.composites.insert(key(&composite), composite);
    }

    pub fn insert_workload(&self, mut workload: Workload) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        stamp(workload.metadata_mut(), version);
        let k = (workload.kind(), workload.namespace(), workload.name());
        state.workloads.insert(k, workload);
    }

    pub fn store(&self, namespace: &str, name: &str) -> Option<Store> {
        let state = self.state.lock().unwrap();
        state.stores.get(&(namespace.into(), name.into())).cloned()
    }

    pub fn model(&self, namespace: &str, name: &str) -> Option<Model> {
        let state = self.state.lock().unwrap();
        state.models.get(&(namespace.into(), name.into())).cloned()
    }

    pub fn composite(&self, namespace: &str, name: &str) -> Option<OpenFGAStore> {
        let state = self.state.lock().unwrap();
        state.composites.get(&(namespace.into(), name.into())).cloned()
    }

    pub fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<Workload> {
        let state = self.state.lock().unwrap();
        state
            .workloads
            .get(&(kind, namespace.into(), name.into()))
            .cloned()
    }

    /// Change a Model's declared DSL, as `kubectl apply` would
    pub fn edit_model(&self, namespace: &str, name: &str, dsl: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(model) = state.models.get_mut(&(namespace.into(), name.into())) {
            model.spec.model = dsl.to_string();
            stamp(&mut model.metadata, version);
        }
    }

    /// Add, change or remove an OpenFGAStore's `storeRef`
    pub fn set_composite_store_ref(&self, namespace: &str, name: &str, store: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(composite) = state.composites.get_mut(&(namespace.into(), name.into())) {
            composite.spec.store_ref = store.map(|s| StoreRef {
                name: s.to_string(),
            });
            stamp(&mut composite.metadata, version);
        }
    }

    pub fn delete_store(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        mark_deleted(&mut state.stores, (namespace.into(), name.into()), version);
    }

    pub fn delete_model(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        mark_deleted(&mut state.models, (namespace.into(), name.into()), version);
    }

    pub fn delete_composite(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        mark_deleted(&mut state.composites, (namespace.into(), name.into()), version);
    }

    /// Make the next metadata write fail with `error`
    pub fn fail_next_metadata_update(&self, error: Error) {
        self.state.lock().unwrap().metadata_failures.push_back(error);
    }

    /// Make the next workload replace fail with `error`
    pub fn fail_next_workload_replace(&self, error: Error) {
        self.state.lock().unwrap().workload_failures.push_back(error);
    }

    /// Number of successful workload replacements
    pub fn workload_replacements(&self) -> usize {
        self.state.lock().unwrap().workload_replacements
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_store(&self, namespace: &str, name: &str) -> Result<Option<Store>, Error> {
        Ok(self.store(namespace, name))
    }

    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        Ok(self.model(namespace, name))
    }

    async fn get_composite(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OpenFGAStore>, Error> {
        Ok(self.composite(namespace, name))
    }

    async fn patch_store_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StoreStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let store = state
            .stores
            .get_mut(&(namespace.into(), name.into()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        store.status = Some(status.clone());
        stamp(&mut store.metadata, version);
        Ok(())
    }

    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ModelStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let model = state
            .models
            .get_mut(&(namespace.into(), name.into()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        model.status = Some(status.clone());
        stamp(&mut model.metadata, version);
        Ok(())
    }

    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenFGAStoreStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let composite = state
            .composites
            .get_mut(&(namespace.into(), name.into()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        composite.status = Some(status.clone());
        stamp(&mut composite.metadata, version);
        Ok(())
    }

    async fn update_metadata(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        update: &MetadataUpdate,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.metadata_failures.pop_front() {
            return Err(error);
        }
        let version = state.next_version();
        let k = (namespace.to_string(), name.to_string());
        match kind {
            ResourceKind::Store => apply_metadata(&mut state.stores, k, update, version),
            ResourceKind::Model => apply_metadata(&mut state.models, k, update, version),
            ResourceKind::Composite => apply_metadata(&mut state.composites, k, update, version),
        }
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error> {
        Ok(self.workload(kind, namespace, name))
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.workload_failures.pop_front() {
            return Err(error);
        }
        let version = state.next_version();
        let k = (workload.kind(), workload.namespace(), workload.name());
        let current = state
            .workloads
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if current.metadata().resource_version != workload.metadata().resource_version {
            return Err(conflict());
        }
        let mut replaced = workload.clone();
        stamp(replaced.metadata_mut(), version);
        state.workloads.insert(k, replaced);
        state.workload_replacements += 1;
        Ok(())
    }
}

#[derive(Default)]
struct FgaState {
    store_ids: VecDeque<String>,
    stores: BTreeSet<String>,
    models: BTreeMap<(String, String), String>,
    next_model: u32,
    calls: Vec<String>,
}

/// OpenFGA stand-in: stores, versioned models and a call log
#[derive(Default)]
pub struct FakeFga {
    state: Mutex<FgaState>,
}

impl FakeFga {
    /// Server that hands out `ids` in order for new stores
    pub fn with_store_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let fga = Self::default();
        fga.state
            .lock()
            .unwrap()
            .store_ids
            .extend(ids.into_iter().map(str::to_string));
        fga
    }

    /// Register a store that already exists on the server
    pub fn seed_store(&self, store_id: &str) {
        self.state.lock().unwrap().stores.insert(store_id.to_string());
    }

    /// Every call in order, e.g. `create_store(s1)`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that changed server state
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("read_model"))
            .collect()
    }

    /// Drop a model version, as if the server's database was reset
    pub fn forget_model(&self, store_id: &str, model_id: &str) {
        self.state
            .lock()
            .unwrap()
            .models
            .remove(&(store_id.to_string(), model_id.to_string()));
    }
}

#[async_trait]
impl FgaClient for FakeFga {
    async fn create_store(&self, name: &str) -> Result<String, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_store({name})"));
        let id = match state.store_ids.pop_front() {
            Some(id) => id,
            None => format!("store-{}", state.stores.len() + 1),
        };
        state.stores.insert(id.clone());
        Ok(id)
    }

    async fn delete_store(&self, store_id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_store({store_id})"));
        state.stores.remove(store_id);
        state.models.retain(|(store, _), _| store != store_id);
        Ok(())
    }

    async fn write_model(&self, store_id: &str, model: &str) -> Result<String, Error> {
        let parsed = dsl::parse(model)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("write_model({store_id})"));
        if !state.stores.contains(store_id) {
            return Err(Error::backend("write_model", Some(404), "store_id_not_found"));
        }
        state.next_model += 1;
        let id = format!("v{}", state.next_model);
        state
            .models
            .insert((store_id.to_string(), id.clone()), dsl::print(&parsed));
        Ok(id)
    }

    async fn read_model(&self, store_id: &str, model_id: &str) -> Result<String, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("read_model({store_id},{model_id})"));
        state
            .models
            .get(&(store_id.to_string(), model_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::backend("read_model", Some(404), "authorization_model_not_found")
            })
    }
}
