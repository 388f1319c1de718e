//! Kubernetes access and shared controller context
//!
//! Reconcilers never touch `kube::Api` directly; they go through
//! [`KubeClient`] so tests can substitute a mock or an in-memory cluster.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use super::workload::{Workload, WorkloadKind};
use crate::crd::{Model, ModelStatus, OpenFGAStore, OpenFGAStoreStatus, Store, StoreStatus};
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::fga::FgaClient;
use crate::metrics::ReconcileMetrics;
use crate::retry::{BackoffTracker, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// Custom resource kinds owned by the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `Store`
    Store,
    /// `Model`
    Model,
    /// `OpenFGAStore`
    Composite,
}

impl ResourceKind {
    /// Kind name as used in logs and backoff keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Store => "Store",
            ResourceKind::Model => "Model",
            ResourceKind::Composite => "OpenFGAStore",
        }
    }
}

/// Metadata write guarded by the resourceVersion it was computed from
///
/// `finalizers` replaces the whole list. `owner_references` replaces the
/// whole list when set and is left untouched otherwise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataUpdate {
    /// Version the change was computed against; a stale version yields 409
    pub resource_version: Option<String>,
    /// Complete finalizer list after the update
    pub finalizers: Vec<String>,
    /// Complete owner reference list after the update
    pub owner_references: Option<Vec<OwnerReference>>,
}

impl MetadataUpdate {
    /// Render as a JSON merge patch
    pub fn to_patch(&self) -> serde_json::Value {
        let mut metadata = serde_json::json!({ "finalizers": self.finalizers });
        if let Some(rv) = &self.resource_version {
            metadata["resourceVersion"] = serde_json::json!(rv);
        }
        if let Some(owners) = &self.owner_references {
            metadata["ownerReferences"] = serde_json::json!(owners);
        }
        serde_json::json!({ "metadata": metadata })
    }
}

/// Trait abstracting the Kubernetes operations the reconcilers need
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Store; `Ok(None)` when it does not exist
    async fn get_store(&self, namespace: &str, name: &str) -> Result<Option<Store>, Error>;

    /// Fetch a Model; `Ok(None)` when it does not exist
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error>;

    /// Fetch an OpenFGAStore; `Ok(None)` when it does not exist
    async fn get_composite(&self, namespace: &str, name: &str)
        -> Result<Option<OpenFGAStore>, Error>;

    /// Merge-patch the status subresource of a Store
    async fn patch_store_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StoreStatus,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource of a Model
    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ModelStatus,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource of an OpenFGAStore
    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenFGAStoreStatus,
    ) -> Result<(), Error>;

    /// Write finalizers and owner references
    async fn update_metadata(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        update: &MetadataUpdate,
    ) -> Result<(), Error>;

    /// Fetch a workload; `Ok(None)` when it does not exist
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error>;

    /// Replace a workload; fails with 409 if it changed since it was read
    async fn replace_workload(&self, workload: &Workload) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn patch_status<K, S>(&self, namespace: &str, name: &str, status: &S) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
        S: Serialize + Sync,
    {
        let patch = serde_json::json!({ "status": status });
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_metadata<K>(
        &self,
        namespace: &str,
        name: &str,
        update: &MetadataUpdate,
    ) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&update.to_patch()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_store(&self, namespace: &str, name: &str) -> Result<Option<Store>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_composite(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OpenFGAStore>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn patch_store_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StoreStatus,
    ) -> Result<(), Error> {
        self.patch_status::<Store, _>(namespace, name, status).await
    }

    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ModelStatus,
    ) -> Result<(), Error> {
        self.patch_status::<Model, _>(namespace, name, status).await
    }

    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OpenFGAStoreStatus,
    ) -> Result<(), Error> {
        self.patch_status::<OpenFGAStore, _>(namespace, name, status)
            .await
    }

    async fn update_metadata(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        update: &MetadataUpdate,
    ) -> Result<(), Error> {
        match kind {
            ResourceKind::Store => self.patch_metadata::<Store>(namespace, name, update).await,
            ResourceKind::Model => self.patch_metadata::<Model>(namespace, name, update).await,
            ResourceKind::Composite => {
                self.patch_metadata::<OpenFGAStore>(namespace, name, update)
                    .await
            }
        }
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error> {
        Ok(match kind {
            WorkloadKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(Workload::Deployment),
            WorkloadKind::StatefulSet => self
                .get_opt::<StatefulSet>(namespace, name)
                .await?
                .map(Workload::StatefulSet),
            WorkloadKind::DaemonSet => self
                .get_opt::<DaemonSet>(namespace, name)
                .await?
                .map(Workload::DaemonSet),
        })
    }

    async fn replace_workload(&self, workload: &Workload) -> Result<(), Error> {
        let namespace = workload.namespace();
        let name = workload.name();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match workload {
            Workload::Deployment(d) => {
                self.api::<Deployment>(&namespace)
                    .replace(&name, &params, d)
                    .await?;
            }
            Workload::StatefulSet(s) => {
                self.api::<StatefulSet>(&namespace)
                    .replace(&name, &params, s)
                    .await?;
            }
            Workload::DaemonSet(d) => {
                self.api::<DaemonSet>(&namespace)
                    .replace(&name, &params, d)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Shared state for all reconcilers
pub struct Context {
    /// Kubernetes access (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// OpenFGA access
    pub fga: Arc<dyn FgaClient>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-object failure counts for error policies
    pub backoff: BackoffTracker,
    /// Retry curve for optimistic-concurrency conflicts
    pub conflict_retry: RetryConfig,
    /// Reconcile outcome counters
    pub metrics: ReconcileMetrics,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, fga: Arc<dyn FgaClient>) -> ContextBuilder {
        ContextBuilder::new(client, fga)
    }

    /// Create a context for testing with custom clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        fga: Arc<dyn FgaClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            fga,
            events,
            backoff: BackoffTracker::default(),
            conflict_retry: RetryConfig {
                initial_delay: std::time::Duration::from_millis(1),
                ..RetryConfig::with_max_attempts(5)
            },
            metrics: ReconcileMetrics::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let ctx = Context::builder(client, fga)
///     .event_publisher(Arc::new(NoopEventPublisher))
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    fga: Arc<dyn FgaClient>,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client, fga: Arc<dyn FgaClient>) -> Self {
        Self {
            client,
            fga,
            kube: None,
            events: None,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            fga: self.fga,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, FIELD_MANAGER))),
            backoff: BackoffTracker::default(),
            conflict_retry: RetryConfig::with_max_attempts(5),
            metrics: ReconcileMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_patch_carries_resource_version() {
        let update = MetadataUpdate {
            resource_version: Some("42".into()),
            finalizers: vec![crate::FINALIZER.to_string()],
            owner_references: None,
        };
        assert_eq!(
            update.to_patch(),
            json!({"metadata": {
                "resourceVersion": "42",
                "finalizers": ["openfga.zeiss.com/finalizer"]
            }})
        );
    }

    #[test]
    fn removing_the_last_finalizer_sends_an_empty_list() {
        let update = MetadataUpdate::default();
        assert_eq!(update.to_patch(), json!({"metadata": {"finalizers": []}}));
    }

    #[test]
    fn owner_references_replace_the_list_when_set() {
        let owner = OwnerReference {
            api_version: "openfga.zeiss.com/v1alpha1".into(),
            kind: "Store".into(),
            name: "s1".into(),
            uid: "uid-1".into(),
            ..Default::default()
        };
        let update = MetadataUpdate {
            owner_references: Some(vec![owner]),
            ..Default::default()
        };
        let patch = update.to_patch();
        assert_eq!(patch["metadata"]["ownerReferences"][0]["name"], "s1");
        assert_eq!(patch["metadata"]["ownerReferences"][0]["kind"], "Store");
    }
}
