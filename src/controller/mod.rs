//! Reconcilers for the operator's resources
//!
//! Every reconciler follows the same shape: re-read the object, compute what
//! to do with a pure `plan_*` function, perform the backend calls the plan
//! asks for, then record the outcome on status. Reconcilers never call each
//! other; a Model notices its Store through a watch, not a callback.

mod client;
pub mod composite;
pub mod dependents;
pub mod injector;
pub mod model;
pub mod store;
mod workload;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error};

pub use client::{
    Context, ContextBuilder, KubeClient, KubeClientImpl, MetadataUpdate, ResourceKind,
};
#[cfg(test)]
pub use client::MockKubeClient;
pub use workload::{
    injected_env, merge_env, model_annotations, model_reference, Workload, WorkloadKind,
};

use crate::fga::{dsl, FgaClient};
use crate::retry::retry_on_conflict;
use crate::{Error, FINALIZER};

/// Requeue interval for published models, so remote drift is noticed
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Key used for per-object backoff tracking
pub(crate) fn backoff_key<K: ResourceExt>(kind: &str, obj: &K) -> String {
    format!(
        "{kind}/{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Shared error policy: log and requeue with per-object exponential backoff
pub(crate) fn backoff_error_policy<K: ResourceExt>(
    kind: &str,
    obj: &K,
    error: &Error,
    ctx: &Context,
) -> Action {
    let delay = ctx.backoff.record_failure(&backoff_key(kind, obj));
    error!(
        ?error,
        kind,
        name = %obj.name_any(),
        namespace = obj.namespace().unwrap_or_default(),
        retry_in_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

/// Forget backoff state after a successful reconcile
pub(crate) fn settle<K: ResourceExt>(
    kind: &str,
    obj: &K,
    ctx: &Context,
    result: Result<Action, Error>,
) -> Result<Action, Error> {
    if result.is_ok() {
        ctx.backoff.reset(&backoff_key(kind, obj));
    }
    result
}

/// Whether the operator's finalizer is present
pub(crate) fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Whether an owner reference with the same uid is present
fn has_owner(meta: &ObjectMeta, owner: &OwnerReference) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == owner.uid))
}

/// Metadata change adding the finalizer and optionally an owner reference
///
/// Returns `None` when both are already in place.
pub(crate) fn attach(meta: &ObjectMeta, owner: Option<&OwnerReference>) -> Option<MetadataUpdate> {
    let needs_owner = owner.is_some_and(|o| !has_owner(meta, o));
    if has_finalizer(meta) && !needs_owner {
        return None;
    }

    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !has_finalizer(meta) {
        finalizers.push(FINALIZER.to_string());
    }
    let owner_references = match owner {
        Some(o) if needs_owner => {
            let mut refs = meta.owner_references.clone().unwrap_or_default();
            refs.push(o.clone());
            Some(refs)
        }
        _ => None,
    };

    Some(MetadataUpdate {
        resource_version: meta.resource_version.clone(),
        finalizers,
        owner_references,
    })
}

/// Metadata change removing the finalizer, `None` if it is already gone
pub(crate) fn detach(meta: &ObjectMeta) -> Option<MetadataUpdate> {
    if !has_finalizer(meta) {
        return None;
    }
    Some(MetadataUpdate {
        resource_version: meta.resource_version.clone(),
        finalizers: meta
            .finalizers
            .iter()
            .flatten()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect(),
        owner_references: None,
    })
}

async fn current_metadata(
    ctx: &Context,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Option<ObjectMeta>, Error> {
    Ok(match kind {
        ResourceKind::Store => ctx.kube.get_store(namespace, name).await?.map(|o| o.metadata),
        ResourceKind::Model => ctx.kube.get_model(namespace, name).await?.map(|o| o.metadata),
        ResourceKind::Composite => ctx
            .kube
            .get_composite(namespace, name)
            .await?
            .map(|o| o.metadata),
    })
}

/// Apply a metadata edit against the latest version of an object
///
/// The object is re-read on every attempt, so a conflicting concurrent write
/// leads to a recomputed edit rather than a lost update.
pub(crate) async fn edit_metadata<F>(
    ctx: &Context,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    edit: F,
) -> Result<(), Error>
where
    F: Fn(&ObjectMeta) -> Option<MetadataUpdate>,
{
    let edit = &edit;
    retry_on_conflict(&ctx.conflict_retry, "update_metadata", || async move {
        let Some(meta) = current_metadata(ctx, kind, namespace, name).await? else {
            return Ok(());
        };
        let Some(update) = edit(&meta) else {
            return Ok(());
        };
        debug!(kind = kind.as_str(), name, finalizers = ?update.finalizers, "updating metadata");
        ctx.kube.update_metadata(kind, namespace, name, &update).await
    })
    .await
}

/// Outcome of comparing a published model with its declaration
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Drift {
    /// The recorded version matches the declared DSL
    InSync,
    /// A new version must be written
    Republish(&'static str),
}

/// Decide whether a model must be (re)published
///
/// Republishes when nothing was published yet, when the version lives in a
/// different store, or when the server's copy is missing or differs from the
/// declaration. Transient read failures are returned as errors.
pub(crate) async fn check_drift(
    fga: &dyn FgaClient,
    declared: &str,
    store_id: &str,
    published_store: &str,
    instance_id: &str,
) -> Result<Drift, Error> {
    if instance_id.is_empty() {
        return Ok(Drift::Republish("never published"));
    }
    if published_store != store_id {
        return Ok(Drift::Republish("store changed"));
    }
    match fga.read_model(store_id, instance_id).await {
        Ok(remote) => match dsl::equivalent(declared, &remote) {
            Ok(true) => Ok(Drift::InSync),
            Ok(false) => Ok(Drift::Republish("declared model changed")),
            Err(_) => Ok(Drift::Republish("declared model does not translate")),
        },
        Err(e) if e.is_not_found() || !e.is_retryable() => {
            Ok(Drift::Republish("published version unavailable"))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fga::MockFgaClient;

    const DSL: &str = "model\n  schema 1.1\ntype user\n";

    fn meta_with(finalizers: &[&str], rv: &str) -> ObjectMeta {
        ObjectMeta {
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            resource_version: Some(rv.into()),
            ..Default::default()
        }
    }

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "openfga.zeiss.com/v1alpha1".into(),
            kind: "Store".into(),
            name: "s1".into(),
            uid: uid.into(),
            ..Default::default()
        }
    }

    #[test]
    fn attach_keeps_foreign_finalizers() {
        let update = attach(&meta_with(&["other/finalizer"], "7"), None).unwrap();
        assert_eq!(update.finalizers, vec!["other/finalizer", FINALIZER]);
        assert_eq!(update.resource_version.as_deref(), Some("7"));
        assert!(update.owner_references.is_none());
    }

    #[test]
    fn attach_is_a_noop_when_everything_is_present() {
        let mut meta = meta_with(&[FINALIZER], "7");
        meta.owner_references = Some(vec![owner("u1")]);
        assert_eq!(attach(&meta, Some(&owner("u1"))), None);
        assert!(attach(&meta, Some(&owner("u2"))).is_some());
    }

    #[test]
    fn detach_removes_only_our_finalizer() {
        let update = detach(&meta_with(&["other/finalizer", FINALIZER], "3")).unwrap();
        assert_eq!(update.finalizers, vec!["other/finalizer"]);
        assert_eq!(detach(&meta_with(&["other/finalizer"], "3")), None);
    }

    #[tokio::test]
    async fn unpublished_model_is_drift_without_a_backend_call() {
        let fga = MockFgaClient::new();
        let drift = check_drift(&fga, DSL, "abc", "", "").await.unwrap();
        assert_eq!(drift, Drift::Republish("never published"));
    }

    #[tokio::test]
    async fn store_change_is_drift() {
        let fga = MockFgaClient::new();
        let drift = check_drift(&fga, DSL, "new", "old", "v1").await.unwrap();
        assert_eq!(drift, Drift::Republish("store changed"));
    }

    #[tokio::test]
    async fn equivalent_remote_model_is_in_sync() {
        let mut fga = MockFgaClient::new();
        fga.expect_read_model()
            .returning(|_, _| Ok("model\n  schema 1.1\n\ntype user\n".to_string()));
        let drift = check_drift(&fga, DSL, "abc", "abc", "v1").await.unwrap();
        assert_eq!(drift, Drift::InSync);
    }

    #[tokio::test]
    async fn missing_remote_version_is_drift() {
        let mut fga = MockFgaClient::new();
        fga.expect_read_model()
            .returning(|_, _| Err(Error::backend("read_model", Some(404), "gone")));
        let drift = check_drift(&fga, DSL, "abc", "abc", "v1").await.unwrap();
        assert_eq!(drift, Drift::Republish("published version unavailable"));
    }

    #[tokio::test]
    async fn transient_read_failure_is_an_error() {
        let mut fga = MockFgaClient::new();
        fga.expect_read_model()
            .returning(|_, _| Err(Error::backend("read_model", Some(503), "busy")));
        assert!(check_drift(&fga, DSL, "abc", "abc", "v1").await.is_err());
    }
}
