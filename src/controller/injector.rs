//! Workload injector
//!
//! Deployments, StatefulSets and DaemonSets annotated with
//! `openfga.zeiss.com/model.ref` receive the referenced Model's store and
//! version ids as container environment variables. Injection happens once per
//! workload: the `model.updated-at` marker stops later passes, so a rollout is
//! triggered by the operator at most once.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::{backoff_error_policy, injected_env, model_reference, settle, Context, WorkloadKind};
use crate::events::{actions, reasons};
use crate::retry::retry_on_conflict;
use crate::{Error, MODEL_UPDATED_ANNOTATION};

/// Reconcile a Deployment
pub async fn reconcile_deployment(
    obj: Arc<Deployment>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile(WorkloadKind::Deployment, obj.as_ref(), &ctx).await
}

/// Reconcile a StatefulSet
pub async fn reconcile_statefulset(
    obj: Arc<StatefulSet>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile(WorkloadKind::StatefulSet, obj.as_ref(), &ctx).await
}

/// Reconcile a DaemonSet
pub async fn reconcile_daemonset(obj: Arc<DaemonSet>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile(WorkloadKind::DaemonSet, obj.as_ref(), &ctx).await
}

/// Error policy shared by the workload controllers
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    backoff_error_policy(&K::kind(&()), obj.as_ref(), error, &ctx)
}

#[instrument(skip(kind, obj, ctx), fields(kind = kind.as_str(), workload = %obj.name_any()))]
async fn reconcile<K>(kind: WorkloadKind, obj: &K, ctx: &Context) -> Result<Action, Error>
where
    K: Resource<DynamicType = ()> + ResourceExt + Sync,
{
    let result = inject(kind, obj, ctx).await;
    settle(&K::kind(&()), obj, ctx, result)
}

async fn inject<K>(kind: WorkloadKind, obj: &K, ctx: &Context) -> Result<Action, Error>
where
    K: Resource + ResourceExt + Sync,
{
    let Some(model_name) = model_reference(obj.meta()) else {
        return Ok(Action::await_change());
    };
    if obj.annotations().contains_key(MODEL_UPDATED_ANNOTATION) {
        debug!(model = model_name, "already injected");
        return Ok(Action::await_change());
    }

    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(model) = ctx.kube.get_model(&namespace, model_name).await? else {
        debug!(model = model_name, "referenced model not found");
        return Ok(Action::await_change());
    };
    let Some(instance_id) = model.instance_id() else {
        debug!(model = model_name, "model not published yet");
        return Ok(Action::await_change());
    };
    let Some(store) = ctx.kube.get_store(&namespace, &model.spec.store_ref.name).await? else {
        debug!(store = %model.spec.store_ref.name, "store not found");
        return Ok(Action::await_change());
    };
    let Some(store_id) = store.store_id() else {
        debug!(store = %model.spec.store_ref.name, "store has no id yet");
        return Ok(Action::await_change());
    };

    let env = injected_env(instance_id, store_id);
    let (env, namespace, name) = (&env, &namespace, &name);
    let injected = retry_on_conflict(&ctx.conflict_retry, "inject_env", || async move {
        let Some(mut workload) = ctx.kube.get_workload(kind, namespace, name).await? else {
            return Ok(None);
        };
        if !workload.inject(env, Utc::now()) {
            return Ok(None);
        }
        ctx.kube.replace_workload(&workload).await?;
        Ok(Some(workload))
    })
    .await?;

    if let Some(workload) = injected {
        info!(%instance_id, %store_id, "model ids injected");
        ctx.events
            .publish(
                &workload.object_ref(),
                EventType::Normal,
                reasons::DEPLOYMENT_ENV_UPDATED,
                actions::INJECT,
                Some("OpenFGA model instance added to the environment".to_string()),
            )
            .await;
    }
    Ok(Action::await_change())
}
