//! Model controller
//!
//! Publishes the declared DSL into the referenced Store's backend store and
//! records the resulting version id. A Model never deletes anything on the
//! server: versions are immutable, so deletion only releases the finalizer.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::{
    attach, backoff_error_policy, check_drift, detach, edit_metadata, has_finalizer, settle,
    Context, Drift, ResourceKind, RESYNC_INTERVAL,
};
use crate::crd::{Model, ModelStatus, Phase, Store};
use crate::events::{actions, reasons};
use crate::Error;

const KIND: &str = "Model";

/// What a reconcile pass has to do for a Model
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelPlan {
    /// Nothing to do
    Idle,
    /// Being deleted: drop the finalizer
    Release,
    /// The Store is not usable yet
    Pending {
        /// Shown on status
        message: String,
    },
    /// Publish into, or verify against, this backend store
    Reconcile {
        /// Backend store id of the referenced Store
        store_id: String,
    },
}

/// Decide what to do for `model` given the Store it references
pub fn plan_model(model: &Model, store: Option<&Store>) -> ModelPlan {
    if model.meta().deletion_timestamp.is_some() {
        return if has_finalizer(model.meta()) {
            ModelPlan::Release
        } else {
            ModelPlan::Idle
        };
    }
    if model.is_paused() {
        return ModelPlan::Idle;
    }

    let store_name = &model.spec.store_ref.name;
    match store {
        None => ModelPlan::Pending {
            message: format!("Store {store_name} not found"),
        },
        Some(store) => match store.store_id() {
            None => ModelPlan::Pending {
                message: format!("Store {store_name} has no store id yet"),
            },
            Some(id) => ModelPlan::Reconcile {
                store_id: id.to_string(),
            },
        },
    }
}

/// Reconcile a Model
#[instrument(skip(obj, ctx), fields(model = %obj.name_any()))]
pub async fn reconcile(obj: Arc<Model>, ctx: Arc<Context>) -> Result<Action, Error> {
    let result = reconcile_model(&obj, &ctx).await;
    settle(KIND, obj.as_ref(), &ctx, result)
}

/// Error policy for the Model controller
pub fn error_policy(obj: Arc<Model>, error: &Error, ctx: Arc<Context>) -> Action {
    backoff_error_policy(KIND, obj.as_ref(), error, &ctx)
}

async fn reconcile_model(obj: &Model, ctx: &Context) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(model) = ctx.kube.get_model(&namespace, &name).await? else {
        debug!("model no longer exists");
        return Ok(Action::await_change());
    };
    let store = if model.meta().deletion_timestamp.is_none() {
        ctx.kube
            .get_store(&namespace, &model.spec.store_ref.name)
            .await?
    } else {
        None
    };
    let status = model.status.clone().unwrap_or_default();

    match plan_model(&model, store.as_ref()) {
        ModelPlan::Idle => Ok(Action::await_change()),
        ModelPlan::Release => {
            edit_metadata(ctx, ResourceKind::Model, &namespace, &name, detach).await?;
            publish(
                ctx,
                &model,
                EventType::Normal,
                reasons::MODEL_DELETED,
                actions::DELETE,
                "Model released".to_string(),
            )
            .await;
            Ok(Action::await_change())
        }
        ModelPlan::Pending { message } => {
            debug!(%message, "waiting for store");
            if status.phase != Phase::Pending
                || status.message.as_deref() != Some(message.as_str())
            {
                let pending = status.with_phase(Phase::Pending).message(Some(message.clone()));
                ctx.kube.patch_model_status(&namespace, &name, &pending).await?;
                publish(
                    ctx,
                    &model,
                    EventType::Warning,
                    reasons::STORE_FETCH_FAILED,
                    actions::RECONCILE,
                    message,
                )
                .await;
            }
            Ok(Action::await_change())
        }
        ModelPlan::Reconcile { store_id } => {
            let owner = store.as_ref().and_then(|s| s.owner_ref(&()));
            let drift = check_drift(
                ctx.fga.as_ref(),
                &model.spec.model,
                &store_id,
                &status.store_id,
                &status.instance_id,
            )
            .await?;

            match drift {
                Drift::InSync => {
                    if status.phase != Phase::Synchronized || status.message.is_some() {
                        let synchronized = status.with_phase(Phase::Synchronized).message(None);
                        ctx.kube.patch_model_status(&namespace, &name, &synchronized).await?;
                    }
                }
                Drift::Republish(reason) => {
                    info!(reason, store_id = %store_id, "publishing model");
                    match ctx.fga.write_model(&store_id, &model.spec.model).await {
                        Ok(instance_id) => {
                            let published = status
                                .with_phase(Phase::Synchronized)
                                .published(store_id.clone(), instance_id.clone())
                                .message(None);
                            ctx.kube.patch_model_status(&namespace, &name, &published).await?;
                            info!(%instance_id, "model published");
                            publish(
                                ctx,
                                &model,
                                EventType::Normal,
                                reasons::MODEL_UPDATED,
                                actions::PUBLISH,
                                format!("Published model {instance_id} to store {store_id}"),
                            )
                            .await;
                        }
                        Err(e) => return fail(ctx, &model, status, e).await,
                    }
                }
            }

            edit_metadata(ctx, ResourceKind::Model, &namespace, &name, |meta| {
                attach(meta, owner.as_ref())
            })
            .await?;
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
    }
}

/// Record a failed publish; permanent failures wait for a spec change
async fn fail(
    ctx: &Context,
    model: &Model,
    status: ModelStatus,
    error: Error,
) -> Result<Action, Error> {
    warn!(error = %error, retryable = error.is_retryable(), "failed to publish model");
    let failed = status.with_phase(Phase::Failed).message(Some(error.to_string()));
    ctx.kube
        .patch_model_status(&model.namespace().unwrap_or_default(), &model.name_any(), &failed)
        .await?;
    publish(
        ctx,
        model,
        EventType::Warning,
        reasons::MODEL_FAILED,
        actions::PUBLISH,
        error.to_string(),
    )
    .await;
    if error.is_retryable() {
        Err(error)
    } else {
        Ok(Action::await_change())
    }
}

async fn publish(
    ctx: &Context,
    model: &Model,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&model.object_ref(&()), type_, reason, action, Some(note))
        .await;
}
