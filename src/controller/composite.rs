//! OpenFGAStore controller
//!
//! An OpenFGAStore either owns a backend store (no `storeRef`) or binds to
//! the backend store of an existing Store. In both cases the inline model is
//! published with the same drift rules as a Model.
//!
//! Ownership is recorded on status (`ownedStoreID`) when the backend store is
//! created, and only a recorded owned store is ever deleted. Adding a
//! `storeRef` to an owned bundle deletes its own store before binding;
//! removing `storeRef` from a bound bundle creates a fresh store rather than
//! taking over the shared one.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::{
    attach, backoff_error_policy, check_drift, detach, edit_metadata, has_finalizer, settle,
    Context, Drift, ResourceKind, RESYNC_INTERVAL,
};
use crate::crd::{OpenFGAStore, Phase, Store};
use crate::events::{actions, reasons};
use crate::Error;

const KIND: &str = "OpenFGAStore";

/// What a reconcile pass has to do for an OpenFGAStore
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompositePlan {
    /// Nothing to do
    Idle,
    /// Being deleted: delete the owned backend store if any, then release
    Finalize {
        /// Recorded owned backend store; `None` for bound or never-created stores
        delete_store: Option<String>,
    },
    /// `storeRef` was added to a bundle that owns a backend store
    ReleaseOwned {
        /// Owned backend store to delete before binding
        store_id: String,
    },
    /// The bound Store is not usable yet
    Pending {
        /// Shown on status
        message: String,
    },
    /// Owned backend store does not exist yet
    CreateStore,
    /// Publish into, or verify against, this backend store
    Reconcile {
        /// Backend store id
        store_id: String,
    },
}

/// Decide what to do for `composite`; `bound` is the Store named by `storeRef`
pub fn plan_composite(composite: &OpenFGAStore, bound: Option<&Store>) -> CompositePlan {
    let owned = composite.owned_store_id().map(str::to_string);
    if composite.meta().deletion_timestamp.is_some() {
        if !has_finalizer(composite.meta()) {
            return CompositePlan::Idle;
        }
        return CompositePlan::Finalize {
            delete_store: owned,
        };
    }
    if composite.is_paused() {
        return CompositePlan::Idle;
    }

    match (&composite.spec.store_ref, owned) {
        (None, Some(store_id)) => CompositePlan::Reconcile { store_id },
        (None, None) => CompositePlan::CreateStore,
        (Some(_), Some(store_id)) => CompositePlan::ReleaseOwned { store_id },
        (Some(store_ref), None) => plan_bound(&store_ref.name, bound),
    }
}

fn plan_bound(store_name: &str, bound: Option<&Store>) -> CompositePlan {
    match bound.map(Store::store_id) {
        Some(Some(id)) => CompositePlan::Reconcile {
            store_id: id.to_string(),
        },
        Some(None) => CompositePlan::Pending {
            message: format!("Store {store_name} has no store id yet"),
        },
        None => CompositePlan::Pending {
            message: format!("Store {store_name} not found"),
        },
    }
}

/// Reconcile an OpenFGAStore
#[instrument(skip(obj, ctx), fields(openfgastore = %obj.name_any()))]
pub async fn reconcile(obj: Arc<OpenFGAStore>, ctx: Arc<Context>) -> Result<Action, Error> {
    let result = reconcile_composite(&obj, &ctx).await;
    settle(KIND, obj.as_ref(), &ctx, result)
}

/// Error policy for the OpenFGAStore controller
pub fn error_policy(obj: Arc<OpenFGAStore>, error: &Error, ctx: Arc<Context>) -> Action {
    backoff_error_policy(KIND, obj.as_ref(), error, &ctx)
}

async fn reconcile_composite(obj: &OpenFGAStore, ctx: &Context) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(composite) = ctx.kube.get_composite(&namespace, &name).await? else {
        debug!("openfgastore no longer exists");
        return Ok(Action::await_change());
    };
    let bound = match &composite.spec.store_ref {
        Some(r) if composite.meta().deletion_timestamp.is_none() => {
            ctx.kube.get_store(&namespace, &r.name).await?
        }
        _ => None,
    };
    let mut status = composite.status.clone().unwrap_or_default();
    let mut plan = plan_composite(&composite, bound.as_ref());

    let store_id = loop {
        match plan {
            CompositePlan::Idle => return Ok(Action::await_change()),
            CompositePlan::Finalize { delete_store } => {
                if let Some(id) = delete_store {
                    delete_owned_store(ctx, &composite, &id).await?;
                }
                edit_metadata(ctx, ResourceKind::Composite, &namespace, &name, detach).await?;
                return Ok(Action::await_change());
            }
            CompositePlan::ReleaseOwned { store_id } => {
                delete_owned_store(ctx, &composite, &store_id).await?;
                status = status
                    .with_owned_store_id("")
                    .with_store_id("")
                    .with_instance_id("");
                ctx.kube
                    .patch_composite_status(&namespace, &name, &status)
                    .await?;
                let store_name = composite
                    .spec
                    .store_ref
                    .as_ref()
                    .map(|r| r.name.clone())
                    .unwrap_or_default();
                plan = plan_bound(&store_name, bound.as_ref());
            }
            CompositePlan::Pending { message } => {
                if status.phase != Phase::Pending
                    || status.message.as_deref() != Some(message.as_str())
                {
                    let pending = status
                        .with_phase(Phase::Pending)
                        .message(Some(message.clone()));
                    ctx.kube
                        .patch_composite_status(&namespace, &name, &pending)
                        .await?;
                    publish(
                        ctx,
                        &composite,
                        EventType::Warning,
                        reasons::STORE_FETCH_FAILED,
                        actions::RECONCILE,
                        message,
                    )
                    .await;
                }
                return Ok(Action::await_change());
            }
            CompositePlan::CreateStore => {
                let backend_name = backend_name(&composite);
                let id = match ctx.fga.create_store(&backend_name).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, "failed to create backend store");
                        let failed = status
                            .with_phase(Phase::Failed)
                            .message(Some(e.to_string()));
                        ctx.kube
                            .patch_composite_status(&namespace, &name, &failed)
                            .await?;
                        publish(
                            ctx,
                            &composite,
                            EventType::Warning,
                            reasons::STORE_CREATE_FAILED,
                            actions::CREATE,
                            e.to_string(),
                        )
                        .await;
                        return Err(e);
                    }
                };
                status = status
                    .with_phase(Phase::Creating)
                    .with_store_id(id.clone())
                    .with_owned_store_id(id.clone())
                    .with_instance_id("")
                    .message(None);
                ctx.kube
                    .patch_composite_status(&namespace, &name, &status)
                    .await?;
                info!(store_id = %id, "backend store created");
                publish(
                    ctx,
                    &composite,
                    EventType::Normal,
                    reasons::STORE_CREATED,
                    actions::CREATE,
                    format!("Created OpenFGA store {backend_name} ({id})"),
                )
                .await;
                break id;
            }
            CompositePlan::Reconcile { store_id } => break store_id,
        }
    };

    let declared = composite
        .spec
        .store
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty());
    let next = match declared {
        None => status
            .clone()
            .with_phase(Phase::Synchronized)
            .with_store_id(store_id.clone())
            .message(None),
        Some(declared) => {
            let drift = check_drift(
                ctx.fga.as_ref(),
                declared,
                &store_id,
                &status.store_id,
                &status.instance_id,
            )
            .await?;
            match drift {
                Drift::InSync => status.clone().with_phase(Phase::Synchronized).message(None),
                Drift::Republish(reason) => {
                    info!(reason, store_id = %store_id, "publishing model");
                    match ctx.fga.write_model(&store_id, declared).await {
                        Ok(instance_id) => {
                            publish(
                                ctx,
                                &composite,
                                EventType::Normal,
                                reasons::MODEL_UPDATED,
                                actions::PUBLISH,
                                format!("Published model {instance_id} to store {store_id}"),
                            )
                            .await;
                            status
                                .clone()
                                .with_phase(Phase::Synchronized)
                                .with_store_id(store_id.clone())
                                .with_instance_id(instance_id)
                                .message(None)
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                retryable = e.is_retryable(),
                                "failed to publish model"
                            );
                            let failed = status
                                .with_phase(Phase::Failed)
                                .with_store_id(store_id.clone())
                                .message(Some(e.to_string()));
                            ctx.kube
                                .patch_composite_status(&namespace, &name, &failed)
                                .await?;
                            publish(
                                ctx,
                                &composite,
                                EventType::Warning,
                                reasons::MODEL_FAILED,
                                actions::PUBLISH,
                                e.to_string(),
                            )
                            .await;
                            edit_metadata(ctx, ResourceKind::Composite, &namespace, &name, |meta| {
                                attach(meta, None)
                            })
                            .await?;
                            return if e.is_retryable() {
                                Err(e)
                            } else {
                                Ok(Action::await_change())
                            };
                        }
                    }
                }
            }
        }
    };

    if composite.status.as_ref() != Some(&next) {
        ctx.kube
            .patch_composite_status(&namespace, &name, &next)
            .await?;
    }
    edit_metadata(ctx, ResourceKind::Composite, &namespace, &name, |meta| {
        attach(meta, None)
    })
    .await?;

    if next.instance_id.is_empty() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(RESYNC_INTERVAL))
    }
}

/// Delete a backend store this bundle created; the finalizer stays on failure
async fn delete_owned_store(
    ctx: &Context,
    composite: &OpenFGAStore,
    store_id: &str,
) -> Result<(), Error> {
    if let Err(e) = ctx.fga.delete_store(store_id).await {
        warn!(%store_id, error = %e, "failed to delete backend store");
        publish(
            ctx,
            composite,
            EventType::Warning,
            reasons::STORE_DELETE_FAILED,
            actions::DELETE,
            e.to_string(),
        )
        .await;
        return Err(e);
    }
    info!(%store_id, "backend store deleted");
    publish(
        ctx,
        composite,
        EventType::Normal,
        reasons::STORE_DELETED,
        actions::DELETE,
        format!("Deleted OpenFGA store {store_id}"),
    )
    .await;
    Ok(())
}

fn backend_name(composite: &OpenFGAStore) -> String {
    let name = composite.spec.store.name.trim();
    if name.is_empty() {
        composite.name_any()
    } else {
        name.to_string()
    }
}

async fn publish(
    ctx: &Context,
    composite: &OpenFGAStore,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&composite.object_ref(&()), type_, reason, action, Some(note))
        .await;
}
