//! Store controller
//!
//! Creates the backend store once, records its id on status and deletes the
//! backend store before letting the resource go. The recorded id is the only
//! idempotency guard: a Store that already carries an id is never created
//! again.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::{
    attach, backoff_error_policy, detach, edit_metadata, has_finalizer, settle, Context,
    ResourceKind,
};
use crate::crd::{Phase, Store};
use crate::events::{actions, reasons};
use crate::Error;

const KIND: &str = "Store";

/// What a reconcile pass has to do for a Store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorePlan {
    /// Nothing to do
    Idle,
    /// Being deleted: delete the backend store (if one was recorded), then release
    Finalize {
        /// Recorded backend id
        store_id: Option<String>,
    },
    /// No backend store yet
    Create {
        /// Whether phase must first be moved to Creating
        mark_creating: bool,
    },
    /// Backend store exists; make status and finalizer reflect it
    Converge {
        /// Recorded backend id
        store_id: String,
        /// Whether phase must be set to Synchronized
        update_status: bool,
        /// Whether the finalizer is missing
        attach_finalizer: bool,
    },
}

/// Decide what to do for `store` given its current state
pub fn plan_store(store: &Store) -> StorePlan {
    if store.meta().deletion_timestamp.is_some() {
        return if has_finalizer(store.meta()) {
            StorePlan::Finalize {
                store_id: store.store_id().map(str::to_string),
            }
        } else {
            StorePlan::Idle
        };
    }
    if store.is_paused() {
        return StorePlan::Idle;
    }

    let phase = store.status.as_ref().map(|s| s.phase).unwrap_or_default();
    match store.store_id() {
        Some(id) => StorePlan::Converge {
            store_id: id.to_string(),
            update_status: phase != Phase::Synchronized
                || store.status.as_ref().is_some_and(|s| s.message.is_some()),
            attach_finalizer: !has_finalizer(store.meta()),
        },
        None => StorePlan::Create {
            mark_creating: phase != Phase::Creating,
        },
    }
}

/// Reconcile a Store
#[instrument(skip(obj, ctx), fields(store = %obj.name_any()))]
pub async fn reconcile(obj: Arc<Store>, ctx: Arc<Context>) -> Result<Action, Error> {
    let result = reconcile_store(&obj, &ctx).await;
    settle(KIND, obj.as_ref(), &ctx, result)
}

/// Error policy for the Store controller
pub fn error_policy(obj: Arc<Store>, error: &Error, ctx: Arc<Context>) -> Action {
    backoff_error_policy(KIND, obj.as_ref(), error, &ctx)
}

async fn reconcile_store(obj: &Store, ctx: &Context) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(store) = ctx.kube.get_store(&namespace, &name).await? else {
        debug!("store no longer exists");
        return Ok(Action::await_change());
    };
    let status = store.status.clone().unwrap_or_default();

    match plan_store(&store) {
        StorePlan::Idle => {
            debug!(paused = store.is_paused(), "nothing to do");
            Ok(Action::await_change())
        }
        StorePlan::Finalize { store_id } => {
            if let Some(id) = store_id {
                if let Err(e) = ctx.fga.delete_store(&id).await {
                    warn!(store_id = %id, error = %e, "failed to delete backend store");
                    publish(
                        ctx,
                        &store,
                        EventType::Warning,
                        reasons::STORE_DELETE_FAILED,
                        actions::DELETE,
                        e.to_string(),
                    )
                    .await;
                    return Err(e);
                }
                info!(store_id = %id, "backend store deleted");
                publish(
                    ctx,
                    &store,
                    EventType::Normal,
                    reasons::STORE_DELETED,
                    actions::DELETE,
                    format!("Deleted OpenFGA store {id}"),
                )
                .await;
            }
            edit_metadata(ctx, ResourceKind::Store, &namespace, &name, detach).await?;
            Ok(Action::await_change())
        }
        StorePlan::Create { mark_creating } => {
            if mark_creating {
                let creating = status.clone().with_phase(Phase::Creating).message(None);
                ctx.kube.patch_store_status(&namespace, &name, &creating).await?;
            }

            let backend_name = store.backend_name();
            let id = match ctx.fga.create_store(&backend_name).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to create backend store");
                    let failed = status.with_phase(Phase::Failed).message(Some(e.to_string()));
                    ctx.kube.patch_store_status(&namespace, &name, &failed).await?;
                    publish(
                        ctx,
                        &store,
                        EventType::Warning,
                        reasons::STORE_CREATE_FAILED,
                        actions::CREATE,
                        e.to_string(),
                    )
                    .await;
                    return Err(e);
                }
            };

            // Record the id before anything else can fail; a lost id would
            // mean a second backend store on the next pass.
            let synchronized = status
                .with_phase(Phase::Synchronized)
                .with_store_id(id.clone())
                .message(None);
            ctx.kube.patch_store_status(&namespace, &name, &synchronized).await?;
            info!(store_id = %id, "backend store created");
            publish(
                ctx,
                &store,
                EventType::Normal,
                reasons::STORE_CREATED,
                actions::CREATE,
                format!("Created OpenFGA store {backend_name} ({id})"),
            )
            .await;

            edit_metadata(ctx, ResourceKind::Store, &namespace, &name, |meta| {
                attach(meta, None)
            })
            .await?;
            Ok(Action::await_change())
        }
        StorePlan::Converge {
            store_id,
            update_status,
            attach_finalizer,
        } => {
            if update_status {
                let synchronized = status
                    .with_phase(Phase::Synchronized)
                    .with_store_id(store_id)
                    .message(None);
                ctx.kube.patch_store_status(&namespace, &name, &synchronized).await?;
            }
            if attach_finalizer {
                edit_metadata(ctx, ResourceKind::Store, &namespace, &name, |meta| {
                    attach(meta, None)
                })
                .await?;
            }
            Ok(Action::await_change())
        }
    }
}

async fn publish(
    ctx: &Context,
    store: &Store,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&store.object_ref(&()), type_, reason, action, Some(note))
        .await;
}
