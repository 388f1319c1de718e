//! Controller runner - builds controller futures for every resource kind
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller. Cross-resource wake-ups are registered here as watches whose
//! mappers read the controllers' own reflector caches.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::Store as ReflectorStore;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::controller::dependents::{
    composites_referencing, models_referencing, workloads_for_model, workloads_for_store,
};
use crate::controller::{composite, injector, model, store, Context};
use crate::crd::{Model, OpenFGAStore, Store};
use crate::metrics::{Outcome, ReconcileMetrics};
use crate::Error;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build every controller the operator runs
pub fn build_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    let (mut futures, models) = build_resource_controllers(client.clone(), ctx.clone());
    futures.extend(build_injector_controllers(client, ctx, models));
    futures
}

/// Build Store, Model and OpenFGAStore controllers
///
/// Also returns the Model cache, which the injector needs to map Store
/// changes onto workloads.
pub fn build_resource_controllers(
    client: Client,
    ctx: Arc<Context>,
) -> (Vec<ControllerFuture>, ReflectorStore<Model>) {
    let stores: Api<Store> = Api::all(client.clone());
    let models: Api<Model> = Api::all(client.clone());
    let composites: Api<OpenFGAStore> = Api::all(client);
    let metrics = ctx.metrics.clone();

    tracing::info!("- Store controller");
    let store_ctrl = Controller::new(stores.clone(), watcher_config())
        .shutdown_on_signal()
        .run(store::reconcile, store::error_policy, ctx.clone())
        .for_each(log_reconcile_result("Store", metrics.clone()));

    tracing::info!("- Model controller");
    let model_ctrl = Controller::new(models, watcher_config());
    let model_cache = model_ctrl.store();
    let cache = model_cache.clone();
    let model_ctrl = model_ctrl
        .watches(stores.clone(), watcher_config(), move |s| {
            let affected = models_referencing(&s, &cache.state());
            tracing::debug!(
                store = ?s.metadata.name,
                affected = affected.len(),
                "Store changed, waking models"
            );
            affected
        })
        .shutdown_on_signal()
        .run(model::reconcile, model::error_policy, ctx.clone())
        .for_each(log_reconcile_result("Model", metrics.clone()));

    tracing::info!("- OpenFGAStore controller");
    let composite_ctrl = Controller::new(composites, watcher_config());
    let composite_cache = composite_ctrl.store();
    let composite_ctrl = composite_ctrl
        .watches(stores, watcher_config(), move |s| {
            composites_referencing(&s, &composite_cache.state())
        })
        .shutdown_on_signal()
        .run(composite::reconcile, composite::error_policy, ctx)
        .for_each(log_reconcile_result("OpenFGAStore", metrics));

    (
        vec![
            Box::pin(store_ctrl),
            Box::pin(model_ctrl),
            Box::pin(composite_ctrl),
        ],
        model_cache,
    )
}

/// Build the Deployment, StatefulSet and DaemonSet injectors
pub fn build_injector_controllers(
    client: Client,
    ctx: Arc<Context>,
    models: ReflectorStore<Model>,
) -> Vec<ControllerFuture> {
    tracing::info!("- Workload injectors (Deployment, StatefulSet, DaemonSet)");
    vec![
        injector_controller::<Deployment, _, _>(
            client.clone(),
            ctx.clone(),
            models.clone(),
            injector::reconcile_deployment,
            "Deployment",
        ),
        injector_controller::<StatefulSet, _, _>(
            client.clone(),
            ctx.clone(),
            models.clone(),
            injector::reconcile_statefulset,
            "StatefulSet",
        ),
        injector_controller::<DaemonSet, _, _>(
            client,
            ctx,
            models,
            injector::reconcile_daemonset,
            "DaemonSet",
        ),
    ]
}

fn injector_controller<K, R, Fut>(
    client: Client,
    ctx: Arc<Context>,
    models: ReflectorStore<Model>,
    reconcile: R,
    name: &'static str,
) -> ControllerFuture
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
    R: FnMut(Arc<K>, Arc<Context>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<kube::runtime::controller::Action, Error>> + Send + 'static,
{
    let workloads: Api<K> = Api::all(client.clone());
    let metrics = ctx.metrics.clone();
    let ctrl = Controller::new(workloads, watcher_config());

    let by_model = ctrl.store();
    let by_store = ctrl.store();
    let ctrl = ctrl
        .watches(Api::<Model>::all(client.clone()), watcher_config(), move |m| {
            workloads_for_model(&m, &by_model.state())
        })
        .watches(Api::<Store>::all(client), watcher_config(), move |s| {
            workloads_for_store(&s, &models.state(), &by_store.state())
        })
        .shutdown_on_signal()
        .run(reconcile, injector::error_policy::<K>, ctx)
        .for_each(log_reconcile_result(name, metrics));

    Box::pin(ctrl)
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
    metrics: ReconcileMetrics,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => {
                metrics.record(controller_name, Outcome::Success);
                tracing::debug!(?action, "{} reconciliation completed", controller_name)
            }
            Err(e) => {
                metrics.record(controller_name, Outcome::Error);
                tracing::error!(error = ?e, "{} reconciliation error", controller_name)
            }
        }
        std::future::ready(())
    }
}
