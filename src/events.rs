//! Kubernetes Event recording for the operator's controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that controllers can emit standard Kubernetes Events visible via
//! `kubectl describe` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "ModelUpdated")
    /// * `action` - What action was taken (e.g. "Publish")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as the given controller name.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Publisher that keeps every event in memory for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

/// An event captured by [`RecordingEventPublisher`]
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    /// Name of the object the event was attached to
    pub object: String,
    /// Whether the event was a warning
    pub warning: bool,
    /// Event reason
    pub reason: String,
    /// Event note
    pub note: Option<String>,
}

#[cfg(test)]
impl RecordingEventPublisher {
    /// All recorded events in publish order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Reasons of all recorded events in publish order
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    // Store lifecycle
    /// Backend store was created
    pub const STORE_CREATED: &str = "StoreCreated";
    /// Backend store creation failed
    pub const STORE_CREATE_FAILED: &str = "StoreCreateFailed";
    /// Backend store was deleted
    pub const STORE_DELETED: &str = "StoreDeleted";
    /// Backend store deletion failed
    pub const STORE_DELETE_FAILED: &str = "StoreDeleteFailed";
    /// Referenced Store could not be resolved
    pub const STORE_FETCH_FAILED: &str = "StoreFetchFailed";

    // Model lifecycle
    /// A new model version was published
    pub const MODEL_UPDATED: &str = "ModelUpdated";
    /// Publishing the model failed
    pub const MODEL_FAILED: &str = "ModelFailed";
    /// Model resource released
    pub const MODEL_DELETED: &str = "ModelDeleted";

    // Workloads
    /// Identifiers were injected into a workload's environment
    pub const DEPLOYMENT_ENV_UPDATED: &str = "DeploymentEnvUpdated";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating a backend store
    pub const CREATE: &str = "Create";
    /// Deleting backend resources
    pub const DELETE: &str = "Delete";
    /// Publishing a model version
    pub const PUBLISH: &str = "Publish";
    /// Injecting environment into a workload
    pub const INJECT: &str = "Inject";
}
