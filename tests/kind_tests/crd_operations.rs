//! Integration tests for CRD operations
//!
//! These tests tell the story of how users declare OpenFGA stores and models
//! through the Kubernetes API. They exercise the schemas and the status
//! subresource; no operator needs to be running.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

use openfga_operator::crd::{
    Model, ModelSpec, OpenFGAStore, OpenFGAStoreSpec, Phase, Store, StoreDefinition, StoreRef,
    StoreSpec, TupleKey,
};
use openfga_operator::FIELD_MANAGER;

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

// =============================================================================
// Test Fixtures
// =============================================================================

const DOCS_MODEL: &str = "model
  schema 1.1

type user

type document
  relations
    define viewer: [user]
";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        ..Default::default()
    }
}

fn sample_store(name: &str) -> Store {
    Store {
        metadata: meta(name),
        spec: StoreSpec::default(),
        status: None,
    }
}

fn sample_model(name: &str, store: &str) -> Model {
    Model {
        metadata: meta(name),
        spec: ModelSpec {
            store_ref: StoreRef {
                name: store.to_string(),
            },
            model: DOCS_MODEL.to_string(),
        },
        status: None,
    }
}

async fn cleanup<K>(api: &Api<K>, name: &str)
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await;
}

fn apis(client: &Client) -> (Api<Store>, Api<Model>, Api<OpenFGAStore>) {
    (
        Api::namespaced(client.clone(), TEST_NAMESPACE),
        Api::namespaced(client.clone(), TEST_NAMESPACE),
        Api::namespaced(client.clone(), TEST_NAMESPACE),
    )
}

// =============================================================================
// Store Stories
// =============================================================================

/// Story: a user declares a Store with no backend name
///
/// The spec may be empty; the operator then uses the resource name on the
/// OpenFGA server.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_user_declares_store_with_default_name() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let (stores, _, _) = apis(&client);
    let name = "it-store-default";
    cleanup(&stores, name).await;

    let created = stores
        .create(&PostParams::default(), &sample_store(name))
        .await
        .expect("failed to create store");

    assert_eq!(created.backend_name(), name);
    assert_eq!(created.store_id(), None);

    cleanup(&stores, name).await;
}

/// Story: the operator records progress on the status subresource
///
/// Status is written with merge patches. A `null` message must clear a stale
/// one, and the recorded store id is visible to later readers.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_patch_records_id_and_clears_message() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let (stores, _, _) = apis(&client);
    let name = "it-store-status";
    cleanup(&stores, name).await;

    stores
        .create(&PostParams::default(), &sample_store(name))
        .await
        .expect("failed to create store");

    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    stores
        .patch_status(
            name,
            &params,
            &Patch::Merge(json!({"status": {"phase": "Failed", "message": "connection refused"}})),
        )
        .await
        .expect("failed to patch status");
    stores
        .patch_status(
            name,
            &params,
            &Patch::Merge(json!({
                "status": {"phase": "Synchronized", "storeID": "01HX", "message": null}
            })),
        )
        .await
        .expect("failed to patch status");

    let fetched = stores.get(name).await.expect("failed to get store");
    let status = fetched.status.expect("status should be set");
    assert_eq!(status.phase, Phase::Synchronized);
    assert_eq!(status.store_id, "01HX");
    assert_eq!(status.message, None);

    cleanup(&stores, name).await;
}

// =============================================================================
// Model Stories
// =============================================================================

/// Story: a user declares a Model next to its Store
///
/// The DSL is stored verbatim; formatting belongs to the user.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_user_declares_model_for_store() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let (_, models, _) = apis(&client);
    let name = "it-model";
    cleanup(&models, name).await;

    models
        .create(&PostParams::default(), &sample_model(name, "it-store"))
        .await
        .expect("failed to create model");

    let fetched = models.get(name).await.expect("failed to get model");
    assert_eq!(fetched.spec.store_ref.name, "it-store");
    assert_eq!(fetched.spec.model, DOCS_MODEL);
    assert_eq!(fetched.instance_id(), None);

    cleanup(&models, name).await;
}

/// Story: the schema rejects a Model without a store reference
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_model_without_store_ref_is_rejected() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let models: Api<kube::api::DynamicObject> = Api::namespaced_with(
        client,
        TEST_NAMESPACE,
        &kube::discovery::ApiResource::erase::<Model>(&()),
    );

    let invalid: kube::api::DynamicObject = serde_json::from_value(json!({
        "apiVersion": "openfga.zeiss.com/v1alpha1",
        "kind": "Model",
        "metadata": {"name": "it-model-invalid"},
        "spec": {"model": DOCS_MODEL}
    }))
    .expect("valid object json");

    let result = models.create(&PostParams::default(), &invalid).await;
    assert!(result.is_err(), "missing storeRef must be rejected");
}

// =============================================================================
// OpenFGAStore Stories
// =============================================================================

/// Story: a team ships its whole authorization bundle as one resource
///
/// Tuples and tests survive the round trip through the API server so the
/// bundle can be validated from the cluster copy.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_applies_openfga_store_bundle() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let (_, _, bundles) = apis(&client);
    let name = "it-bundle";
    cleanup(&bundles, name).await;

    let bundle = OpenFGAStore {
        metadata: meta(name),
        spec: OpenFGAStoreSpec {
            store_ref: None,
            store: StoreDefinition {
                name: "docs".to_string(),
                model: Some(DOCS_MODEL.to_string()),
                tuples: vec![TupleKey {
                    user: "user:anne".to_string(),
                    relation: "viewer".to_string(),
                    object: "document:roadmap".to_string(),
                    condition: None,
                }],
                ..Default::default()
            },
        },
        status: None,
    };
    bundles
        .create(&PostParams::default(), &bundle)
        .await
        .expect("failed to create bundle");

    let fetched = bundles.get(name).await.expect("failed to get bundle");
    assert!(fetched.wants_own_store());
    assert_eq!(fetched.owned_store_id(), None);
    assert_eq!(fetched.spec.store.name, "docs");
    assert_eq!(fetched.spec.store.tuples.len(), 1);
    assert_eq!(fetched.spec.store.tuples[0].object, "document:roadmap");

    cleanup(&bundles, name).await;
}
