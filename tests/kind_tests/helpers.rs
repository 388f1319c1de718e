//! Shared setup for the live-cluster tests

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use openfga_operator::crd::{Model, OpenFGAStore, Store};
use openfga_operator::FIELD_MANAGER;

/// Namespace every test resource is created in
pub const TEST_NAMESPACE: &str = "default";

/// Connect to the current kubeconfig context and make sure the CRDs exist
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [Store::crd(), Model::crd(), OpenFGAStore::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }
    // freshly applied CRDs take a moment to be served
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(client)
}
