//! Integration tests for the cluster client
//!
//! These tests require a reachable cluster (KUBECONFIG or in-cluster config).
//! Set TEST_NAMESPACE to choose the namespace (defaults to "default").

use cluster_client::{ClusterClient, ClusterClientTrait};

async fn client() -> ClusterClient {
    let kube_client = kube::Client::try_default()
        .await
        .expect("Failed to create kube client");
    ClusterClient::new(kube_client)
}

fn namespace() -> String {
    std::env::var("TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_list_deployments() {
    let client = client().await;

    let deployments = client.list_deployments(Some(&namespace())).await
        .expect("Failed to list deployments");

    println!("Found {} deployments", deployments.len());
}

#[tokio::test]
#[ignore]
async fn test_missing_deployment_is_not_found() {
    let client = client().await;

    let err = client.get_deployment(&namespace(), "does-not-exist-remediation-test").await
        .expect_err("Deployment should not exist");

    assert!(err.is_not_found(), "Expected NotFound, got {err}");
}

#[tokio::test]
#[ignore]
async fn test_stale_replace_conflicts() {
    let client = client().await;
    let ns = namespace();

    let deployments = client.list_deployments(Some(&ns)).await
        .expect("Failed to list deployments");
    let Some(first) = deployments.into_iter().next() else {
        println!("No deployments in {ns}, skipping");
        return;
    };

    let mut stale = first.clone();
    stale.metadata.resource_version = Some("1".to_string());

    let err = client.replace_deployment(&stale).await
        .expect_err("Stale replace should be rejected");
    assert!(err.is_conflict(), "Expected Conflict, got {err}");
}
