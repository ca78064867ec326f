//! Unit tests for the Configuration pass

use super::*;
use crate::test_utils::*;
use chrono::Duration as ChronoDuration;
use cluster_client::{MockClusterClient, ReplaceFault};
use crds::{ConfigurationSpec, LAST_UPDATED_ANNOTATION, MISCONFIGURATION_ANNOTATION, ManagedContainer};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

const NS: &str = "default";

fn scenario_spec() -> ConfigurationSpec {
    ConfigurationSpec {
        image_tag: Some("v2".to_string()),
        container_port: Some(9090),
        run_as_non_root: Some(true),
        ..ConfigurationSpec::default()
    }
}

fn setup(spec: ConfigurationSpec) -> (MockClusterClient, Reconciler) {
    let mock = MockClusterClient::new();
    mock.add_configuration(create_test_configuration(NS, "security", spec));
    let reconciler = create_test_reconciler(&mock);
    (mock, reconciler)
}

fn marker(mock: &MockClusterClient, name: &str) -> Option<String> {
    annotation(mock, NS, name, MISCONFIGURATION_ANNOTATION)
}

#[tokio::test]
async fn test_applies_configuration_to_pending_workload() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));

    let now = test_now();
    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(now))
        .await
        .unwrap();

    assert_eq!(report.applied, vec!["default/web".to_string()]);
    assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));

    let stored = mock.deployment(NS, "web").unwrap();
    let container = &stored.spec.unwrap().template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("app:v2"));
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 9090);
    assert_eq!(container.security_context.as_ref().unwrap().run_as_non_root, Some(true));
    assert_eq!(marker(&mock, "web").as_deref(), Some("false"));
    assert_eq!(
        annotation(&mock, NS, "web", LAST_UPDATED_ANNOTATION).as_deref(),
        Some("2024-05-01T12:00:00Z")
    );
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));

    reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();
    let later = test_now() + ChronoDuration::seconds(30);
    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(later))
        .await
        .unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(mock.replace_count(), 1);
}

#[tokio::test]
async fn test_applied_workload_untouched_until_rearmed() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    // Configuration changes but the workload is not re-armed
    mock.add_configuration(create_test_configuration(
        NS,
        "security",
        ConfigurationSpec {
            image_tag: Some("v3".to_string()),
            ..ConfigurationSpec::default()
        },
    ));
    for minutes in 1..=3 {
        reconciler
            .reconcile_configuration(NS, "security", &test_pass(test_now() + ChronoDuration::minutes(minutes)))
            .await
            .unwrap();
    }
    assert_eq!(mock.replace_count(), 1);
    assert_eq!(image(&mock, NS, "web").as_deref(), Some("app:v2"));

    // Aging flips the marker; the next pass applies again
    let due = test_now() + ChronoDuration::minutes(10);
    let (_, outcome) = reconciler.reconcile_aging(NS, "web", &test_pass(due)).await.unwrap();
    assert_eq!(outcome, AgingOutcome::Rearmed);
    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(due))
        .await
        .unwrap();
    assert_eq!(report.applied, vec!["default/web".to_string()]);
    assert_eq!(image(&mock, NS, "web").as_deref(), Some("app:v3"));
    assert_eq!(mock.replace_count(), 3);
}

#[tokio::test]
async fn test_unhealthy_workload_is_left_pending() {
    let (mock, reconciler) = setup(scenario_spec());
    let mut deployment = create_marked_deployment(NS, "web", "app:v1", "true", None);
    set_condition(&mut deployment, "Available", "False");
    mock.add_deployment(deployment);

    for _ in 0..3 {
        let (requeue, report) = reconciler
            .reconcile_configuration(NS, "security", &test_pass(test_now()))
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["default/web".to_string()]);
        assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));
    }
    assert_eq!(mock.replace_count(), 0);
    assert_eq!(marker(&mock, "web").as_deref(), Some("true"));

    mock.update_deployment(NS, "web", |d| set_condition(d, "Available", "True"));
    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();
    assert_eq!(report.applied, vec!["default/web".to_string()]);
    assert_eq!(image(&mock, NS, "web").as_deref(), Some("app:v2"));
}

#[tokio::test]
async fn test_unknown_health_is_skipped() {
    let (mock, reconciler) = setup(scenario_spec());
    let mut deployment = create_marked_deployment(NS, "web", "app:v1", "true", None);
    deployment.status = None;
    mock.add_deployment(deployment);

    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();
    assert_eq!(report.skipped, vec!["default/web".to_string()]);
    assert_eq!(mock.replace_count(), 0);
}

#[tokio::test]
async fn test_conflict_retries_only_the_affected_workload() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "api", "app:v1", "true", None));
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.inject_concurrent_write(NS, "api");

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::Now);
    assert_eq!(report.retry, vec!["default/api".to_string()]);
    assert_eq!(report.applied, vec!["default/web".to_string()]);
    assert_eq!(marker(&mock, "api").as_deref(), Some("true"));
    assert_eq!(image(&mock, NS, "api").as_deref(), Some("app:v1"));
    assert_eq!(marker(&mock, "web").as_deref(), Some("false"));

    // The immediate retry succeeds
    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();
    assert_eq!(report.applied, vec!["default/api".to_string()]);
    assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_vanished_workload_is_retried() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "api", "app:v1", "true", None));
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.vanish_after_list(NS, "api");

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::Now);
    assert_eq!(report.retry, vec!["default/api".to_string()]);
    assert_eq!(report.applied, vec!["default/web".to_string()]);
}

#[tokio::test]
async fn test_missing_configuration_ends_pass() {
    let mock = MockClusterClient::new();
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    let reconciler = create_test_reconciler(&mock);

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::AwaitChange);
    assert_eq!(report, PassReport::default());
    assert_eq!(mock.replace_count(), 0);
}

#[tokio::test]
async fn test_deleting_configuration_ends_pass() {
    let (mock, reconciler) = setup(scenario_spec());
    let mut configuration = create_test_configuration(NS, "security", scenario_spec());
    configuration.metadata.deletion_timestamp =
        Some(serde_json::from_value::<Time>(serde_json::json!("2024-05-01T12:00:00Z")).unwrap());
    mock.add_configuration(configuration);
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));

    let (requeue, _) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::AwaitChange);
    assert_eq!(mock.replace_count(), 0);
}

#[tokio::test]
async fn test_invalid_configuration_mutates_nothing() {
    let (mock, reconciler) = setup(ConfigurationSpec {
        image_tag: Some("v2".to_string()),
        cpu_limit: Some("-1".to_string()),
        ..ConfigurationSpec::default()
    });
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));
    assert!(report.applied.is_empty());
    assert_eq!(mock.replace_count(), 0);
    assert_eq!(marker(&mock, "web").as_deref(), Some("true"));
}

#[tokio::test]
async fn test_ambiguous_container_is_malformed() {
    let (mock, reconciler) = setup(scenario_spec());
    let mut deployment = create_marked_deployment(NS, "web", "app:v1", "true", None);
    set_containers(&mut deployment, &[("app", "app:v1"), ("proxy", "envoy:1")]);
    mock.add_deployment(deployment);

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(report.malformed, vec!["default/web".to_string()]);
    assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));
    assert_eq!(mock.replace_count(), 0);
    assert_eq!(marker(&mock, "web").as_deref(), Some("true"));
}

#[tokio::test]
async fn test_selector_picks_named_container() {
    let (mock, reconciler) = setup(ConfigurationSpec {
        image_tag: Some("v2".to_string()),
        managed_container: Some(ManagedContainer {
            name: Some("app".to_string()),
            ..ManagedContainer::default()
        }),
        ..ConfigurationSpec::default()
    });
    let mut deployment = create_marked_deployment(NS, "web", "app:v1", "true", None);
    set_containers(&mut deployment, &[("proxy", "envoy:1"), ("app", "registry:5000/app:v1")]);
    mock.add_deployment(deployment);

    reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    let containers = mock.deployment(NS, "web").unwrap().spec.unwrap().template.spec.unwrap().containers;
    assert_eq!(containers[0].image.as_deref(), Some("envoy:1"));
    assert_eq!(containers[1].image.as_deref(), Some("registry:5000/app:v2"));
}

#[tokio::test]
async fn test_only_pending_workloads_are_touched() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_test_deployment(NS, "untracked", "app:v1"));
    mock.add_deployment(create_marked_deployment(
        NS,
        "cooling",
        "app:v1",
        "false",
        Some("2024-05-01T11:59:00Z"),
    ));
    mock.add_deployment(create_marked_deployment(NS, "odd", "app:v1", "maybe", None));

    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(report, PassReport::default());
    assert_eq!(mock.replace_count(), 0);
}

#[tokio::test]
async fn test_pending_workloads_in_other_namespaces_are_remediated() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment("payments", "web", "app:v1", "true", None));

    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(report.applied, vec!["payments/web".to_string()]);
    assert_eq!(image(&mock, "payments", "web").as_deref(), Some("app:v2"));
    assert_eq!(
        annotation(&mock, "payments", "web", MISCONFIGURATION_ANNOTATION).as_deref(),
        Some("false")
    );
}

#[tokio::test]
async fn test_watch_namespace_limits_listed_workloads() {
    let mock = MockClusterClient::new();
    mock.add_configuration(create_test_configuration(NS, "security", scenario_spec()));
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.add_deployment(create_marked_deployment("payments", "web", "app:v1", "true", None));
    let config = ControllerConfig {
        namespace: Some(NS.to_string()),
        ..ControllerConfig::default()
    };
    let reconciler = Reconciler::new(mock.clone(), config);

    let (_, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(report.applied, vec!["default/web".to_string()]);
    assert_eq!(image(&mock, "payments", "web").as_deref(), Some("app:v1"));
}

#[tokio::test]
async fn test_rejected_update_is_not_retried_immediately() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "api", "app:v1", "true", None));
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.fail_replaces(
        NS,
        "web",
        ReplaceFault::Rejected("admission webhook denied the request".to_string()),
    );

    let (requeue, report) = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();
    assert_eq!(requeue, Requeue::After(Duration::from_secs(120)));
    assert_eq!(report.applied, vec!["default/api".to_string()]);
    assert_eq!(report.malformed, vec!["default/web".to_string()]);
    assert!(report.retry.is_empty());

    // Repeated passes keep holding the workload back at the success interval
    for _ in 0..3 {
        let (requeue, report) = reconciler
            .reconcile_configuration(NS, "security", &test_pass(test_now()))
            .await
            .unwrap();
        assert_ne!(requeue, Requeue::Now);
        assert_eq!(report.malformed, vec!["default/web".to_string()]);
    }
    assert_eq!(annotation(&mock, NS, "web", MISCONFIGURATION_ANNOTATION).as_deref(), Some("true"));
    assert_eq!(image(&mock, NS, "web").as_deref(), Some("app:v1"));
    assert_eq!(mock.replace_count(), 1);
}

#[tokio::test]
async fn test_unavailable_server_fails_the_pass() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.fail_replaces(NS, "web", ReplaceFault::Unavailable);

    let result = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await;

    assert!(matches!(
        result,
        Err(ControllerError::Cluster(ClusterError::Unavailable(_)))
    ));
    assert_eq!(annotation(&mock, NS, "web", MISCONFIGURATION_ANNOTATION).as_deref(), Some("true"));
}

#[tokio::test]
async fn test_preserves_unrelated_annotations() {
    let (mock, reconciler) = setup(scenario_spec());
    let mut deployment = create_marked_deployment(NS, "web", "app:v1", "true", None);
    deployment
        .metadata
        .annotations
        .as_mut()
        .unwrap()
        .insert("team".to_string(), "payments".to_string());
    mock.add_deployment(deployment);

    reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await
        .unwrap();

    assert_eq!(annotation(&mock, NS, "web", "team").as_deref(), Some("payments"));
}

#[tokio::test]
async fn test_list_failure_fails_the_pass() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    mock.fail_next_list();

    let result = reconciler
        .reconcile_configuration(NS, "security", &test_pass(test_now()))
        .await;

    assert!(matches!(
        result,
        Err(ControllerError::Cluster(ClusterError::Unavailable(_)))
    ));
    assert_eq!(mock.replace_count(), 0);
}

#[tokio::test]
async fn test_expired_deadline_stops_mutations() {
    let (mock, reconciler) = setup(scenario_spec());
    mock.add_deployment(create_marked_deployment(NS, "web", "app:v1", "true", None));
    let expired = Pass::new(test_now(), Instant::now());

    let result = reconciler
        .reconcile_configuration(NS, "security", &expired)
        .await;

    assert!(matches!(result, Err(ControllerError::DeadlineExceeded(_))));
    assert_eq!(mock.replace_count(), 0);
    assert_eq!(marker(&mock, "web").as_deref(), Some("true"));
}
