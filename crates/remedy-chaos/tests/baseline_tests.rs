use pretty_assertions::assert_eq;
use remedy_chaos::{BaselineGuard, ClusterApi, FaultInjector};
use remedy_core::FailureCategory;
use remedy_test_utils::{cluster, env, fast_health_policy, spec, MockCluster, WORKLOAD};
use std::io::Write;
use std::sync::Arc;

const MANIFEST: &str = r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: ts-order-service
spec:
  replicas: 2
  template:
    metadata:
      labels:
        app: ts-order-service
    spec:
      containers:
        - name: ts-order-service
          resources:
            requests:
              cpu: 100m
              memory: 256Mi
            limits:
              cpu: 500m
              memory: 1Gi
";

fn guard(cluster: &Arc<MockCluster>) -> BaselineGuard {
    BaselineGuard::new(Arc::clone(cluster) as Arc<dyn ClusterApi>, fast_health_policy())
}

#[tokio::test]
async fn restore_undoes_a_configuration_fault_from_the_live_snapshot() {
    let cluster = Arc::new(cluster());
    let guard = guard(&cluster);
    let injector = FaultInjector::new(Arc::clone(&cluster) as Arc<dyn ClusterApi>);
    let spec = spec(FailureCategory::PodConfigError);

    let snapshot = guard.snapshot(&env(), &spec.target).await.unwrap();
    assert!(snapshot.manifest.is_none());
    let _record = injector.inject(&spec).await.unwrap();
    assert!(!guard.matches(&snapshot).await.unwrap());

    let ack = guard.restore(&snapshot).await.unwrap();
    assert_eq!(ack.containers_patched, 1);
    assert_eq!(ack.pods_deleted, 2);
    assert!(!ack.manifest_applied);
    assert!(guard.matches(&snapshot).await.unwrap());

    let again = guard.snapshot(&env(), &spec.target).await.unwrap();
    assert_eq!(again.fingerprint, snapshot.fingerprint);
}

#[tokio::test]
async fn restore_prefers_the_reference_manifest() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();

    let cluster = Arc::new(cluster());
    let guard = guard(&cluster);
    let injector = FaultInjector::new(Arc::clone(&cluster) as Arc<dyn ClusterApi>);
    let env = env().with_manifest(file.path());
    let spec = spec(FailureCategory::PodConfigError);

    let snapshot = guard.snapshot(&env, &spec.target).await.unwrap();
    assert_eq!(
        snapshot.manifest.as_ref().map(|m| m.workload.name.as_str()),
        Some(WORKLOAD)
    );
    let _record = injector.inject(&spec).await.unwrap();

    let ack = guard.restore(&snapshot).await.unwrap();
    assert!(ack.manifest_applied);
    assert_eq!(ack.containers_patched, 0);
    assert!(guard.matches(&snapshot).await.unwrap());
    assert_eq!(cluster.calls_starting_with("apply Deployment/ts-order-service"), 1);
}

#[tokio::test]
async fn restore_of_an_untouched_workload_changes_nothing() {
    let cluster = Arc::new(cluster());
    let guard = guard(&cluster);
    let snapshot = guard
        .snapshot(&env(), &spec(FailureCategory::CpuStress).target)
        .await
        .unwrap();

    let ack = guard.restore(&snapshot).await.unwrap();
    assert_eq!(ack.pods_deleted, 0);
    assert_eq!(ack.containers_patched, 0);
    assert_eq!(cluster.calls_starting_with("patch"), 0);
}

#[tokio::test]
async fn unreachable_cluster_fails_the_restore() {
    let cluster = Arc::new(cluster());
    let guard = guard(&cluster);
    let snapshot = guard
        .snapshot(&env(), &spec(FailureCategory::CpuStress).target)
        .await
        .unwrap();
    cluster.set_unreachable(true);
    let err = guard.restore(&snapshot).await.unwrap_err();
    assert!(err.is_infra());
}
