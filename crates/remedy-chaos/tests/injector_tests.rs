use pretty_assertions::assert_eq;
use remedy_chaos::{
    ClusterApi, FaultInjector, InjectionError, RecoveryChecks, RevertAck,
};
use remedy_core::{CleanupHandle, FailureCategory, InjectionState};
use remedy_test_utils::{cluster, spec, spec_for, MockCluster};
use std::sync::Arc;
use std::time::Duration;

fn injector(cluster: &Arc<MockCluster>) -> FaultInjector {
    FaultInjector::new(Arc::clone(cluster) as Arc<dyn ClusterApi>)
}

#[tokio::test]
async fn second_injection_on_same_target_is_rejected() {
    let cluster = Arc::new(cluster());
    let injector = injector(&cluster);

    let mut record = injector.inject(&spec(FailureCategory::CpuStress)).await.unwrap();
    let err = injector
        .inject(&spec(FailureCategory::NetworkLoss))
        .await
        .unwrap_err();
    assert!(matches!(err, InjectionError::AlreadyInjected { .. }));
    assert_eq!(cluster.chaos_count(), 1);

    // Other targets are unaffected
    let mut other = injector
        .inject(&spec_for(FailureCategory::PodFail, "ts-user-service"))
        .await
        .unwrap();
    assert_eq!(injector.active_count(), 2);

    injector.revert(&mut record).await.unwrap();
    injector.revert(&mut other).await.unwrap();
    assert_eq!(injector.active_count(), 0);
    assert!(injector
        .inject(&spec(FailureCategory::NetworkLoss))
        .await
        .is_ok());
}

#[tokio::test]
async fn revert_is_idempotent() {
    let cluster = Arc::new(cluster());
    let injector = injector(&cluster);
    let mut record = injector.inject(&spec(FailureCategory::PodFail)).await.unwrap();
    assert_eq!(cluster.chaos_objects(), vec!["PodChaos/pod-fail-ts-order-service"]);

    assert_eq!(injector.revert(&mut record).await.unwrap(), RevertAck::Reverted);
    assert_eq!(record.state, InjectionState::RolledBack);
    assert_eq!(
        injector.revert(&mut record).await.unwrap(),
        RevertAck::AlreadyReverted
    );
    assert_eq!(cluster.chaos_count(), 0);
    assert_eq!(cluster.calls_starting_with("delete PodChaos"), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_disk_fault_deletion_clears_finalizers() {
    let cluster = Arc::new(cluster().with_deployment("nacosdb-mysql", 1));
    cluster.stall_deletes("IOChaos");
    let injector = injector(&cluster).with_delete_timeout(Duration::from_secs(5));

    let mut record = injector
        .inject(&spec_for(FailureCategory::DiskIo, "nacosdb-mysql"))
        .await
        .unwrap();
    assert!(matches!(
        record.cleanup,
        CleanupHandle::DeleteResource {
            clear_finalizers_on_stall: true,
            ..
        }
    ));

    assert_eq!(injector.revert(&mut record).await.unwrap(), RevertAck::Reverted);
    assert_eq!(cluster.calls_starting_with("clear-finalizers IOChaos"), 1);
    assert_eq!(cluster.chaos_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_deletion_of_other_kinds_fails_and_keeps_the_reservation() {
    let cluster = Arc::new(cluster());
    cluster.stall_deletes("StressChaos");
    let injector = injector(&cluster).with_delete_timeout(Duration::from_secs(5));

    let mut record = injector.inject(&spec(FailureCategory::CpuStress)).await.unwrap();
    let err = injector.revert(&mut record).await.unwrap_err();
    assert!(matches!(err, InjectionError::Revert(_)));
    assert!(record.is_applied());
    assert!(injector.is_active("default", "ts-order-service"));
}

#[tokio::test]
async fn configuration_fault_patches_the_workload_and_defers_revert() {
    let cluster = Arc::new(cluster());
    let injector = injector(&cluster);
    let checks = RecoveryChecks::new(Arc::clone(&cluster) as Arc<dyn ClusterApi>);
    let spec = spec(FailureCategory::PodConfigError);

    let mut record = injector.inject(&spec).await.unwrap();
    let limits = &cluster.resources_of("ts-order-service").unwrap()[0].resources.limits;
    assert_eq!(limits.cpu.as_deref(), Some("2m"));
    assert_eq!(cluster.chaos_count(), 0);

    let verdict = checks.evaluate(spec.category, &spec.target).await.unwrap();
    assert!(!verdict.recovered, "{verdict}");

    assert_eq!(
        injector.revert(&mut record).await.unwrap(),
        RevertAck::DeferredToBaseline
    );
    assert!(!injector.is_active("default", "ts-order-service"));
}

#[tokio::test]
async fn failed_apply_releases_the_target() {
    let cluster = Arc::new(cluster());
    let injector = injector(&cluster);
    cluster.set_unreachable(true);
    let err = injector
        .inject(&spec(FailureCategory::MemoryStress))
        .await
        .unwrap_err();
    assert!(matches!(err, InjectionError::Apply(_)));
    assert_eq!(injector.active_count(), 0);
}

#[tokio::test]
async fn missing_workload_is_reported_for_configuration_faults() {
    let cluster = Arc::new(cluster());
    let err = injector(&cluster)
        .inject(&spec_for(FailureCategory::PodConfigError, "ts-ghost-service"))
        .await
        .unwrap_err();
    assert!(matches!(err, InjectionError::WorkloadNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn injected_faults_show_their_symptom() {
    let cluster = Arc::new(cluster().with_deployment("nacosdb-mysql", 1));
    let injector = injector(&cluster);
    let checks = RecoveryChecks::new(Arc::clone(&cluster) as Arc<dyn ClusterApi>);

    for category in FailureCategory::ALL {
        let workload = if category == FailureCategory::DiskIo {
            "nacosdb-mysql"
        } else {
            "ts-order-service"
        };
        let spec = spec_for(category, workload);
        let healthy = checks.evaluate(category, &spec.target).await.unwrap();
        assert!(healthy.recovered, "{category} before injection: {healthy}");

        let mut record = injector.inject(&spec).await.unwrap();
        let confirmed = checks
            .confirm_symptom(
                category,
                &spec.target,
                Duration::from_secs(30),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(confirmed.is_some(), "{category} never showed");

        injector.revert(&mut record).await.unwrap();
        cluster.heal(workload);
    }
}

#[tokio::test(start_paused = true)]
async fn fault_that_never_takes_hold_is_not_confirmed() {
    let cluster = Arc::new(cluster());
    cluster.set_fault_takes_hold(false);
    let injector = injector(&cluster);
    let checks = RecoveryChecks::new(Arc::clone(&cluster) as Arc<dyn ClusterApi>);
    let spec = spec(FailureCategory::NetworkDelay);

    let _record = injector.inject(&spec).await.unwrap();
    let confirmed = checks
        .confirm_symptom(
            spec.category,
            &spec.target,
            Duration::from_secs(30),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(confirmed, None);
}
