//! Tests for workloads
//!

use hostpath_backup::workload::{Replicated, UnsupportedWorkloadKind, WorkloadKind};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetStatus};

#[test]
fn kind_round_trips_through_name() {
    for kind in [WorkloadKind::Deployment, WorkloadKind::StatefulSet] {
        assert_eq!(kind.as_str().parse::<WorkloadKind>().unwrap(), kind);
    }
}

#[test]
fn daemon_set_is_unsupported() {
    let error = "DaemonSet".parse::<WorkloadKind>().unwrap_err();
    assert_eq!(error, UnsupportedWorkloadKind("DaemonSet".to_string()));
}

#[test]
fn unset_replicas_default_to_one() {
    let deployment = Deployment::default();
    assert_eq!(deployment.replica_status().desired_replicas(), 1);
    assert_eq!(deployment.ready_replicas(), 0);
}

#[test]
fn set_replicas_creates_spec() {
    let mut deployment = Deployment {
        spec: Some(DeploymentSpec {
            replicas: Some(3),
            ..Default::default()
        }),
        ..Default::default()
    };
    deployment.set_replicas(0);
    assert_eq!(deployment.replicas(), Some(0));

    let mut stateful_set = StatefulSet {
        status: Some(StatefulSetStatus {
            ready_replicas: Some(2),
            ..Default::default()
        }),
        ..Default::default()
    };
    stateful_set.set_replicas(4);
    assert_eq!(stateful_set.replica_status().replicas, Some(4));
    assert_eq!(stateful_set.ready_replicas(), 2);
}
