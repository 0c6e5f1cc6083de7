//! End-to-end runs of `apply` against fakes.

#![allow(clippy::expect_used)]

use std::time::Duration;

use cluster_gitops::application::services::orchestrate::{self, Drivers, RunOptions};
use cluster_gitops::application::services::reconcile::ReconcilePolicy;
use cluster_gitops::domain::{
    BootstrapError, BootstrapStep, ClusterState, DeadlineExceeded, ReconcileError, StatePair,
};
use tokio::time::Instant;

use crate::helpers::{
    FakeCluster, FakeConfig, FakeConfirm, FakeGitOps, FakeRegistry, FakeSsh, Journal,
    RecordingReporter, bootstrap_options, spec,
};

use ClusterState::{Absent, Present, Unknown};

fn options() -> RunOptions {
    RunOptions {
        policy: ReconcilePolicy::default(),
        bootstrap: bootstrap_options(),
        deadline: None,
    }
}

fn pair(observed: ClusterState, desired: ClusterState) -> StatePair {
    StatePair { observed, desired }
}

/// Every fake a run needs, sharing one journal.
struct World {
    journal: Journal,
    cluster: FakeCluster,
    ssh: FakeSsh,
    registry: FakeRegistry,
    gitops: FakeGitOps,
    reporter: RecordingReporter,
}

impl World {
    fn new(observations: &[ClusterState]) -> Self {
        let journal = Journal::default();
        Self {
            cluster: FakeCluster::new(&journal, observations),
            ssh: FakeSsh::new(&journal),
            registry: FakeRegistry::new(&journal),
            gitops: FakeGitOps::new(&journal),
            reporter: RecordingReporter::default(),
            journal,
        }
    }

    fn drivers(&self) -> Drivers<'_, FakeCluster, FakeSsh, FakeRegistry, FakeGitOps> {
        Drivers {
            cluster: &self.cluster,
            ssh: &self.ssh,
            registry: &self.registry,
            gitops: &self.gitops,
        }
    }
}

#[tokio::test]
async fn test_absent_cluster_is_created_and_bootstrapped() {
    let world = World::new(&[Absent, Absent, Present]);
    let config = FakeConfig::new(spec("present", "10m", &["app-dev"]));
    let confirm = FakeConfirm::answering(true);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("completed");

    assert_eq!(report.initial, pair(Absent, Present));
    assert_eq!(report.final_state, pair(Present, Present));
    assert!(report.bootstrapped);
    assert!(report.is_clean());
    assert!(confirm.prompts().is_empty(), "creation is not confirmed");

    let creates = world.cluster.creates();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].1, Duration::from_secs(600));
    assert_eq!(world.journal.count("ssh start"), 1);
    assert_eq!(world.journal.count("gitops repo"), 1);
    assert_eq!(world.journal.count("gitops profile app-dev"), 1);
    assert_eq!(world.journal.count("ssh stop"), 1);
    assert_eq!(world.registry.titles(), vec!["flux".to_string()]);
    assert!(
        world
            .reporter
            .messages()
            .first()
            .is_some_and(|m| m == "step: cluster state: \"absent\" => desired state: \"present\""),
        "{:?}",
        world.reporter.messages()
    );
}

#[tokio::test(start_paused = true)]
async fn test_present_cluster_is_deleted_without_bootstrap() {
    let world = World::new(&[Present, Present, Present, Absent]);
    let config = FakeConfig::new(spec("absent", "10m", &[]));
    let confirm = FakeConfirm::answering(true);
    let started = tokio::time::Instant::now();

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("completed");

    assert_eq!(report.initial, pair(Present, Absent));
    assert_eq!(report.final_state, pair(Absent, Absent));
    assert!(!report.bootstrapped);
    assert!(report.is_clean());
    assert_eq!(world.journal.count("cluster delete"), 2);
    assert_eq!(world.journal.count("ssh"), 0);
    assert_eq!(world.journal.count("registry"), 0);
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(confirm.prompts(), vec!["Delete cluster 'demo' in eu-west-1?"]);
}

#[tokio::test]
async fn test_present_cluster_refreshes_kubeconfig_and_bootstraps() {
    let world = World::new(&[Present]);
    let config = FakeConfig::new(spec("present", "10m", &[]));
    let confirm = FakeConfirm::answering(true);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("completed");

    assert_eq!(report.final_state, pair(Present, Present));
    assert!(report.bootstrapped);
    assert!(report.profile_failures.is_empty());
    assert_eq!(world.journal.count("cluster create"), 0);
    assert_eq!(world.journal.count("cluster delete"), 0);
    assert_eq!(world.journal.count("gitops profile"), 0);
    let kubeconfig = world.journal.position("cluster kubeconfig").expect("kubeconfig");
    let agent = world.journal.position("ssh start").expect("bootstrap");
    assert!(kubeconfig < agent);
    assert!(
        world
            .reporter
            .warnings()
            .iter()
            .any(|w| w.contains("not implemented"))
    );
}

#[tokio::test]
async fn test_declined_delete_changes_nothing() {
    let world = World::new(&[Present]);
    let config = FakeConfig::new(spec("absent", "10m", &[]));
    let confirm = FakeConfirm::answering(false);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("declining is not an error")
        .into_result()
        .expect("completed");

    assert!(report.cancelled);
    assert!(!report.is_clean());
    assert_eq!(report.final_state, report.initial);
    assert_eq!(world.journal.entries(), vec!["cluster observe demo -> present"]);
    assert!(world.reporter.warnings().contains(&"Cancelled.".to_string()));
}

#[tokio::test]
async fn test_profile_failures_reach_the_report() {
    let mut world = World::new(&[Absent, Absent, Present]);
    world.gitops = FakeGitOps::new(&world.journal).failing_profiles(&["b"]);
    let config = FakeConfig::new(spec("present", "10m", &["a", "b", "c"]));
    let confirm = FakeConfirm::answering(true);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("completed");

    assert_eq!(report.failed_profiles(), vec!["b".to_string()]);
    assert!(!report.is_clean());
    assert_eq!(report.final_state, pair(Present, Present));
}

#[tokio::test]
async fn test_unreadable_config_at_the_end_reports_unknown() {
    let world = World::new(&[Absent]);
    let config = FakeConfig::new(spec("absent", "10m", &[])).failing_from(2);
    let confirm = FakeConfirm::answering(true);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("completed");

    assert_eq!(config.loads(), 2, "read once up front, once for the report");
    assert_eq!(report.initial, pair(Absent, Absent));
    assert_eq!(report.final_state, pair(Absent, Unknown));
    assert!(!report.final_state.converged());
}

#[tokio::test]
async fn test_unreadable_config_up_front_fails_before_observing() {
    let world = World::new(&[Absent]);
    let config = FakeConfig::new(spec("absent", "10m", &[])).failing_from(1);
    let confirm = FakeConfirm::answering(true);

    let err = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect_err("no config");

    assert!(format!("{err:#}").contains("cannot read cluster.yaml"));
    assert!(world.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_timeout_propagates() {
    let world = World::new(&[Present]);
    let config = FakeConfig::new(spec("absent", "10m", &[]));
    let confirm = FakeConfirm::answering(true);
    let opts = RunOptions {
        policy: ReconcilePolicy {
            max_delete_attempts: 2,
            ..ReconcilePolicy::default()
        },
        bootstrap: bootstrap_options(),
        deadline: None,
    };

    let outcome = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &opts)
        .await
        .expect("run");

    let err = outcome.error.expect("never converges");
    assert!(matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::ConvergenceTimeout { attempts: 2, .. })
    ));
    assert_eq!(outcome.report.final_state, pair(Present, Absent));
    assert!(!outcome.report.is_clean());
}

#[tokio::test]
async fn test_kubeconfig_failure_still_bootstraps_and_reports() {
    let mut world = World::new(&[Present]);
    world.cluster =
        FakeCluster::new(&world.journal, &[Present]).with_kubeconfig_error("no aws creds");
    let config = FakeConfig::new(spec("present", "10m", &["app-dev"]));
    let confirm = FakeConfirm::answering(true);

    let report = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run")
        .into_result()
        .expect("a kubeconfig failure does not stop the run");

    assert!(report.bootstrapped);
    assert_eq!(world.journal.count("ssh start"), 1);
    assert_eq!(world.journal.count("gitops profile app-dev"), 1);
    assert_eq!(config.loads(), 2);
    assert_eq!(report.final_state, pair(Present, Present));
    assert!(
        world
            .reporter
            .warnings()
            .iter()
            .any(|w| w.contains("no aws creds"))
    );
}

#[tokio::test]
async fn test_failed_create_still_captures_final_state() {
    let mut world = World::new(&[Absent]);
    world.cluster =
        FakeCluster::new(&world.journal, &[Absent]).with_create_error("quota exceeded");
    let config = FakeConfig::new(spec("present", "10m", &[]));
    let confirm = FakeConfirm::answering(true);

    let outcome = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run");

    let err = outcome.error.expect("create failed");
    assert!(matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::CreateFailed { .. })
    ));
    assert_eq!(config.loads(), 2, "desired state is re-read for the report");
    assert_eq!(outcome.report.initial, pair(Absent, Present));
    assert_eq!(outcome.report.final_state, pair(Absent, Present));
    assert!(!outcome.report.bootstrapped);
    assert_eq!(world.journal.count("ssh"), 0);
    assert_eq!(
        world.journal.entries().last().map(String::as_str),
        Some("cluster observe demo -> absent")
    );
}

#[tokio::test]
async fn test_failed_bootstrap_still_captures_final_state() {
    let mut world = World::new(&[Present]);
    world.gitops = FakeGitOps::new(&world.journal).failing_repository();
    let config = FakeConfig::new(spec("present", "10m", &[]));
    let confirm = FakeConfirm::answering(true);

    let outcome = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &options())
        .await
        .expect("run");

    let err = outcome.error.expect("bootstrap failed");
    assert_eq!(
        err.downcast_ref::<BootstrapError>().and_then(BootstrapError::step),
        Some(BootstrapStep::EnableRepository)
    );
    assert!(!outcome.report.bootstrapped);
    assert_eq!(outcome.report.final_state, pair(Present, Present));
    assert!(world.registry.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_the_delete_loop_and_still_reports() {
    let world = World::new(&[Present]);
    let config = FakeConfig::new(spec("absent", "10m", &[]));
    let confirm = FakeConfirm::answering(true);
    let started = Instant::now();
    let opts = RunOptions {
        policy: ReconcilePolicy::unbounded(),
        bootstrap: bootstrap_options(),
        deadline: Some(started + Duration::from_secs(95)),
    };

    let outcome = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &opts)
        .await
        .expect("run");

    let err = outcome.error.expect("deadline reached");
    assert!(err.chain().any(|c| c.is::<DeadlineExceeded>()));
    assert!(format!("{err:#}").contains("reconciling cluster 'demo'"));
    assert_eq!(started.elapsed(), Duration::from_secs(95));
    assert_eq!(world.journal.count("cluster delete"), 4);
    assert_eq!(outcome.report.final_state, pair(Present, Absent));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_reaches_the_bootstrap_and_cleanup_still_runs() {
    let mut world = World::new(&[Present]);
    world.gitops =
        FakeGitOps::new(&world.journal).stalling_repository(Duration::from_secs(3600));
    let config = FakeConfig::new(spec("present", "10m", &[]));
    let confirm = FakeConfirm::answering(true);
    let opts = RunOptions {
        deadline: Some(Instant::now() + Duration::from_secs(30)),
        ..options()
    };

    let outcome = orchestrate::run(&config, &world.drivers(), &confirm, &world.reporter, &opts)
        .await
        .expect("run");

    let err = outcome.error.expect("deadline reached");
    assert!(err.chain().any(|c| c.is::<DeadlineExceeded>()));
    assert!(world.registry.keys().is_empty(), "bootstrap key revoked");
    assert_eq!(world.journal.count("ssh stop"), 1);
    assert_eq!(outcome.report.final_state, pair(Present, Present));
}

#[tokio::test]
async fn test_status_reads_without_changing_anything() {
    let journal = Journal::default();
    let cluster = FakeCluster::new(&journal, &[Absent]);
    let config = FakeConfig::new(spec("present", "10m", &[]));

    let status = orchestrate::status(&config, &cluster).await.expect("status");

    assert_eq!(status.cluster_name, "demo");
    assert_eq!(status.region, "eu-west-1");
    assert_eq!(status.pair, pair(Absent, Present));
    assert_eq!(journal.entries(), vec!["cluster observe demo -> absent"]);
}
