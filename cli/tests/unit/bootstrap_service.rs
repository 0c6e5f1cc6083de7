//! Tests for the GitOps bootstrap sequence.

#![allow(clippy::expect_used)]

use std::time::Duration;

use cluster_gitops::application::services::bootstrap::{
    BootstrapOptions, SETTLE_DELAY, bootstrap,
};
use cluster_gitops::domain::keys::is_bootstrap_title;
use cluster_gitops::domain::{
    BootstrapError, BootstrapStep, ClusterState, DeadlineExceeded, ProfileRef,
};
use tokio::time::Instant;

use crate::helpers::{
    AGENT_PUBLIC_KEY, FakeGitOps, FakeRegistry, FakeSsh, Journal, RecordingReporter,
    bootstrap_options, spec,
};

const STALE_BOOTSTRAP: &str = "push-key-OLD0000000";

fn strip_title(entry: &str) -> &str {
    entry.rsplit(' ').next().unwrap_or_default()
}

#[tokio::test]
async fn test_bootstrap_runs_steps_in_order() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal)
        .with_keys(&[(STALE_BOOTSTRAP, "ssh-rsa stale"), ("flux", "ssh-rsa old-flux")]);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();

    let report = bootstrap(
        &spec("present", "25m", &["app-dev"]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect("bootstrap");

    assert!(is_bootstrap_title(&report.bootstrap_key_title));
    assert_eq!(report.agent_key.title, "flux");
    assert_eq!(report.agent_key.key, AGENT_PUBLIC_KEY, "agent key is trimmed");
    assert_eq!(report.enabled_profiles, vec![ProfileRef::new("app-dev")]);
    assert!(report.profile_failures.is_empty());

    let entries = journal.entries();
    let title = report.bootstrap_key_title.as_str();
    let expected = vec![
        "ssh start".to_string(),
        "ssh keygen /home/runner/.ssh/id_rsa".to_string(),
        "ssh trust".to_string(),
        "ssh add /tmp/ssh-test/agent.100".to_string(),
        "registry list".to_string(),
        format!("registry create {title}"),
        "gitops repo /tmp/ssh-test/agent.100".to_string(),
        "gitops identity".to_string(),
        "registry list".to_string(),
        "registry delete flux".to_string(),
        "registry create flux".to_string(),
        format!("registry delete {title}"),
        "gitops profile app-dev /tmp/ssh-test/agent.100".to_string(),
        "ssh stop 101".to_string(),
    ];
    assert_eq!(entries.len(), expected.len(), "{entries:#?}");
    for (got, want) in entries.iter().zip(&expected) {
        assert!(got.starts_with(want.as_str()), "expected '{want}', got '{got}'");
    }

    // Another run's bootstrap key is left alone; this run's key is gone.
    assert_eq!(
        registry.titles(),
        vec![STALE_BOOTSTRAP.to_string(), "flux".to_string()]
    );
    let agent = registry
        .keys()
        .into_iter()
        .find(|k| k.title == "flux")
        .expect("agent key");
    assert_eq!(agent.key, AGENT_PUBLIC_KEY);

    assert_eq!(
        gitops.targets()[0],
        "demo/eu-west-1/git@github.com:acme/fleet/flux@noreply.gitops"
    );
}

#[tokio::test]
async fn test_bootstrap_key_is_revoked_when_enable_repository_fails() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal).failing_repository();
    let reporter = RecordingReporter::default();

    let err = bootstrap(
        &spec("present", "25m", &["a"]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect_err("enable repository fails");

    assert_eq!(err.step(), Some(BootstrapStep::EnableRepository));
    assert!(registry.keys().is_empty(), "bootstrap key must be revoked");
    assert_eq!(journal.count("gitops identity"), 0);
    assert_eq!(journal.count("gitops profile"), 0);
    assert_eq!(journal.count("ssh stop"), 1);
    let created = journal.position("registry create").expect("created");
    let revoked = journal.position("registry delete").expect("revoked");
    assert!(created < revoked);
}

#[tokio::test]
async fn test_revoke_failure_after_success_is_reported_as_its_own_step() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal).failing_deletes();
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();

    let err = bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect_err("revoke fails");

    assert_eq!(err.step(), Some(BootstrapStep::RevokeBootstrapKey));
    assert_eq!(journal.count("ssh stop"), 1);
}

#[tokio::test]
async fn test_original_error_wins_when_revoke_also_fails() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal).failing_deletes();
    let gitops = FakeGitOps::new(&journal).failing_repository();
    let reporter = RecordingReporter::default();

    let err = bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect_err("both fail");

    assert_eq!(err.step(), Some(BootstrapStep::EnableRepository));
    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.starts_with("could not revoke bootstrap key 'push-key-")),
        "{:?}",
        reporter.warnings()
    );
}

#[tokio::test]
async fn test_agent_is_stopped_on_every_failure_path() {
    for op in ["keygen", "trust", "add"] {
        let journal = Journal::default();
        let ssh = FakeSsh::new(&journal).failing_at(op);
        let registry = FakeRegistry::new(&journal);
        let gitops = FakeGitOps::new(&journal);
        let reporter = RecordingReporter::default();

        let err = bootstrap(
            &spec("present", "25m", &[]),
            ClusterState::Present,
            &ssh,
            &registry,
            &gitops,
            &reporter,
            &bootstrap_options(),
        )
        .await
        .expect_err("ssh step fails");

        assert_eq!(err.step(), Some(BootstrapStep::GenerateKey), "{op}");
        assert_eq!(journal.count("ssh stop"), 1, "{op}");
        assert_eq!(journal.count("registry"), 0, "{op}: nothing registered");
    }
}

#[tokio::test]
async fn test_failed_agent_start_stops_nothing() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal).failing_at("start");
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();

    let err = bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect_err("start fails");

    assert_eq!(err.step(), Some(BootstrapStep::StartAgent));
    assert_eq!(journal.entries(), vec!["ssh start"]);
}

#[tokio::test]
async fn test_stop_failure_does_not_fail_the_bootstrap() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal).failing_at("stop");
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();

    bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect("stop failure is only a warning");

    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.contains("could not stop ssh-agent"))
    );
}

#[tokio::test]
async fn test_agent_key_registration_is_idempotent() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();
    let desired = spec("present", "25m", &[]);

    for _ in 0..2 {
        bootstrap(
            &desired,
            ClusterState::Present,
            &ssh,
            &registry,
            &gitops,
            &reporter,
            &bootstrap_options(),
        )
        .await
        .expect("bootstrap");
    }

    assert_eq!(registry.titles(), vec!["flux".to_string()]);
}

#[tokio::test]
async fn test_profile_failures_are_collected_and_later_profiles_still_run() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal).failing_profiles(&["b"]);
    let reporter = RecordingReporter::default();

    let report = bootstrap(
        &spec("present", "25m", &["a", "b", "c"]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect("profile failures are not fatal");

    let attempted: Vec<String> = journal
        .entries()
        .iter()
        .filter(|e| e.starts_with("gitops profile"))
        .map(|e| e.split(' ').nth(2).unwrap_or_default().to_string())
        .collect();
    assert_eq!(attempted, vec!["a", "b", "c"]);
    assert_eq!(
        report.enabled_profiles,
        vec![ProfileRef::new("a"), ProfileRef::new("c")]
    );
    assert_eq!(report.profile_failures.len(), 1);
    assert_eq!(report.profile_failures[0].profile, ProfileRef::new("b"));
    assert!(report.profile_failures[0].message.contains("enable profile b"));
    // Profiles run after the bootstrap key is gone.
    let last_delete = journal
        .entries()
        .iter()
        .rposition(|e| e.starts_with("registry delete push-key-"))
        .expect("revoked");
    assert!(last_delete < journal.position("gitops profile").expect("profiles"));
}

#[tokio::test]
async fn test_bootstrap_requires_present_cluster() {
    for state in [ClusterState::Absent, ClusterState::Unknown] {
        let journal = Journal::default();
        let reporter = RecordingReporter::default();

        let err = bootstrap(
            &spec("present", "25m", &[]),
            state,
            &FakeSsh::new(&journal),
            &FakeRegistry::new(&journal),
            &FakeGitOps::new(&journal),
            &reporter,
            &bootstrap_options(),
        )
        .await
        .expect_err("not present");

        assert!(matches!(err, BootstrapError::ClusterNotPresent(s) if s == state));
        assert!(journal.entries().is_empty());
    }
}

#[tokio::test]
async fn test_empty_agent_key_is_rejected() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal).with_agent_key("  \n");
    let reporter = RecordingReporter::default();

    let err = bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &bootstrap_options(),
    )
    .await
    .expect_err("empty key");

    assert_eq!(err.step(), Some(BootstrapStep::ReadAgentKey));
    assert!(registry.keys().is_empty());
    assert!(
        journal
            .entries()
            .iter()
            .all(|e| strip_title(e) != "flux"),
        "no agent key registered"
    );
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_separates_registration_from_repository() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();
    let opts = BootstrapOptions {
        settle_delay: SETTLE_DELAY,
        ..bootstrap_options()
    };

    bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &opts,
    )
    .await
    .expect("bootstrap");

    let registered = journal
        .recorded_at("registry create push-key-")
        .expect("bootstrap key registered");
    let enabled = journal.recorded_at("gitops repo").expect("repository enabled");
    assert_eq!(enabled - registered, SETTLE_DELAY);
    assert_eq!(SETTLE_DELAY, Duration::from_secs(5));
    assert!(
        reporter
            .messages()
            .contains(&"step: waiting 5s for the key to propagate...".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_step_but_not_cleanup() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal).stalling_repository(Duration::from_secs(600));
    let reporter = RecordingReporter::default();
    let started = Instant::now();
    let opts = BootstrapOptions {
        deadline: Some(started + Duration::from_secs(60)),
        ..bootstrap_options()
    };

    let err = bootstrap(
        &spec("present", "25m", &["a"]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &opts,
    )
    .await
    .expect_err("deadline reached");

    assert_eq!(err.step(), Some(BootstrapStep::EnableRepository));
    let cause = std::error::Error::source(&err).expect("cause");
    assert!(cause.is::<DeadlineExceeded>());
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert!(registry.keys().is_empty(), "bootstrap key must be revoked");
    assert_eq!(journal.count("gitops identity"), 0);
    assert_eq!(journal.count("gitops profile"), 0);
    assert_eq!(journal.count("ssh stop"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_profile_cut_off_by_the_deadline_is_a_failure() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal).stalling_profile("a", Duration::from_secs(600));
    let reporter = RecordingReporter::default();
    let started = Instant::now();
    let opts = BootstrapOptions {
        deadline: Some(started + Duration::from_secs(60)),
        ..bootstrap_options()
    };

    let report = bootstrap(
        &spec("present", "25m", &["a", "b"]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &opts,
    )
    .await
    .expect("profile failures are not fatal");

    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(report.profile_failures.len(), 1);
    assert_eq!(report.profile_failures[0].profile, ProfileRef::new("a"));
    assert_eq!(report.profile_failures[0].message, "run deadline reached");
    assert_eq!(journal.count("gitops profile b"), 1);
    assert_eq!(journal.count("ssh stop"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_deadline_registers_nothing() {
    let journal = Journal::default();
    let ssh = FakeSsh::new(&journal);
    let registry = FakeRegistry::new(&journal);
    let gitops = FakeGitOps::new(&journal);
    let reporter = RecordingReporter::default();
    let opts = BootstrapOptions {
        deadline: Some(Instant::now()),
        ..bootstrap_options()
    };

    let err = bootstrap(
        &spec("present", "25m", &[]),
        ClusterState::Present,
        &ssh,
        &registry,
        &gitops,
        &reporter,
        &opts,
    )
    .await
    .expect_err("deadline already passed");

    // The ssh fakes finish on first poll, so the first refusal is registration.
    assert_eq!(err.step(), Some(BootstrapStep::RegisterBootstrapKey));
    assert_eq!(journal.count("registry"), 0);
    assert_eq!(journal.count("ssh stop"), 1);
}
