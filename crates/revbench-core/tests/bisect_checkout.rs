//! Bisection steps against a real git checkout that holds the installs and
//! the metric log.

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Arc;

use revbench_core::{BisectCriteria, Harness, HarnessConfig, MetricKey, Verdict};
use revbench_tools::fakes::{FakeBuildTool, FakeEngine, FakeProfiler};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn make_checkout() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-q"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.path().join("main.cc"), "v1").unwrap();
    run_git(dir.path(), &["add", "main.cc"]);
    run_git(dir.path(), &["commit", "-q", "-m", "initial import"]);
    let head = run_git(dir.path(), &["rev-parse", "HEAD"]);
    (dir, head)
}

#[tokio::test]
async fn bisect_steps_keep_installs_and_log_inside_the_checkout() {
    let (dir, head) = make_checkout();
    let mut config = HarnessConfig {
        source_dir: dir.path().to_path_buf(),
        install_root: dir.path().join("installs"),
        data_file: dir.path().join("data/metrics.csv"),
        captures: vec![dir.path().join("traces/m57.pcap")],
        ..HarnessConfig::default()
    };
    config.validate().unwrap();

    let vcs = Arc::new(Harness::source_repo(&config));
    let builder = Arc::new(FakeBuildTool::new("bin/zeek"));
    let harness = Harness::with_collaborators(
        config,
        vcs,
        builder.clone(),
        Arc::new(FakeEngine),
        Arc::new(FakeProfiler::new().with_result(&head, 10.0, 1_000_000)),
    )
    .unwrap();
    let criteria = BisectCriteria::new(15.0, Some(MetricKey::Elapsed), true);

    let first = harness.bisector().decide("HEAD", &criteria).await.unwrap();
    assert_eq!(first, Verdict::Good);
    assert!(harness.store().path().exists());
    assert!(harness.cache().install_path(&head).join("bin/zeek").exists());

    let second = harness.bisector().decide("HEAD", &criteria).await.unwrap();
    assert_eq!(second, Verdict::Good);
    assert_eq!(builder.install_count(), 1);
    assert_eq!(harness.store().records().unwrap().len(), 1);
}
