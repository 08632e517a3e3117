//! GitRepo against real throwaway repositories.

use std::path::Path;
use std::process::Command as StdCommand;

use revbench_tools::{GitRepo, ToolError, VersionControl};

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

fn commit_file(repo_dir: &Path, name: &str, content: &str, message: &str) -> String {
    std::fs::write(repo_dir.join(name), content).unwrap();
    run_git(repo_dir, &["add", name]);
    run_git(repo_dir, &["commit", "-q", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

fn make_git_repo() -> (tempfile::TempDir, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-q"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    let first = commit_file(dir.path(), "main.cc", "v1", "initial import");
    let second = commit_file(dir.path(), "main.cc", "v2", "Merge branch 'topic/fast-path', with commas");
    (dir, vec![first, second])
}

#[tokio::test]
async fn history_is_newest_first() {
    let (dir, revs) = make_git_repo();
    let repo = GitRepo::new(dir.path());

    let history = repo.list_history().await.unwrap();
    assert_eq!(history, vec![revs[1].clone(), revs[0].clone()]);
    assert_eq!(repo.resolve_head().await.unwrap(), revs[1]);
}

#[tokio::test]
async fn metadata_reads_subject_and_date() {
    let (dir, revs) = make_git_repo();
    let repo = GitRepo::new(dir.path());

    let info = repo.metadata(&revs[1]).await.unwrap();
    assert_eq!(info.subject, "Merge branch 'topic/fast-path', with commas");
    assert_eq!(info.date_string().len(), "2015-03-01 12:00:00 -0800".len());
}

#[tokio::test]
async fn resolve_short_and_unknown_refs() {
    let (dir, revs) = make_git_repo();
    let repo = GitRepo::new(dir.path());

    assert_eq!(repo.resolve(&revs[0][..10]).await.unwrap(), revs[0]);
    assert!(matches!(
        repo.resolve("no-such-branch").await,
        Err(ToolError::UnknownRevision(_))
    ));
}

#[tokio::test]
async fn checkout_discards_local_modifications() {
    let (dir, revs) = make_git_repo();
    let repo = GitRepo::new(dir.path());

    std::fs::write(dir.path().join("main.cc"), "patched config").unwrap();
    repo.checkout(&revs[0]).await.unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("main.cc")).unwrap(), "v1");
    assert_eq!(repo.resolve_head().await.unwrap(), revs[0]);
}

#[tokio::test]
async fn clean_removes_generated_files() {
    let (dir, _revs) = make_git_repo();
    let repo = GitRepo::new(dir.path());

    std::fs::create_dir(dir.path().join("build")).unwrap();
    std::fs::write(dir.path().join("build/CMakeCache.txt"), "generated").unwrap();
    std::fs::write(dir.path().join("main.cc"), "dirty").unwrap();

    repo.clean().await.unwrap();

    assert!(!dir.path().join("build").exists());
    assert_eq!(std::fs::read_to_string(dir.path().join("main.cc")).unwrap(), "v2");
}

#[tokio::test]
async fn clean_keeps_preserved_paths() {
    let (dir, _revs) = make_git_repo();
    let repo = GitRepo::new(dir.path())
        .preserving(dir.path().join("installs"))
        .preserving(dir.path().join("data/metrics.csv"));

    std::fs::write(dir.path().join(".git/info/exclude"), "installs/\n").unwrap();
    std::fs::create_dir_all(dir.path().join("installs/abc/bin")).unwrap();
    std::fs::write(dir.path().join("installs/abc/bin/zeek"), "binary").unwrap();
    std::fs::create_dir(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/metrics.csv"), "abc,1\n").unwrap();
    std::fs::create_dir(dir.path().join("build")).unwrap();

    repo.clean().await.unwrap();

    assert!(dir.path().join("installs/abc/bin/zeek").exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("data/metrics.csv")).unwrap(),
        "abc,1\n"
    );
    assert!(!dir.path().join("build").exists());
}
