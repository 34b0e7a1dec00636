use std::process::Command;

fn prwarden(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_prwarden"));
    cmd.current_dir(dir)
        .env_remove("GITHUB_TOKEN")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn missing_credentials_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--repo", "org/repo", "--pr", "1"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GITHUB_TOKEN"), "stderr: {stderr}");
}

#[test]
fn blank_completion_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--repo", "org/repo", "--pr", "1"])
        .env("GITHUB_TOKEN", "ghp_test")
        .env("OPENAI_API_KEY", "  ")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {stderr}");
}

#[test]
fn malformed_repository_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--repo", "not-a-repo", "--pr", "1"])
        .args(["--github-token", "ghp_test", "--openai-api-key", "sk-test"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("owner/name"), "stderr: {stderr}");
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".prwarden.toml"), "[review]\nbatch_size = 0\n").unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--repo", "org/repo", "--pr", "1"])
        .args(["--github-token", "ghp_test", "--openai-api-key", "sk-test"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(".prwarden.toml"), "stderr: {stderr}");
}
