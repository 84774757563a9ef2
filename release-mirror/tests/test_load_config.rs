use release_mirror::load_config::{load_config, load_config_with_env};
use release_mirror_core::config::{RepoConfig, DEFAULT_API_BASE, DEFAULT_SYNC_TIMEOUT};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

fn no_env() -> Vec<(String, String)> {
    Vec::new()
}

#[test]
fn test_load_config_full_schema() {
    let file = config_file(
        r#"
storage:
  bucket_dir: ./mirror/bucket
  state_dir: ./mirror/state
github:
  api_base: https://github.example.test/api/v3
check_interval: 3600
sync_timeout: 120
history_limit: 5
repos:
  REPO_2: "acme/app-pro:shared"
  REPO_1: "acme/app:shared"
"#,
    );

    let config = load_config_with_env(file.path(), no_env()).expect("Config should load");

    assert_eq!(config.storage.bucket_dir, Some(PathBuf::from("./mirror/bucket")));
    assert_eq!(config.storage.state_dir, Some(PathBuf::from("./mirror/state")));
    assert_eq!(config.mirror.api_base, "https://github.example.test/api/v3");
    assert_eq!(config.mirror.check_interval, Duration::from_secs(3600));
    assert_eq!(config.mirror.sync_timeout, Duration::from_secs(120));
    assert_eq!(config.mirror.history_limit, 5);
    assert_eq!(
        config.mirror.repos,
        vec![
            RepoConfig::new("acme/app", "shared"),
            RepoConfig::new("acme/app-pro", "shared"),
        ]
    );
    assert!(config.mirror.github_token.is_none());
}

#[test]
fn test_load_config_defaults_for_minimal_file() {
    let file = config_file("repos:\n  REPO_1: \"octo/cli\"\n");

    let config = load_config_with_env(file.path(), no_env()).unwrap();

    assert!(config.storage.bucket_dir.is_none());
    assert!(config.storage.state_dir.is_none());
    assert_eq!(config.mirror.api_base, DEFAULT_API_BASE);
    assert_eq!(config.mirror.check_interval, Duration::from_secs(604_800));
    assert_eq!(config.mirror.sync_timeout, DEFAULT_SYNC_TIMEOUT);
    assert_eq!(config.mirror.repos, vec![RepoConfig::new("octo/cli", "")]);
}

#[test]
fn test_environment_overrides_and_extends_file() {
    let file = config_file(
        "check_interval: 3600\nrepos:\n  REPO_1: \"octo/cli:tools\"\n  REPO_2: \"octo/old:old\"\n",
    );
    let env_vars = vec![
        ("REPO_2".to_string(), "octo/new:new".to_string()),
        ("REPO_3".to_string(), "octo/extra:extra".to_string()),
        ("GITHUB_TOKEN".to_string(), "ghp_test".to_string()),
        ("CHECK_INTERVAL".to_string(), "60".to_string()),
        ("PATH".to_string(), "/usr/bin".to_string()),
    ];

    let config = load_config_with_env(file.path(), env_vars).unwrap();

    let repos: Vec<&str> = config.mirror.repos.iter().map(|r| r.repo.as_str()).collect();
    assert_eq!(repos, vec!["octo/cli", "octo/new", "octo/extra"]);
    assert_eq!(config.mirror.github_token.as_deref(), Some("ghp_test"));
    assert_eq!(config.mirror.check_interval, Duration::from_secs(60));
}

#[test]
fn test_invalid_check_interval_falls_back_to_file_value() {
    let file = config_file("check_interval: 3600\n");
    let env_vars = vec![("CHECK_INTERVAL".to_string(), "weekly".to_string())];

    let config = load_config_with_env(file.path(), env_vars).unwrap();
    assert_eq!(config.mirror.check_interval, Duration::from_secs(3600));
}

#[test]
fn test_load_config_missing_file_fails() {
    let err = load_config_with_env("/nonexistent/release-mirror.yaml", no_env()).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_load_config_invalid_yaml_fails() {
    let file = config_file("repos: [not, a, map\n");
    let err = load_config_with_env(file.path(), no_env()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
#[serial]
fn test_load_config_reads_process_environment() {
    let file = config_file("repos: {}\n");
    env::set_var("REPO_ZZ_TEST", "octo/from-env:env");
    env::set_var("GITHUB_TOKEN", "env-token");

    let config = load_config(file.path()).expect("Config should load");

    env::remove_var("REPO_ZZ_TEST");
    env::remove_var("GITHUB_TOKEN");

    assert!(config
        .mirror
        .repos
        .contains(&RepoConfig::new("octo/from-env", "env")));
    assert_eq!(config.mirror.github_token.as_deref(), Some("env-token"));
}
