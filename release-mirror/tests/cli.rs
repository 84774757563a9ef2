use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use tempfile::{tempdir, TempDir};

/// Writes a config file with local bucket and state directories inside
/// `dir`, declaring the given `REPO_*` entries.
fn create_config(dir: &TempDir, repos: &[(&str, &str)]) -> std::path::PathBuf {
    let mut yaml = format!(
        "storage:\n  bucket_dir: {}\n  state_dir: {}\ngithub:\n  api_base: http://127.0.0.1:9\ncheck_interval: 3600\nrepos:\n",
        dir.path().join("bucket").display(),
        dir.path().join("state").display(),
    );
    if repos.is_empty() {
        yaml.push_str("  {}\n");
    }
    for (key, value) in repos {
        yaml.push_str(&format!("  {key}: \"{value}\"\n"));
    }
    let path = dir.path().join("config.yaml");
    write(&path, yaml).expect("Writing temp config failed");
    path
}

fn bare_command(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("release-mirror").expect("Binary exists");
    cmd.env_clear().arg("--config").arg(config);
    cmd
}

fn command(subcommand: &str, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("release-mirror").expect("Binary exists");
    cmd.env_clear().arg(subcommand).arg("--config").arg(config);
    cmd
}

#[test]
fn status_lists_never_synced_repositories_as_pending() {
    let dir = tempdir().unwrap();
    let config = create_config(&dir, &[("REPO_1", "octo/cli:tools/")]);

    command("status", &config)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"repo\": \"octo/cli\"")
                .and(predicate::str::contains("\"status\": \"pending\""))
                .and(predicate::str::contains("\"syncInProgress\": false")),
        );
}

#[test]
fn sync_of_unknown_repository_fails() {
    let dir = tempdir().unwrap();
    let config = create_config(&dir, &[("REPO_1", "octo/cli:tools/")]);

    command("sync", &config)
        .arg("--repo")
        .arg("octo/missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("repository not configured: octo/missing"));
}

#[test]
fn tick_runs_once_then_skips_until_the_interval_elapses() {
    let dir = tempdir().unwrap();
    let config = create_config(&dir, &[]);

    command("tick", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("All sync tasks complete"));

    command("tick", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped: next check due at"));
}

#[test]
fn subcommand_is_required() {
    let dir = tempdir().unwrap();
    let config = create_config(&dir, &[]);
    bare_command(&config).assert().failure();
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use release_mirror::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Status {
            config: std::path::PathBuf::from("dummy.yaml"),
        },
    };

    let result = run(cli).await;
    assert!(result.is_err(), "a missing config file must fail");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
