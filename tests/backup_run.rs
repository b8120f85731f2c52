//! End-to-end backup runs against shell stand-ins for the export script and rclone.

#![cfg(unix)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use common::config::Configuration;
use lifecycle::run_log::SEPARATOR;
use lifecycle::{LifecycleError, Orchestrator, RunLog, RunStatus};
use ntest::timeout;
use tempfile::TempDir;

const REMOTE_NAME: &str = "testremote";

#[derive(Clone, Copy)]
struct FakeRclone<'a> {
    listed_remote: &'a str,
    lsl_fails: bool,
}

impl Default for FakeRclone<'_> {
    fn default() -> Self {
        Self {
            listed_remote: REMOTE_NAME,
            lsl_fails: false,
        }
    }
}

struct Fixture {
    dir: TempDir,
    config: Configuration,
}

impl Fixture {
    fn new(rclone: FakeRclone<'_>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let creator = root.join("wiki-export-backup.sh");
        std::fs::write(&creator, "printf 'encrypted' > \"$WIKI_BACKUP_ARTIFACT\"\n").unwrap();

        let rclone_script = root.join("rclone.sh");
        std::fs::write(&rclone_script, fake_rclone_script(root, rclone)).unwrap();

        let mut config = Configuration::default();
        config.storage.backup_dir = root.join("backups");
        config.log.file = root.join("logs/wiki-backup.log");
        config.log.echo_stdout = false;
        config.creator.program = PathBuf::from("/bin/sh");
        config.creator.args = vec![creator.display().to_string()];
        config.creator.timeout = Duration::from_secs(10);
        config.remote.rclone_binary = PathBuf::from("/bin/sh");
        config.remote.extra_args = vec![rclone_script.display().to_string()];
        config.remote.remote = REMOTE_NAME.to_string();
        config.remote.path = "wiki".to_string();
        config.remote.timeout = Duration::from_secs(10);

        Self { dir, config }
    }

    fn backup_dir(&self) -> PathBuf {
        self.config.storage.backup_dir.clone()
    }

    fn remote_dir(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    fn rclone_calls(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("rclone.calls")).unwrap_or_default()
    }

    fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.config.log.file)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    async fn run(&self) -> lifecycle::RunReport {
        let mut log = RunLog::from_config(&self.config.log).unwrap();
        match Orchestrator::from_config(&self.config) {
            Ok(orchestrator) => orchestrator.run(&mut log).await,
            Err(e) => Orchestrator::record_startup_failure(&mut log, e),
        }
    }
}

/// rclone stand-in: records its arguments and mirrors copies into `<root>/remote`.
fn fake_rclone_script(root: &Path, rclone: FakeRclone<'_>) -> String {
    let lsl = if rclone.lsl_fails {
        "echo 'directory not found' >&2\n    exit 3".to_string()
    } else {
        [
            "for f in \"$remote_dir\"/*; do",
            "      if [ -f \"$f\" ]; then",
            "        echo \"$(wc -c < \"$f\") 2026-10-16 03:15:02.000000000 $(basename \"$f\")\"",
            "      fi",
            "    done",
        ]
        .join("\n")
    };

    format!(
        r#"calls="{calls}"
remote_dir="{remote_dir}"
echo "$@" >> "$calls"
case "$1" in
  listremotes)
    echo "{listed}:"
    ;;
  copy)
    src="$2"
    include="$5"
    mkdir -p "$remote_dir"
    for f in "$src"/$include; do
      if [ -f "$f" ]; then cp "$f" "$remote_dir/"; fi
    done
    ;;
  lsl)
    {lsl}
    ;;
  *)
    echo "unknown command $1" >&2
    exit 2
    ;;
esac
"#,
        calls = root.join("rclone.calls").display(),
        remote_dir = root.join("remote").display(),
        listed = rclone.listed_remote,
        lsl = lsl,
    )
}

fn write_aged(dir: &Path, name: &str, age: Duration) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, b"old").unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
    path
}

fn assert_run_closed(lines: &[String], status: &str) {
    assert_eq!(lines.last().map(String::as_str), Some(SEPARATOR));
    let summary = &lines[lines.len() - 2];
    assert!(
        summary.ends_with(&format!(": Backup run completed with status: {status}")),
        "unexpected summary line: {summary}"
    );
}

#[tokio::test]
#[timeout(30000)]
async fn test_full_run_uploads_fresh_archive() {
    let fixture = Fixture::new(FakeRclone::default());
    let expired = write_aged(
        &fixture.backup_dir(),
        "wiki-backup-20200101_031500.tar.gz.gpg",
        Duration::from_secs(9 * 24 * 3600),
    );

    let report = fixture.run().await;

    assert_eq!(report.status, RunStatus::Success, "{:?}", report.error);
    assert_eq!(report.exit_code(), 0);
    assert!(!expired.exists());

    let created = report.requested_artifact.clone().unwrap();
    assert!(created.exists());
    let file_name = created.file_name().unwrap();
    assert!(fixture.remote_dir().join(file_name).exists());
    assert!(
        report
            .inventory
            .as_ref()
            .unwrap()
            .contains(&file_name.to_string_lossy())
    );

    let calls = fixture.rclone_calls();
    assert!(calls.lines().any(|l| l == "listremotes"));
    assert!(calls.contains("testremote:wiki --include wiki-backup-*.tar.gz.gpg --max-age 86400s"));
    assert!(calls.contains("lsl testremote:wiki --max-age 86400s"));

    let lines = fixture.log_lines();
    assert!(lines[0].ends_with(": Starting wiki backup run"));
    assert!(lines.iter().any(|l| l.ends_with(": Cleanup: deleted 1 old backup(s)")));
    assert!(lines.iter().any(|l| l.ends_with(": Upload completed successfully")));
    assert_run_closed(&lines, "success");
}

#[tokio::test]
#[timeout(30000)]
async fn test_unconfigured_remote_stops_before_creation() {
    let fixture = Fixture::new(FakeRclone {
        listed_remote: "someother",
        ..Default::default()
    });

    let report = fixture.run().await;

    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.error, Some(LifecycleError::Config(_))));
    assert!(report.requested_artifact.is_none());
    assert!(!fixture.rclone_calls().contains("copy"));

    let lines = fixture.log_lines();
    assert!(lines.iter().any(|l| l.ends_with(
        ": ERROR: Configuration error: rclone remote 'testremote' is not configured"
    )));
    assert_run_closed(&lines, "error");
}

#[tokio::test]
#[timeout(30000)]
async fn test_failed_listing_is_only_a_warning() {
    let fixture = Fixture::new(FakeRclone {
        lsl_fails: true,
        ..Default::default()
    });

    let report = fixture.run().await;

    assert_eq!(report.exit_code(), 0);
    assert!(report.verify_warning.is_some());

    let lines = fixture.log_lines();
    assert!(
        lines
            .iter()
            .any(|l| l.contains("WARNING: Could not verify remote files") && l.contains("directory not found"))
    );
    assert_run_closed(&lines, "success");
}

#[tokio::test]
#[timeout(30000)]
async fn test_dry_run_keeps_expired_archives() {
    let mut fixture = Fixture::new(FakeRclone::default());
    fixture.config.retention.dry_run = true;
    let expired = write_aged(
        &fixture.backup_dir(),
        "wiki-backup-20200101_031500.tar.gz.gpg",
        Duration::from_secs(30 * 24 * 3600),
    );

    let report = fixture.run().await;

    assert!(report.is_success());
    assert!(expired.exists());
    let lines = fixture.log_lines();
    assert!(
        lines
            .iter()
            .any(|l| l.ends_with(": Cleaning up backups older than 7 days (dry run)"))
    );
    assert!(
        lines
            .iter()
            .any(|l| l.ends_with(": Cleanup (dry run): 1 backup(s) would be deleted"))
    );
}

#[tokio::test]
#[timeout(30000)]
async fn test_consecutive_runs_append_to_the_same_log() {
    let fixture = Fixture::new(FakeRclone::default());

    assert!(fixture.run().await.is_success());
    // Archive names have one-second resolution
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(fixture.run().await.is_success());

    let lines = fixture.log_lines();
    let separators = lines.iter().filter(|l| l.as_str() == SEPARATOR).count();
    let starts = lines
        .iter()
        .filter(|l| l.ends_with(": Starting wiki backup run"))
        .count();
    assert_eq!(separators, 2);
    assert_eq!(starts, 2);
    assert!(!lifecycle::RunLock::path_in(&fixture.backup_dir()).exists());
}

#[tokio::test]
#[timeout(30000)]
async fn test_invalid_configuration_is_logged_as_failed_run() {
    let mut fixture = Fixture::new(FakeRclone::default());
    fixture.config.remote.remote = "gdrive:wiki".to_string();

    let report = fixture.run().await;

    assert_eq!(report.exit_code(), 1);
    assert!(fixture.rclone_calls().is_empty());

    let lines = fixture.log_lines();
    assert!(lines.iter().any(|l| l.contains("ERROR: Configuration error: remote name 'gdrive:wiki'")));
    assert_run_closed(&lines, "error");
}
