use assert_cmd::Command;
use filetime::FileTime;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Host {
    temp: TempDir,
}

impl Host {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src/etc")).unwrap();
        std::fs::write(temp.path().join("src/etc/hosts"), "127.0.0.1 localhost\n").unwrap();
        std::fs::create_dir_all(temp.path().join("scratch")).unwrap();
        std::fs::create_dir_all(temp.path().join("keys")).unwrap();
        Self { temp }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    /// Writes a configuration with remote and post-backup stages off, plus `extra` lines.
    fn write_config(&self, application: bool, extra: &str) -> PathBuf {
        let config = format!(
            "source_paths: [{src:?}]
output_root: {out:?}
hostname: web1
log_file: {log:?}
scratch_dir: {scratch:?}
application_plugins: {application}
remote_backup: false
post_backup: false
plugins:
  application_dir: {plugins:?}
{extra}",
            src = self.path("src/etc"),
            out = self.path("out"),
            log = self.path("run.log"),
            scratch = self.path("scratch"),
            plugins = self.path("plugins/application"),
        );
        let path = self.path("config.yml");
        std::fs::write(&path, config).unwrap();
        path
    }

    fn command(&self, config: &Path) -> Command {
        let mut cmd = Command::cargo_bin("host_backup").unwrap();
        cmd.env("HOST_BACKUP_CONFIG", config).arg("--no-color");
        cmd
    }

    fn host_root(&self) -> PathBuf {
        self.path("out/web1")
    }

    fn generations(&self) -> Vec<PathBuf> {
        let mut dirs = std::fs::read_dir(self.host_root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect::<Vec<_>>();
        dirs.sort();
        dirs
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.path("scratch")).unwrap().next().is_none()
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn test_help() {
    Command::cargo_bin("host_backup")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-compression"))
        .stdout(predicate::str::contains("--local-only"));
}

#[test]
fn test_flags_take_no_value() {
    Command::cargo_bin("host_backup")
        .unwrap()
        .arg("--gzip=yes")
        .assert()
        .failure();
}

#[test]
fn test_gzip_without_encryption() {
    let host = Host::new();
    let config = host.write_config(false, "encryption:\n  enabled: false\nretention: 7\n");

    host.command(&config).arg("--gzip").assert().success();

    let generations = host.generations();
    assert_eq!(generations.len(), 1);
    let names = file_names(&generations[0]);
    assert_eq!(names.len(), 2);
    assert_eq!(
        names.iter().filter(|n| n.ends_with(".tar.gz")).count(),
        1
    );
    assert!(names.contains(&"run.log".to_string()));
    assert!(host.scratch_is_empty());
}

#[test]
fn test_no_keys_runs_unencrypted() {
    let host = Host::new();
    let config = host.write_config(false, &format!(
        "encryption:\n  enabled: true\n  key_dir: {:?}\n",
        host.path("keys")
    ));

    host.command(&config)
        .assert()
        .success()
        .stderr(predicate::str::contains("WARN"))
        .stderr(predicate::str::contains("will not be encrypted"));

    let names = file_names(&host.generations()[0]);
    assert!(names.iter().any(|n| n.ends_with(".tar.gz")));
    assert!(names.iter().all(|n| !n.ends_with(".age")));
}

#[test]
fn test_retention_keeps_newest_generations() {
    let host = Host::new();
    for i in 0..10 {
        let dir = host.host_root().join(format!("gen-{i:02}"));
        std::fs::create_dir_all(&dir).unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000 - i * 86_400, 0);
        filetime::set_file_mtime(&dir, mtime).unwrap();
    }
    let config = host.write_config(false, "encryption:\n  enabled: false\nretention: 3\n");

    host.command(&config).assert().success();

    let remaining = host
        .generations()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(remaining.len(), 4);
    for kept in ["gen-00", "gen-01", "gen-02"] {
        assert!(remaining.contains(&kept.to_string()));
    }
}

#[test]
fn test_missing_plugin_dir_exits_before_archiving() {
    let host = Host::new();
    let config = host.write_config(true, "encryption:\n  enabled: false\n");

    host.command(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("fatal"));

    assert!(!host.host_root().exists());
    assert!(host.scratch_is_empty());
}

#[test]
fn test_unknown_config_key_is_fatal() {
    let host = Host::new();
    let config = host.write_config(false, "retention_days: 3\n");

    host.command(&config).assert().code(1);
    assert!(!host.host_root().exists());
}
