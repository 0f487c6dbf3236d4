//! Integration tests for buildkit-state

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "BUILDKIT_STATE_CONFIG",
        "BUILDKIT_STATE_CACHE_KEY",
        "BUILDKIT_STATE_BUILDER",
        "BUILDKIT_STATE_CONTAINER",
        "BUILDKIT_STATE_STORE_DIR",
        "BUILDKIT_STATE_ARCHIVE",
        "BUILDKIT_STATE_RESTORE_KEYS",
        "BUILDKIT_STATE_KEEP",
        "BUILDKIT_STATE_REWRITE",
        "BUILDKIT_STATE_RESTORED_KEY",
        "GITHUB_ACTIONS",
        "GITHUB_OUTPUT",
    ];

    /// Command isolated from the caller's environment and config file
    fn buildkit_state(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("buildkit-state");
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.arg("--config").arg(temp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("restore").and(predicate::str::contains("save")));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildkit-state"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[compression]"))
            .stdout(predicate::str::contains("exec.cachemount"));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["config", "set", "builder.name", "ci-builder"])
            .assert()
            .success();

        buildkit_state(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ci-builder"));
    }

    #[test]
    fn config_set_unknown_key() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn save_requires_key() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .arg("save")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache key is required"));
    }

    #[test]
    fn restore_requires_key() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .arg("restore")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache key is required"));
    }

    #[test]
    fn save_rejects_unknown_keep_category() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["save", "--key", "build-1", "--keep", "frontend,everything"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown prune category 'everything'"));
    }

    #[test]
    fn save_rejects_bad_compression_level() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["save", "--key", "build-1", "--compression-level", "30"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid compression level 30"));
    }

    #[test]
    fn probe_missing_compressor_fails_open() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["probe", "--program", "buildkit-state-no-such-zstd", "--no-install"])
            .assert()
            .success()
            .stdout(predicate::str::contains("unknown"));
    }

    #[test]
    fn probe_rejects_bad_window() {
        let temp = TempDir::new().unwrap();
        buildkit_state(&temp)
            .args(["probe", "--long-window", "40", "--no-install"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid long-distance window 40"));
    }
}
