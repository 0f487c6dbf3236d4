//! Docker CLI backed runtime
//!
//! Copies go through `docker cp`, which streams a tar archive on stdout or
//! stdin when given `-`. Builder verbs go through `docker buildx`.

use crate::cache::prune::PruneType;
use crate::error::{StateError, StateResult};
use crate::orchestration::handle::ContainerHandle;
use crate::orchestration::runtime::{BuilderControl, ContainerRuntime};
use crate::pipeline::{ByteSink, ByteSource, PipelineCoordinator, StageCommand};
use async_trait::async_trait;
use std::io::Cursor;
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, info};

/// Label of the stage reading state out of the container
pub const EXTRACT_STAGE: &str = "extract";
/// Label of the stage writing state into the container
pub const INJECT_STAGE: &str = "inject";
/// Label of the stage creating the restore directory
pub const MKDIR_STAGE: &str = "mkdir";

/// Container runtime and builder control using the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    /// Create a runtime invoking `program` (usually `docker`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Execute a command and return the output
    async fn exec(&self, args: &[&str]) -> StateResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.program, args);

        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StateError::command_failed(self.describe(args), e))
    }

    /// Execute a command, failing on non-zero exit, and return stdout
    async fn exec_checked(&self, args: &[&str]) -> StateResult<String> {
        let output = self.exec(args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(StateError::command_exec(self.describe(args), stderr.trim()))
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let verbs: Vec<&str> = args
            .iter()
            .copied()
            .take_while(|a| !a.starts_with('-'))
            .take(2)
            .collect();
        format!("{} {}", self.program, verbs.join(" "))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn resolve(&self, handle: &ContainerHandle) -> StateResult<String> {
        let output = self
            .exec(&["container", "inspect", "--format", "{{.Id}}", handle.name()])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("Container inspect failed: {}", stderr.trim());
            return Err(StateError::ContainerNotFound(handle.name().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ids: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        match ids.as_slice() {
            [id] => {
                debug!("Resolved {} to {}", handle, id);
                Ok((*id).to_string())
            }
            _ => Err(StateError::ContainerNotFound(handle.name().to_string())),
        }
    }

    fn archive_source(&self, container: &str, path: &str) -> ByteSource {
        ByteSource::Command(
            StageCommand::new(EXTRACT_STAGE, &self.program)
                .arg("cp")
                .arg(format!("{}:{}", container, path))
                .arg("-"),
        )
    }

    fn archive_sink(&self, container: &str, path: &str) -> ByteSink {
        ByteSink::Command(
            StageCommand::new(INJECT_STAGE, &self.program)
                .arg("cp")
                .arg("-")
                .arg(format!("{}:{}", container, path)),
        )
    }

    async fn create_directory(&self, container: &str, path: &str) -> StateResult<()> {
        // docker exec needs a running container, so the directories are copied in as a tar
        let archive = directory_archive(path)?;
        debug!("Creating {} in {} via {}", path, container, MKDIR_STAGE);

        PipelineCoordinator::new()
            .run(
                ByteSource::reader(MKDIR_STAGE, Cursor::new(archive)),
                vec![],
                ByteSink::Command(
                    StageCommand::new(MKDIR_STAGE, &self.program)
                        .arg("cp")
                        .arg("-")
                        .arg(format!("{}:/", container)),
                ),
            )
            .await?;
        Ok(())
    }

    fn classify_copy_failure(&self, container: &str, path: &str, error: StateError) -> StateError {
        let StateError::NonZeroExit { stage, stderr, .. } = &error else {
            return error;
        };
        if stage != EXTRACT_STAGE && stage != INJECT_STAGE {
            return error;
        }

        if stderr.contains("No such container:path") || stderr.contains("Could not find the file") {
            StateError::PathNotFound {
                container: container.to_string(),
                path: path.to_string(),
            }
        } else if stderr.contains("No such container") {
            StateError::ContainerNotFound(container.to_string())
        } else {
            error
        }
    }

    fn runtime_name(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl BuilderControl for DockerCli {
    async fn stop(&self, builder: &str) -> StateResult<()> {
        info!("Stopping builder {}", builder);
        self.exec_checked(&["buildx", "stop", builder]).await?;
        Ok(())
    }

    async fn bootstrap(&self, builder: &str) -> StateResult<()> {
        info!("Bootstrapping builder {}", builder);
        self.exec_checked(&["buildx", "inspect", builder, "--bootstrap"])
            .await?;
        Ok(())
    }

    async fn prune(&self, builder: &str, category: PruneType) -> StateResult<()> {
        let filter = format!("type={}", category);
        self.exec_checked(&[
            "buildx", "prune", "--builder", builder, "--force", "--filter", filter.as_str(),
        ])
        .await?;
        Ok(())
    }

    async fn disk_usage(&self, builder: &str) -> StateResult<String> {
        self.exec_checked(&["buildx", "du", "--builder", builder, "--verbose"])
            .await
    }
}

/// Tar archive holding one directory entry per component of `path`, rooted at `/`
fn directory_archive(path: &str) -> StateResult<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut builder = tar::Builder::new(Vec::new());
    let mut prefix = String::new();

    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        prefix.push_str(component);
        prefix.push('/');

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_mtime(mtime);
        builder
            .append_data(&mut header, &prefix, std::io::empty())
            .map_err(|e| StateError::io(format!("archiving directory {}", path), e))?;
    }

    builder
        .into_inner()
        .map_err(|e| StateError::io(format!("archiving directory {}", path), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &StageCommand) -> Vec<String> {
        cmd.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn failure(stage: &str, stderr: &str) -> StateError {
        StateError::NonZeroExit {
            stage: stage.to_string(),
            code: 1,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn copy_commands() {
        let docker = DockerCli::default();

        let ByteSource::Command(source) = docker.archive_source("abc", "/var/lib/buildkit") else {
            panic!("expected command source");
        };
        assert_eq!(source.label, EXTRACT_STAGE);
        assert_eq!(args(&source), ["cp", "abc:/var/lib/buildkit", "-"]);

        let ByteSink::Command(sink) = docker.archive_sink("abc", "/var/lib") else {
            panic!("expected command sink");
        };
        assert_eq!(sink.label, INJECT_STAGE);
        assert_eq!(args(&sink), ["cp", "-", "abc:/var/lib"]);
    }

    #[test]
    fn directory_archive_lists_every_component() {
        let bytes = directory_archive("/opt/buildkit/./state/").unwrap();
        let mut archive = tar::Archive::new(Cursor::new(bytes));

        let entries: Vec<(String, bool)> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                (path.trim_end_matches('/').to_string(), entry.header().entry_type().is_dir())
            })
            .collect();

        assert_eq!(
            entries,
            [
                ("opt".to_string(), true),
                ("opt/buildkit".to_string(), true),
                ("opt/buildkit/state".to_string(), true),
            ]
        );
    }

    #[test]
    fn directory_archive_rejects_parent_components() {
        assert!(directory_archive("/opt/../etc").is_err());
    }

    #[test]
    fn classify_missing_container() {
        let docker = DockerCli::default();
        let err = docker.classify_copy_failure(
            "abc",
            "/var/lib/buildkit",
            failure(EXTRACT_STAGE, "Error response from daemon: No such container: abc"),
        );
        assert!(matches!(err, StateError::ContainerNotFound(c) if c == "abc"));
    }

    #[test]
    fn classify_missing_path() {
        let docker = DockerCli::default();
        let err = docker.classify_copy_failure(
            "abc",
            "/var/lib/buildkit",
            failure(EXTRACT_STAGE, "Error: No such container:path: abc:/var/lib/buildkit"),
        );
        assert!(matches!(err, StateError::PathNotFound { .. }));
        assert!(err.is_resolution_failure());
    }

    #[test]
    fn classify_leaves_other_failures() {
        let docker = DockerCli::default();
        let denied = failure(INJECT_STAGE, "permission denied");
        let err = docker.classify_copy_failure("abc", "/var/lib", denied);
        assert_eq!(err.exit_code(), Some(1));

        let decode = failure("decode", "No such container");
        let err = docker.classify_copy_failure("abc", "/var/lib", decode);
        assert_eq!(err.stage(), Some("decode"));
    }

    #[test]
    fn describe_uses_leading_verbs() {
        let docker = DockerCli::new("podman");
        assert_eq!(
            docker.describe(&["buildx", "prune", "--builder", "b"]),
            "podman buildx prune"
        );
        assert_eq!(docker.runtime_name(), "podman");
    }

    #[tokio::test]
    async fn missing_program_is_command_failure() {
        let docker = DockerCli::new("/nonexistent/docker");
        let err = docker.stop("b").await.unwrap_err();
        assert!(matches!(err, StateError::CommandFailed { .. }));
    }
}
