//! One-time compressor installation
//!
//! The install source is fixed per platform and architecture. Installation
//! is attempted at most once per process; later callers observe the first
//! attempt's result.

use crate::error::{StateError, StateResult};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Binary name the installers provide
pub const ZSTD_PROGRAM: &str = "zstd";

static INSTALL_RESULT: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Host platform, as far as installation is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> StateResult<Self> {
        Self::from_os(std::env::consts::OS)
    }

    fn from_os(os: &str) -> StateResult<Self> {
        match os {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::MacOS),
            "windows" => Ok(Platform::Windows),
            other => Err(StateError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// How zstd is installed on a given host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSource {
    /// The distribution's package manager
    PackageManager,
    /// `brew install zstd`
    Homebrew,
    /// `choco install zstandard`
    Chocolatey,
}

impl InstallSource {
    /// Look up the install source for an OS and architecture
    pub fn for_host(os: &str, arch: &str) -> StateResult<Self> {
        let platform = Platform::from_os(os)?;
        match (platform, arch) {
            (Platform::Linux, "x86_64" | "aarch64" | "arm" | "x86") => Ok(Self::PackageManager),
            (Platform::MacOS, "x86_64" | "aarch64") => Ok(Self::Homebrew),
            (Platform::Windows, "x86_64" | "aarch64") => Ok(Self::Chocolatey),
            _ => Err(StateError::UnsupportedPlatform(format!("{}/{}", os, arch))),
        }
    }

    /// Whether a failed install can be worked around by the user
    pub fn failure_is_fatal(self) -> bool {
        !matches!(self, Self::PackageManager)
    }
}

/// Linux package managers in preference order, with their install commands
const PACKAGE_MANAGERS: &[(&str, &[&[&str]])] = &[
    ("apt-get", &[&["update", "-qq"], &["install", "-y", "-qq", "zstd"]]),
    ("dnf", &[&["install", "-y", "zstd"]]),
    ("yum", &[&["install", "-y", "zstd"]]),
    ("apk", &[&["add", "--no-cache", "zstd"]]),
    ("pacman", &[&["-S", "--noconfirm", "zstd"]]),
];

/// Install zstd for this host, at most once per process
pub async fn ensure_installed() -> StateResult<()> {
    let source = InstallSource::for_host(std::env::consts::OS, std::env::consts::ARCH)?;

    let result = INSTALL_RESULT
        .get_or_init(|| async move { install(source).await.map_err(|e| e.to_string()) })
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(reason) if source.failure_is_fatal() => Err(StateError::CompressorInstall {
            program: ZSTD_PROGRAM.to_string(),
            reason: reason.clone(),
        }),
        Err(reason) => {
            warn!(
                "Could not install {}: {}. Install it with your package manager",
                ZSTD_PROGRAM, reason
            );
            Ok(())
        }
    }
}

async fn install(source: InstallSource) -> StateResult<()> {
    match source {
        InstallSource::PackageManager => {
            let (manager, steps) = PACKAGE_MANAGERS
                .iter()
                .find(|(name, _)| find_in_path(name).is_some())
                .ok_or_else(|| StateError::CompressorInstall {
                    program: ZSTD_PROGRAM.to_string(),
                    reason: "no supported package manager found".to_string(),
                })?;

            let sudo = needs_sudo() && find_in_path("sudo").is_some();
            for step in steps.iter() {
                let mut argv: Vec<&str> = Vec::new();
                if sudo {
                    argv.push("sudo");
                }
                argv.push(*manager);
                argv.extend_from_slice(step);
                run(&argv).await?;
            }
        }
        InstallSource::Homebrew => run(&["brew", "install", "zstd"]).await?,
        InstallSource::Chocolatey => run(&["choco", "install", "zstandard", "-y"]).await?,
    }

    info!("Installed {}", ZSTD_PROGRAM);
    Ok(())
}

async fn run(argv: &[&str]) -> StateResult<()> {
    let command = argv.join(" ");
    debug!("Executing: {}", command);

    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StateError::command_failed(&command, e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(StateError::command_exec(command, stderr.trim()))
    }
}

#[cfg(unix)]
fn needs_sudo() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() != 0 }
}

#[cfg(not(unix))]
fn needs_sudo() -> bool {
    false
}

/// Locate an executable on PATH
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_source_table() {
        assert_eq!(
            InstallSource::for_host("linux", "x86_64").unwrap(),
            InstallSource::PackageManager
        );
        assert_eq!(
            InstallSource::for_host("macos", "aarch64").unwrap(),
            InstallSource::Homebrew
        );
        assert_eq!(
            InstallSource::for_host("windows", "x86_64").unwrap(),
            InstallSource::Chocolatey
        );
    }

    #[test]
    fn unsupported_hosts() {
        assert!(matches!(
            InstallSource::for_host("freebsd", "x86_64"),
            Err(StateError::UnsupportedPlatform(_))
        ));
        assert!(matches!(
            InstallSource::for_host("windows", "x86"),
            Err(StateError::UnsupportedPlatform(p)) if p == "windows/x86"
        ));
    }

    #[test]
    fn only_linux_failures_are_tolerated() {
        assert!(!InstallSource::PackageManager.failure_is_fatal());
        assert!(InstallSource::Homebrew.failure_is_fatal());
        assert!(InstallSource::Chocolatey.failure_is_fatal());
    }

    #[test]
    fn platform_detect_returns_valid() {
        if cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows")) {
            assert!(Platform::detect().is_ok());
        }
    }

    #[cfg(unix)]
    #[test]
    fn find_in_path_locates_shell() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-installed-program").is_none());
    }
}
