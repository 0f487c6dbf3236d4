//! Compressor capability probe
//!
//! Long-distance matching (`--long`) first shipped in zstd 1.3.2. Older
//! builds reject the flag, so the window is only used when the installed
//! version is known to support it.

use crate::compression::install;
use crate::compression::CompressionWindow;
use crate::error::{StateError, StateResult};
use semver::Version;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// First zstd release with `--long`
pub const MIN_LONG_WINDOW_VERSION: Version = Version::new(1, 3, 2);

/// What the probe learned about the installed compressor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressorInfo {
    /// Detected version, if the probe succeeded
    pub version: Option<Version>,
    /// Window to use for this run
    pub window: Option<CompressionWindow>,
}

/// Probes the compressor binary once per run
#[derive(Debug, Clone)]
pub struct CompressorProbe {
    program: String,
    auto_install: bool,
}

impl CompressorProbe {
    /// Create a probe for `program`
    pub fn new(program: impl Into<String>, auto_install: bool) -> Self {
        Self {
            program: program.into(),
            auto_install,
        }
    }

    /// Determine the window to use, installing the compressor first if needed.
    ///
    /// Probe failures fail open to `None`. Only an installation failure on a
    /// platform without a manual fallback is returned as an error.
    pub async fn detect_window_support(
        &self,
        configured: Option<CompressionWindow>,
    ) -> StateResult<Option<CompressionWindow>> {
        Ok(self.probe(configured).await?.window)
    }

    /// Run the full probe and return version and window
    pub async fn probe(
        &self,
        configured: Option<CompressionWindow>,
    ) -> StateResult<CompressorInfo> {
        let mut version = self.query_version().await;

        if let Err(StateError::CommandFailed { .. }) = &version {
            if self.auto_install && self.program == install::ZSTD_PROGRAM {
                info!("{} not found, installing", self.program);
                install::ensure_installed().await?;
                version = self.query_version().await;
            }
        }

        let version = match version {
            Ok(v) => {
                debug!("Detected {} {}", self.program, v);
                Some(v)
            }
            Err(e) => {
                warn!(
                    "Could not determine {} version, long-distance matching disabled: {}",
                    self.program, e
                );
                None
            }
        };

        let window = window_for_version(version.as_ref(), configured);
        if configured.is_some() && window.is_none() {
            info!(
                "{} does not support --long (requires {} or newer)",
                self.program, MIN_LONG_WINDOW_VERSION
            );
        }

        Ok(CompressorInfo { version, window })
    }

    /// Run `<program> --version` and parse the result
    pub async fn query_version(&self) -> StateResult<Version> {
        debug!("Executing: {} --version", self.program);

        let output = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StateError::command_failed(format!("{} --version", self.program), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StateError::command_exec(
                format!("{} --version", self.program),
                stderr.trim(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_version(&stdout).ok_or_else(|| {
            StateError::command_exec(
                format!("{} --version", self.program),
                format!("unrecognized version output: {}", stdout.trim()),
            )
        })
    }
}

/// Extract the version from `zstd --version` output.
///
/// Recognizes the first whitespace-separated token shaped like `v1.5.5,`.
pub fn parse_version(output: &str) -> Option<Version> {
    output.split_whitespace().find_map(|token| {
        let token = token.strip_prefix('v')?;
        let token = token.trim_end_matches(|c: char| !c.is_ascii_digit());
        Version::parse(token).ok()
    })
}

/// The configured window if `version` supports long-distance matching
pub fn window_for_version(
    version: Option<&Version>,
    configured: Option<CompressionWindow>,
) -> Option<CompressionWindow> {
    match version {
        Some(v) if *v >= MIN_LONG_WINDOW_VERSION => configured,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(log2: u32) -> Option<CompressionWindow> {
        Some(CompressionWindow::new(log2).unwrap())
    }

    #[test]
    fn parse_version_from_banner() {
        let banner = "*** Zstandard CLI (64-bit) v1.5.6, by Yann Collet ***\n";
        assert_eq!(parse_version(banner), Some(Version::new(1, 5, 6)));

        let old = "*** zstd command line interface 64-bits v1.3.1, by Yann Collet ***";
        assert_eq!(parse_version(old), Some(Version::new(1, 3, 1)));
    }

    #[test]
    fn parse_version_bare_token() {
        assert_eq!(parse_version("v1.4.0"), Some(Version::new(1, 4, 0)));
    }

    #[test]
    fn parse_version_garbage() {
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("zstd version unknown"), None);
        assert_eq!(parse_version("very verbose"), None);
    }

    #[test]
    fn window_below_threshold_is_none() {
        let v = Version::new(1, 3, 1);
        assert_eq!(window_for_version(Some(&v), window(27)), None);
    }

    #[test]
    fn window_at_and_above_threshold_is_configured() {
        assert_eq!(
            window_for_version(Some(&MIN_LONG_WINDOW_VERSION), window(27)),
            window(27)
        );
        let v = Version::new(1, 5, 5);
        assert_eq!(window_for_version(Some(&v), window(31)), window(31));
        assert_eq!(window_for_version(Some(&v), None), None);
    }

    #[test]
    fn window_probe_error_is_none() {
        assert_eq!(window_for_version(None, window(27)), None);
    }

    #[tokio::test]
    async fn missing_program_fails_open() {
        let probe = CompressorProbe::new("/nonexistent/zstd-probe-test", true);
        let info = probe.probe(window(27)).await.unwrap();
        assert_eq!(info.version, None);
        assert_eq!(info.window, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_fails_open() {
        let probe = CompressorProbe::new("false", false);
        assert!(probe.query_version().await.is_err());
        assert_eq!(probe.detect_window_support(window(27)).await.unwrap(), None);
    }
}
