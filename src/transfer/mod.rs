//! State transfer between a builder container and the remote store
//!
//! A transfer walks an explicit phase machine:
//!
//! ```text
//! Idle -> Quiescing -> Restoring | Saving -> Resuming -> Done
//! ```
//!
//! `Failed` replaces `Done` when any earlier phase failed. `Resuming` runs on
//! every path so the builder is never left stopped.

pub mod orchestrator;
pub mod settings;

pub use orchestrator::{PhaseObserver, StateTransfer};
pub use settings::TransferSettings;

use crate::cache::PruneReport;
use crate::error::{StateError, StateResult};
use std::fmt;

/// Phase of a transfer run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Quiescing,
    Restoring,
    Saving,
    Resuming,
    Done,
    Failed,
}

impl TransferPhase {
    /// Lowercase phase name
    pub fn as_str(self) -> &'static str {
        match self {
            TransferPhase::Idle => "idle",
            TransferPhase::Quiescing => "quiescing",
            TransferPhase::Restoring => "restoring",
            TransferPhase::Saving => "saving",
            TransferPhase::Resuming => "resuming",
            TransferPhase::Done => "done",
            TransferPhase::Failed => "failed",
        }
    }

    /// Whether the run has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferPhase::Done | TransferPhase::Failed)
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single outcome of a transfer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// State moved, or the save was not needed
    Success,
    /// No store entry matched the key or any fallback
    CacheMiss,
    /// A stage or command failed
    ProcessFailure { stage: String, code: Option<i32> },
    /// The container or a path inside it could not be resolved
    ResolutionFailure { reason: String },
}

impl TransferOutcome {
    /// Classify a fatal error
    pub fn from_error(err: &StateError) -> Self {
        if err.is_resolution_failure() {
            TransferOutcome::ResolutionFailure {
                reason: err.to_string(),
            }
        } else {
            TransferOutcome::ProcessFailure {
                stage: err.stage().unwrap_or("transfer").to_string(),
                code: err.exit_code(),
            }
        }
    }

    /// Success or cache miss
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success | TransferOutcome::CacheMiss)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Success => f.write_str("success"),
            TransferOutcome::CacheMiss => f.write_str("cache miss"),
            TransferOutcome::ProcessFailure { stage, code: Some(code) } => {
                write!(f, "stage '{}' failed with exit code {}", stage, code)
            }
            TransferOutcome::ProcessFailure { stage, code: None } => {
                write!(f, "stage '{}' failed", stage)
            }
            TransferOutcome::ResolutionFailure { reason } => {
                write!(f, "resolution failure: {}", reason)
            }
        }
    }
}

/// Everything a transfer run observed
#[derive(Debug)]
pub struct TransferReport {
    /// Single outcome of the run
    pub outcome: TransferOutcome,
    /// Fatal error behind a failed outcome
    pub failure: Option<StateError>,
    /// Error raised while resuming the builder
    pub resume_failure: Option<StateError>,
    /// Key restored from or saved under
    pub key: Option<String>,
    /// Phases visited, in order
    pub phases: Vec<TransferPhase>,
    /// Save skipped because the key was unchanged
    pub skipped: bool,
    /// Pruning result of a save
    pub prune: Option<PruneReport>,
    /// Compressed archive size moved through the store
    pub archive_bytes: Option<u64>,
}

impl TransferReport {
    pub(crate) fn new() -> Self {
        Self {
            outcome: TransferOutcome::Success,
            failure: None,
            resume_failure: None,
            key: None,
            phases: vec![TransferPhase::Idle],
            skipped: false,
            prune: None,
            archive_bytes: None,
        }
    }

    /// Last phase reached
    pub fn final_phase(&self) -> TransferPhase {
        self.phases.last().copied().unwrap_or(TransferPhase::Idle)
    }

    /// Whether the run succeeded, including resuming the builder
    pub fn is_success(&self) -> bool {
        self.outcome.is_success() && self.resume_failure.is_none()
    }

    /// Turn the report into an error if the run failed.
    ///
    /// The transfer failure takes precedence over a resume failure.
    pub fn into_result(mut self) -> StateResult<Self> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if let Some(err) = self.resume_failure.take() {
            return Err(err);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_errors() {
        let err = StateError::NonZeroExit {
            stage: "decode".to_string(),
            code: 3,
            stderr: String::new(),
        };
        assert_eq!(
            TransferOutcome::from_error(&err),
            TransferOutcome::ProcessFailure {
                stage: "decode".to_string(),
                code: Some(3)
            }
        );

        let err = StateError::ContainerNotFound("buildx_buildkit_b0".to_string());
        assert!(matches!(
            TransferOutcome::from_error(&err),
            TransferOutcome::ResolutionFailure { reason } if reason.contains("buildx_buildkit_b0")
        ));

        let err = StateError::io("reading archive", std::io::Error::other("boom"));
        assert_eq!(
            TransferOutcome::from_error(&err),
            TransferOutcome::ProcessFailure {
                stage: "transfer".to_string(),
                code: None
            }
        );
    }

    #[test]
    fn outcome_display() {
        let outcome = TransferOutcome::ProcessFailure {
            stage: "encode".to_string(),
            code: Some(1),
        };
        assert_eq!(outcome.to_string(), "stage 'encode' failed with exit code 1");
        assert_eq!(TransferOutcome::CacheMiss.to_string(), "cache miss");
    }

    #[test]
    fn into_result_prefers_transfer_failure() {
        let mut report = TransferReport::new();
        report.failure = Some(StateError::MissingCacheKey);
        report.resume_failure = Some(StateError::command_exec("docker buildx inspect", "x"));

        assert!(matches!(report.into_result(), Err(StateError::MissingCacheKey)));
    }

    #[test]
    fn into_result_surfaces_resume_failure() {
        let mut report = TransferReport::new();
        report.resume_failure = Some(StateError::command_exec("docker buildx inspect", "x"));
        assert!(!report.is_success());
        assert!(report.into_result().is_err());

        let report = TransferReport::new();
        assert_eq!(report.final_phase(), TransferPhase::Idle);
        assert!(report.into_result().is_ok());
    }
}
