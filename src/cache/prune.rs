//! Cache category pruning
//!
//! BuildKit tags every cache record with a type. Before the state is saved,
//! every category not explicitly kept is force-removed from the live builder.

use crate::error::StateError;
use crate::orchestration::BuilderControl;
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// A BuildKit cache record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PruneType {
    Regular,
    SourceLocal,
    SourceGitCheckout,
    ExecCachemount,
    Frontend,
    Internal,
}

impl PruneType {
    /// Every category, in canonical order
    pub const ALL: [PruneType; 6] = [
        PruneType::Regular,
        PruneType::SourceLocal,
        PruneType::SourceGitCheckout,
        PruneType::ExecCachemount,
        PruneType::Frontend,
        PruneType::Internal,
    ];

    /// Name used by `buildx prune --filter type=`
    pub fn as_str(self) -> &'static str {
        match self {
            PruneType::Regular => "regular",
            PruneType::SourceLocal => "source.local",
            PruneType::SourceGitCheckout => "source.git.checkout",
            PruneType::ExecCachemount => "exec.cachemount",
            PruneType::Frontend => "frontend",
            PruneType::Internal => "internal",
        }
    }
}

impl fmt::Display for PruneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruneType {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        PruneType::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| StateError::InvalidPruneType(name.to_string()))
    }
}

/// Set of categories retained across a save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneTypeSet(BTreeSet<PruneType>);

impl PruneTypeSet {
    /// Parse category names, rejecting unknown ones. Blank names are ignored.
    pub fn parse<I, S>(names: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|n| !n.as_ref().trim().is_empty())
            .map(|n| n.as_ref().parse::<PruneType>())
            .collect()
    }

    /// Whether `category` is retained
    pub fn contains(&self, category: PruneType) -> bool {
        self.0.contains(&category)
    }

    /// Retained categories, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = PruneType> + '_ {
        self.0.iter().copied()
    }

    /// Categories to remove, in canonical order
    pub fn to_prune(&self) -> Vec<PruneType> {
        PruneType::ALL
            .into_iter()
            .filter(|t| !self.contains(*t))
            .collect()
    }
}

impl FromIterator<PruneType> for PruneTypeSet {
    fn from_iter<I: IntoIterator<Item = PruneType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PruneTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(PruneType::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// A category whose removal failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub category: PruneType,
    pub reason: String,
}

/// Result of one pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Every category a removal was attempted for
    pub pruned: Vec<PruneType>,
    /// Failed removals, in canonical order
    pub failures: Vec<PruneFailure>,
}

impl PruneReport {
    /// True if every removal exited zero
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure in canonical order
    pub fn first_failure(&self) -> Option<&PruneFailure> {
        self.failures.first()
    }
}

/// Remove every category not in `keep`.
///
/// Removals run concurrently and all of them complete even if some fail.
pub async fn prune_all(
    control: &dyn BuilderControl,
    builder: &str,
    keep: &PruneTypeSet,
) -> PruneReport {
    let categories = keep.to_prune();
    debug!("Pruning {:?} from builder {}", categories, builder);

    let results = join_all(
        categories
            .iter()
            .map(|&category| async move { (category, control.prune(builder, category).await) }),
    )
    .await;

    let mut report = PruneReport {
        pruned: categories,
        failures: Vec::new(),
    };
    for (category, result) in results {
        if let Err(e) = result {
            warn!("Failed to prune {}: {}", category, e);
            report.failures.push(PruneFailure {
                category,
                reason: e.to_string(),
            });
        }
    }
    report
}
