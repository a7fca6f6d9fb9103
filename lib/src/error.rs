//! Errors for which the command line contract documents an exit status.

use camino::Utf8PathBuf;

/// A failure the binary reports with a specific process exit status; every
/// other error exits with the generic status `1`.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// The machine ref could not be auto-detected from the repository: after
    /// discarding reserved refs, zero or several candidates remained.
    #[error(
        "could not determine the machine name from repo {repo}; candidate refs: {}",
        format_candidates(.candidates)
    )]
    MachineUndetermined {
        /// Repository whose refs were inspected.
        repo: Utf8PathBuf,
        /// The non-reserved refs that were found.
        candidates: Vec<String>,
    },
    /// A revision expression did not resolve to a commit.
    #[error("rev {rev} not found in {repo}")]
    RevisionNotFound {
        /// The expression that failed to resolve.
        rev: String,
        /// Repository the expression was resolved against.
        repo: Utf8PathBuf,
    },
}

impl DeltaError {
    /// The process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeltaError::MachineUndetermined { .. } => 2,
            DeltaError::RevisionNotFound { .. } => 1,
        }
    }
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "(none)".to_string()
    } else {
        candidates.join(", ")
    }
}
