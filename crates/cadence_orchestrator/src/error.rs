use cadence_protocol::{BuildId, BuildStatus, TransitionRejection};
use thiserror::Error;

/// Errors surfaced by orchestrator operations.
///
/// Retry policy belongs to the caller; see [`OrchestratorError::is_retryable`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Requested transition refused by policy. Nothing was mutated.
    #[error("Rejected: {0}")]
    Rejected(#[from] TransitionRejection),

    /// External callers may only update builds that are in flight.
    #[error("Build {id} cannot be updated from status {status}")]
    NotUpdatable { id: BuildId, status: BuildStatus },

    /// A referenced row is missing. The chain is aborted rather than guessed.
    #[error("Integrity violation: {kind} {id} not found")]
    Missing { kind: &'static str, id: String },

    /// Store, executor or oracle failure, propagated unchanged.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// One or more downstream builds could not be started. Every sibling was
    /// attempted; `source` is the first failure.
    #[error("Failed to trigger {}: {source}", failed.join(", "))]
    TriggerFailed {
        failed: Vec<String>,
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    pub fn missing(kind: &'static str, id: impl ToString) -> Self {
        OrchestratorError::Missing {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Collaborator(_) => true,
            OrchestratorError::TriggerFailed { source, .. } => source.is_retryable(),
            OrchestratorError::Rejected(_)
            | OrchestratorError::NotUpdatable { .. }
            | OrchestratorError::Missing { .. } => false,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Rejected(_) | OrchestratorError::NotUpdatable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(OrchestratorError::from(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!OrchestratorError::from(TransitionRejection::DuplicateBlocked).is_retryable());
        assert!(!OrchestratorError::missing("job", 4).is_retryable());

        let trigger = OrchestratorError::TriggerFailed {
            failed: vec!["deploy".into()],
            source: Box::new(anyhow::anyhow!("executor down").into()),
        };
        assert!(trigger.is_retryable());
        assert_eq!(
            trigger.to_string(),
            "Failed to trigger deploy: Collaborator error: executor down"
        );
    }
}
