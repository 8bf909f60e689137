//! Error taxonomy for signature resolution and model evaluation.

use crate::deploy::DeploymentBuildError;

/// Errors produced by the resolution and evaluation engine.
///
/// Every variant is `Clone` so a failure can be cached for the rest of an
/// evaluation pass and handed to every waiter of a shared resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SorcerError {
    /// Malformed binding: no matching initializer, unknown operation,
    /// unloadable codebase, missing collaborator.
    #[error("signature error for {signature}: {reason}")]
    Signature { signature: String, reason: String },

    /// Discovery returned nothing (or timed out). Transient.
    #[error("no provider found for {service_type} named '{provider_name}'")]
    ProviderNotFound {
        service_type: String,
        provider_name: String,
    },

    #[error("deployment descriptor rejected: {0}")]
    DeploymentBuild(#[from] DeploymentBuildError),

    /// Provisioning was attempted and failed, or did not yield a provider.
    #[error("deployment {deployment_id} failed: {reason}")]
    Deployment {
        deployment_id: String,
        reason: String,
    },

    /// Invalid fidelity selection or session setting. Rejected without side effects.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Failure raised by a bound executable or a morpher.
    #[error("evaluation of '{path}' failed: {reason}")]
    Evaluation { path: String, reason: String },

    #[error("unknown path: {0}")]
    UnknownPath(String),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("resolution worker is no longer running")]
    ResolverUnavailable,
}

impl SorcerError {
    pub fn signature(signature: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        SorcerError::Signature {
            signature: signature.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        SorcerError::Config(reason.into())
    }

    /// Wrap a callback failure (executable, evaluator, morpher).
    pub fn evaluation(path: impl Into<String>, error: &anyhow::Error) -> Self {
        SorcerError::Evaluation {
            path: path.into(),
            reason: format!("{error:#}"),
        }
    }

    /// Re-label an evaluation failure with the model path it surfaced on.
    pub(crate) fn at_path(self, path: &str) -> Self {
        match self {
            SorcerError::Evaluation { reason, .. } => SorcerError::Evaluation {
                path: path.to_string(),
                reason,
            },
            other => other,
        }
    }

    /// `true` when retrying the whole evaluation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SorcerError::ProviderNotFound { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SorcerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_paths_in_order() {
        let err = SorcerError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_at_path_relabels_evaluation_only() {
        let err = SorcerError::Evaluation {
            path: "add".into(),
            reason: "boom".into(),
        }
        .at_path("mFi1");
        assert_eq!(
            err,
            SorcerError::Evaluation {
                path: "mFi1".into(),
                reason: "boom".into()
            }
        );

        let untouched = SorcerError::Cancelled.at_path("mFi1");
        assert_eq!(untouched, SorcerError::Cancelled);
    }

    #[test]
    fn test_provider_not_found_is_transient() {
        let err = SorcerError::ProviderNotFound {
            service_type: "Adder".into(),
            provider_name: "*".into(),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("Adder"));
        assert!(!SorcerError::config("bad").is_transient());
    }

    #[test]
    fn test_deployment_build_error_converts() {
        let err: SorcerError = DeploymentBuildError::Empty.into();
        assert!(matches!(err, SorcerError::DeploymentBuild(_)));
    }
}
