//! Structured error types shared across every stage of the orchestrator.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("{distribution} is not compatible with provider {provider}")]
    IncompatibleCombination {
        distribution: String,
        provider: String,
    },

    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("timed out after {0:?}")]
    TimeoutExceeded(std::time::Duration),

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("cluster '{0}' already exists")]
    ClusterAlreadyExists(String),

    #[error("cluster recreate required for fields: {fields:?}")]
    RecreateRequired { fields: Vec<String> },

    #[error("no persisted state for cluster '{0}'")]
    StateNotFound(String),

    #[error("missing required credential: {0}")]
    MissingPlatformCredential(String),

    #[error("unresolved substitution in '{0}'")]
    UnresolvedSubstitution(String),

    #[error("{0} (kube error: {1})")]
    Kube(String, #[source] kube::Error),

    #[error("{0} (docker error: {1})")]
    Docker(String, #[source] bollard::errors::Error),

    #[error("{0} (io error: {1})")]
    Io(String, #[source] std::io::Error),

    #[error("{0} (process error: {1})")]
    Process(String, #[source] anyhow::Error),

    #[error("{0} (serialization error: {1})")]
    Serialization(String, #[source] serde_json::Error),
}

impl Error {
    pub fn stage(stage: impl Into<String>, source: Error) -> Self {
        Error::StageFailed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// `true` for errors the readiness poller and idempotent create paths may retry locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_, _) | Error::Docker(_, _))
    }
}
