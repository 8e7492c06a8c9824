//! Cluster error taxonomy

/// Errors surfaced by `ClusterApi` implementations.
///
/// `Transient` covers network failures and server-side errors on reads:
/// callers log it and continue with empty results. `QuotaExceeded` aborts
/// the current spawn with partial cleanup. `Config` is the only fatal class,
/// raised at startup when no orchestrator endpoint is usable.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster API error: {0}")]
    Transient(String),

    #[error("resource quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
