use thiserror::Error;

/// Error surface shared by every repository trait in this crate.
///
/// Kept deliberately coarse (kinds, not exhaustive variants per backend) so
/// that callers in `cadre-tasks` can match on the handful of cases the
/// error-handling design in `SPEC_FULL.md` §7 actually branches on, and let
/// everything else propagate as `Other`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn to_invalid_operation<E: std::fmt::Display>(err: E) -> Self {
        Self::InvalidOperation(err.to_string())
    }
}
