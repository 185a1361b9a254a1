use thiserror::Error;

/// Error surface for every job and service in this crate. Background jobs
/// never let this escape a tick; it exists so each job function has a
/// single `?`-friendly return type across repository, mailer, identity and
/// cloud-provider calls.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Repository(#[from] cadre_storage::RepositoryError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Mailer(#[from] cadre_email::MailerError),

    #[error(transparent)]
    Identity(#[from] cadre_identity::IdentityError),

    #[error(transparent)]
    Cloud(#[from] cadre_cloud::CloudError),

    #[error("entity not found")]
    NotFound,

    #[error("token invalid or expired")]
    TokenInvalid,

    #[error("license product is not active")]
    ProductInactive,

    #[error("invalid job schedule: {0}")]
    InvalidSchedule(String),
}
