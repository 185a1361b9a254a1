//! PostgreSQL implementations of the `cadre-storage` repository traits.

mod audit;
mod batch_log;
mod email_queue;
mod event;
mod identity_sync;
mod instance;
mod license;
mod scheduler_status;
mod session;
mod tracing_ext;
mod user;
mod workflow;

pub use audit::PgAuditLogRepository;
pub use batch_log::PgBatchLogRepository;
pub use email_queue::PgEmailQueueRepository;
pub use event::{PgEventParticipationRepository, PgEventRepository};
pub use identity_sync::PgIdentitySyncRepository;
pub use instance::{PgInstanceRepository, PgVpnCredentialRepository};
pub use license::{PgLicenseProductRepository, PgLicenseSlotRepository, PgLicenseTokenRepository};
pub use scheduler_status::PgSchedulerStatusRepository;
pub use session::PgSessionRepository;
pub use user::PgUserRepository;
pub use workflow::PgEmailWorkflowRepository;

pub(crate) use tracing_ext::ExecuteExt;

use cadre_storage::RepositoryError;

/// Embedded schema migrations, applied with `cadre-cli database migrate`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Maps a raw `sqlx::Error` onto [`RepositoryError`]. Unique-violations
/// become `Conflict`, everything else is passed through as `Other`.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict(db_err.message().to_owned());
        }
    }
    RepositoryError::Other(err.into())
}

/// After an `UPDATE`/`INSERT ... ON CONFLICT DO NOTHING`, checks that the
/// expected number of rows were touched, so the caller can surface a
/// clean `Conflict`/`NotFound` instead of poisoning the transaction on a
/// constraint race.
pub(crate) fn ensure_affected_rows(
    res: &sqlx::postgres::PgQueryResult,
    expected: u64,
) -> Result<(), RepositoryError> {
    if res.rows_affected() == expected {
        Ok(())
    } else if res.rows_affected() == 0 {
        Err(RepositoryError::NotFound)
    } else {
        Err(RepositoryError::Conflict(format!(
            "expected {expected} row(s) affected, got {}",
            res.rows_affected()
        )))
    }
}

/// A single Postgres connection pool that repository constructors borrow
/// from.
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: sqlx::PgPool,
}

impl PgRepositoryFactory {
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub async fn connection(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, sqlx::Error> {
        self.pool.acquire().await
    }
}
