//! Session cleanup: the hourly sweep that deletes expired `sessions` rows
//! (`SPEC_FULL.md` §4.4). Session issuance itself is an HTTP-surface
//! concern; this is the only piece the core owns.

use cadre_clock::Clock;
use cadre_storage::SessionRepository;
use cadre_storage_pg::PgSessionRepository;
use sqlx::PgPool;

use crate::error::TaskError;

#[tracing::instrument(name = "tasks.session_cleanup.run", skip(pool, clock), err)]
pub async fn run_session_cleanup(pool: &PgPool, clock: &dyn Clock) -> Result<u64, TaskError> {
    let mut conn = pool.acquire().await?;
    let deleted = PgSessionRepository::new(&mut conn).delete_expired(clock.now()).await?;
    if deleted > 0 {
        tracing::info!(deleted, "swept expired sessions");
    }
    Ok(deleted)
}
