use async_trait::async_trait;
use cadre_data_model::{IdentitySyncOperation, IdentitySyncRow};
use cadre_storage::{IdentitySyncCounts, IdentitySyncRepository, RepositoryError};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgIdentitySyncRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgIdentitySyncRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SyncRow {
    id: Uuid,
    user_id: Uuid,
    username: String,
    encrypted_credential: Option<String>,
    operation: String,
    synced: bool,
    synced_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    failed: bool,
    created_at: DateTime<Utc>,
}

impl From<SyncRow> for IdentitySyncRow {
    fn from(r: SyncRow) -> Self {
        Self {
            id: r.id.into(),
            user_id: r.user_id.into(),
            username: r.username,
            encrypted_credential: r.encrypted_credential,
            operation: match r.operation.as_str() {
                "update" => IdentitySyncOperation::Update,
                "delete" => IdentitySyncOperation::Delete,
                _ => IdentitySyncOperation::Create,
            },
            synced: r.synced,
            synced_at: r.synced_at,
            retry_count: r.retry_count,
            last_error: r.last_error,
            failed: r.failed,
            created_at: r.created_at,
        }
    }
}

const MAX_RETRIES: i32 = 5;

#[async_trait]
impl<'c> IdentitySyncRepository for PgIdentitySyncRepository<'c> {
    #[tracing::instrument(name = "db.identity_sync.enqueue", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn enqueue(
        &mut self,
        user_id: Ulid,
        username: &str,
        encrypted_credential: Option<&str>,
        operation: IdentitySyncOperation,
    ) -> Result<IdentitySyncRow, RepositoryError> {
        let id = Ulid::new();
        let row = sqlx::query_as!(
            SyncRow,
            r#"
                INSERT INTO identity_sync_queue
                    (id, user_id, username, encrypted_credential, operation, synced, retry_count, failed, created_at)
                VALUES ($1, $2, $3, $4, $5, false, 0, false, now())
                RETURNING *
            "#,
            Uuid::from(id),
            Uuid::from(user_id),
            username,
            encrypted_credential,
            operation.as_str(),
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.identity_sync.claim_pending", skip_all, fields(db.statement), err)]
    async fn claim_pending(&mut self, limit: i64) -> Result<Vec<IdentitySyncRow>, RepositoryError> {
        let rows = sqlx::query_as!(
            SyncRow,
            r#"
                SELECT * FROM identity_sync_queue
                WHERE NOT synced AND NOT failed
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            "#,
            limit,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "db.identity_sync.mark_synced", skip_all, fields(db.statement, row.id = %id), err)]
    async fn mark_synced(&mut self, id: Ulid, synced_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query!(
            r#"UPDATE identity_sync_queue SET synced = true, synced_at = $2 WHERE id = $1"#,
            Uuid::from(id),
            synced_at,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    #[tracing::instrument(name = "db.identity_sync.mark_failed", skip_all, fields(db.statement, row.id = %id, transient), err)]
    async fn mark_failed(&mut self, id: Ulid, error: &str, transient: bool) -> Result<(), RepositoryError> {
        if transient {
            sqlx::query!(
                r#"
                    UPDATE identity_sync_queue
                    SET retry_count = retry_count + 1,
                        last_error = $2,
                        failed = (retry_count + 1) >= $3
                    WHERE id = $1
                "#,
                Uuid::from(id),
                error,
                MAX_RETRIES,
            )
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;
        } else {
            sqlx::query!(
                r#"
                    UPDATE identity_sync_queue
                    SET retry_count = retry_count + 1,
                        last_error = $2,
                        failed = true
                    WHERE id = $1
                "#,
                Uuid::from(id),
                error,
            )
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;
        }

        Ok(())
    }

    #[tracing::instrument(name = "db.identity_sync.counts", skip_all, fields(db.statement), err)]
    async fn counts(&mut self) -> Result<IdentitySyncCounts, RepositoryError> {
        let row = sqlx::query!(
            r#"
                SELECT
                    count(*) FILTER (WHERE NOT synced AND NOT failed) AS "pending!",
                    count(*) FILTER (WHERE synced) AS "synced!",
                    count(*) FILTER (WHERE failed) AS "failed!"
                FROM identity_sync_queue
            "#
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(IdentitySyncCounts {
            pending: row.pending,
            synced: row.synced,
            failed: row.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(pool: &sqlx::PgPool) -> Ulid {
        let id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country)
                VALUES ($1, $2, $2, 'Test', 'User', 'US')
            "#,
            Uuid::from(id),
            format!("{id}@example.com"),
        )
        .execute(pool)
        .await
        .expect("seed user");
        id
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn a_permanent_failure_fails_the_row_on_the_first_attempt(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;

        let row = PgIdentitySyncRepository::new(&mut conn)
            .enqueue(user_id, "alice", Some("ciphertext"), IdentitySyncOperation::Create)
            .await
            .expect("enqueue");

        PgIdentitySyncRepository::new(&mut conn).mark_failed(row.id, "rejected: bad request", false).await.expect("mark_failed");

        let after: SyncRow = sqlx::query_as!(SyncRow, r#"SELECT * FROM identity_sync_queue WHERE id = $1"#, Uuid::from(row.id))
            .fetch_one(&mut *conn)
            .await
            .expect("fetch row");
        assert!(after.failed);
        assert_eq!(after.retry_count, 1);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn a_transient_failure_retries_until_the_budget_is_exhausted(pool: sqlx::PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = seed_user(&pool).await;

        let row = PgIdentitySyncRepository::new(&mut conn)
            .enqueue(user_id, "bob", Some("ciphertext"), IdentitySyncOperation::Create)
            .await
            .expect("enqueue");

        for attempt in 1..MAX_RETRIES {
            PgIdentitySyncRepository::new(&mut conn).mark_failed(row.id, "timeout", true).await.expect("mark_failed");
            let mid: SyncRow = sqlx::query_as!(SyncRow, r#"SELECT * FROM identity_sync_queue WHERE id = $1"#, Uuid::from(row.id))
                .fetch_one(&mut *conn)
                .await
                .expect("fetch row");
            assert!(!mid.failed, "should still be retrying after attempt {attempt}");
        }

        PgIdentitySyncRepository::new(&mut conn).mark_failed(row.id, "timeout", true).await.expect("mark_failed final");
        let after: SyncRow = sqlx::query_as!(SyncRow, r#"SELECT * FROM identity_sync_queue WHERE id = $1"#, Uuid::from(row.id))
            .fetch_one(&mut *conn)
            .await
            .expect("fetch row");
        assert!(after.failed);
        assert_eq!(after.retry_count, MAX_RETRIES);
    }
}
