use async_trait::async_trait;
use cadre_storage::{RepositoryError, SessionRepository};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgSessionRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgSessionRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'c> SessionRepository for PgSessionRepository<'c> {
    #[tracing::instrument(name = "db.session.delete_expired", skip_all, fields(db.statement), err)]
    async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let res = sqlx::query!(r#"DELETE FROM sessions WHERE expires_at <= $1"#, now)
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;
    use ulid::Ulid;

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn deletes_only_expired_sessions(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let user_id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO users (user_id, email, email_normalized, first_name, last_name, country)
                VALUES ($1, 'sessions-test@example.com', 'sessions-test@example.com', 'Test', 'User', 'US')
            "#,
            uuid::Uuid::from(user_id),
        )
        .execute(&mut *conn)
        .await
        .expect("seed user");

        let now = Utc::now();
        let expired_id = Ulid::new();
        let live_id = Ulid::new();
        sqlx::query!(
            r#"INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)"#,
            uuid::Uuid::from(expired_id),
            uuid::Uuid::from(user_id),
            now - chrono::Duration::hours(2),
            now - chrono::Duration::hours(1),
        )
        .execute(&mut *conn)
        .await
        .expect("seed expired session");
        sqlx::query!(
            r#"INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)"#,
            uuid::Uuid::from(live_id),
            uuid::Uuid::from(user_id),
            now,
            now + chrono::Duration::hours(1),
        )
        .execute(&mut *conn)
        .await
        .expect("seed live session");

        let deleted = PgSessionRepository::new(&mut conn).delete_expired(now).await.expect("delete_expired");
        assert_eq!(deleted, 1);

        let remaining: i64 = sqlx::query_scalar!(r#"SELECT COUNT(*) FROM sessions"#)
            .fetch_one(&mut *conn)
            .await
            .expect("count")
            .unwrap_or_default();
        assert_eq!(remaining, 1);
    }
}
