use async_trait::async_trait;
use cadre_data_model::{EmailStatus, User, UserRole};
use cadre_storage::{RepositoryError, UserRepository};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{ensure_affected_rows, map_sqlx_err, ExecuteExt};

/// An implementation of [`UserRepository`] for a PostgreSQL connection.
pub struct PgUserRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgUserRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    email: String,
    email_normalized: String,
    first_name: String,
    last_name: String,
    country: String,
    role: String,
    sponsor_id: Option<Uuid>,
    pandas_username: Option<String>,
    pandas_password_encrypted: Option<String>,
    password_hash: Option<String>,
    email_status: String,
    confirmation_sent_at: Option<DateTime<Utc>>,
    is_active: bool,
    invite_sent_at: Option<DateTime<Utc>>,
    reminder_1_sent_at: Option<DateTime<Utc>>,
    reminder_2_sent_at: Option<DateTime<Utc>>,
    reminder_3_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.user_id.into(),
            email: r.email,
            email_normalized: r.email_normalized,
            first_name: r.first_name,
            last_name: r.last_name,
            country: r.country,
            role: match r.role.as_str() {
                "admin" => UserRole::Admin,
                "sponsor" => UserRole::Sponsor,
                _ => UserRole::Invitee,
            },
            sponsor_id: r.sponsor_id.map(Into::into),
            pandas_username: r.pandas_username,
            pandas_password_encrypted: r.pandas_password_encrypted,
            password_hash: r.password_hash,
            email_status: match r.email_status.as_str() {
                "bounced" => EmailStatus::Bounced,
                "spam_reported" => EmailStatus::SpamReported,
                "unsubscribed" => EmailStatus::Unsubscribed,
                _ => EmailStatus::Good,
            },
            confirmation_sent_at: r.confirmation_sent_at,
            is_active: r.is_active,
            invite_sent_at: r.invite_sent_at,
            reminder_1_sent_at: r.reminder_1_sent_at,
            reminder_2_sent_at: r.reminder_2_sent_at,
            reminder_3_sent_at: r.reminder_3_sent_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl<'c> UserRepository for PgUserRepository<'c> {
    #[tracing::instrument(name = "db.user.lookup", skip_all, fields(db.statement, user.id = %id), err)]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, RepositoryError> {
        let res = sqlx::query_as!(
            UserRow,
            r#"SELECT * FROM users WHERE user_id = $1"#,
            Uuid::from(id),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(name = "db.user.find_by_normalized_email", skip_all, fields(db.statement), err)]
    async fn find_by_normalized_email(
        &mut self,
        normalized_email: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let res = sqlx::query_as!(
            UserRow,
            r#"SELECT * FROM users WHERE email_normalized = $1"#,
            normalized_email,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(name = "db.user.exists_by_normalized_email", skip_all, fields(db.statement), err)]
    async fn exists_by_normalized_email(
        &mut self,
        normalized_email: &str,
    ) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar!(
            r#"SELECT EXISTS(SELECT 1 FROM users WHERE email_normalized = $1) AS "exists!""#,
            normalized_email,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(exists)
    }

    #[tracing::instrument(name = "db.user.find_invitation_candidates", skip_all, fields(db.statement, event.id = %event_id), err)]
    async fn find_invitation_candidates(
        &mut self,
        event_id: Ulid,
        roles: &[UserRole],
    ) -> Result<Vec<User>, RepositoryError> {
        let roles: Vec<&str> = roles.iter().map(UserRole::as_str).collect();

        let rows = sqlx::query_as!(
            UserRow,
            r#"
                SELECT u.*
                FROM users u
                LEFT JOIN event_participations ep
                       ON ep.user_id = u.user_id AND ep.event_id = $1
                WHERE u.is_active
                  AND u.role = ANY($2)
                  AND u.confirmation_sent_at IS NULL
                  AND (ep.user_id IS NULL OR ep.status IN ('invited', 'no_response'))
                ORDER BY u.created_at ASC
            "#,
            Uuid::from(event_id),
            &roles as &[&str],
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "db.user.find_reminder_candidates", skip_all, fields(db.statement, event.id = %event_id, reminder.stage = stage), err)]
    async fn find_reminder_candidates(
        &mut self,
        event_id: Ulid,
        stage: u8,
    ) -> Result<Vec<User>, RepositoryError> {
        let column = match stage {
            1 => "reminder_1_sent_at",
            2 => "reminder_2_sent_at",
            _ => "reminder_3_sent_at",
        };

        let sql = format!(
            r#"
                SELECT u.*
                FROM users u
                JOIN event_participations ep
                  ON ep.user_id = u.user_id AND ep.event_id = $1
                WHERE u.is_active
                  AND ep.status IN ('invited', 'confirmed')
                  AND u.{column} IS NULL
                ORDER BY u.created_at ASC
            "#
        );

        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::from(event_id))
            .traced()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "db.user.set_pandas_credentials", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn set_pandas_credentials(
        &mut self,
        user_id: Ulid,
        pandas_username: &str,
        pandas_password_encrypted: &str,
    ) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"
                UPDATE users
                SET pandas_username = $2, pandas_password_encrypted = $3
                WHERE user_id = $1
            "#,
            Uuid::from(user_id),
            pandas_username,
            pandas_password_encrypted,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.user.mark_confirmation_sent", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn mark_confirmation_sent(&mut self, user_id: Ulid) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE users SET confirmation_sent_at = now() WHERE user_id = $1"#,
            Uuid::from(user_id),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.user.mark_invite_sent", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn mark_invite_sent(&mut self, user_id: Ulid) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE users SET invite_sent_at = now() WHERE user_id = $1"#,
            Uuid::from(user_id),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.user.mark_reminder_sent", skip_all, fields(db.statement, user.id = %user_id, reminder.stage = stage), err)]
    async fn mark_reminder_sent(&mut self, user_id: Ulid, stage: u8) -> Result<(), RepositoryError> {
        let column = match stage {
            1 => "reminder_1_sent_at",
            2 => "reminder_2_sent_at",
            _ => "reminder_3_sent_at",
        };
        let sql = format!("UPDATE users SET {column} = now() WHERE user_id = $1");

        let res = sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.user.set_email_status", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn set_email_status(
        &mut self,
        user_id: Ulid,
        status: EmailStatus,
    ) -> Result<(), RepositoryError> {
        let status = match status {
            EmailStatus::Good => "good",
            EmailStatus::Bounced => "bounced",
            EmailStatus::SpamReported => "spam_reported",
            EmailStatus::Unsubscribed => "unsubscribed",
        };

        let res = sqlx::query!(
            r#"UPDATE users SET email_status = $2 WHERE user_id = $1"#,
            Uuid::from(user_id),
            status,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }
}
