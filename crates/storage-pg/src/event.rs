use async_trait::async_trait;
use cadre_data_model::{Event, EventParticipation, ParticipationStatus};
use cadre_storage::{EventParticipationRepository, EventRepository, RepositoryError};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{ensure_affected_rows, map_sqlx_err, ExecuteExt};

pub struct PgEventRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgEventRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    year: i32,
    name: String,
    slug: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    registration_open: bool,
    test_mode: bool,
    is_active: bool,
    terms_version: Option<String>,
    terms_content: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(r: EventRow) -> Self {
        Self {
            id: r.event_id.into(),
            year: r.year,
            name: r.name,
            slug: r.slug,
            start_date: r.start_date,
            end_date: r.end_date,
            registration_open: r.registration_open,
            test_mode: r.test_mode,
            is_active: r.is_active,
            terms_version: r.terms_version,
            terms_content: r.terms_content,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl<'c> EventRepository for PgEventRepository<'c> {
    #[tracing::instrument(name = "db.event.lookup", skip_all, fields(db.statement, event.id = %id), err)]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<Event>, RepositoryError> {
        let res = sqlx::query_as!(EventRow, r#"SELECT * FROM events WHERE event_id = $1"#, Uuid::from(id))
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(name = "db.event.find_active", skip_all, fields(db.statement), err)]
    async fn find_active(&mut self) -> Result<Option<Event>, RepositoryError> {
        let res = sqlx::query_as!(EventRow, r#"SELECT * FROM events WHERE is_active LIMIT 1"#)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(name = "db.event.activate", skip_all, fields(db.statement, event.id = %id), err)]
    async fn activate(&mut self, id: Ulid) -> Result<Event, RepositoryError> {
        sqlx::query!(r#"UPDATE events SET is_active = false WHERE is_active AND event_id != $1"#, Uuid::from(id))
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        let res = sqlx::query!(r#"UPDATE events SET is_active = true WHERE event_id = $1"#, Uuid::from(id))
            .traced()
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)?;

        self.lookup(id).await?.ok_or(RepositoryError::NotFound)
    }

    #[tracing::instrument(name = "db.event.set_test_mode", skip_all, fields(db.statement, event.id = %id), err)]
    async fn set_test_mode(&mut self, id: Ulid, test_mode: bool) -> Result<Event, RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE events SET test_mode = $2 WHERE event_id = $1"#,
            Uuid::from(id),
            test_mode,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)?;

        self.lookup(id).await?.ok_or(RepositoryError::NotFound)
    }
}

pub struct PgEventParticipationRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgEventParticipationRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ParticipationRow {
    participation_id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    invited_at: DateTime<Utc>,
    invited_by_user_id: Option<Uuid>,
    status: String,
    responded_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    declined_at: Option<DateTime<Utc>>,
    declined_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_status(s: &str) -> ParticipationStatus {
    match s {
        "confirmed" => ParticipationStatus::Confirmed,
        "declined" => ParticipationStatus::Declined,
        "no_response" => ParticipationStatus::NoResponse,
        _ => ParticipationStatus::Invited,
    }
}

impl From<ParticipationRow> for EventParticipation {
    fn from(r: ParticipationRow) -> Self {
        Self {
            id: r.participation_id.into(),
            user_id: r.user_id.into(),
            event_id: r.event_id.into(),
            invited_at: r.invited_at,
            invited_by_user_id: r.invited_by_user_id.map(Into::into),
            status: parse_status(&r.status),
            responded_at: r.responded_at,
            confirmed_at: r.confirmed_at,
            declined_at: r.declined_at,
            declined_reason: r.declined_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl<'c> EventParticipationRepository for PgEventParticipationRepository<'c> {
    #[tracing::instrument(name = "db.event_participation.find_for", skip_all, fields(db.statement, user.id = %user_id, event.id = %event_id), err)]
    async fn find_for(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
    ) -> Result<Option<EventParticipation>, RepositoryError> {
        let res = sqlx::query_as!(
            ParticipationRow,
            r#"SELECT * FROM event_participations WHERE user_id = $1 AND event_id = $2"#,
            Uuid::from(user_id),
            Uuid::from(event_id),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.map(Into::into))
    }

    #[tracing::instrument(name = "db.event_participation.ensure_invited", skip_all, fields(db.statement, user.id = %user_id, event.id = %event_id), err)]
    async fn ensure_invited(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
        invited_by_user_id: Option<Ulid>,
    ) -> Result<EventParticipation, RepositoryError> {
        let participation_id = Ulid::new();

        sqlx::query!(
            r#"
                INSERT INTO event_participations
                    (participation_id, user_id, event_id, invited_at, invited_by_user_id, status)
                VALUES ($1, $2, $3, now(), $4, 'invited')
                ON CONFLICT (user_id, event_id) DO NOTHING
            "#,
            Uuid::from(participation_id),
            Uuid::from(user_id),
            Uuid::from(event_id),
            invited_by_user_id.map(Uuid::from),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        self.find_for(user_id, event_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    #[tracing::instrument(name = "db.event_participation.set_status", skip_all, fields(db.statement, user.id = %user_id, event.id = %event_id), err)]
    async fn set_status(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
        status: ParticipationStatus,
    ) -> Result<EventParticipation, RepositoryError> {
        let status_str = status.as_str();
        let res = sqlx::query!(
            r#"
                UPDATE event_participations
                SET status = $3,
                    responded_at = now(),
                    confirmed_at = CASE WHEN $3 = 'confirmed' THEN now() ELSE confirmed_at END,
                    declined_at = CASE WHEN $3 = 'declined' THEN now() ELSE declined_at END
                WHERE user_id = $1 AND event_id = $2
            "#,
            Uuid::from(user_id),
            Uuid::from(event_id),
            status_str,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)?;

        self.find_for(user_id, event_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }
}
