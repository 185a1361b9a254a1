use async_trait::async_trait;
use cadre_data_model::{Instance, InstanceStatus, VpnCredential};
use cadre_storage::{InstanceRepository, RepositoryError, VpnCredentialRepository};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{ensure_affected_rows, map_sqlx_err, ExecuteExt};

pub struct PgInstanceRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgInstanceRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    name: String,
    provider: String,
    provider_instance_id: Option<String>,
    status: String,
    ip_address: Option<String>,
    event_id: Option<Uuid>,
    assigned_to_user_id: Option<Uuid>,
    created_by_user_id: Option<Uuid>,
    error_message: Option<String>,
    config_token_hash: Option<String>,
    config_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

fn parse_status(s: &str) -> InstanceStatus {
    match s {
        "ACTIVE" => InstanceStatus::Active,
        "ERROR" => InstanceStatus::Error,
        "SHUTOFF" => InstanceStatus::Shutoff,
        "DELETED" => InstanceStatus::Deleted,
        _ => InstanceStatus::Building,
    }
}

impl From<InstanceRow> for Instance {
    fn from(r: InstanceRow) -> Self {
        Self {
            id: r.id.into(),
            name: r.name,
            provider: r.provider,
            provider_instance_id: r.provider_instance_id,
            status: parse_status(&r.status),
            ip_address: r.ip_address,
            event_id: r.event_id.map(Into::into),
            assigned_to_user_id: r.assigned_to_user_id.map(Into::into),
            created_by_user_id: r.created_by_user_id.map(Into::into),
            error_message: r.error_message,
            config_token_hash: r.config_token_hash,
            config_token_expires_at: r.config_token_expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        }
    }
}

#[async_trait]
impl<'c> InstanceRepository for PgInstanceRepository<'c> {
    #[tracing::instrument(name = "db.instance.lookup", skip_all, fields(db.statement, instance.id = %id), err)]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<Instance>, RepositoryError> {
        let row = sqlx::query_as!(InstanceRow, r#"SELECT * FROM instances WHERE id = $1"#, Uuid::from(id))
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.instance.create", skip_all, fields(db.statement, instance.id = %instance.id), err)]
    async fn create(&mut self, instance: Instance) -> Result<Instance, RepositoryError> {
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
                INSERT INTO instances
                    (id, name, provider, provider_instance_id, status, ip_address,
                     event_id, assigned_to_user_id, created_by_user_id, error_message,
                     config_token_hash, config_token_expires_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
                RETURNING *
            "#,
            Uuid::from(instance.id),
            instance.name,
            instance.provider,
            instance.provider_instance_id,
            instance.status.as_str(),
            instance.ip_address,
            instance.event_id.map(Uuid::from),
            instance.assigned_to_user_id.map(Uuid::from),
            instance.created_by_user_id.map(Uuid::from),
            instance.error_message,
            instance.config_token_hash,
            instance.config_token_expires_at,
            instance.created_at,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.instance.set_status", skip_all, fields(db.statement, instance.id = %id), err)]
    async fn set_status(
        &mut self,
        id: Ulid,
        status: InstanceStatus,
        ip_address: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<Instance, RepositoryError> {
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
                UPDATE instances
                SET status = $2,
                    ip_address = COALESCE($3, ip_address),
                    error_message = $4,
                    updated_at = now()
                WHERE id = $1
                RETURNING *
            "#,
            Uuid::from(id),
            status.as_str(),
            ip_address,
            error_message,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.instance.soft_delete", skip_all, fields(db.statement, instance.id = %id), err)]
    async fn soft_delete(&mut self, id: Ulid) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE instances SET deleted_at = now(), status = 'DELETED' WHERE id = $1 AND deleted_at IS NULL"#,
            Uuid::from(id),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }

    #[tracing::instrument(name = "db.instance.find_reconcilable", skip_all, fields(db.statement), err)]
    async fn find_reconcilable(&mut self) -> Result<Vec<Instance>, RepositoryError> {
        let rows = sqlx::query_as!(
            InstanceRow,
            r#"
                SELECT * FROM instances
                WHERE deleted_at IS NULL
                  AND provider_instance_id IS NOT NULL
                  AND status != 'DELETED'
                ORDER BY created_at ASC
            "#
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "db.instance.find_for_user", skip_all, fields(db.statement, user.id = %user_id, event.id = %event_id), err)]
    async fn find_for_user(&mut self, user_id: Ulid, event_id: Ulid) -> Result<Option<Instance>, RepositoryError> {
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
                SELECT * FROM instances
                WHERE assigned_to_user_id = $1 AND event_id = $2 AND deleted_at IS NULL
                ORDER BY created_at DESC
                LIMIT 1
            "#,
            Uuid::from(user_id),
            Uuid::from(event_id),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.instance.find_by_config_token_hash", skip_all, fields(db.statement), err)]
    async fn find_by_config_token_hash(&mut self, token_hash: &str) -> Result<Option<Instance>, RepositoryError> {
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
                SELECT * FROM instances
                WHERE config_token_hash = $1 AND deleted_at IS NULL
            "#,
            token_hash,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.instance.clear_config_token", skip_all, fields(db.statement, instance.id = %id), err)]
    async fn clear_config_token(&mut self, id: Ulid) -> Result<(), RepositoryError> {
        let res = sqlx::query!(
            r#"UPDATE instances SET config_token_hash = NULL, config_token_expires_at = NULL WHERE id = $1"#,
            Uuid::from(id),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        ensure_affected_rows(&res, 1)
    }
}

pub struct PgVpnCredentialRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgVpnCredentialRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct VpnRow {
    id: Uuid,
    ipv4_address: Option<String>,
    ipv6_local: Option<String>,
    ipv6_global: Option<String>,
    private_key: String,
    preshared_key: Option<String>,
    endpoint: String,
    key_type: String,
    assigned_to_user_id: Option<Uuid>,
    assigned_to_username: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    is_available: bool,
    is_active: bool,
}

impl From<VpnRow> for VpnCredential {
    fn from(r: VpnRow) -> Self {
        Self {
            id: r.id.into(),
            ipv4_address: r.ipv4_address,
            ipv6_local: r.ipv6_local,
            ipv6_global: r.ipv6_global,
            private_key: r.private_key,
            preshared_key: r.preshared_key,
            endpoint: r.endpoint,
            key_type: r.key_type,
            assigned_to_user_id: r.assigned_to_user_id.map(Into::into),
            assigned_to_username: r.assigned_to_username,
            assigned_at: r.assigned_at,
            is_available: r.is_available,
            is_active: r.is_active,
        }
    }
}

#[async_trait]
impl<'c> VpnCredentialRepository for PgVpnCredentialRepository<'c> {
    #[tracing::instrument(name = "db.vpn_credential.find_available", skip_all, fields(db.statement), err)]
    async fn find_available(&mut self) -> Result<Option<VpnCredential>, RepositoryError> {
        let row = sqlx::query_as!(
            VpnRow,
            r#"
                SELECT * FROM vpn_credentials
                WHERE is_available AND is_active
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            "#
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.vpn_credential.assign", skip_all, fields(db.statement, credential.id = %id, user.id = %user_id), err)]
    async fn assign(&mut self, id: Ulid, user_id: Ulid, username: &str) -> Result<VpnCredential, RepositoryError> {
        let row = sqlx::query_as!(
            VpnRow,
            r#"
                UPDATE vpn_credentials
                SET is_available = false,
                    assigned_to_user_id = $2,
                    assigned_to_username = $3,
                    assigned_at = now()
                WHERE id = $1 AND is_available
                RETURNING *
            "#,
            Uuid::from(id),
            Uuid::from(user_id),
            username,
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::Conflict("vpn credential already assigned".to_owned()))?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.vpn_credential.find_assigned_to", skip_all, fields(db.statement, user.id = %user_id), err)]
    async fn find_assigned_to(&mut self, user_id: Ulid) -> Result<Option<VpnCredential>, RepositoryError> {
        let row = sqlx::query_as!(
            VpnRow,
            r#"SELECT * FROM vpn_credentials WHERE assigned_to_user_id = $1 AND is_active"#,
            Uuid::from(user_id),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.vpn_credential.count_available", skip_all, fields(db.statement), err)]
    async fn count_available(&mut self) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar!(
            r#"SELECT count(*) AS "count!" FROM vpn_credentials WHERE is_available AND is_active"#
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count)
    }
}
