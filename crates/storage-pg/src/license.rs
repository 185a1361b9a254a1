use async_trait::async_trait;
use cadre_data_model::{AcquireOutcome, LicenseProduct, LicenseSlot, LicenseSlotResult, LicenseToken};
use cadre_storage::{LicenseProductRepository, LicenseSlotRepository, LicenseTokenRepository, RepositoryError};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgLicenseProductRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgLicenseProductRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    license_blob: String,
    max_concurrent: i32,
    slot_ttl_seconds: i64,
    token_ttl_seconds: i64,
    download_filename: Option<String>,
    is_active: bool,
}

impl From<ProductRow> for LicenseProduct {
    fn from(r: ProductRow) -> Self {
        Self {
            id: r.id.into(),
            name: r.name,
            description: r.description,
            license_blob: r.license_blob,
            max_concurrent: r.max_concurrent,
            slot_ttl_seconds: r.slot_ttl_seconds,
            token_ttl_seconds: r.token_ttl_seconds,
            download_filename: r.download_filename,
            is_active: r.is_active,
        }
    }
}

#[async_trait]
impl<'c> LicenseProductRepository for PgLicenseProductRepository<'c> {
    #[tracing::instrument(name = "db.license_product.lookup", skip_all, fields(db.statement, product.id = %id), err)]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<LicenseProduct>, RepositoryError> {
        let row = sqlx::query_as!(ProductRow, r#"SELECT * FROM license_products WHERE id = $1"#, Uuid::from(id))
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.license_product.find_by_slug", skip_all, fields(db.statement, product.slug = slug), err)]
    async fn find_by_slug(&mut self, slug: &str) -> Result<Option<LicenseProduct>, RepositoryError> {
        let row = sqlx::query_as!(ProductRow, r#"SELECT * FROM license_products WHERE name = $1 AND is_active"#, slug)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.license_product.list_active", skip_all, fields(db.statement), err)]
    async fn list_active(&mut self) -> Result<Vec<LicenseProduct>, RepositoryError> {
        let rows = sqlx::query_as!(ProductRow, r#"SELECT * FROM license_products WHERE is_active ORDER BY name ASC"#)
            .traced()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

pub struct PgLicenseTokenRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgLicenseTokenRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    token_hash: String,
    product_id: Uuid,
    used: bool,
    used_at: Option<DateTime<Utc>>,
    used_by_ip: Option<String>,
    instance_id: Option<Uuid>,
    expires_at: DateTime<Utc>,
}

impl From<TokenRow> for LicenseToken {
    fn from(r: TokenRow) -> Self {
        Self {
            id: r.id.into(),
            token_hash: r.token_hash,
            product_id: r.product_id.into(),
            used: r.used,
            used_at: r.used_at,
            used_by_ip: r.used_by_ip,
            instance_id: r.instance_id.map(Into::into),
            expires_at: r.expires_at,
        }
    }
}

#[async_trait]
impl<'c> LicenseTokenRepository for PgLicenseTokenRepository<'c> {
    #[tracing::instrument(name = "db.license_token.issue", skip_all, fields(db.statement, product.id = %product_id), err)]
    async fn issue(
        &mut self,
        product_id: Ulid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LicenseToken, RepositoryError> {
        let id = Ulid::new();
        let row = sqlx::query_as!(
            TokenRow,
            r#"
                INSERT INTO license_tokens (id, token_hash, product_id, used, expires_at)
                VALUES ($1, $2, $3, false, $4)
                RETURNING *
            "#,
            Uuid::from(id),
            token_hash,
            Uuid::from(product_id),
            expires_at,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "db.license_token.consume", skip_all, fields(db.statement), err)]
    async fn consume(
        &mut self,
        token_hash: &str,
        used_by_ip: &str,
        instance_id: Option<Ulid>,
        now: DateTime<Utc>,
    ) -> Result<Option<LicenseToken>, RepositoryError> {
        let row = sqlx::query_as!(
            TokenRow,
            r#"
                UPDATE license_tokens
                SET used = true, used_at = $2, used_by_ip = $3, instance_id = $4
                WHERE token_hash = $1 AND NOT used AND expires_at > $2
                RETURNING *
            "#,
            token_hash,
            now,
            used_by_ip,
            instance_id.map(Uuid::from),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.license_token.find_by_hash", skip_all, fields(db.statement), err)]
    async fn find_by_hash(&mut self, token_hash: &str) -> Result<Option<LicenseToken>, RepositoryError> {
        let row = sqlx::query_as!(TokenRow, r#"SELECT * FROM license_tokens WHERE token_hash = $1"#, token_hash)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }
}

pub struct PgLicenseSlotRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgLicenseSlotRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    slot_id: String,
    product_id: Uuid,
    hostname: String,
    ip_address: String,
    acquired_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    result: Option<String>,
    elapsed_seconds: Option<i32>,
    is_active: bool,
}

fn parse_result(s: Option<&str>) -> Option<LicenseSlotResult> {
    s.map(|s| match s {
        "error" => LicenseSlotResult::Error,
        "expired" => LicenseSlotResult::Expired,
        "unknown" => LicenseSlotResult::Unknown,
        _ => LicenseSlotResult::Success,
    })
}

impl From<SlotRow> for LicenseSlot {
    fn from(r: SlotRow) -> Self {
        Self {
            id: r.id.into(),
            slot_id: r.slot_id,
            product_id: r.product_id.into(),
            hostname: r.hostname,
            ip_address: r.ip_address,
            acquired_at: r.acquired_at,
            released_at: r.released_at,
            result: parse_result(r.result.as_deref()),
            elapsed_seconds: r.elapsed_seconds,
            is_active: r.is_active,
        }
    }
}

#[async_trait]
impl<'c> LicenseSlotRepository for PgLicenseSlotRepository<'c> {
    /// Locks the product row first so the count-then-insert sequence below
    /// is race free: two concurrent `acquire` calls for the same product
    /// serialize on this lock rather than both observing room for one more
    /// slot. `SPEC_FULL.md` §4.8 / §9 — the stricter of the two behaviors
    /// considered, chosen over the original's unlocked reap-then-count.
    #[tracing::instrument(name = "db.license_slot.acquire", skip_all, fields(db.statement, product.id = %product_id, slot.id = slot_id), err)]
    async fn acquire(
        &mut self,
        product_id: Ulid,
        slot_id: &str,
        hostname: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, RepositoryError> {
        let max_concurrent: i32 = sqlx::query_scalar!(
            r#"SELECT max_concurrent FROM license_products WHERE id = $1 FOR UPDATE"#,
            Uuid::from(product_id),
        )
        .traced()
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        let active_count = self.active_count(product_id).await?;

        if active_count >= i64::from(max_concurrent) {
            return Ok(AcquireOutcome::CapacityExceeded);
        }

        let id = Ulid::new();
        let row = sqlx::query_as!(
            SlotRow,
            r#"
                INSERT INTO license_slots
                    (id, slot_id, product_id, hostname, ip_address, acquired_at, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, true)
                RETURNING *
            "#,
            Uuid::from(id),
            slot_id,
            Uuid::from(product_id),
            hostname,
            ip_address,
            now,
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(AcquireOutcome::Acquired(row.into()))
    }

    #[tracing::instrument(name = "db.license_slot.release", skip_all, fields(db.statement, product.id = %product_id, slot.id = slot_id), err)]
    async fn release(
        &mut self,
        product_id: Ulid,
        slot_id: &str,
        result: LicenseSlotResult,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let res = sqlx::query!(
            r#"
                UPDATE license_slots
                SET is_active = false,
                    released_at = $3,
                    result = $4,
                    elapsed_seconds = EXTRACT(EPOCH FROM ($3 - acquired_at))::int
                WHERE product_id = $1 AND slot_id = $2 AND is_active
            "#,
            Uuid::from(product_id),
            slot_id,
            now,
            result.as_str(),
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.rows_affected() == 1)
    }

    #[tracing::instrument(name = "db.license_slot.reap_expired", skip_all, fields(db.statement, product.id = %product_id), err)]
    async fn reap_expired(
        &mut self,
        product_id: Ulid,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let res = sqlx::query!(
            r#"
                UPDATE license_slots
                SET is_active = false, released_at = $3, result = 'expired'
                WHERE product_id = $1
                  AND is_active
                  AND acquired_at < $3 - make_interval(secs => $2)
            "#,
            Uuid::from(product_id),
            ttl_seconds as f64,
            now,
        )
        .traced()
        .execute(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(res.rows_affected())
    }

    #[tracing::instrument(name = "db.license_slot.active_count", skip_all, fields(db.statement, product.id = %product_id), err)]
    async fn active_count(&mut self, product_id: Ulid) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar!(
            r#"SELECT count(*) AS "count!" FROM license_slots WHERE product_id = $1 AND is_active"#,
            Uuid::from(product_id),
        )
        .traced()
        .fetch_one(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count)
    }

    #[tracing::instrument(name = "db.license_slot.list_active", skip_all, fields(db.statement, product.id = %product_id), err)]
    async fn list_active(&mut self, product_id: Ulid) -> Result<Vec<LicenseSlot>, RepositoryError> {
        let rows = sqlx::query_as!(
            SlotRow,
            r#"SELECT * FROM license_slots WHERE product_id = $1 AND is_active ORDER BY acquired_at ASC"#,
            Uuid::from(product_id),
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    async fn seed_product(pool: &PgPool, max_concurrent: i32) -> Ulid {
        let id = Ulid::new();
        sqlx::query!(
            r#"
                INSERT INTO license_products
                    (id, name, license_blob, max_concurrent, slot_ttl_seconds, token_ttl_seconds)
                VALUES ($1, $2, 'opaque-blob', $3, 7200, 7200)
            "#,
            Uuid::from(id),
            format!("product-{id}"),
            max_concurrent,
        )
        .execute(pool)
        .await
        .expect("seed product");
        id
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn acquire_grants_up_to_max_concurrent_then_reports_capacity_exceeded(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let product_id = seed_product(&pool, 2).await;
        let now = Utc::now();

        let first = PgLicenseSlotRepository::new(&mut conn).acquire(product_id, "slot-1", "host-a", "10.0.0.1", now).await.expect("acquire 1");
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let second = PgLicenseSlotRepository::new(&mut conn).acquire(product_id, "slot-2", "host-b", "10.0.0.2", now).await.expect("acquire 2");
        assert!(matches!(second, AcquireOutcome::Acquired(_)));

        let third = PgLicenseSlotRepository::new(&mut conn).acquire(product_id, "slot-3", "host-c", "10.0.0.3", now).await.expect("acquire 3");
        assert!(matches!(third, AcquireOutcome::CapacityExceeded));

        let released = PgLicenseSlotRepository::new(&mut conn).release(product_id, "slot-1", LicenseSlotResult::Success, now).await.expect("release");
        assert!(released);

        let fourth = PgLicenseSlotRepository::new(&mut conn).acquire(product_id, "slot-4", "host-d", "10.0.0.4", now).await.expect("acquire 4");
        assert!(matches!(fourth, AcquireOutcome::Acquired(_)));
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn release_is_idempotent(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let product_id = seed_product(&pool, 1).await;
        let now = Utc::now();

        PgLicenseSlotRepository::new(&mut conn).acquire(product_id, "slot-1", "host-a", "10.0.0.1", now).await.expect("acquire");

        let first_release =
            PgLicenseSlotRepository::new(&mut conn).release(product_id, "slot-1", LicenseSlotResult::Success, now).await.expect("release 1");
        assert!(first_release);

        let second_release =
            PgLicenseSlotRepository::new(&mut conn).release(product_id, "slot-1", LicenseSlotResult::Success, now).await.expect("release 2");
        assert!(!second_release);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn token_consume_is_single_use(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let product_id = seed_product(&pool, 1).await;
        let now = Utc::now();

        PgLicenseTokenRepository::new(&mut conn).issue(product_id, "hash-abc", now + chrono::Duration::hours(2)).await.expect("issue");

        let first = PgLicenseTokenRepository::new(&mut conn).consume("hash-abc", "10.0.0.1", None, now).await.expect("consume 1");
        assert!(first.is_some());

        let second = PgLicenseTokenRepository::new(&mut conn).consume("hash-abc", "10.0.0.1", None, now).await.expect("consume 2");
        assert!(second.is_none());
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn token_consume_rejects_expired_token(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("acquire");
        let product_id = seed_product(&pool, 1).await;
        let now = Utc::now();

        PgLicenseTokenRepository::new(&mut conn).issue(product_id, "hash-expired", now - chrono::Duration::seconds(1)).await.expect("issue");

        let consumed = PgLicenseTokenRepository::new(&mut conn).consume("hash-expired", "10.0.0.1", None, now).await.expect("consume");
        assert!(consumed.is_none());
    }
}
