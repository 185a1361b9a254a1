//! License Slot Manager (`SPEC_FULL.md` §4.8): token issuance/consumption
//! plus the per-product concurrent-install lease.

use cadre_clock::Clock;
use cadre_data_model::{AcquireOutcome, AuditEventType, LicenseSlotResult};
use cadre_storage::{AuditLogRepository, LicenseProductRepository, LicenseSlotRepository, LicenseTokenRepository};
use cadre_storage_pg::{PgAuditLogRepository, PgLicenseProductRepository, PgLicenseSlotRepository, PgLicenseTokenRepository};
use chrono::Duration;
use serde_json::json;
use sqlx::PgPool;
use ulid::Ulid;

use crate::error::TaskError;

/// Result of [`acquire_slot`]. Mirrors the external interface's
/// `{granted, slot_id} | {wait, retry_after, active, max}` shape.
#[derive(Debug, Clone)]
pub enum SlotAcquireResult {
    Granted { slot_id: String },
    Wait { retry_after_seconds: u32, active: i64, max_concurrent: i32 },
}

/// Issues a fresh license token for `product_id`, good for
/// `product.token_ttl_seconds`. Returns the raw token; only its hash is
/// persisted.
#[tracing::instrument(name = "tasks.license.generate_token", skip(pool, clock), fields(product.id = %product_id), err)]
pub async fn generate_license_token(pool: &PgPool, clock: &dyn Clock, product_id: Ulid) -> Result<String, TaskError> {
    let (raw, hash) = cadre_crypto::generate_token();

    let mut tx = pool.begin().await?;
    let product = PgLicenseProductRepository::new(&mut *tx).lookup(product_id).await?.ok_or(TaskError::NotFound)?;
    let expires_at = clock.now() + Duration::seconds(product.token_ttl_seconds);
    PgLicenseTokenRepository::new(&mut *tx).issue(product_id, &hash, expires_at).await?;
    tx.commit().await?;

    Ok(raw)
}

/// Validates and atomically consumes a raw license token, returning the
/// product's license blob. Terminal on first success — a second call with
/// the same token returns [`TaskError::TokenInvalid`].
#[tracing::instrument(name = "tasks.license.validate_and_consume", skip(pool, clock, raw_token), fields(client.ip = client_ip), err)]
pub async fn validate_and_consume_license_token(
    pool: &PgPool,
    clock: &dyn Clock,
    raw_token: &str,
    client_ip: &str,
    instance_id: Option<Ulid>,
) -> Result<String, TaskError> {
    let hash = cadre_crypto::hash_token(raw_token);

    let mut tx = pool.begin().await?;
    let token = PgLicenseTokenRepository::new(&mut *tx)
        .consume(&hash, client_ip, instance_id, clock.now())
        .await?
        .ok_or(TaskError::TokenInvalid)?;

    let product = PgLicenseProductRepository::new(&mut *tx).lookup(token.product_id).await?.ok_or(TaskError::NotFound)?;
    if !product.is_active {
        return Err(TaskError::ProductInactive);
    }

    PgAuditLogRepository::new(&mut *tx)
        .record(AuditEventType::LicenseTokenConsumed, None, None, json!({ "product_id": token.product_id.to_string() }))
        .await?;

    tx.commit().await?;
    Ok(product.license_blob)
}

/// Acquires a concurrency slot for `product_id`, serializing on the
/// product row so the count-then-insert sequence is race free.
#[tracing::instrument(name = "tasks.license.acquire_slot", skip(pool, clock), fields(product.id = %product_id, slot.hostname = hostname), err)]
pub async fn acquire_slot(
    pool: &PgPool,
    clock: &dyn Clock,
    product_id: Ulid,
    hostname: &str,
    ip_address: &str,
) -> Result<SlotAcquireResult, TaskError> {
    let slot_id = Ulid::new().to_string();

    let mut tx = pool.begin().await?;
    let product = PgLicenseProductRepository::new(&mut *tx).lookup(product_id).await?.ok_or(TaskError::NotFound)?;
    let outcome = PgLicenseSlotRepository::new(&mut *tx)
        .acquire(product_id, &slot_id, hostname, ip_address, clock.now())
        .await?;

    match outcome {
        AcquireOutcome::Acquired(slot) => {
            PgAuditLogRepository::new(&mut *tx)
                .record(
                    AuditEventType::SlotAcquired,
                    None,
                    None,
                    json!({ "product_id": product_id.to_string(), "slot_id": slot.slot_id }),
                )
                .await?;
            tx.commit().await?;
            Ok(SlotAcquireResult::Granted { slot_id: slot.slot_id })
        }
        AcquireOutcome::CapacityExceeded => {
            let active = PgLicenseSlotRepository::new(&mut *tx).active_count(product_id).await?;
            tx.commit().await?;
            Ok(SlotAcquireResult::Wait { retry_after_seconds: 30, active, max_concurrent: product.max_concurrent })
        }
    }
}

/// Releases a slot. Idempotent: releasing an already-released (or
/// unknown) `slot_id` returns `false` rather than erroring.
#[tracing::instrument(name = "tasks.license.release_slot", skip(pool, clock), fields(product.id = %product_id, slot.id = slot_id), err)]
pub async fn release_slot(
    pool: &PgPool,
    clock: &dyn Clock,
    product_id: Ulid,
    slot_id: &str,
    result: LicenseSlotResult,
) -> Result<bool, TaskError> {
    let mut tx = pool.begin().await?;
    let released = PgLicenseSlotRepository::new(&mut *tx).release(product_id, slot_id, result, clock.now()).await?;
    if released {
        PgAuditLogRepository::new(&mut *tx)
            .record(
                AuditEventType::SlotReleased,
                None,
                None,
                json!({ "product_id": product_id.to_string(), "slot_id": slot_id, "result": result.as_str() }),
            )
            .await?;
    }
    tx.commit().await?;
    Ok(released)
}

/// Reaps slots whose lease has expired for `product_id`. Meant to be
/// invoked by the Scheduler on an interval per product, independent of
/// `acquire` — see `DESIGN.md` for why reap isn't inlined into acquire.
#[tracing::instrument(name = "tasks.license.reap_expired_slots", skip(pool, clock), fields(product.id = %product_id), err)]
pub async fn reap_expired_slots(pool: &PgPool, clock: &dyn Clock, product_id: Ulid, ttl_seconds: i64) -> Result<u64, TaskError> {
    let mut tx = pool.begin().await?;
    let reaped = PgLicenseSlotRepository::new(&mut *tx).reap_expired(product_id, ttl_seconds, clock.now()).await?;
    tx.commit().await?;
    if reaped > 0 {
        tracing::info!(product.id = %product_id, reaped, "reaped expired license slots");
    }
    Ok(reaped)
}

/// Sweeps every active product's slots using that product's own
/// `slot_ttl_seconds`. Registered as a single recurring job rather than
/// one job per product, since products are admin-managed data rather than
/// startup configuration — `SPEC_FULL.md` §4.4 calls for "interval per
/// product" reaping, not a fixed interval shared across products.
#[tracing::instrument(name = "tasks.license.reap_all_products", skip(pool, clock), err)]
pub async fn reap_all_expired_slots(pool: &PgPool, clock: &dyn Clock) -> Result<u64, TaskError> {
    let mut tx = pool.begin().await?;
    let products = PgLicenseProductRepository::new(&mut *tx).list_active().await?;
    tx.commit().await?;

    let mut total = 0u64;
    for product in products {
        total += reap_expired_slots(pool, clock, product.id, product.slot_ttl_seconds).await?;
    }
    Ok(total)
}
