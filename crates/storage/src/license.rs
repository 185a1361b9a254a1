use async_trait::async_trait;
use cadre_data_model::{AcquireOutcome, LicenseProduct, LicenseSlot, LicenseSlotResult, LicenseToken};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::RepositoryError;

#[async_trait]
pub trait LicenseProductRepository: Send {
    async fn lookup(&mut self, id: Ulid) -> Result<Option<LicenseProduct>, RepositoryError>;

    async fn find_by_slug(&mut self, slug: &str) -> Result<Option<LicenseProduct>, RepositoryError>;

    /// All active products, for the per-product slot reaper
    /// (`SPEC_FULL.md` §4.4) to iterate without the caller needing to know
    /// product ids in advance.
    async fn list_active(&mut self) -> Result<Vec<LicenseProduct>, RepositoryError>;
}

#[async_trait]
pub trait LicenseTokenRepository: Send {
    async fn issue(
        &mut self,
        product_id: Ulid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<LicenseToken, RepositoryError>;

    /// Looks a token up by its SHA-256 hash and, if unconsumed and
    /// unexpired, marks it consumed in the same statement.
    /// `SPEC_FULL.md` §4.10 — tokens are single-use.
    async fn consume(
        &mut self,
        token_hash: &str,
        used_by_ip: &str,
        instance_id: Option<Ulid>,
        now: DateTime<Utc>,
    ) -> Result<Option<LicenseToken>, RepositoryError>;

    /// Looks a token up by hash without consuming it, for the slot
    /// acquire/release endpoints — the bearer token authorizes the call
    /// by having already been consumed against `/license/blob`.
    async fn find_by_hash(&mut self, token_hash: &str) -> Result<Option<LicenseToken>, RepositoryError>;
}

/// Repository for the per-product concurrent-install slot cap
/// (`SPEC_FULL.md` §4.8). `acquire` takes a row lock on the product so the
/// count-then-insert sequence is race free under concurrent callers.
#[async_trait]
pub trait LicenseSlotRepository: Send {
    async fn acquire(
        &mut self,
        product_id: Ulid,
        slot_id: &str,
        hostname: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, RepositoryError>;

    /// Idempotent; returns `false` if no matching active slot was found.
    async fn release(
        &mut self,
        product_id: Ulid,
        slot_id: &str,
        result: LicenseSlotResult,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Deletes slots whose lease has expired. Returns the number reaped.
    async fn reap_expired(&mut self, product_id: Ulid, ttl_seconds: i64, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn active_count(&mut self, product_id: Ulid) -> Result<i64, RepositoryError>;

    async fn list_active(&mut self, product_id: Ulid) -> Result<Vec<LicenseSlot>, RepositoryError>;
}
