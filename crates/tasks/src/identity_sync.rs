//! Identity Sync Queue worker (`SPEC_FULL.md` §4.7): ships queued
//! credential changes to the downstream identity provider, at-least-once.

use cadre_clock::Clock;
use cadre_crypto::FieldCipher;
use cadre_data_model::IdentitySyncOperation;
use cadre_identity::IdentityProvider;
use cadre_storage::IdentitySyncRepository;
use cadre_storage_pg::PgIdentitySyncRepository;
use sqlx::PgPool;

use crate::error::TaskError;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySyncTickSummary {
    pub synced: i32,
    pub failed: i32,
}

/// Runs one tick: if the downstream provider is unreachable, aborts
/// without claiming any rows (`SPEC_FULL.md` §4.7 cancellation clause).
#[tracing::instrument(name = "tasks.identity_sync.run", skip_all, err)]
pub async fn run_identity_sync(
    pool: &PgPool,
    identity: &dyn IdentityProvider,
    cipher: &FieldCipher,
    clock: &dyn Clock,
    batch_size: i64,
) -> Result<IdentitySyncTickSummary, TaskError> {
    if !identity.is_reachable().await {
        tracing::warn!("identity provider unreachable, skipping sync tick");
        return Ok(IdentitySyncTickSummary::default());
    }

    let mut tx = pool.begin().await?;
    let rows = PgIdentitySyncRepository::new(&mut *tx).claim_pending(batch_size).await?;
    tx.commit().await?;

    let mut summary = IdentitySyncTickSummary::default();

    for row in rows {
        let outcome = apply_row(identity, cipher, &row).await;

        let mut tx = pool.begin().await?;
        match outcome {
            Ok(()) => {
                PgIdentitySyncRepository::new(&mut *tx).mark_synced(row.id, clock.now()).await?;
                summary.synced += 1;
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure.message,
                    transient = failure.transient,
                    identity_sync.id = %row.id,
                    username = row.username,
                    "identity sync row failed",
                );
                PgIdentitySyncRepository::new(&mut *tx)
                    .mark_failed(row.id, &failure.message, failure.transient)
                    .await?;
                summary.failed += 1;
            }
        }
        tx.commit().await?;
    }

    Ok(summary)
}

/// A failed sync attempt, carrying whether the queue row should keep
/// burning its retry budget (`transient`) or fail outright.
struct SyncFailure {
    message: String,
    transient: bool,
}

impl From<cadre_identity::IdentityError> for SyncFailure {
    fn from(err: cadre_identity::IdentityError) -> Self {
        Self { transient: err.is_transient(), message: err.to_string() }
    }
}

async fn apply_row(
    identity: &dyn IdentityProvider,
    cipher: &FieldCipher,
    row: &cadre_data_model::IdentitySyncRow,
) -> Result<(), SyncFailure> {
    match row.operation {
        IdentitySyncOperation::Create | IdentitySyncOperation::Update => {
            let Some(encrypted) = &row.encrypted_credential else {
                return Err(SyncFailure {
                    message: "missing encrypted credential for create/update operation".to_string(),
                    transient: false,
                });
            };
            let plaintext = cipher.decrypt(encrypted).map_err(|err| {
                tracing::warn!(error = %err, "failed to decrypt queued identity credential");
                SyncFailure { message: "credential decryption failed".to_string(), transient: false }
            })?;

            let result = if row.operation == IdentitySyncOperation::Create {
                identity.create_user(&row.username, &plaintext).await
            } else {
                identity.update_password(&row.username, &plaintext).await
            };
            result.map_err(SyncFailure::from)
        }
        IdentitySyncOperation::Delete => identity.delete_user(&row.username).await.map_err(SyncFailure::from),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cadre_data_model::{IdentitySyncOperation, IdentitySyncRow};
    use cadre_identity::{IdentityError, IdentityProvider};
    use chrono::Utc;
    use ulid::Ulid;

    use super::apply_row;

    /// `None` means `create_user` succeeds; `Some((message, transient))` means
    /// it rejects with a fresh `IdentityError::Rejected` built from those parts.
    struct FixedOutcome {
        create: Option<(&'static str, bool)>,
    }

    #[async_trait]
    impl IdentityProvider for FixedOutcome {
        async fn create_user(&self, _username: &str, _password: &str) -> Result<(), IdentityError> {
            match self.create {
                None => Ok(()),
                Some((message, transient)) => Err(IdentityError::Rejected { message: message.to_string(), transient }),
            }
        }
        async fn update_password(&self, _username: &str, _password: &str) -> Result<(), IdentityError> {
            unreachable!("not exercised")
        }
        async fn delete_user(&self, _username: &str) -> Result<(), IdentityError> {
            unreachable!("not exercised")
        }
        async fn is_reachable(&self) -> bool {
            true
        }
    }

    fn row(operation: IdentitySyncOperation, encrypted_credential: Option<String>) -> IdentitySyncRow {
        IdentitySyncRow {
            id: Ulid::new(),
            user_id: Ulid::new(),
            username: "alice".to_string(),
            encrypted_credential,
            operation,
            synced: false,
            synced_at: None,
            retry_count: 0,
            last_error: None,
            failed: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_credential_is_a_permanent_failure() {
        let cipher = cadre_crypto::FieldCipher::from_base64(&cadre_crypto::FieldCipher::generate_key()).unwrap();
        let provider = FixedOutcome { create: None };
        let row = row(IdentitySyncOperation::Create, None);

        let failure = apply_row(&provider, &cipher, &row).await.unwrap_err();
        assert!(!failure.transient);
    }

    #[tokio::test]
    async fn undecryptable_credential_is_a_permanent_failure() {
        let cipher = cadre_crypto::FieldCipher::from_base64(&cadre_crypto::FieldCipher::generate_key()).unwrap();
        let provider = FixedOutcome { create: None };
        let row = row(IdentitySyncOperation::Create, Some("not-a-valid-token".to_string()));

        let failure = apply_row(&provider, &cipher, &row).await.unwrap_err();
        assert!(!failure.transient);
    }

    #[tokio::test]
    async fn provider_rejection_transient_flag_propagates_to_the_failure() {
        let cipher = cadre_crypto::FieldCipher::from_base64(&cadre_crypto::FieldCipher::generate_key()).unwrap();
        let encrypted = cipher.encrypt("s3cret");

        let permanent = FixedOutcome { create: Some(("create user returned 400 Bad Request", false)) };
        let failure = apply_row(&permanent, &cipher, &row(IdentitySyncOperation::Create, Some(encrypted.clone())))
            .await
            .unwrap_err();
        assert!(!failure.transient);

        let transient = FixedOutcome { create: Some(("create user returned 503 Service Unavailable", true)) };
        let failure = apply_row(&transient, &cipher, &row(IdentitySyncOperation::Create, Some(encrypted)))
            .await
            .unwrap_err();
        assert!(failure.transient);
    }
}
