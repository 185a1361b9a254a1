use async_trait::async_trait;
use cadre_data_model::{Instance, InstanceStatus, VpnCredential};
use ulid::Ulid;

use crate::RepositoryError;

#[async_trait]
pub trait InstanceRepository: Send {
    async fn lookup(&mut self, id: Ulid) -> Result<Option<Instance>, RepositoryError>;

    async fn create(&mut self, instance: Instance) -> Result<Instance, RepositoryError>;

    async fn set_status(
        &mut self,
        id: Ulid,
        status: InstanceStatus,
        ip_address: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<Instance, RepositoryError>;

    async fn soft_delete(&mut self, id: Ulid) -> Result<(), RepositoryError>;

    /// Non-deleted instances that carry a provider id, for the
    /// reconciler's poll sweep (`SPEC_FULL.md` §4.9).
    async fn find_reconcilable(&mut self) -> Result<Vec<Instance>, RepositoryError>;

    async fn find_for_user(&mut self, user_id: Ulid, event_id: Ulid) -> Result<Option<Instance>, RepositoryError>;

    /// Looks up by the SHA-256 hash of a presented config-fetch bearer
    /// token, for the `GET /cloud-init/vpn-config` handler.
    async fn find_by_config_token_hash(&mut self, token_hash: &str) -> Result<Option<Instance>, RepositoryError>;

    /// Atomically clears the config-fetch token fields, making the token
    /// single-use.
    async fn clear_config_token(&mut self, id: Ulid) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait VpnCredentialRepository: Send {
    async fn find_available(&mut self) -> Result<Option<VpnCredential>, RepositoryError>;

    async fn assign(&mut self, id: Ulid, user_id: Ulid, username: &str) -> Result<VpnCredential, RepositoryError>;

    async fn find_assigned_to(&mut self, user_id: Ulid) -> Result<Option<VpnCredential>, RepositoryError>;

    async fn count_available(&mut self) -> Result<i64, RepositoryError>;
}
