use async_trait::async_trait;
use cadre_data_model::{EmailStatus, User};
use ulid::Ulid;

use crate::RepositoryError;

/// Repository for the `User` aggregate.
#[async_trait]
pub trait UserRepository: Send {
    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, RepositoryError>;

    async fn find_by_normalized_email(
        &mut self,
        normalized_email: &str,
    ) -> Result<Option<User>, RepositoryError>;

    async fn exists_by_normalized_email(
        &mut self,
        normalized_email: &str,
    ) -> Result<bool, RepositoryError>;

    /// Active users with one of the given roles who have never been sent a
    /// confirmation/invitation for `event_id` and whose participation (if
    /// any) is still outstanding. Backs the invitation job's candidate
    /// selection (`SPEC_FULL.md` §4.5).
    async fn find_invitation_candidates(
        &mut self,
        event_id: Ulid,
        roles: &[cadre_data_model::UserRole],
    ) -> Result<Vec<User>, RepositoryError>;

    /// Users eligible for a reminder sweep: confirmed-or-invited for
    /// `event_id`, with the per-stage sent-at column still null.
    async fn find_reminder_candidates(
        &mut self,
        event_id: Ulid,
        stage: u8,
    ) -> Result<Vec<User>, RepositoryError>;

    async fn set_pandas_credentials(
        &mut self,
        user_id: Ulid,
        pandas_username: &str,
        pandas_password_encrypted: &str,
    ) -> Result<(), RepositoryError>;

    async fn mark_confirmation_sent(&mut self, user_id: Ulid) -> Result<(), RepositoryError>;

    async fn mark_invite_sent(&mut self, user_id: Ulid) -> Result<(), RepositoryError>;

    async fn mark_reminder_sent(&mut self, user_id: Ulid, stage: u8) -> Result<(), RepositoryError>;

    async fn set_email_status(
        &mut self,
        user_id: Ulid,
        status: EmailStatus,
    ) -> Result<(), RepositoryError>;
}
