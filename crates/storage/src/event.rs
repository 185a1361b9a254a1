use async_trait::async_trait;
use cadre_data_model::{Event, EventParticipation, ParticipationStatus};
use ulid::Ulid;

use crate::RepositoryError;

#[async_trait]
pub trait EventRepository: Send {
    async fn lookup(&mut self, id: Ulid) -> Result<Option<Event>, RepositoryError>;

    async fn find_active(&mut self) -> Result<Option<Event>, RepositoryError>;

    /// Deactivates any currently-active event and activates `id`, in one
    /// transition. `SPEC_FULL.md` §3: "at most one active row" is an
    /// explicit transition, not a uniqueness constraint.
    async fn activate(&mut self, id: Ulid) -> Result<Event, RepositoryError>;

    async fn set_test_mode(&mut self, id: Ulid, test_mode: bool) -> Result<Event, RepositoryError>;
}

#[async_trait]
pub trait EventParticipationRepository: Send {
    async fn find_for(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
    ) -> Result<Option<EventParticipation>, RepositoryError>;

    /// Creates a participation row in `Invited` status if one doesn't
    /// already exist for (user_id, event_id); idempotent.
    async fn ensure_invited(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
        invited_by_user_id: Option<Ulid>,
    ) -> Result<EventParticipation, RepositoryError>;

    async fn set_status(
        &mut self,
        user_id: Ulid,
        event_id: Ulid,
        status: ParticipationStatus,
    ) -> Result<EventParticipation, RepositoryError>;
}
