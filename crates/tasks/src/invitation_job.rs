//! Invitation Job (`SPEC_FULL.md` §4.5): finds never-invited eligible
//! users for the active event and enqueues invitation emails through the
//! Workflow Dispatcher.

use cadre_data_model::UserRole;
use cadre_storage::{EventParticipationRepository, EventRepository, UserRepository};
use cadre_storage_pg::{PgEventParticipationRepository, PgEventRepository, PgUserRepository};
use sqlx::PgPool;
use ulid::Ulid;

use crate::{error::TaskError, workflow::WorkflowDispatcher};

/// Trigger name the dispatcher matches against the `EmailWorkflow` table
/// for an initial invitation. A deployment-configured workflow row is what
/// actually maps this to a template name.
pub const INVITATION_TRIGGER: &str = "user_invited";

#[tracing::instrument(name = "tasks.invitation_job.run", skip(pool, dispatcher), fields(event.id = %event_id), err)]
pub async fn run_invitation_job(pool: &PgPool, dispatcher: &WorkflowDispatcher, event_id: Ulid) -> Result<usize, TaskError> {
    let mut tx = pool.begin().await?;
    let event = PgEventRepository::new(&mut *tx).lookup(event_id).await?.ok_or(TaskError::NotFound)?;
    tx.commit().await?;

    if !event.test_mode && !event.registration_open {
        tracing::info!(event.id = %event_id, "registration closed and not in test mode, skipping invitation sweep");
        return Ok(0);
    }

    let roles: &[UserRole] = if event.test_mode { &[UserRole::Sponsor] } else { &[UserRole::Invitee, UserRole::Sponsor] };

    let mut tx = pool.begin().await?;
    let candidates = PgUserRepository::new(&mut *tx).find_invitation_candidates(event_id, roles).await?;
    tx.commit().await?;

    let mut enqueued = 0usize;
    for user in candidates {
        let mut vars = cadre_data_model::TemplateVars::new();
        vars.insert("event_name".to_string(), event.name.clone());
        vars.insert("event_year".to_string(), event.year.to_string());

        let count = dispatcher.trigger(INVITATION_TRIGGER, user.id, vars, false).await?;
        if count == 0 {
            continue;
        }

        let mut tx = pool.begin().await?;
        PgEventParticipationRepository::new(&mut *tx).ensure_invited(user.id, event_id, None).await?;
        PgUserRepository::new(&mut *tx).mark_confirmation_sent(user.id).await?;
        PgUserRepository::new(&mut *tx).mark_invite_sent(user.id).await?;
        tx.commit().await?;

        enqueued += count;
    }

    Ok(enqueued)
}

/// The pair of one-shot job ids a single event/test-mode toggle maps to.
/// Both are cancelled before either is (re-)scheduled — `SPEC_FULL.md`
/// §4.5's cancellation contract.
#[must_use]
pub fn invitation_job_ids(event_id: Ulid) -> (String, String) {
    (format!("invitation_emails_event_{event_id}_test"), format!("invitation_emails_event_{event_id}_prod"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_distinct_and_stable_per_event() {
        let event_id = Ulid::new();
        let (test_id, prod_id) = invitation_job_ids(event_id);

        assert_ne!(test_id, prod_id);
        assert_eq!(invitation_job_ids(event_id), (test_id, prod_id));

        let (other_test_id, _) = invitation_job_ids(Ulid::new());
        assert_ne!(other_test_id, invitation_job_ids(event_id).0);
    }
}
