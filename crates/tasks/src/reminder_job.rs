//! Reminder Job (`SPEC_FULL.md` §4.6): three independently-gated reminder
//! stages, each idempotent via its own `reminder_N_sent_at` column.

use cadre_clock::Clock;
use cadre_data_model::TemplateVars;
use cadre_storage::{EventRepository, UserRepository};
use cadre_storage_pg::{PgEventRepository, PgUserRepository};
use chrono::Duration;
use sqlx::PgPool;
use ulid::Ulid;

use crate::{
    config::ReminderThresholds,
    error::TaskError,
    workflow::WorkflowDispatcher,
};

fn trigger_name(stage: u8) -> String {
    format!("reminder_stage_{stage}")
}

#[tracing::instrument(name = "tasks.reminder_job.run", skip(pool, dispatcher, clock, thresholds), fields(event.id = %event_id), err)]
pub async fn run_reminder_job(
    pool: &PgPool,
    dispatcher: &WorkflowDispatcher,
    clock: &dyn Clock,
    event_id: Ulid,
    thresholds: &ReminderThresholds,
) -> Result<usize, TaskError> {
    let mut tx = pool.begin().await?;
    let event = PgEventRepository::new(&mut *tx).lookup(event_id).await?.ok_or(TaskError::NotFound)?;
    tx.commit().await?;

    let now = clock.now();
    let today = now.date_naive();
    let days_until_event = event.days_until_start(today);

    let mut total = 0usize;

    for stage in 1u8..=3 {
        let enabled = match stage {
            1 => thresholds.stage1.enabled,
            2 => thresholds.stage2.enabled,
            _ => thresholds.stage3.enabled,
        };
        if !enabled {
            continue;
        }

        let mut tx = pool.begin().await?;
        let candidates = PgUserRepository::new(&mut *tx).find_reminder_candidates(event_id, stage).await?;
        tx.commit().await?;

        for user in candidates {
            let fires = match stage {
                1 => {
                    user.invite_sent_at.map_or(false, |sent| now - sent >= Duration::days(thresholds.stage1.days_after_invite))
                        && days_until_event.map_or(true, |d| d >= thresholds.stage1.min_days_before_event)
                }
                2 => {
                    user.invite_sent_at.map_or(false, |sent| now - sent >= Duration::days(thresholds.stage2.days_after_invite))
                        && days_until_event.map_or(true, |d| d >= thresholds.stage2.min_days_before_event)
                }
                _ => days_until_event.map_or(false, |d| d <= thresholds.stage3.days_before_event),
            };
            if !fires {
                continue;
            }

            let mut vars = TemplateVars::new();
            vars.insert("event_name".to_string(), event.name.clone());
            if let Some(days) = days_until_event {
                vars.insert("days_until_event".to_string(), days.to_string());
            }

            let count = dispatcher.trigger(&trigger_name(stage), user.id, vars, false).await?;
            if count == 0 {
                continue;
            }

            let mut tx = pool.begin().await?;
            PgUserRepository::new(&mut *tx).mark_reminder_sent(user.id, stage).await?;
            tx.commit().await?;

            total += count;
        }
    }

    Ok(total)
}
