// Copyright 2021-2026 The Cadre Project Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The event-driven asynchronous execution core: the Workflow Dispatcher,
//! Batch Worker, Scheduler, and the recurring jobs it drives.
//!
//! [`init`] wires a [`Scheduler`] with every recurring job the service
//! needs at startup; callers that need to trigger a one-shot (the
//! invitation job's debounce) or call a component directly (the license
//! and token services, which the HTTP surface also calls) use the free
//! functions in [`license`] and [`workflow::WorkflowDispatcher`] directly.

pub mod config;
pub mod email_worker;
mod error;
pub mod identity_sync;
pub mod instance_reconciler;
pub mod invitation_job;
pub mod license;
pub mod reminder_job;
pub mod scheduler;
pub mod session_cleanup;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;

use cadre_clock::Clock;
use cadre_cloud::CloudProvider;
use cadre_crypto::FieldCipher;
use cadre_email::Mailer;
use cadre_identity::IdentityProvider;
use cadre_storage::EventRepository;
use cadre_storage_pg::PgEventRepository;
use sqlx::PgPool;
use ulid::Ulid;

pub use error::TaskError;
pub use scheduler::{JobFn, JobFuture, Scheduler, Trigger};
pub use workflow::WorkflowDispatcher;

/// Every collaborator a job might need. Jobs borrow from this rather than
/// each constructing its own clients, so the CLI entrypoint is the only
/// place that wires concrete backends together.
pub struct State {
    pub pool: PgPool,
    pub clock: Arc<dyn Clock>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
    pub cipher: FieldCipher,
    pub cloud_providers: HashMap<String, Arc<dyn CloudProvider>>,
    pub config: config::SchedulerConfig,
}

/// Builds a [`Scheduler`] and registers every recurring job named in
/// `SPEC_FULL.md` §4.4 against it. Does not call [`Scheduler::start`] —
/// the caller decides when background execution actually begins.
#[must_use]
pub fn init(state: Arc<State>) -> Scheduler {
    let scheduler = Scheduler::new(state.pool.clone(), state.clock.clone(), state.config.service_name.clone());

    {
        let state = state.clone();
        scheduler.register_interval(
            "email_batch_processor",
            "email batch processor",
            state.config.email_batch_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = email_worker::run_batch(
                        &state.pool,
                        state.mailer.as_ref(),
                        state.clock.as_ref(),
                        state.config.email_batch_size,
                        None,
                        "scheduler",
                    )
                    .await
                    {
                        tracing::error!(error = %err, "email batch processor tick failed");
                    }
                })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "email_discovery_fallback",
            "email discovery fallback",
            state.config.email_discovery_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = email_worker::run_batch(
                        &state.pool,
                        state.mailer.as_ref(),
                        state.clock.as_ref(),
                        state.config.email_batch_size,
                        None,
                        "scheduler-discovery",
                    )
                    .await
                    {
                        tracing::error!(error = %err, "email discovery fallback tick failed");
                    }
                })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "identity_sync",
            "identity sync worker",
            state.config.identity_sync_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = identity_sync::run_identity_sync(
                        &state.pool,
                        state.identity.as_ref(),
                        &state.cipher,
                        state.clock.as_ref(),
                        state.config.identity_sync_batch_size,
                    )
                    .await
                    {
                        tracing::error!(error = %err, "identity sync tick failed");
                    }
                })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "instance_reconciler",
            "instance reconciler",
            state.config.instance_sync_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = instance_reconciler::run_instance_reconciler(&state.pool, &state.cloud_providers).await {
                        tracing::error!(error = %err, "instance reconciliation tick failed");
                    }
                })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "reminders",
            "reminder job",
            state.config.reminder_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move { run_reminders_for_active_event(&state).await })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "session_cleanup",
            "session cleanup",
            state.config.session_cleanup_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = session_cleanup::run_session_cleanup(&state.pool, state.clock.as_ref()).await {
                        tracing::error!(error = %err, "session cleanup tick failed");
                    }
                })
            }),
        );
    }

    {
        let state = state.clone();
        scheduler.register_interval(
            "license_slot_reaper",
            "license slot reaper",
            state.config.license_slot_reap_interval,
            Arc::new(move || {
                let state = state.clone();
                Box::pin(async move {
                    if let Err(err) = license::reap_all_expired_slots(&state.pool, state.clock.as_ref()).await {
                        tracing::error!(error = %err, "license slot reaper tick failed");
                    }
                })
            }),
        );
    }

    scheduler
}

async fn run_reminders_for_active_event(state: &State) {
    let active_event = {
        let mut conn = match state.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(error = %err, "failed to acquire connection for reminder job lookup");
                return;
            }
        };
        PgEventRepository::new(&mut conn).find_active().await
    };

    let event_id = match active_event {
        Ok(Some(event)) => event.id,
        Ok(None) => return,
        Err(err) => {
            tracing::error!(error = %err, "failed to look up active event for reminder job");
            return;
        }
    };

    let dispatcher = WorkflowDispatcher::new(state.pool.clone(), state.clock.clone());
    if let Err(err) =
        reminder_job::run_reminder_job(&state.pool, &dispatcher, state.clock.as_ref(), event_id, &state.config.reminder_thresholds).await
    {
        tracing::error!(error = %err, "reminder job tick failed");
    }
}

/// Schedules (or reschedules) the invitation job's debounced one-shot for
/// `event_id`, cancelling both the `_test` and `_prod` job-id variants
/// first (`SPEC_FULL.md` §4.5).
pub fn schedule_invitation_job(scheduler: &Scheduler, state: Arc<State>, event_id: Ulid, test_mode: bool) {
    let (test_id, prod_id) = invitation_job::invitation_job_ids(event_id);
    scheduler.cancel(&test_id);
    scheduler.cancel(&prod_id);

    let id = if test_mode { test_id } else { prod_id };
    let fire_at = state.clock.now() + chrono::Duration::seconds(30);

    scheduler.register_one_shot(
        id,
        format!("invitation emails for event {event_id}"),
        fire_at,
        Arc::new(move || {
            let state = state.clone();
            Box::pin(async move {
                let dispatcher = WorkflowDispatcher::new(state.pool.clone(), state.clock.clone());
                if let Err(err) = invitation_job::run_invitation_job(&state.pool, &dispatcher, event_id).await {
                    tracing::error!(error = %err, event.id = %event_id, "invitation job failed");
                }
            })
        }),
    );
}
