//! Periodic job scheduler (`SPEC_FULL.md` §4.4).
//!
//! Each registered job owns a dedicated background task that loops
//! sequentially: compute the next fire time, sleep until it, run the job,
//! repeat. Because a job never computes its *next* fire time until its
//! *current* run has returned, `max_instances = 1` falls out of the loop
//! shape rather than needing a separate guard. `coalesce = true` is
//! `tokio::time::MissedTickBehavior::Skip` on the underlying interval: a
//! run that overruns its period doesn't trigger a burst of catch-up ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use cadre_clock::Clock;
use cadre_data_model::JobDescriptor;
use cadre_storage::SchedulerStatusRepository;
use cadre_storage_pg::PgSchedulerStatusRepository;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::PgPool;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::TaskError;

/// Firings delayed past this are dropped rather than run (`SPEC_FULL.md`
/// §4.4).
pub const MISFIRE_GRACE: chrono::Duration = chrono::Duration::seconds(300);

pub type JobFuture = BoxFuture<'static, ()>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Clone)]
pub enum Trigger {
    Interval(StdDuration),
    Cron(cron::Schedule),
    OneShotAt(DateTime<Utc>),
}

impl Trigger {
    fn label(&self) -> String {
        match self {
            Self::Interval(period) => format!("interval({}s)", period.as_secs()),
            Self::Cron(schedule) => format!("cron({schedule})"),
            Self::OneShotAt(at) => format!("one_shot({at})"),
        }
    }
}

struct RegisteredJob {
    id: String,
    name: String,
    trigger: Trigger,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

/// Drives the recurring jobs and ad-hoc one-shots that make up the
/// background execution core. One instance per running service process.
pub struct Scheduler {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    service_name: String,
    jobs: Mutex<Vec<RegisteredJob>>,
    one_shots: Mutex<HashMap<String, CancellationToken>>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Scheduler {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, service_name: impl Into<String>) -> Self {
        Self {
            pool,
            clock,
            service_name: service_name.into(),
            jobs: Mutex::new(Vec::new()),
            one_shots: Mutex::new(HashMap::new()),
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Registers a job firing every `period`. Must be called before
    /// [`Self::start`]; recurring jobs are fixed at startup.
    pub fn register_interval(&self, id: impl Into<String>, name: impl Into<String>, period: StdDuration, job: JobFn) {
        self.push_recurring(id.into(), name.into(), Trigger::Interval(period), job);
    }

    /// Registers a job on a cron schedule.
    pub fn register_cron(&self, id: impl Into<String>, name: impl Into<String>, expr: &str, job: JobFn) -> Result<(), TaskError> {
        let schedule: cron::Schedule = expr.parse().map_err(|err: cron::error::Error| TaskError::InvalidSchedule(err.to_string()))?;
        self.push_recurring(id.into(), name.into(), Trigger::Cron(schedule), job);
        Ok(())
    }

    fn push_recurring(&self, id: String, name: String, trigger: Trigger, job: JobFn) {
        let next_run = Arc::new(Mutex::new(None));
        self.jobs.lock().expect("scheduler jobs mutex poisoned").push(RegisteredJob {
            id: id.clone(),
            name: name.clone(),
            trigger: trigger.clone(),
            next_run: next_run.clone(),
        });

        let cancellation = self.cancellation_token.clone();
        self.task_tracker.spawn(run_recurring_loop(id, name, trigger, job, next_run, cancellation));
    }

    /// Schedules (or replaces) a one-shot job at `fire_at`. Registering a
    /// second one-shot under the same `id` cancels the first. A `fire_at`
    /// already more than [`MISFIRE_GRACE`] in the past is dropped rather
    /// than run immediately.
    pub fn register_one_shot(&self, id: impl Into<String>, name: impl Into<String>, fire_at: DateTime<Utc>, job: JobFn) {
        let id = id.into();
        let name = name.into();

        self.cancel(&id);

        let now = self.clock.now();
        if now - fire_at > MISFIRE_GRACE {
            tracing::warn!(job.id = id, fire_at = %fire_at, "one-shot firing missed its misfire grace window, dropping");
            return;
        }

        let token = CancellationToken::new();
        self.one_shots.lock().expect("scheduler one-shots mutex poisoned").insert(id.clone(), token.clone());

        self.task_tracker.spawn(run_one_shot(id, name, fire_at, job, token, self.cancellation_token.clone()));
    }

    /// Cancels a pending one-shot by id. No-op if none is pending.
    pub fn cancel(&self, id: &str) {
        if let Some(token) = self.one_shots.lock().expect("scheduler one-shots mutex poisoned").remove(id) {
            token.cancel();
        }
    }

    /// Starts the heartbeat loop. Recurring jobs are already running from
    /// the moment they were registered; this just adds the scheduler's own
    /// status row upkeep.
    pub fn start(&self) {
        let pool = self.pool.clone();
        let clock = self.clock.clone();
        let service_name = self.service_name.clone();
        let cancellation = self.cancellation_token.clone();
        let jobs_snapshot = self.snapshot_fn();

        self.task_tracker.spawn(run_heartbeat_loop(pool, clock, service_name, jobs_snapshot, cancellation));
    }

    /// Signals every running job to stop and waits for in-flight runs to
    /// return.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    #[must_use]
    pub fn jobs(&self) -> Vec<JobDescriptor> {
        self.jobs
            .lock()
            .expect("scheduler jobs mutex poisoned")
            .iter()
            .map(|job| JobDescriptor {
                id: job.id.clone(),
                name: job.name.clone(),
                next_run: *job.next_run.lock().expect("job next_run mutex poisoned"),
                trigger: job.trigger.label(),
            })
            .collect()
    }

    fn snapshot_fn(&self) -> Arc<dyn Fn() -> Vec<JobDescriptor> + Send + Sync> {
        let jobs = self.jobs.lock().expect("scheduler jobs mutex poisoned");
        let descriptors: Vec<_> = jobs
            .iter()
            .map(|job| (job.id.clone(), job.name.clone(), job.trigger.label(), job.next_run.clone()))
            .collect();
        Arc::new(move || {
            descriptors
                .iter()
                .map(|(id, name, trigger, next_run)| JobDescriptor {
                    id: id.clone(),
                    name: name.clone(),
                    trigger: trigger.clone(),
                    next_run: *next_run.lock().expect("job next_run mutex poisoned"),
                })
                .collect()
        })
    }
}

async fn run_recurring_loop(
    id: String,
    name: String,
    trigger: Trigger,
    job: JobFn,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    cancellation: CancellationToken,
) {
    match trigger {
        Trigger::Interval(period) => {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let chrono_period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::zero());
            loop {
                *next_run.lock().expect("job next_run mutex poisoned") = Some(Utc::now() + chrono_period);
                tokio::select! {
                    _ = cancellation.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                tracing::debug!(job.id = id, job.name = name, "recurring job tick firing");
                job().await;
            }
        }
        Trigger::Cron(schedule) => loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                tracing::error!(job.id = id, "cron schedule has no further firings, stopping job");
                return;
            };
            *next_run.lock().expect("job next_run mutex poisoned") = Some(next);

            let delay = (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            tracing::debug!(job.id = id, job.name = name, "cron job tick firing");
            job().await;
        },
        Trigger::OneShotAt(_) => unreachable!("one-shot triggers are driven by run_one_shot, not this loop"),
    }
}

async fn run_one_shot(id: String, name: String, fire_at: DateTime<Utc>, job: JobFn, token: CancellationToken, scheduler_cancellation: CancellationToken) {
    let delay = (fire_at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
    let deadline = Instant::now() + delay;

    tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!(job.id = id, job.name = name, "one-shot job cancelled before firing");
            return;
        }
        _ = scheduler_cancellation.cancelled() => return,
        _ = sleep_until(deadline) => {}
    }

    tracing::info!(job.id = id, job.name = name, "one-shot job firing");
    job().await;
}

#[tracing::instrument(name = "tasks.scheduler.heartbeat_loop", skip_all)]
async fn run_heartbeat_loop(
    pool: PgPool,
    clock: Arc<dyn Clock>,
    service_name: String,
    snapshot: Arc<dyn Fn() -> Vec<JobDescriptor> + Send + Sync>,
    cancellation: CancellationToken,
) {
    let mut ticker = interval(StdDuration::from_secs(60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                let _ = write_heartbeat(&pool, clock.as_ref(), &service_name, false, snapshot()).await;
                return;
            }
            _ = ticker.tick() => {}
        }

        if let Err(err) = write_heartbeat(&pool, clock.as_ref(), &service_name, true, snapshot()).await {
            tracing::warn!(error = %err, "scheduler heartbeat write failed");
        }
    }
}

async fn write_heartbeat(
    pool: &PgPool,
    clock: &dyn Clock,
    service_name: &str,
    running: bool,
    jobs: Vec<JobDescriptor>,
) -> Result<(), TaskError> {
    let mut tx = pool.begin().await?;
    PgSchedulerStatusRepository::new(&mut *tx, service_name).heartbeat(clock.now(), running, jobs).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use cadre_clock::SystemClock;
    use sqlx::PgPool;

    use super::*;

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn rescheduling_a_one_shot_under_the_same_id_cancels_the_prior_instance(pool: PgPool) {
        let scheduler = Scheduler::new(pool, Arc::new(SystemClock), "test-service");

        let first_ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let second_ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let fire_at = Utc::now() + chrono::Duration::milliseconds(200);
        {
            let first_ran = first_ran.clone();
            scheduler.register_one_shot(
                "invitation_emails_event_x_test",
                "first toggle",
                fire_at,
                Arc::new(move || {
                    let first_ran = first_ran.clone();
                    Box::pin(async move {
                        first_ran.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        // A second toggle under the same job id replaces the first before it fires.
        {
            let second_ran = second_ran.clone();
            scheduler.register_one_shot(
                "invitation_emails_event_x_test",
                "second toggle",
                fire_at,
                Arc::new(move || {
                    let second_ran = second_ran.clone();
                    Box::pin(async move {
                        second_ran.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        tokio::time::sleep(StdDuration::from_millis(400)).await;

        assert_eq!(first_ran.load(Ordering::SeqCst), 0, "the superseded one-shot must never fire");
        assert_eq!(second_ran.load(Ordering::SeqCst), 1, "the replacement one-shot must fire exactly once");

        scheduler.stop().await;
    }

    #[sqlx::test(migrator = "cadre_storage_pg::MIGRATOR")]
    async fn explicit_cancel_prevents_a_pending_one_shot_from_firing(pool: PgPool) {
        let scheduler = Scheduler::new(pool, Arc::new(SystemClock), "test-service");
        let ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let fire_at = Utc::now() + chrono::Duration::milliseconds(200);
        {
            let ran = ran.clone();
            scheduler.register_one_shot(
                "cancel-me",
                "cancellable job",
                fire_at,
                Arc::new(move || {
                    let ran = ran.clone();
                    Box::pin(async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        scheduler.cancel("cancel-me");
        tokio::time::sleep(StdDuration::from_millis(400)).await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        scheduler.stop().await;
    }
}
