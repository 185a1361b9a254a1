//! Storage-agnostic repository traits for the cadre core.
//!
//! `cadre-storage-pg` provides the Postgres implementations; everything in
//! `cadre-tasks` and `cadre-handlers` is written against these traits so
//! the concurrency and dedupe contracts documented here are the only thing
//! callers need to rely on.

mod audit;
mod batch_log;
mod email_queue;
mod error;
mod event;
mod identity_sync;
mod instance;
mod license;
mod scheduler_status;
mod session;
mod user;
mod workflow;

pub use audit::AuditLogRepository;
pub use batch_log::BatchLogRepository;
pub use email_queue::{EmailQueueRepository, EnqueueRequest};
pub use error::RepositoryError;
pub use event::{EventParticipationRepository, EventRepository};
pub use identity_sync::{IdentitySyncCounts, IdentitySyncRepository};
pub use instance::{InstanceRepository, VpnCredentialRepository};
pub use license::{LicenseProductRepository, LicenseSlotRepository, LicenseTokenRepository};
pub use scheduler_status::SchedulerStatusRepository;
pub use session::SessionRepository;
pub use user::UserRepository;
pub use workflow::EmailWorkflowRepository;
