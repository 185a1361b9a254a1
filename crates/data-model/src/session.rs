use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A weak reference to a browser login session. Sessions themselves are an
/// HTTP-surface concern out of scope for this core (`SPEC_FULL.md` §3); the
/// core only needs enough of a shape to expire stale rows on a schedule and
/// to back the best-effort login rate-limit cache's durable fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSession {
    pub id: Ulid,
    pub user_id: Ulid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
