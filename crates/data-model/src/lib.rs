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

//! Domain entities shared by the storage, tasks and handlers crates.
//!
//! These are plain data holders with no persistence or business logic
//! attached; the repository traits in `cadre-storage` are what load and
//! save them.

mod audit;
mod email;
mod event;
mod identity;
mod instance;
mod license;
mod scheduler_status;
mod session;
mod user;

pub use audit::{AuditLogEntry, AuditEventType};
pub use email::{BatchLog, EmailQueueRow, EmailQueueStatus, EmailWorkflow};
pub use event::{Event, EventParticipation, ParticipationStatus};
pub use identity::{IdentitySyncOperation, IdentitySyncRow};
pub use instance::{Instance, InstanceStatus, VpnCredential};
pub use license::{AcquireOutcome, LicenseProduct, LicenseSlot, LicenseSlotResult, LicenseToken};
pub use scheduler_status::{JobDescriptor, SchedulerStatus};
pub use session::BrowserSession;
pub use user::{EmailStatus, User, UserRole};

/// Normalize an email address the way the invitation pipeline expects:
/// lowercase, trimmed, and Gmail/Googlemail period-stripping (while
/// preserving `+tag` addressing).
#[must_use]
pub fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();

    let Some((local, domain)) = email.rsplit_once('@') else {
        return email;
    };

    let is_gmail = domain == "gmail.com" || domain == "googlemail.com" || domain.ends_with(".google.com");

    if is_gmail {
        let local = local.replace('.', "");
        format!("{local}@{domain}")
    } else {
        format!("{local}@{domain}")
    }
}

/// Generate a URL-friendly slug from an event name: lowercase, strip
/// everything but alphanumerics/spaces/hyphens, collapse separators.
#[must_use]
pub fn generate_slug(name: &str) -> String {
    let lower = name.to_lowercase();
    let filtered: String = lower
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .collect();

    let mut slug = String::with_capacity(filtered.len());
    let mut last_was_sep = false;
    for c in filtered.chars() {
        if c == ' ' || c == '-' {
            if !last_was_sep && !slug.is_empty() {
                slug.push('-');
                last_was_sep = true;
            }
        } else {
            slug.push(c);
            last_was_sep = false;
        }
    }

    slug.trim_matches('-').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_gmail_dots_but_keeps_plus_tags() {
        assert_eq!(normalize_email("  John.Doe@EXAMPLE.COM  "), "john.doe@example.com");
        assert_eq!(normalize_email("Wes.Huang@Gmail.com"), "weshuang@gmail.com");
        assert_eq!(normalize_email("wes+work@gmail.com"), "wes+work@gmail.com");
        assert_eq!(normalize_email("test.user@company.com"), "test.user@company.com");
    }

    #[test]
    fn slugifies_event_names() {
        assert_eq!(generate_slug("CyberX Red Team Exercise 2026"), "cyberx-red-team-exercise-2026");
        assert_eq!(generate_slug("Spring Event 2026!"), "spring-event-2026");
        assert_eq!(generate_slug("  --weird--spacing--  "), "weird-spacing");
    }
}
