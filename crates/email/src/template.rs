//! Built-in email templates and `{{key}}` textual substitution.
//!
//! Mirrors the cloud-init substitution contract: replace placeholders
//! textually, warn on anything left unresolved, never fail the send.

use cadre_data_model::TemplateVars;

#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub name: &'static str,
    pub subject: &'static str,
    pub text_body: &'static str,
    pub html_body: Option<&'static str>,
}

/// A rendered copy of an [`EmailTemplate`] with variables substituted in.
#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

impl EmailTemplate {
    #[must_use]
    pub fn render(&self, variables: &TemplateVars) -> RenderedTemplate {
        RenderedTemplate {
            subject: substitute(self.subject, variables),
            text_body: substitute(self.text_body, variables),
            html_body: self.html_body.map(|h| substitute(h, variables)),
        }
    }
}

/// Replaces every `{{key}}` occurrence in `source` with its value from
/// `variables`. Placeholders with no matching key are left as-is and
/// logged at warn, same as cloud-init rendering.
#[must_use]
pub fn substitute(source: &str, variables: &TemplateVars) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            out.push_str(rest);
            return out;
        };
        let end = start + end;
        out.push_str(&rest[..start]);
        let key = rest[start + 2..end].trim();

        match variables.get(key) {
            Some(value) => out.push_str(value),
            None => {
                tracing::warn!(placeholder = key, "unresolved template placeholder");
                out.push_str(&rest[start..end + 2]);
            }
        }
        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    out
}

pub trait TemplateRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<EmailTemplate>;
}

/// The fixed set of system templates shipped with the service: the
/// downstream-credential email sent on confirmation, the initial
/// invitation, and the three-stage RSVP reminder sequence. Operators can
/// layer a database-backed registry in front of this one for
/// custom/non-system templates; the system set is always present as a
/// fallback so a misconfigured deployment still sends legible mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticTemplateRegistry;

impl TemplateRegistry for StaticTemplateRegistry {
    fn lookup(&self, name: &str) -> Option<EmailTemplate> {
        SYSTEM_TEMPLATES.iter().find(|t| t.name == name).cloned()
    }
}

const SYSTEM_TEMPLATES: &[EmailTemplate] = &[
    EmailTemplate {
        name: "invitation",
        subject: "You're invited to {{event_name}}",
        text_body: "Hi {{first_name}},\n\nYou have been invited to {{event_name}}, starting {{event_start_date}}.\n\nConfirm your participation: {{confirmation_url}}\n\nCadre Platform Team\n",
        html_body: None,
    },
    EmailTemplate {
        name: "password",
        subject: "Your access credentials for {{event_name}}",
        text_body: "Hi {{first_name}},\n\nYour account is ready.\n\nUsername: {{pandas_username}}\nLog in: {{login_url}}\n\nCadre Platform Team\n",
        html_body: None,
    },
    EmailTemplate {
        name: "invite_reminder_1",
        subject: "Reminder: RSVP for {{event_name}}",
        text_body: "Hi {{first_name}},\n\nWe sent you an invitation about a week ago and haven't heard back. {{days_until_event}} days until {{event_name}}.\n\nConfirm your participation: {{confirmation_url}}\n\nCadre Platform Team\n",
        html_body: None,
    },
    EmailTemplate {
        name: "invite_reminder_2",
        subject: "Don't miss out: {{event_name}} is coming soon",
        text_body: "Hi {{first_name}},\n\n{{days_until_event}} days left to confirm for {{event_name}}.\n\nConfirm your participation: {{confirmation_url}}\n\nCadre Platform Team\n",
        html_body: None,
    },
    EmailTemplate {
        name: "invite_reminder_3",
        subject: "Final reminder: {{event_name}} starts soon",
        text_body: "Hi {{first_name}},\n\nThis is the final reminder. {{event_name}} starts in {{days_until_event}} days and we still haven't heard from you.\n\nConfirm your participation: {{confirmation_url}}\n\nCadre Platform Team\n",
        html_body: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_keys() {
        let mut vars = TemplateVars::new();
        vars.insert("first_name".to_string(), "Jordan".to_string());
        assert_eq!(substitute("Hi {{first_name}}!", &vars), "Hi Jordan!");
    }

    #[test]
    fn leaves_unresolved_placeholders_intact() {
        let vars = TemplateVars::new();
        assert_eq!(substitute("Hi {{first_name}}!", &vars), "Hi {{first_name}}!");
    }

    #[test]
    fn system_registry_resolves_all_workflow_templates() {
        let registry = StaticTemplateRegistry;
        for name in ["invitation", "password", "invite_reminder_1", "invite_reminder_2", "invite_reminder_3"] {
            assert!(registry.lookup(name).is_some(), "missing template {name}");
        }
        assert!(registry.lookup("does_not_exist").is_none());
    }
}
