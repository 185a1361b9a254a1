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

//! Outbound mail delivery and inbound provider webhook verification.
//!
//! The batch worker treats the mailer as a collaborator: it asks for a
//! template by name plus a variable map and gets back a delivery outcome.
//! This crate owns the one concrete implementation we ship (SMTP via
//! `lettre`) and the small built-in template set; a different deployment
//! could swap in a managed-provider `Mailer` without touching callers.

pub mod template;
pub mod webhook;

use async_trait::async_trait;
use cadre_data_model::TemplateVars;
use lettre::{
    message::{header::ContentType, Attachment as LettreAttachment, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

pub use template::{EmailTemplate, StaticTemplateRegistry, TemplateRegistry};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("unknown template {0:?}")]
    UnknownTemplate(String),

    #[error("invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("message build failed: {0}")]
    Build(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A binary attachment, as accepted by [`Mailer::send`].
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A single outbound send request.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub template_name: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub variables: TemplateVars,
    pub attachment: Option<Attachment>,
}

/// The result of a successful (from the transport's perspective) send.
/// `ok = false` with a classified `message` represents a provider-level
/// rejection the caller should record as a failed attempt rather than
/// retry identically.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub ok: bool,
    pub message: String,
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<SendOutcome, MailerError>;
}

/// SMTP-backed mailer built on `lettre`. In non-production deployments,
/// `test_override_address` redirects every send to a fixed mailbox
/// (`SPEC_FULL.md` §6 `test_email_override`) while leaving the rendered
/// subject/body untouched, so operators can see what would have gone
/// out without risking a misdirected send to a real participant.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    from_name: String,
    templates: Box<dyn TemplateRegistry>,
    test_override_address: Option<String>,
}

pub struct SmtpMailerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: String,
    pub test_override_address: Option<String>,
}

impl SmtpMailer {
    pub fn new(config: SmtpMailerConfig, templates: Box<dyn TemplateRegistry>) -> Result<Self, MailerError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailerError::Build(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let builder = match (config.username, config.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user, pass)),
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from_address: config.from_address,
            from_name: config.from_name,
            templates,
            test_override_address: config.test_override_address,
        })
    }

    fn render_vars(&self, template_name: &str, variables: &TemplateVars) -> Result<EmailTemplate, MailerError> {
        let template = self
            .templates
            .lookup(template_name)
            .ok_or_else(|| MailerError::UnknownTemplate(template_name.to_string()))?;
        Ok(template.render(variables))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[tracing::instrument(name = "mailer.send", skip_all, fields(email.template = %message.template_name), err)]
    async fn send(&self, message: OutboundMessage) -> Result<SendOutcome, MailerError> {
        let rendered = self.render_vars(&message.template_name, &message.variables)?;

        let (to_email, to_name) = match &self.test_override_address {
            Some(addr) => {
                tracing::warn!(
                    original = %message.recipient_email,
                    override_address = %addr,
                    "redirecting outbound email to test override address"
                );
                (addr.clone(), "Test Override".to_string())
            }
            None => (message.recipient_email.clone(), message.recipient_name.clone()),
        };

        let from = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e: lettre::address::AddressError| MailerError::InvalidAddress(e.to_string()))?;
        let to = format!("{to_name} <{to_email}>")
            .parse()
            .map_err(|e: lettre::address::AddressError| MailerError::InvalidAddress(e.to_string()))?;

        let body = match rendered.html_body {
            Some(html) => MultiPart::alternative()
                .singlepart(SinglePart::plain(rendered.text_body))
                .singlepart(SinglePart::html(html)),
            None => MultiPart::mixed().singlepart(SinglePart::plain(rendered.text_body)),
        };

        let body = if let Some(attachment) = message.attachment {
            let content_type = ContentType::parse(&attachment.mime_type)
                .map_err(|e| MailerError::Build(e.to_string()))?;
            body.singlepart(LettreAttachment::new(attachment.filename).body(attachment.bytes, content_type))
        } else {
            body
        };

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(rendered.subject)
            .multipart(body)
            .map_err(|e| MailerError::Build(e.to_string()))?;

        match self.transport.send(email).await {
            Ok(response) => Ok(SendOutcome {
                ok: true,
                message: "sent".to_string(),
                provider_message_id: response.message().next().map(ToString::to_string),
            }),
            Err(err) => {
                tracing::warn!(error = %err, "smtp delivery failed");
                Err(MailerError::Delivery(err.to_string()))
            }
        }
    }
}

/// Test-only mailer that records every call instead of sending, for
/// exercising the batch worker and workflow dispatcher without a
/// network dependency.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: OutboundMessage) -> Result<SendOutcome, MailerError> {
        let id = format!("test-{}", self.sent.lock().unwrap().len());
        self.sent.lock().unwrap().push(message);
        Ok(SendOutcome {
            ok: true,
            message: "recorded".to_string(),
            provider_message_id: Some(id),
        })
    }
}
