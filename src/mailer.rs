use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{Result, TrackError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    ConnectionRequested { eit_name: String },
    ConnectionAccepted { supervisor_name: String },
    ConnectionDenied { supervisor_name: String },
    General { title: String, message: String },
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            EmailTemplate::ConnectionRequested { .. } => "connection_requested",
            EmailTemplate::ConnectionAccepted { .. } => "connection_accepted",
            EmailTemplate::ConnectionDenied { .. } => "connection_denied",
            EmailTemplate::General { .. } => "general",
        }
    }

    pub fn subject(&self) -> String {
        match self {
            EmailTemplate::ConnectionRequested { eit_name } => {
                format!("{eit_name} requested you as their supervisor")
            }
            EmailTemplate::ConnectionAccepted { supervisor_name } => {
                format!("{supervisor_name} accepted your connection request")
            }
            EmailTemplate::ConnectionDenied { supervisor_name } => {
                format!("{supervisor_name} declined your connection request")
            }
            EmailTemplate::General { title, .. } => title.clone(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            EmailTemplate::ConnectionRequested { eit_name } => format!(
                "{eit_name} would like you to supervise their engineering experience. \
                 Sign in to review the request."
            ),
            EmailTemplate::ConnectionAccepted { supervisor_name } => format!(
                "{supervisor_name} is now your supervisor. They can review and approve \
                 your experiences."
            ),
            EmailTemplate::ConnectionDenied { supervisor_name } => format!(
                "{supervisor_name} declined your request. You can send a request to a \
                 different supervisor from your dashboard."
            ),
            EmailTemplate::General { message, .. } => message.clone(),
        }
    }

    pub fn render(&self, to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            template: self.name(),
            subject: self.subject(),
            body: self.body(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub template: &'static str,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Posts messages to the hosted email function.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| TrackError::Mail(e.to_string()))?;

        info!(to = %message.to, template = message.template, "email sent");
        Ok(())
    }
}

/// Used when no email function is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            template = message.template,
            subject = %message.subject,
            "email delivery disabled, message logged"
        );
        Ok(())
    }
}
