//! Email channel
//!
//! Mail is handed to an HTTP relay that accepts `{ from, to, subject, html }`
//! and takes care of SMTP itself.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{Notifier, NotifyError, templates};
use crate::config::EmailConfig;
use crate::model::{Monitor, TransitionEvent};

/// Something that can send one HTML email
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// [`EmailTransport`] posting JSON to a mail relay
#[derive(Debug, Clone)]
pub struct HttpMailRelay {
    client: Client,
    config: EmailConfig,
}

impl HttpMailRelay {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmailTransport for HttpMailRelay {
    #[instrument(skip(self, html_body))]
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.config.url).json(&RelayMessage {
            from: &self.config.from,
            to,
            subject,
            html: html_body,
        });
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!("mail relay accepted message");
        Ok(())
    }
}

/// Delivery to one email address
pub struct EmailNotifier {
    transport: Arc<dyn EmailTransport>,
    address: String,
}

impl EmailNotifier {
    pub fn new(transport: Arc<dyn EmailTransport>, address: String) -> Self {
        Self { transport, address }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, event: &TransitionEvent, monitor: &Monitor) -> Result<(), NotifyError> {
        let (subject, body) = templates::email(event, monitor)?;
        self.transport.send(&self.address, &subject, &body).await
    }
}
