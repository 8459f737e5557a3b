//! Push channel (ntfy-style)
//!
//! A message is a `POST` of plain text to `server_url/topic` with `Title`,
//! `Priority` and `Tags` headers.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

use super::{ChannelConfig, Notifier, NotifyError, PushAuth, templates};
use crate::model::{Monitor, MonitorStatus, TransitionEvent};

/// Something that can POST a push message and report the status code
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, url: &str, headers: &[(String, String)], body: String) -> Result<u16, NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestPushTransport {
    client: Client,
}

impl ReqwestPushTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PushTransport for ReqwestPushTransport {
    async fn send(&self, url: &str, headers: &[(String, String)], body: String) -> Result<u16, NotifyError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| NotifyError::InvalidConfiguration(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| NotifyError::InvalidConfiguration(format!("invalid header value: {e}")))?;
            header_map.insert(name, value);
        }

        let response = self.client.post(url).headers(header_map).body(body).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Destination of a push channel
pub fn topic_url(server_url: &str, topic: &str) -> Result<url::Url, NotifyError> {
    let raw = format!(
        "{}/{}",
        server_url.trim().trim_end_matches('/'),
        topic.trim().trim_start_matches('/')
    );
    let url = url::Url::parse(&raw).map_err(|e| NotifyError::InvalidConfiguration(format!("'{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(NotifyError::InvalidConfiguration(format!("'{raw}' is not an http(s) url")));
    }
    Ok(url)
}

/// `Authorization` header for an auth mode
pub fn authorization(auth: &PushAuth) -> Option<String> {
    match auth {
        PushAuth::None => None,
        PushAuth::Basic { username, password } => {
            Some(format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))))
        }
        PushAuth::Bearer { token } => Some(format!("Bearer {token}")),
    }
}

/// Delivery to one push topic
pub struct PushNotifier {
    transport: Arc<dyn PushTransport>,
    url: url::Url,
    priority: u8,
    authorization: Option<String>,
}

impl PushNotifier {
    /// Fails when the channel is not a push channel or its URL is malformed
    pub fn new(transport: Arc<dyn PushTransport>, channel: ChannelConfig) -> Result<Self, NotifyError> {
        let ChannelConfig::Push {
            server_url,
            topic,
            priority,
            auth,
        } = channel
        else {
            return Err(NotifyError::InvalidConfiguration(
                "expected a push channel".to_string(),
            ));
        };

        Ok(Self {
            transport,
            url: topic_url(&server_url, &topic)?,
            priority,
            authorization: authorization(&auth),
        })
    }

    fn headers(&self, title: String, current: MonitorStatus) -> Vec<(String, String)> {
        let tag = match current {
            MonitorStatus::Up => "green_circle",
            MonitorStatus::Down => "red_circle",
            MonitorStatus::Pending => "white_circle",
        };

        let mut headers = vec![
            ("Title".to_string(), title),
            ("Priority".to_string(), self.priority.to_string()),
            ("Tags".to_string(), tag.to_string()),
        ];
        if let Some(authorization) = &self.authorization {
            headers.push(("Authorization".to_string(), authorization.clone()));
        }
        headers
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn deliver(&self, event: &TransitionEvent, monitor: &Monitor) -> Result<(), NotifyError> {
        let (title, body) = templates::push(event, monitor)?;
        let status = self
            .transport
            .send(self.url.as_str(), &self.headers(title, event.current), body)
            .await?;

        trace!("push server answered {status}");
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(NotifyError::Rejected { status })
        }
    }
}
