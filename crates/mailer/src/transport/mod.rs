use std::time::Duration;

use async_trait::async_trait;
use law_journal_domain::config::MailConfig;
use law_journal_domain::model::OutboundEmail;
use law_journal_domain::notification::{NotificationError, Notifier};
use tokio::time::timeout;
use tracing::debug;

mod types;

pub use types::{MailAddress, ProviderErrorBody, SendMailRequest};

const MAX_ERROR_BODY: usize = 256;

/// Posts rendered emails to an HTTP mail API with a bearer key.
#[derive(Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: MailAddress,
    timeout: Duration,
}

impl HttpMailTransport {
    pub fn new(config: &MailConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.api_url().to_string(),
            api_key: config.api_key().to_string(),
            from: MailAddress {
                email: config.from_address().to_string(),
                name: Some(config.from_name().to_string()),
            },
            timeout: config.timeout(),
        })
    }

    fn request_for(&self, email: &OutboundEmail) -> SendMailRequest {
        SendMailRequest {
            from: self.from.clone(),
            to: vec![MailAddress {
                email: email.recipient.clone(),
                name: None,
            }],
            subject: email.subject.clone(),
            html: email.html_body.clone(),
            text: email.text_body.clone(),
            tags: vec![email.kind.as_ref().to_owned()],
        }
    }
}

#[async_trait]
impl Notifier for HttpMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotificationError> {
        let body = self.request_for(email);
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| NotificationError::Timeout(self.timeout.as_secs()))?
            .map_err(|err| NotificationError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(kind = email.kind.as_ref(), "mail accepted by provider");
            return Ok(());
        }

        let raw = timeout(self.timeout, response.text())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        let message = serde_json::from_str::<ProviderErrorBody>(&raw)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| raw.chars().take(MAX_ERROR_BODY).collect());
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
