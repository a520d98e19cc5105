use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for MailerError {
    fn from(err: reqwest::Error) -> Self {
        MailerError::Transport(err.to_string())
    }
}

/// A rendered alert email, transport-agnostic.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// The email-sending contract the notification worker depends on.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, email: &OutgoingEmail) -> Result<(), MailerError>;
}

#[derive(Serialize)]
struct MailApiRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Default mailer: posts the message to a JSON mail-delivery API.
pub struct HttpApiMailer {
    client: Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpApiMailer {
    pub fn new(endpoint: String, api_key: String, from: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpApiMailer {
    async fn send(&self, to: &str, email: &OutgoingEmail) -> Result<(), MailerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&MailApiRequest {
                from: &self.from,
                to,
                subject: &email.subject,
                html: &email.html,
                text: &email.text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(to, subject = %email.subject, "Sent alert email.");
        Ok(())
    }
}
