//! Outbound email through an HTTP relay.
//!
//! Delivery is fire-and-forget: [`Mailer::send_detached`] spawns the request
//! and only logs the outcome.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail relay answered {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
pub enum Mailer {
    /// No relay configured; messages are dropped after logging.
    Disabled,
    Http {
        client: reqwest::Client,
        relay_url: String,
        from: String,
    },
}

impl Mailer {
    pub fn http(relay_url: &str, from: &str) -> Result<Self, MailError> {
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Mailer::Http {
            client,
            relay_url: relay_url.to_string(),
            from: from.to_string(),
        })
    }

    pub async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<(), MailError> {
        let Mailer::Http {
            client,
            relay_url,
            from,
        } = self
        else {
            info!(subject = %subject, recipients = to.len(), "Mail disabled, dropping message");
            return Ok(());
        };

        let mail = OutgoingMail {
            from: from.clone(),
            to: to.to_vec(),
            subject: subject.to_string(),
            html: html.to_string(),
        };
        let response = client.post(relay_url.as_str()).json(&mail).send().await?;
        if !response.status().is_success() {
            return Err(MailError::Status(response.status()));
        }
        Ok(())
    }

    /// Send in a background task. Failures are logged, never retried.
    pub fn send_detached(&self, to: Vec<String>, subject: String, html: String) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&to, &subject, &html).await {
                warn!(error = %e, subject = %subject, "Failed to deliver email");
            }
        });
    }
}

/// A message ready to hand to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub html: String,
}

pub fn confirmation_message(base_ui_host: &str, first_name: &str, token: &str) -> Message {
    let link = format!(
        "{}/confirmar-email/{}",
        base_ui_host.trim_end_matches('/'),
        token
    );
    Message {
        subject: "Confirm your email".to_string(),
        html: format!(
            "<p>Hi {},</p><p>Confirm your account by opening <a href=\"{}\">{}</a>.</p>",
            escape_html(first_name),
            link,
            link
        ),
    }
}

pub fn recovery_message(base_ui_host: &str, first_name: &str, token: &str) -> Message {
    let link = format!(
        "{}/recuperar-senha/{}",
        base_ui_host.trim_end_matches('/'),
        token
    );
    Message {
        subject: "Password recovery".to_string(),
        html: format!(
            "<p>Hi {},</p><p>Choose a new password at <a href=\"{}\">{}</a>. \
             If you did not ask for this, ignore this message.</p>",
            escape_html(first_name),
            link,
            link
        ),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
