//! email.rs
//!
//! Client for the transactional e-mail provider (Resend-compatible HTTP
//! API). Three message variants exist: booking confirmed, put on the
//! waitlist, and promoted from the waitlist. The promotion mail is
//! deliberately worded as good news rather than a plain confirmation.
//!
//! Sending is best-effort: callers dispatch fire-and-forget and only log
//! failures. A missed mail never fails or rolls back a booking.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::EmailConfig;
use crate::models::{BookingStatus, Event};

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("email provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    reply_to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

#[derive(Clone)]
pub struct EmailClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
    reply_to: String,
}

impl EmailClient {
    pub fn from_config(config: &EmailConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            reply_to: config.reply_to.clone(),
        }
    }

    /// Booking lifecycle mail: confirmation, waitlist notice or waitlist
    /// promotion, depending on `status` and `is_promotion`.
    pub async fn send_booking_notification(
        &self,
        to: &str,
        user_name: &str,
        event: &Event,
        status: BookingStatus,
        is_promotion: bool,
    ) -> Result<(), EmailError> {
        let (subject, title, message) = if is_promotion {
            (
                format!("Du bist dabei! {}", event.name),
                "Großartige Neuigkeiten!".to_string(),
                format!(
                    "Ein Platz ist frei geworden und du bist von der Warteliste \
                     nachgerückt! <strong>Deine Buchung für {} ist nun bestätigt.</strong>",
                    event.name
                ),
            )
        } else if status == BookingStatus::Confirmed {
            (
                format!("Reservierung bestätigt: {}", event.name),
                format!("Hallo {user_name}!"),
                format!(
                    "Deine Reservierung für <strong>{}</strong> ist bestätigt!",
                    event.name
                ),
            )
        } else {
            (
                format!("Warteliste: {}", event.name),
                format!("Hallo {user_name}!"),
                format!(
                    "Die Veranstaltung <strong>{}</strong> ist leider schon ausgebucht. \
                     <strong>Du wurdest auf die Warteliste gesetzt.</strong> Falls ein \
                     Platz frei wird, informieren wir dich sofort per E-Mail.",
                    event.name
                ),
            )
        };

        let date = event.date.format("%d.%m.%Y, %H:%M Uhr");
        let html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>{title}</h2>
  <p>{message}</p>
  <div style="background: #f8f9fa; border-left: 4px solid #ff7a1a; padding: 15px;">
    <div><strong>Datum:</strong> {date}</div>
    <div><strong>Adresse:</strong> {address}</div>
  </div>
  <p>Wir freuen uns auf dich!</p>
</div>"#,
            title = title,
            message = message,
            date = date,
            address = event.address,
        );

        self.send(to, &subject, &html).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let request = SendEmailRequest {
            from: &self.from,
            to: vec![to],
            reply_to: &self.reply_to,
            subject,
            html,
        };

        let response = self
            .http
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Api { status, body });
        }

        let parsed: SendEmailResponse = response.json().await?;
        debug!(
            "email \"{}\" to {} accepted as {:?}",
            subject, to, parsed.id
        );
        Ok(())
    }
}
