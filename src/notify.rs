//! Alert delivery.
//!
//! The core hands every admitted alert to a [`NotificationSink`]. Delivery is
//! best-effort: failures are logged per recipient and never reach the caller.
//!
//! - [`SmsNotifier`]: Twilio Messages API over `reqwest`.
//! - [`LogNotifier`]: logs what would have been sent, used when no SMS
//!   credentials are configured.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::Severity;

// ---

const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &str, severity: Severity, area_id: i64);
}

/// Phone numbers per area plus the emergency list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientDirectory {
    pub area_contacts: HashMap<i64, Vec<String>>,
    pub emergency: Vec<String>,
}

impl RecipientDirectory {
    pub fn new(area_contacts: HashMap<i64, Vec<String>>, emergency: Vec<String>) -> Self {
        Self {
            area_contacts,
            emergency,
        }
    }

    /// Area contacts, plus emergency contacts for high severity.
    ///
    /// Areas without contacts route to the emergency list.
    pub fn recipients_for(&self, area_id: i64, severity: Severity) -> Vec<String> {
        // ---
        match self.area_contacts.get(&area_id) {
            Some(contacts) => {
                let mut recipients = contacts.clone();
                if severity == Severity::High {
                    for number in &self.emergency {
                        if !recipients.contains(number) {
                            recipients.push(number.clone());
                        }
                    }
                }
                recipients
            }
            None => self.emergency.clone(),
        }
    }
}

/// Prefix `message` with its severity marker.
pub fn format_message(message: &str, severity: Severity) -> String {
    let prefix = match severity {
        Severity::High => "URGENT",
        Severity::Medium => "WARNING",
    };
    format!("{}: {}", prefix, message)
}

/// Parse a comma separated list of phone numbers, skipping blanks.
pub fn parse_contact_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `1=+15550001|+15550002;2=+15550003` into per-area contacts.
pub fn parse_area_contacts(raw: &str) -> Result<HashMap<i64, Vec<String>>, String> {
    // ---
    let mut contacts = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (area, numbers) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected '<area>=<numbers>', got '{}'", entry))?;
        let area: i64 = area
            .trim()
            .parse()
            .map_err(|e| format!("invalid area id '{}': {}", area.trim(), e))?;
        let numbers: Vec<String> = numbers
            .split('|')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();
        contacts.insert(area, numbers);
    }
    Ok(contacts)
}

/// Twilio account used for outbound SMS.
#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Deserialize)]
struct MessageCreated {
    sid: String,
}

pub struct SmsNotifier {
    client: reqwest::Client,
    api_base: String,
    credentials: TwilioCredentials,
    directory: RecipientDirectory,
}

impl SmsNotifier {
    pub fn new(credentials: TwilioCredentials, directory: RecipientDirectory) -> Self {
        Self::with_api_base(credentials, directory, TWILIO_API_BASE)
    }

    /// Send through a different API host, e.g. a local stand-in.
    pub fn with_api_base(
        credentials: TwilioCredentials,
        directory: RecipientDirectory,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
            directory,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.credentials.account_sid
        )
    }

    async fn send_one(&self, to: &str, body: &str) -> Result<String, reqwest::Error> {
        // ---
        let params = [
            ("To", to),
            ("From", self.credentials.from_number.as_str()),
            ("Body", body),
        ];
        let created: MessageCreated = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.sid)
    }
}

#[async_trait]
impl NotificationSink for SmsNotifier {
    async fn deliver(&self, message: &str, severity: Severity, area_id: i64) {
        // ---
        let recipients = self.directory.recipients_for(area_id, severity);
        if recipients.is_empty() {
            warn!("No SMS recipients for area {}, alert not sent", area_id);
            return;
        }

        let body = format_message(message, severity);
        for number in &recipients {
            match self.send_one(number, &body).await {
                Ok(sid) => info!("SMS sent to {}: {}", number, sid),
                Err(e) => warn!("Failed to send SMS to {}: {}", number, e),
            }
        }
    }
}

/// Sink that only logs, for deployments without SMS credentials.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    directory: RecipientDirectory,
}

impl LogNotifier {
    pub fn new(directory: RecipientDirectory) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn deliver(&self, message: &str, severity: Severity, area_id: i64) {
        // ---
        let recipients = self.directory.recipients_for(area_id, severity);
        info!(
            "SMS disabled - would send to {:?}: {}",
            recipients,
            format_message(message, severity)
        );
        debug!("Area {} alert routed to {} recipients", area_id, recipients.len());
    }
}
