pub mod error;
mod xml;

pub use error::{QrzError, Result};

use std::time::Duration;

use tracing::{debug, info, warn};

pub const QRZ_XML_URL: &str = "https://xmldata.qrz.com/xml/current/";

/// One initial lookup plus up to three re-authenticated retries.
pub const MAX_LOOKUP_ATTEMPTS: u32 = 4;

/// Result of a successful round-trip to the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Valid,
    /// The service answered with an error other than an expired session.
    Invalid(String),
}

/// Owns the QRZ session key. The key is acquired lazily and refreshed through
/// [`QrzSession::reauthenticate`] whenever the service reports it invalid.
pub struct QrzSession {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    key: Option<String>,
}

impl QrzSession {
    pub fn new(username: &str, password: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: QRZ_XML_URL.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            key: None,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    /// Resume with a key obtained earlier.
    pub fn with_session_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn session_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Log in again and replace the held key.
    pub async fn reauthenticate(&mut self) -> Result<()> {
        self.key = None;
        let body = self
            .get(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .await?;

        match xml::session_key(&body) {
            Some(key) => {
                info!("QRZ session key acquired");
                self.key = Some(key);
                Ok(())
            }
            None => Err(QrzError::Login(
                xml::error_message(&body).unwrap_or_else(|| "no session key in response".into()),
            )),
        }
    }

    /// Check whether `callsign` exists in the QRZ database.
    pub async fn lookup(&mut self, callsign: &str) -> Result<Lookup> {
        for attempt in 0..MAX_LOOKUP_ATTEMPTS {
            let key = match self.key.clone() {
                Some(key) => key,
                None => {
                    self.reauthenticate().await?;
                    self.key.clone().unwrap_or_default()
                }
            };

            let body = self
                .get(&[("s", key.as_str()), ("callsign", callsign)])
                .await?;

            match xml::error_message(&body) {
                Some(message) if xml::is_session_error(&message) => {
                    warn!(callsign, attempt, "QRZ session expired, re-authenticating");
                    self.key = None;
                }
                Some(message) => {
                    debug!(callsign, message = %message, "QRZ lookup error");
                    return Ok(Lookup::Invalid(message));
                }
                None => return Ok(Lookup::Valid),
            }
        }

        Err(QrzError::SessionExhausted(MAX_LOOKUP_ATTEMPTS))
    }

    async fn get(&self, query: &[(&str, &str)]) -> Result<String> {
        let resp = self.client.get(&self.base_url).query(query).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(QrzError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
