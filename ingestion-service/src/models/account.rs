use chrono::{DateTime, Duration, Utc};
use secrecy::Secret;

/// OAuth credential used to build a mail client for one account.
#[derive(Debug, Clone)]
pub struct GoogleCredential {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GoogleCredential {
    /// Tokens that expire within a minute are refreshed up front.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(60) <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub credential: Option<GoogleCredential>,
}

impl Account {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: GoogleCredential) -> Self {
        self.credential = Some(credential);
        self
    }
}
