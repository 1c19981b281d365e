use crate::extractors::DAVIVIENDA;
use crate::models::MessageType;

/// How one bank's notification emails can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstitutionProfile {
    pub institution_id: String,
    /// Lowercase sender addresses.
    pub senders: Vec<String>,
    /// Substring of the subject of statement emails, lowercase.
    pub statement_subject: String,
    /// Exact subject of single-transaction alerts, lowercase.
    pub movement_subject: String,
}

impl InstitutionProfile {
    pub fn davivienda() -> Self {
        Self {
            institution_id: DAVIVIENDA.to_string(),
            senders: vec![
                "banco_davivienda@davivienda.com".to_string(),
                "bancodavivienda@davivienda.com".to_string(),
            ],
            statement_subject: "extractos".to_string(),
            movement_subject: "davivienda".to_string(),
        }
    }

    pub fn matches_sender(&self, from: &str) -> bool {
        let address = sender_address(from);
        self.senders.iter().any(|s| *s == address)
    }

    pub fn is_statement_subject(&self, subject: &str) -> bool {
        subject.trim().to_lowercase().contains(&self.statement_subject)
    }

    pub fn is_movement_subject(&self, subject: &str) -> bool {
        subject.trim().to_lowercase() == self.movement_subject
    }

    /// Provider search query for statement emails.
    pub fn statement_query(&self) -> String {
        format!(
            "from:({}) subject:({})",
            self.senders.join(" OR "),
            self.statement_subject
        )
    }
}

/// Bare lowercase address out of a `From` header value.
pub fn sender_address(from: &str) -> String {
    mailparse::addrparse(from)
        .ok()
        .and_then(|list| list.extract_single_info())
        .map(|info| info.addr)
        .unwrap_or_else(|| from.trim().trim_matches(&['<', '>'][..]).to_string())
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub message_type: MessageType,
    pub institution_id: Option<String>,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            message_type: MessageType::Unknown,
            institution_id: None,
        }
    }
}

/// Classifies inbound emails by sender and subject.
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    profiles: Vec<InstitutionProfile>,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new(vec![InstitutionProfile::davivienda()])
    }
}

impl MessageClassifier {
    pub fn new(profiles: Vec<InstitutionProfile>) -> Self {
        Self { profiles }
    }

    pub fn profile(&self, institution_id: &str) -> Option<&InstitutionProfile> {
        self.profiles
            .iter()
            .find(|p| p.institution_id == institution_id)
    }

    pub fn classify(&self, from: &str, subject: &str) -> Classification {
        let Some(profile) = self.profiles.iter().find(|p| p.matches_sender(from)) else {
            return Classification::unknown();
        };

        let message_type = if profile.is_statement_subject(subject) {
            MessageType::Extract
        } else if profile.is_movement_subject(subject) {
            MessageType::Movement
        } else {
            return Classification::unknown();
        };

        Classification {
            message_type,
            institution_id: Some(profile.institution_id.clone()),
        }
    }
}
