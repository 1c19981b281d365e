use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MovementValidationError {
    #[error("amount must be greater than zero")]
    NonPositiveAmount,

    #[error("account id is required")]
    MissingAccount,

    #[error("institution id is required")]
    MissingInstitution,

    #[error("movement date cannot be in the future")]
    FutureDate,

    #[error("invalid movement type: {0}")]
    InvalidType(String),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Income,
    Expense,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl FromStr for MovementType {
    type Err = MovementValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(MovementValidationError::InvalidType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MovementSource {
    Manual,
    Extract,
    Email,
}

impl MovementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Extract => "extract",
            Self::Email => "email",
        }
    }
}

impl FromStr for MovementSource {
    type Err = MovementValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "extract" => Ok(Self::Extract),
            "email" => Ok(Self::Email),
            other => Err(MovementValidationError::InvalidSource(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Salary,
    Freelance,
    Investment,
    Housing,
    Transport,
    Food,
    Entertainment,
    Shopping,
    Health,
    Education,
    Travel,
    Savings,
    Debt,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Salary => "salary",
            Self::Freelance => "freelance",
            Self::Investment => "investment",
            Self::Housing => "housing",
            Self::Transport => "transport",
            Self::Food => "food",
            Self::Entertainment => "entertainment",
            Self::Shopping => "shopping",
            Self::Health => "health",
            Self::Education => "education",
            Self::Travel => "travel",
            Self::Savings => "savings",
            Self::Debt => "debt",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Category {
    type Err = MovementValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_lowercase().as_str() {
            "salary" => Self::Salary,
            "freelance" => Self::Freelance,
            "investment" => Self::Investment,
            "housing" => Self::Housing,
            "transport" => Self::Transport,
            "food" => Self::Food,
            "entertainment" => Self::Entertainment,
            "shopping" => Self::Shopping,
            "health" => Self::Health,
            "education" => Self::Education,
            "travel" => Self::Travel,
            "savings" => Self::Savings,
            "debt" => Self::Debt,
            "unknown" => Self::Unknown,
            _ => return Err(MovementValidationError::InvalidCategory(s.to_string())),
        };
        Ok(category)
    }
}

/// One financial transaction, whatever produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    pub id: Uuid,
    pub account_id: String,
    pub institution_id: String,
    pub message_id: Option<String>,
    pub extract_id: Option<String>,
    pub description: String,
    pub amount: Decimal,
    pub movement_type: MovementType,
    pub category: Category,
    pub date: DateTime<Utc>,
    pub source: MovementSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movement {
    pub fn new(
        account_id: String,
        institution_id: String,
        description: String,
        amount: Decimal,
        movement_type: MovementType,
        date: DateTime<Utc>,
        source: MovementSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            institution_id,
            message_id: None,
            extract_id: None,
            description,
            amount,
            movement_type,
            category: Category::Unknown,
            date,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_extract(mut self, extract_id: impl Into<String>) -> Self {
        self.extract_id = Some(extract_id.into());
        self
    }

    /// Checks the invariants every stored movement must hold.
    ///
    /// Derived movements carry the date printed by the bank, which may be
    /// ahead of the local clock, so the future-date rule applies to manual
    /// entries only.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), MovementValidationError> {
        if self.account_id.trim().is_empty() {
            return Err(MovementValidationError::MissingAccount);
        }
        if self.institution_id.trim().is_empty() {
            return Err(MovementValidationError::MissingInstitution);
        }
        if self.amount <= Decimal::ZERO {
            return Err(MovementValidationError::NonPositiveAmount);
        }
        if self.source == MovementSource::Manual && self.date > now {
            return Err(MovementValidationError::FutureDate);
        }
        Ok(())
    }
}

/// Row shape of the `movements` table.
#[derive(Debug, Clone, FromRow)]
pub struct MovementRow {
    pub id: Uuid,
    pub account_id: String,
    pub institution_id: String,
    pub message_id: Option<String>,
    pub extract_id: Option<String>,
    pub description: String,
    pub amount: Decimal,
    #[sqlx(rename = "type")]
    pub movement_type: String,
    pub category: String,
    pub source: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = MovementValidationError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            institution_id: row.institution_id,
            message_id: row.message_id,
            extract_id: row.extract_id,
            description: row.description,
            amount: row.amount,
            movement_type: row.movement_type.parse()?,
            category: row.category.parse()?,
            date: row.date,
            source: row.source.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
