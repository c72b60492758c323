use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    InProgress,
    Archived,
    Cancelled,
}

impl ConsultationStatus {
    pub const ALL: [ConsultationStatus; 4] = [
        ConsultationStatus::Pending,
        ConsultationStatus::InProgress,
        ConsultationStatus::Archived,
        ConsultationStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsultationStatus::Pending => "pending",
            ConsultationStatus::InProgress => "in_progress",
            ConsultationStatus::Archived => "archived",
            ConsultationStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConsultationStatus::Pending => "Pending",
            ConsultationStatus::InProgress => "In Progress",
            ConsultationStatus::Archived => "Archived",
            ConsultationStatus::Cancelled => "Cancelled",
        }
    }

    /// Targets reachable through the generic status update. Archived is the
    /// only state that may move back to in progress.
    pub fn allowed_transitions(self) -> &'static [ConsultationStatus] {
        match self {
            ConsultationStatus::Pending => {
                &[ConsultationStatus::InProgress, ConsultationStatus::Cancelled]
            }
            ConsultationStatus::InProgress => {
                &[ConsultationStatus::Archived, ConsultationStatus::Cancelled]
            }
            ConsultationStatus::Archived => &[ConsultationStatus::InProgress],
            ConsultationStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: ConsultationStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Closed consultations accept no new assignments or files.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            ConsultationStatus::Archived | ConsultationStatus::Cancelled
        )
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsultationStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(ConsultationStatus::Pending),
            "in_progress" => Ok(ConsultationStatus::InProgress),
            "archived" => Ok(ConsultationStatus::Archived),
            "cancelled" => Ok(ConsultationStatus::Cancelled),
            other => Err(AppError::validation(format!(
                "invalid consultation status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(AppError::validation(format!("invalid priority: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    LegalConsultation,
    ContractsDeals,
    LegalServices,
    Other,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::LegalConsultation => "legal_consultation",
            Topic::ContractsDeals => "contracts_deals",
            Topic::LegalServices => "legal_services",
            Topic::Other => "other",
        }
    }

    /// Title used when the creator leaves it blank.
    pub fn label(self) -> &'static str {
        match self {
            Topic::LegalConsultation => "Legal Consultation",
            Topic::ContractsDeals => "Contracts & Deals",
            Topic::LegalServices => "Legal Services",
            Topic::Other => "Other",
        }
    }
}

impl Default for Topic {
    fn default() -> Self {
        Topic::LegalConsultation
    }
}

impl FromStr for Topic {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "legal_consultation" => Ok(Topic::LegalConsultation),
            "contracts_deals" => Ok(Topic::ContractsDeals),
            "legal_services" => Ok(Topic::LegalServices),
            "other" => Ok(Topic::Other),
            other => Err(AppError::validation(format!("invalid topic: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Attachment,
    Deliverable,
    Supplement,
}

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Attachment => "attachment",
            FileCategory::Deliverable => "deliverable",
            FileCategory::Supplement => "supplement",
        }
    }

    pub fn is_deliverable(self) -> bool {
        self == FileCategory::Deliverable
    }
}

impl Default for FileCategory {
    fn default() -> Self {
        FileCategory::Attachment
    }
}

impl FromStr for FileCategory {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "attachment" => Ok(FileCategory::Attachment),
            "deliverable" => Ok(FileCategory::Deliverable),
            "supplement" => Ok(FileCategory::Supplement),
            other => Err(AppError::validation(format!(
                "invalid file category: {other}"
            ))),
        }
    }
}

/// Parses a stored column value. Rows are only written through the enums
/// above, so a mismatch means the database was edited by hand.
pub fn parse_stored<T>(value: &str) -> Result<T, AppError>
where
    T: FromStr<Err = AppError>,
{
    value
        .parse()
        .map_err(|err: AppError| AppError::internal(format!("corrupt stored value: {err}")))
}
