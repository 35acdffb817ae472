use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    InappropriateContent,
    FakeProfile,
    Underage,
    Other,
}

impl ReportReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Harassment => "harassment",
            ReportReason::InappropriateContent => "inappropriate_content",
            ReportReason::FakeProfile => "fake_profile",
            ReportReason::Underage => "underage",
            ReportReason::Other => "other",
        }
    }
}

impl FromStr for ReportReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(ReportReason::Spam),
            "harassment" => Ok(ReportReason::Harassment),
            "inappropriate_content" => Ok(ReportReason::InappropriateContent),
            "fake_profile" => Ok(ReportReason::FakeProfile),
            "underage" => Ok(ReportReason::Underage),
            "other" => Ok(ReportReason::Other),
            other => Err(format!("unknown report reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "reviewed" => Ok(ReportStatus::Reviewed),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

/// Moderation report, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: ReportReason,
    pub comment: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: ReportReason,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewReport {
    pub fn into_report(self) -> Report {
        Report {
            id: self.id,
            reporter_id: self.reporter_id,
            conversation_id: self.conversation_id,
            message_id: self.message_id,
            reason: self.reason,
            comment: self.comment,
            status: ReportStatus::Pending,
            created_at: self.created_at,
        }
    }
}
