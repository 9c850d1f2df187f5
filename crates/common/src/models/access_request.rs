//! Access request record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Level a requester petitions for; each level implies the lower ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestedLevel {
    ViewMetadata,
    ViewContent,
    Download,
    FullAccess,
}

impl RequestedLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestedLevel::ViewMetadata => "VIEW_METADATA",
            RequestedLevel::ViewContent => "VIEW_CONTENT",
            RequestedLevel::Download => "DOWNLOAD",
            RequestedLevel::FullAccess => "FULL_ACCESS",
        }
    }
}

impl std::str::FromStr for RequestedLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEW_METADATA" => Ok(RequestedLevel::ViewMetadata),
            "VIEW_CONTENT" => Ok(RequestedLevel::ViewContent),
            "DOWNLOAD" => Ok(RequestedLevel::Download),
            "FULL_ACCESS" => Ok(RequestedLevel::FullAccess),
            other => Err(format!("unknown access level '{}'", other)),
        }
    }
}

/// PENDING is initial; APPROVED and REJECTED are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status '{}'", other)),
        }
    }
}

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

/// A user's petition for elevated access to one manuscript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: Uuid,
    pub manuscript_id: Uuid,
    pub requester_id: Uuid,
    pub requested_level: RequestedLevel,
    pub justification: String,
    pub purpose: String,
    pub institution: String,
    /// Duration the requester asked for, in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_duration_days: Option<u32>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_level: Option<RequestedLevel>,
    /// Granted duration in days; `None` on an approval never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_duration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessRequest {
    /// End of an approved grant: review time plus the granted days
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match (self.status, self.reviewed_at, self.approved_duration_days) {
            (RequestStatus::Approved, Some(reviewed_at), Some(days)) => {
                Some(reviewed_at + Duration::days(i64::from(days)))
            }
            _ => None,
        }
    }

    /// Level this request currently grants, if any.
    ///
    /// An approval stays effective through `expires_at` inclusive.
    pub fn active_grant(&self, now: DateTime<Utc>) -> Option<RequestedLevel> {
        if self.status != RequestStatus::Approved {
            return None;
        }
        if let Some(expires_at) = self.expires_at() {
            if now > expires_at {
                return None;
            }
        }
        Some(self.approved_level.unwrap_or(self.requested_level))
    }

    /// PENDING and younger than the staleness window
    pub fn is_open(&self, now: DateTime<Utc>, pending_expiry: Duration) -> bool {
        self.status == RequestStatus::Pending && now - self.created_at <= pending_expiry
    }
}
