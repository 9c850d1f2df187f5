//! Access request workflow
//!
//! PENDING → APPROVED | REJECTED. Terminal states never change again.
//! The store enforces the two races that matter: one open request per
//! (requester, manuscript) and a single winner when reviewers collide.

use crate::clock::Clock;
use chrono::Duration;
use scriptorium_common::config::AccessRequestConfig;
use scriptorium_common::db::{InsertOutcome, RecordStore};
use scriptorium_common::errors::{AppError, Result};
use scriptorium_common::metrics;
use scriptorium_common::models::{
    AccessRequest, CounterKind, RequestStatus, RequestedLevel, ReviewDecision,
};
use scriptorium_common::notify::{Notification, Notifier};
use scriptorium_common::Principal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Highest level a reviewer without the admin role may grant
const REVIEWER_GRANT_CEILING: RequestedLevel = RequestedLevel::Download;

/// Petition submitted by a requester
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAccessRequest {
    pub requested_level: RequestedLevel,
    #[validate(length(max = 5000))]
    pub justification: String,
    #[validate(length(max = 1000))]
    pub purpose: String,
    #[validate(length(min = 1, max = 256))]
    pub institution: String,
    #[validate(range(min = 1))]
    #[serde(default)]
    pub duration_days: Option<u32>,
}

/// Reviewer verdict with optional adjustments
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewInput {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub approved_level: Option<RequestedLevel>,
    #[validate(range(min = 1))]
    #[serde(default)]
    pub approved_duration_days: Option<u32>,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReviewInput {
    pub fn approve() -> Self {
        Self {
            decision: ReviewDecision::Approved,
            approved_level: None,
            approved_duration_days: None,
            notes: None,
        }
    }

    pub fn reject() -> Self {
        Self {
            decision: ReviewDecision::Rejected,
            ..Self::approve()
        }
    }

    pub fn with_level(mut self, level: RequestedLevel) -> Self {
        self.approved_level = Some(level);
        self
    }

    pub fn for_days(mut self, days: u32) -> Self {
        self.approved_duration_days = Some(days);
        self
    }
}

#[derive(Clone)]
pub struct AccessRequestWorkflow {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: AccessRequestConfig,
}

impl AccessRequestWorkflow {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: AccessRequestConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// File a new PENDING request on behalf of `requester`
    #[instrument(
        skip(self, requester, input),
        fields(principal_id = ?requester.map(|p| p.id), level = input.requested_level.as_str())
    )]
    pub async fn create(
        &self,
        requester: Option<&Principal>,
        manuscript_id: Uuid,
        input: NewAccessRequest,
    ) -> Result<AccessRequest> {
        let requester = requester
            .ok_or_else(|| AppError::forbidden("sign in to request access"))?;

        self.validate_new(&input)?;

        let manuscript = self
            .store
            .get_manuscript(manuscript_id)
            .await?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| AppError::ManuscriptNotFound {
                id: manuscript_id.to_string(),
            })?;

        if manuscript.is_owned_by(requester.id) {
            return Err(AppError::validation(
                "manuscript_id",
                "owners already hold full access to their manuscripts",
            ));
        }

        let now = self.clock.now();
        let request = AccessRequest {
            id: Uuid::new_v4(),
            manuscript_id,
            requester_id: requester.id,
            requested_level: input.requested_level,
            justification: input.justification.trim().to_string(),
            purpose: input.purpose.trim().to_string(),
            institution: input.institution.trim().to_string(),
            requested_duration_days: input.duration_days,
            status: RequestStatus::Pending,
            approved_level: None,
            approved_duration_days: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            created_at: now,
        };

        let open_since = now - Duration::days(i64::from(self.config.pending_expiry_days));
        match self.store.insert_access_request(&request, open_since).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Duplicate { existing_id } => {
                metrics::record_access_request("conflict");
                return Err(AppError::DuplicateAccessRequest {
                    existing_id: existing_id.to_string(),
                    manuscript_id: manuscript_id.to_string(),
                });
            }
        }

        // The request exists either way; a failed counter bump is only logged
        if let Err(e) = self
            .store
            .increment_counter(manuscript_id, CounterKind::AccessRequest)
            .await
        {
            warn!(error = %e, request_id = %request.id, "Failed to count access request");
        }

        metrics::record_access_request("created");
        info!(request_id = %request.id, %manuscript_id, "Access request created");
        self.send(Notification::created(&request)).await;

        Ok(request)
    }

    /// Move a PENDING request to APPROVED or REJECTED
    #[instrument(skip(self, reviewer, input), fields(principal_id = %reviewer.id, decision = ?input.decision))]
    pub async fn review(
        &self,
        reviewer: &Principal,
        request_id: Uuid,
        input: ReviewInput,
    ) -> Result<AccessRequest> {
        reviewer.require_reviewer()?;
        input.validate()?;

        let not_found = || AppError::AccessRequestNotFound {
            id: request_id.to_string(),
        };

        let current = self
            .store
            .get_access_request(request_id)
            .await?
            .filter(|r| !r.status.is_terminal())
            .ok_or_else(not_found)?;

        if current.requester_id == reviewer.id {
            return Err(AppError::forbidden("reviewers cannot decide their own requests"));
        }

        let mut reviewed = current.clone();
        reviewed.reviewed_by = Some(reviewer.id);
        reviewed.reviewed_at = Some(self.clock.now());
        reviewed.review_notes = input.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        match input.decision {
            ReviewDecision::Approved => {
                let level = input.approved_level.unwrap_or(current.requested_level);
                if level > current.requested_level {
                    return Err(AppError::validation(
                        "approved_level",
                        format!(
                            "cannot approve {} on a request for {}",
                            level.as_str(),
                            current.requested_level.as_str()
                        ),
                    ));
                }
                if level > REVIEWER_GRANT_CEILING && !reviewer.is_admin() {
                    return Err(AppError::forbidden(format!(
                        "only admins may grant {}",
                        level.as_str()
                    )));
                }

                let days = input
                    .approved_duration_days
                    .or(current.requested_duration_days);
                if let Some(days) = days {
                    self.check_duration("approved_duration_days", days)?;
                }

                reviewed.status = RequestStatus::Approved;
                reviewed.approved_level = Some(level);
                reviewed.approved_duration_days = days;
            }
            ReviewDecision::Rejected => {
                reviewed.status = RequestStatus::Rejected;
            }
        }

        if !self.store.complete_review(&reviewed).await? {
            // Another reviewer got there first
            return Err(not_found());
        }

        metrics::record_access_request(reviewed.status.as_str());
        info!(
            %request_id,
            manuscript_id = %reviewed.manuscript_id,
            status = reviewed.status.as_str(),
            "Access request reviewed"
        );
        self.send(Notification::reviewed(&reviewed)).await;

        Ok(reviewed)
    }

    /// Requests awaiting review, oldest first. Reviewers and admins only.
    pub async fn list_pending(&self, reviewer: &Principal) -> Result<Vec<AccessRequest>> {
        reviewer.require_reviewer()?;
        self.store.list_pending().await
    }

    /// The caller's own requests, newest first
    pub async fn list_mine(&self, requester: &Principal) -> Result<Vec<AccessRequest>> {
        self.store.list_by_requester(requester.id).await
    }

    fn validate_new(&self, input: &NewAccessRequest) -> Result<()> {
        input.validate()?;

        let justification = input.justification.trim().chars().count() as u64;
        if justification < self.config.min_justification_chars {
            return Err(AppError::validation(
                "justification",
                format!(
                    "justification must be at least {} characters",
                    self.config.min_justification_chars
                ),
            ));
        }

        let purpose = input.purpose.trim().chars().count() as u64;
        if purpose < self.config.min_purpose_chars {
            return Err(AppError::validation(
                "purpose",
                format!(
                    "purpose must be at least {} characters",
                    self.config.min_purpose_chars
                ),
            ));
        }

        if input.institution.trim().is_empty() {
            return Err(AppError::validation("institution", "institution is required"));
        }

        if let Some(days) = input.duration_days {
            self.check_duration("duration_days", days)?;
        }
        Ok(())
    }

    fn check_duration(&self, field: &str, days: u32) -> Result<()> {
        if days == 0 || days > self.config.max_duration_days {
            return Err(AppError::validation(
                field,
                format!(
                    "duration must be between 1 and {} days",
                    self.config.max_duration_days
                ),
            ));
        }
        Ok(())
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(error = %e, event = notification.event(), "Notification failed");
        }
    }
}
