//! Access decision engine
//!
//! A single pure function decides how far a principal may go with a
//! manuscript. Every serve, ingest and delete path asks it instead of
//! re-implementing role checks.
//!
//! Decision order:
//! 1. Soft-deleted manuscripts resolve to `None` for everyone but admins.
//! 2. Owners and admins resolve to `Full`.
//! 3. Unpublished manuscripts are visible to reviewers only.
//! 4. Otherwise a baseline follows visibility and the three thresholds,
//!    raised by the best unexpired approved request of the principal.

use crate::auth::{Principal, Role};
use crate::models::{AccessRequest, AccessTier, Manuscript, RequestedLevel, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Effective access level, low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveLevel {
    None,
    Metadata,
    Content,
    Download,
    Full,
}

impl EffectiveLevel {
    /// True when this level satisfies `required`
    pub fn permits(self, required: EffectiveLevel) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveLevel::None => "NONE",
            EffectiveLevel::Metadata => "METADATA",
            EffectiveLevel::Content => "CONTENT",
            EffectiveLevel::Download => "DOWNLOAD",
            EffectiveLevel::Full => "FULL",
        }
    }
}

impl std::fmt::Display for EffectiveLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RequestedLevel> for EffectiveLevel {
    fn from(level: RequestedLevel) -> Self {
        match level {
            RequestedLevel::ViewMetadata => EffectiveLevel::Metadata,
            RequestedLevel::ViewContent => EffectiveLevel::Content,
            RequestedLevel::Download => EffectiveLevel::Download,
            RequestedLevel::FullAccess => EffectiveLevel::Full,
        }
    }
}

/// Level reviewers hold on manuscripts that are not yet published
const REVIEWER_UNPUBLISHED_LEVEL: EffectiveLevel = EffectiveLevel::Content;

/// Decide the effective level of `principal` (or an anonymous caller) on
/// `manuscript` at instant `now`.
///
/// `requests` may contain any records; only approved, unexpired requests of
/// this principal for this manuscript count.
pub fn decide(
    principal: Option<&Principal>,
    manuscript: &Manuscript,
    requests: &[AccessRequest],
    now: DateTime<Utc>,
) -> EffectiveLevel {
    let is_admin = principal.is_some_and(|p| p.role == Role::Admin);

    if manuscript.is_deleted() {
        return if is_admin {
            EffectiveLevel::Full
        } else {
            EffectiveLevel::None
        };
    }

    let is_owner = principal.is_some_and(|p| manuscript.is_owned_by(p.id));
    if is_owner || is_admin {
        return EffectiveLevel::Full;
    }

    if !manuscript.status.is_published() {
        return match principal {
            Some(p) if p.role == Role::Reviewer => REVIEWER_UNPUBLISHED_LEVEL,
            _ => EffectiveLevel::None,
        };
    }

    let baseline = baseline_level(principal, manuscript);

    let granted = principal
        .map(|p| best_grant(p, manuscript, requests, now))
        .unwrap_or(EffectiveLevel::None);

    baseline.max(granted)
}

/// Level from visibility and thresholds alone, without approved requests
fn baseline_level(principal: Option<&Principal>, manuscript: &Manuscript) -> EffectiveLevel {
    let tier = match principal {
        Some(p) if p.role != Role::Visitor => AccessTier::Registered,
        _ => AccessTier::Public,
    };

    let thresholds = &manuscript.access_level;
    let (metadata, content, download) = match manuscript.visibility {
        Visibility::Private => return EffectiveLevel::None,
        Visibility::Public => (
            thresholds.metadata.tier(),
            thresholds.content.tier(),
            thresholds.download.tier(),
        ),
        // Restricted manuscripts never hand out files on registration alone
        Visibility::Restricted => (
            thresholds.metadata.tier(),
            thresholds.content.tier().max(AccessTier::Approved),
            thresholds.download.tier().max(AccessTier::Approved),
        ),
    };

    if tier < metadata {
        EffectiveLevel::None
    } else if tier < content {
        EffectiveLevel::Metadata
    } else if tier < download {
        EffectiveLevel::Content
    } else {
        EffectiveLevel::Download
    }
}

fn best_grant(
    principal: &Principal,
    manuscript: &Manuscript,
    requests: &[AccessRequest],
    now: DateTime<Utc>,
) -> EffectiveLevel {
    requests
        .iter()
        .filter(|r| r.requester_id == principal.id && r.manuscript_id == manuscript.id)
        .filter_map(|r| r.active_grant(now))
        .map(EffectiveLevel::from)
        .max()
        .unwrap_or(EffectiveLevel::None)
}
