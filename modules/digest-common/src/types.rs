use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DigestError;

// ---------------------------------------------------------------------------
// Text-backed enums
// ---------------------------------------------------------------------------

/// Give a fieldless enum a stable snake_case text form, used both for the
/// Postgres columns and for parsing operator input.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DigestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(DigestError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// --- Sources ---

/// Trust ranking of a source. `Tier1` is the most trusted and is the last to
/// be dropped when the analysis prompt runs out of budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum SourceTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[default]
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
}

text_enum!(SourceTier {
    Tier1 => "tier_1",
    Tier2 => "tier_2",
    Tier3 => "tier_3",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    /// RSS / Atom / JSON Feed.
    Rss,
    /// Video channel listing via the channel's public feed.
    Youtube,
    /// Community forum listing.
    Reddit,
    /// Any HTML page, optionally following article links.
    Web,
}

text_enum!(FetchMethod {
    Rss => "rss",
    Youtube => "youtube",
    Reddit => "reddit",
    Web => "web",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub tier: SourceTier,
    pub category: String,
    pub fetch_method: FetchMethod,
    /// Method-specific settings; each fetcher reads the keys it understands.
    pub fetch_config: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Read a string key from `fetch_config`.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.fetch_config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Read an integer key from `fetch_config`.
    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.fetch_config.get(key).and_then(|v| v.as_i64())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tier: SourceTier,
    #[serde(default)]
    pub category: String,
    pub fetch_method: FetchMethod,
    #[serde(default)]
    pub fetch_config: Option<serde_json::Value>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub tier: Option<SourceTier>,
    pub category: Option<String>,
    pub fetch_method: Option<FetchMethod>,
    pub fetch_config: Option<serde_json::Value>,
    pub active: Option<bool>,
}

// --- Fetching ---

/// A normalized article as returned by a fetcher, before it is tied to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// One fetched article persisted for one digest. The source name and tier
/// are snapshotted at fetch time so analysis is unaffected by later edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub source_id: Uuid,
    pub source_name: String,
    pub source_tier: SourceTier,
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

// --- Digests ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Pending,
    Fetching,
    Analyzing,
    Generating,
    Delivering,
    Completed,
    Failed,
}

text_enum!(DigestStatus {
    Pending => "pending",
    Fetching => "fetching",
    Analyzing => "analyzing",
    Generating => "generating",
    Delivering => "delivering",
    Completed => "completed",
    Failed => "failed",
});

impl DigestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The next stage of a forward pass. Terminal states have none.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Fetching),
            Self::Fetching => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Generating),
            Self::Generating => Some(Self::Delivering),
            Self::Delivering => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: Self) -> bool {
        match to {
            Self::Failed => !self.is_terminal(),
            // Retry re-enters the machine from a failed attempt.
            Self::Pending => *self == Self::Failed,
            other => self.next() == Some(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub id: Uuid,
    /// Human label for the covered period, e.g. "2025-11".
    pub period: String,
    pub status: DigestStatus,
    pub sources_fetched: i32,
    pub recommendations_generated: i32,
    pub task_drafts_created: i32,
    pub sop_drafts_created: i32,
    pub error_message: Option<String>,
    pub google_doc_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A digest together with its recommendations, as shown to reviewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestDetail {
    #[serde(flatten)]
    pub digest: Digest,
    pub recommendations: Vec<Recommendation>,
}

// --- Recommendations ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

text_enum!(Impact {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Inferred from a single source or by the model's own reasoning.
    Estimated,
    /// Corroborated by multiple independent sources.
    Verified,
}

text_enum!(Confidence {
    Estimated => "estimated",
    Verified => "verified",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub source_name: String,
    pub source_url: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub category: String,
    pub title: String,
    pub summary: String,
    pub details: String,
    pub impact: Impact,
    pub confidence: Confidence,
    pub source_count: i32,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

/// A citation resolved against the run's article set, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCitation {
    pub source_name: String,
    pub source_url: String,
    pub excerpt: String,
}

/// A validated recommendation produced by the analyzer, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecommendation {
    pub category: String,
    pub title: String,
    pub summary: String,
    pub details: String,
    pub impact: Impact,
    pub confidence: Confidence,
    pub citations: Vec<ExtractedCitation>,
}

impl ExtractedRecommendation {
    pub fn source_count(&self) -> i32 {
        self.citations.len() as i32
    }
}

// --- Drafts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

text_enum!(TaskPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDraftStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(TaskDraftStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub recommendation_id: Uuid,
    pub title: String,
    pub description: String,
    pub suggested_priority: TaskPriority,
    pub suggested_due_in_days: i32,
    pub status: TaskDraftStatus,
    pub task_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskDraft {
    pub recommendation_id: Uuid,
    pub title: String,
    pub description: String,
    pub suggested_priority: TaskPriority,
    pub suggested_due_in_days: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SopDraftType {
    New,
    Edit,
}

text_enum!(SopDraftType {
    New => "new",
    Edit => "edit",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SopDraftStatus {
    Pending,
    Applied,
    Dismissed,
}

text_enum!(SopDraftStatus {
    Pending => "pending",
    Applied => "applied",
    Dismissed => "dismissed",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SopDraft {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub recommendation_id: Uuid,
    pub draft_type: SopDraftType,
    pub sop_title: Option<String>,
    pub sop_doc_id: Option<String>,
    pub template_set_id: Option<String>,
    pub before_content: Option<String>,
    pub after_content: String,
    pub description: String,
    pub status: SopDraftStatus,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSopDraft {
    pub recommendation_id: Uuid,
    pub draft_type: SopDraftType,
    pub sop_title: Option<String>,
    pub sop_doc_id: Option<String>,
    pub template_set_id: Option<String>,
    pub before_content: Option<String>,
    pub after_content: String,
    pub description: String,
}

/// Reviewer edits to a pending SOP draft. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopDraftEdit {
    pub sop_title: Option<String>,
    pub after_content: Option<String>,
    pub description: Option<String>,
}

// --- Job history ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

text_enum!(JobStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub details: Option<serde_json::Value>,
}

// --- Pagination ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp to sane bounds: pages are 1-based, at most 100 rows each.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE),
        }
    }

    /// Rows to skip. Widened so any `page` value stays in range.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}
