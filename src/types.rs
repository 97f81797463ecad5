use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured feed endpoint. Owned by external configuration; the pipeline
/// only reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Optional credential attached to feed requests.
    pub access_key: Option<String>,
    pub active: bool,
}

/// One entry as pulled from a feed, before any filtering. Lives only for the
/// duration of a single pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub link: String,
    pub title: String,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub summary: Option<String>,
}

impl RawEntry {
    /// Body text for classification: description preferred, summary as
    /// fallback, empty string when neither exists.
    pub fn content(&self) -> &str {
        self.description
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.summary.as_deref())
            .unwrap_or("")
    }
}

/// Target vocabulary for classification. The name is the case-insensitive
/// join key against classifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub active: bool,
}

/// A topic of interest with free-text keywords; used only to build the
/// relevancy rubric in the classification prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    pub keywords: String,
    pub active: bool,
}

/// Outcome tag for a single classifier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    /// Backend answered and the verdict decoded.
    Ok,
    /// Stop was requested before the backend call was issued.
    Cancelled,
    /// Transport failure or undecodable model output.
    Failed,
}

/// Result of one classifier call. Transient.
#[derive(Debug, Clone)]
pub struct ClassificationVerdict {
    pub status: VerdictStatus,
    /// Bullet-prefixed summary lines, one per line.
    pub summary: String,
    /// Exactly one of the candidate category names, or empty.
    pub category: String,
    /// 0-100.
    pub relevancy_score: i32,
    /// Author inferred from the article body, or empty.
    pub author: String,
}

impl ClassificationVerdict {
    pub fn cancelled() -> Self {
        Self {
            status: VerdictStatus::Cancelled,
            summary: String::new(),
            category: String::new(),
            relevancy_score: 0,
            author: String::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: VerdictStatus::Failed,
            summary: String::new(),
            category: String::new(),
            relevancy_score: 0,
            author: String::new(),
        }
    }
}

/// User feedback on a stored article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
    #[default]
    Neutral,
}

/// A fully classified article as persisted by the pipeline. The URL is the
/// uniqueness key across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub author: String,
    pub source_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub category_name: String,
    pub category_color: String,
    pub relevancy_score: i32,
    pub feedback: Feedback,
    pub created_at: DateTime<Utc>,
}

/// Article fields as assembled by the orchestrator; the store assigns the id
/// and creation timestamp on insert.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub author: String,
    pub source_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub category_name: String,
    pub category_color: String,
    pub relevancy_score: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
