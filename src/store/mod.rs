use crate::types::{Article, Category, FeedSource, NewArticle, Result, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Config key for the minimum relevancy score an article needs to be saved.
pub const CONFIG_RELEVANCY_THRESHOLD: &str = "relevancy_threshold";
/// Config key for the model identifier handed to the LLM backend.
pub const CONFIG_LLM_MODEL: &str = "llm_model";

/// Narrow record-access interface the pipeline consumes. Schema, transactions
/// and migrations live behind this boundary.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn active_sources(&self) -> Result<Vec<FeedSource>>;

    async fn active_categories(&self) -> Result<Vec<Category>>;

    async fn active_topics(&self) -> Result<Vec<Topic>>;

    /// Free-form config lookup; absent keys are `None`, not an error.
    async fn config_value(&self, key: &str) -> Result<Option<String>>;

    /// Exact-match existence check on the article's canonical URL.
    async fn article_exists(&self, url: &str) -> Result<bool>;

    /// Insert a new article and return its assigned id.
    async fn insert_article(&self, article: NewArticle) -> Result<Uuid>;

    /// Delete articles created before `cutoff`; returns the count removed.
    async fn delete_articles_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete every stored article; returns the count removed.
    async fn delete_all_articles(&self) -> Result<u64>;

    /// All stored articles, newest first. Used by report consumers and tests.
    async fn list_articles(&self) -> Result<Vec<Article>>;
}
