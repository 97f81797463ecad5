use crate::store::RecordStore;
use crate::types::{Article, Category, Feedback, FeedSource, NewArticle, Result, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory record store. Backs tests and local demos; behaves like the
/// Postgres store for everything the pipeline touches.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<Vec<FeedSource>>,
    categories: RwLock<Vec<Category>>,
    topics: RwLock<Vec<Topic>>,
    config: RwLock<HashMap<String, String>>,
    articles: RwLock<Vec<Article>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_source(&self, source: FeedSource) {
        self.sources.write().await.push(source);
    }

    pub async fn add_category(&self, name: &str, color: &str) {
        self.categories.write().await.push(Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: color.to_string(),
            active: true,
        });
    }

    pub async fn add_topic(&self, name: &str, keywords: &str) {
        self.topics.write().await.push(Topic {
            id: Uuid::new_v4(),
            name: name.to_string(),
            keywords: keywords.to_string(),
            active: true,
        });
    }

    pub async fn set_config(&self, key: &str, value: &str) {
        self.config
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn article_count(&self) -> usize {
        self.articles.read().await.len()
    }

    /// Insert a fully formed article, creation timestamp included. Lets tests
    /// stage records that predate the retention window.
    pub async fn push_article(&self, article: Article) {
        self.articles.write().await.push(article);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn active_sources(&self) -> Result<Vec<FeedSource>> {
        Ok(self
            .sources
            .read()
            .await
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn active_categories(&self) -> Result<Vec<Category>> {
        Ok(self
            .categories
            .read()
            .await
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn active_topics(&self) -> Result<Vec<Topic>> {
        Ok(self
            .topics
            .read()
            .await
            .iter()
            .filter(|t| t.active)
            .cloned()
            .collect())
    }

    async fn config_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.config.read().await.get(key).cloned())
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        Ok(self.articles.read().await.iter().any(|a| a.url == url))
    }

    async fn insert_article(&self, article: NewArticle) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.articles.write().await.push(Article {
            id,
            title: article.title,
            url: article.url,
            content: article.content,
            summary: article.summary,
            author: article.author,
            source_id: article.source_id,
            published_at: article.published_at,
            category_name: article.category_name,
            category_color: article.category_color,
            relevancy_score: article.relevancy_score,
            feedback: Feedback::Neutral,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn delete_articles_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut articles = self.articles.write().await;
        let before = articles.len();
        articles.retain(|a| a.created_at >= cutoff);
        Ok((before - articles.len()) as u64)
    }

    async fn delete_all_articles(&self) -> Result<u64> {
        let mut articles = self.articles.write().await;
        let count = articles.len() as u64;
        articles.clear();
        Ok(count)
    }

    async fn list_articles(&self) -> Result<Vec<Article>> {
        let mut articles = self.articles.read().await.clone();
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(articles)
    }
}
