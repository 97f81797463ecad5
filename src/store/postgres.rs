use crate::store::RecordStore;
use crate::types::{Article, Category, Feedback, FeedSource, NewArticle, Result, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

/// PostgreSQL-backed record store.
///
/// Queries are issued at runtime (no compile-time checked macros) so the crate
/// builds without a live database. Schema is expected to be provisioned
/// externally, e.g. via `sqlx migrate run`.
pub struct PgStore {
    db: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.db
    }

    fn row_to_article(row: &sqlx::postgres::PgRow) -> Result<Article> {
        let feedback: Option<String> = row.try_get("feedback")?;
        Ok(Article {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            content: row.try_get("content")?,
            summary: row.try_get("summary")?,
            author: row.try_get("author")?,
            source_id: row.try_get("source_id")?,
            published_at: row.try_get("published_at")?,
            category_name: row.try_get("category_name")?,
            category_color: row.try_get("category_color")?,
            relevancy_score: row.try_get("relevancy_score")?,
            feedback: match feedback.as_deref() {
                Some("like") => Feedback::Like,
                Some("dislike") => Feedback::Dislike,
                _ => Feedback::Neutral,
            },
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn active_sources(&self) -> Result<Vec<FeedSource>> {
        let rows = sqlx::query(
            "SELECT id, name, url, access_key, active FROM sources WHERE active = true ORDER BY created_at",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FeedSource {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    url: row.try_get("url")?,
                    access_key: row.try_get("access_key")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn active_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, name, color, active FROM categories WHERE active = true ORDER BY name",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    color: row.try_get("color")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn active_topics(&self) -> Result<Vec<Topic>> {
        let rows = sqlx::query(
            "SELECT id, name, keywords, active FROM topics WHERE active = true ORDER BY name",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Topic {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    keywords: row.try_get("keywords")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn config_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM system_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM articles WHERE url = $1 LIMIT 1")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_article(&self, article: NewArticle) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, url, content, summary, author, source_id, published_at,
                 category_name, category_color, relevancy_score, feedback, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(&article.author)
        .bind(article.source_id)
        .bind(article.published_at)
        .bind(&article.category_name)
        .bind(&article.category_color)
        .bind(article.relevancy_score)
        .bind("neutral")
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(id)
    }

    async fn delete_articles_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!("Deleted {} articles created before {}", count, cutoff);
        }
        Ok(count)
    }

    async fn delete_all_articles(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles").execute(&self.db).await?;
        let count = result.rows_affected();
        info!("Cleared {} articles from store", count);
        Ok(count)
    }

    async fn list_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query("SELECT * FROM articles ORDER BY created_at DESC")
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(Self::row_to_article).collect()
    }
}
