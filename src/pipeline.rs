use crate::classifier::Classifier;
use crate::fetcher::FeedClient;
use crate::state::{ProgressSnapshot, RunState, StartOutcome};
use crate::store::{RecordStore, CONFIG_RELEVANCY_THRESHOLD};
use crate::types::{Category, FeedSource, NewArticle, RawEntry, Result, Topic, VerdictStatus};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Articles older than this are never ingested, and stored records beyond it
/// are purged at the start of every run.
const RETENTION_HOURS: i64 = 24;
const DEFAULT_RELEVANCY_THRESHOLD: i32 = 60;
/// Progress label length cap.
const LABEL_MAX_CHARS: usize = 60;

/// Cancellation is cooperative: stop requests are observed only at these two
/// named checkpoints, so latency is bounded by one in-flight sub-operation.
const CHECKPOINT_LOOP_TOP: &str = "entry-loop-top";
const CHECKPOINT_PRE_CLASSIFY: &str = "pre-classify";

/// Feed-side author values that mean "no author".
const AUTHOR_PLACEHOLDERS: &[&str] = &["unknown", "none", "n/a"];
/// Model-side additions: models phrase absence more verbosely.
const MODEL_AUTHOR_PLACEHOLDERS: &[&str] =
    &["unknown", "none", "n/a", "not available", "not specified"];

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { saved: usize, total: usize },
    Stopped { saved: usize },
    Failed(String),
    /// Another run already held the slot; nothing happened.
    Busy,
}

impl RunOutcome {
    /// Human-readable status line, usable directly as a UI message.
    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed { saved, total } => {
                format!("Processed {} relevant articles from {} entries", saved, total)
            }
            RunOutcome::Stopped { saved } => {
                format!("Processing stopped by user. Saved {} articles.", saved)
            }
            RunOutcome::Failed(msg) => msg.clone(),
            RunOutcome::Busy => "Already processing".to_string(),
        }
    }
}

enum EntryOutcome {
    Saved,
    Skipped,
    Stop,
}

/// Coordinates fetch, dedupe, classification, filtering and persistence
/// across all configured sources. One run at a time process-wide. Cheaply
/// cloneable; clones share the same run state and store handles.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    feeds: Arc<dyn FeedClient>,
    classifier: Classifier,
    state: Arc<RunState>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        feeds: Arc<dyn FeedClient>,
        classifier: Classifier,
    ) -> Self {
        Self {
            store,
            feeds,
            classifier,
            state: Arc::new(RunState::new()),
        }
    }

    /// Shared run state, for wiring into a polling surface.
    pub fn state(&self) -> Arc<RunState> {
        self.state.clone()
    }

    /// Non-blocking trigger: claims the run slot and hands the work to a
    /// background task. The caller gets an immediate started/busy answer.
    pub fn start(&self) -> StartOutcome {
        if !self.state.begin() {
            return StartOutcome::Busy;
        }

        let pipeline = self.clone();
        tokio::spawn(async move {
            let outcome = pipeline.execute().await;
            let message = outcome.message();
            info!("Pipeline run finished: {}", message);
            pipeline.state.finish(&message);
        });

        StartOutcome::Started
    }

    /// Run a full pipeline pass inline. Claims the same slot as `start`, so a
    /// concurrent background run reports `Busy`.
    pub async fn run_once(&self) -> RunOutcome {
        if !self.state.begin() {
            return RunOutcome::Busy;
        }
        let outcome = self.execute().await;
        self.state.finish(&outcome.message());
        outcome
    }

    /// Ask the in-flight run to stop at its next checkpoint.
    pub fn request_stop(&self) -> bool {
        let accepted = self.state.request_stop();
        if accepted {
            info!("Stop requested by user");
        }
        accepted
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    /// Standalone connectivity probe; safe to call whether or not a run is
    /// active.
    pub async fn check_connectivity(&self) -> (bool, String) {
        self.classifier.check_connectivity().await
    }

    /// Delete stored articles older than the retention window.
    pub async fn purge_stale(&self) -> Result<u64> {
        self.store
            .delete_articles_older_than(retention_cutoff())
            .await
    }

    /// Delete every stored article.
    pub async fn purge_all(&self) -> Result<u64> {
        self.store.delete_all_articles().await
    }

    /// Outermost error boundary: anything escaping the run body becomes a
    /// `Failed` outcome instead of a panic or a leaked error.
    async fn execute(&self) -> RunOutcome {
        match self.run_pipeline().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Pipeline run failed: {}", e);
                RunOutcome::Failed(format!("Error: {}", e))
            }
        }
    }

    async fn run_pipeline(&self) -> Result<RunOutcome> {
        // Housekeeping before anything else: drop records past retention.
        let purged = self.purge_stale().await?;
        if purged > 0 {
            info!("Purged {} stale articles before run", purged);
        }

        let sources = self.store.active_sources().await?;
        let categories = self.store.active_categories().await?;
        let topics = self.store.active_topics().await?;
        let threshold = self.relevancy_threshold().await;

        if categories.is_empty() {
            return Ok(RunOutcome::Failed("No active categories found".to_string()));
        }

        info!(
            "Starting pipeline run: {} sources, {} categories, {} topics, threshold {}",
            sources.len(),
            categories.len(),
            topics.len(),
            threshold
        );

        let (connected, message) = self.classifier.check_connectivity().await;
        if !connected {
            return Ok(RunOutcome::Failed(format!(
                "Model connectivity check failed: {}",
                message
            )));
        }

        // Pre-scan for the progress denominator. This is an independent fetch
        // pass; sources may return different content by the time the main
        // loop re-fetches them, so the total is approximate.
        let mut total = 0usize;
        for source in &sources {
            total += self.feeds.fetch(source).await.len();
        }
        self.state.set_total(total);

        let cutoff = retention_cutoff();
        let mut seen_links: HashSet<String> = HashSet::new();

        for source in &sources {
            if self.stopped_at(CHECKPOINT_LOOP_TOP) {
                return Ok(RunOutcome::Stopped {
                    saved: self.state.saved(),
                });
            }

            debug!("Processing source '{}'", source.name);
            let entries = self.feeds.fetch(source).await;

            for entry in entries {
                if self.stopped_at(CHECKPOINT_LOOP_TOP) {
                    return Ok(RunOutcome::Stopped {
                        saved: self.state.saved(),
                    });
                }

                let title = entry.title.clone();
                match self
                    .process_entry(entry, source, &categories, &topics, threshold, cutoff, &mut seen_links)
                    .await
                {
                    Ok(EntryOutcome::Stop) => {
                        return Ok(RunOutcome::Stopped {
                            saved: self.state.saved(),
                        });
                    }
                    Ok(_) => {}
                    // Single-entry failures never abort the run.
                    Err(e) => warn!("Error processing entry '{}': {}", title, e),
                }
            }
        }

        Ok(RunOutcome::Completed {
            saved: self.state.saved(),
            total,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_entry(
        &self,
        entry: RawEntry,
        source: &FeedSource,
        categories: &[Category],
        topics: &[Topic],
        threshold: i32,
        cutoff: DateTime<Utc>,
        seen_links: &mut HashSet<String>,
    ) -> Result<EntryOutcome> {
        let title = if entry.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            entry.title.clone()
        };
        let published = entry.published.unwrap_or_else(Utc::now);

        // Progress reflects entries seen, not merely saved: count and label
        // before any skip decision.
        self.state.incr_processed();
        self.state.set_current_label(truncate_label(&title));

        if published < cutoff {
            debug!("Skipping '{}': older than retention window", title);
            return Ok(EntryOutcome::Skipped);
        }

        if entry.link.is_empty() || seen_links.contains(&entry.link) {
            debug!("Skipping '{}': duplicate or missing link", title);
            return Ok(EntryOutcome::Skipped);
        }
        seen_links.insert(entry.link.clone());

        if self.store.article_exists(&entry.link).await? {
            debug!("Skipping '{}': already stored", title);
            return Ok(EntryOutcome::Skipped);
        }

        let content = entry.content();
        if content.is_empty() {
            debug!("Skipping '{}': no usable content", title);
            return Ok(EntryOutcome::Skipped);
        }
        let content = content.to_string();

        // Last chance to bail before the costly model call.
        if self.stopped_at(CHECKPOINT_PRE_CLASSIFY) {
            return Ok(EntryOutcome::Stop);
        }

        let state = self.state.clone();
        let verdict = self
            .classifier
            .analyze(
                &title,
                entry.author.as_deref().unwrap_or(""),
                &content,
                &entry.link,
                categories,
                topics,
                &move || state.stop_requested(),
            )
            .await;

        match verdict.status {
            VerdictStatus::Cancelled => return Ok(EntryOutcome::Stop),
            VerdictStatus::Failed => {
                warn!("Skipping '{}' ({}): analysis failed", title, entry.link);
                return Ok(EntryOutcome::Skipped);
            }
            VerdictStatus::Ok => {}
        }

        let author = resolve_author(entry.author.as_deref(), &verdict.author);

        if verdict.relevancy_score < threshold {
            debug!(
                "Skipping '{}': relevancy {} below threshold {}",
                title, verdict.relevancy_score, threshold
            );
            return Ok(EntryOutcome::Skipped);
        }

        if verdict.category.trim().is_empty() {
            debug!("Skipping '{}': no category assigned", title);
            return Ok(EntryOutcome::Skipped);
        }

        // The classifier is not trusted to invent categories; resolve against
        // the active list or drop the entry.
        let category = match categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(verdict.category.trim()))
        {
            Some(category) => category,
            None => {
                warn!(
                    "Skipping '{}': model returned unknown category '{}'",
                    title, verdict.category
                );
                return Ok(EntryOutcome::Skipped);
            }
        };

        let article = NewArticle {
            title: title.clone(),
            url: entry.link.clone(),
            content,
            summary: verdict.summary,
            author,
            source_id: source.id,
            published_at: published,
            category_name: category.name.clone(),
            category_color: category.color.clone(),
            relevancy_score: verdict.relevancy_score,
        };

        let id = self.store.insert_article(article).await?;
        self.state.incr_saved();
        info!(
            "Saved article {} '{}' (category: {}, score: {})",
            id, title, category.name, verdict.relevancy_score
        );

        Ok(EntryOutcome::Saved)
    }

    async fn relevancy_threshold(&self) -> i32 {
        match self.store.config_value(CONFIG_RELEVANCY_THRESHOLD).await {
            Ok(Some(value)) => value.trim().parse().unwrap_or(DEFAULT_RELEVANCY_THRESHOLD),
            Ok(None) => DEFAULT_RELEVANCY_THRESHOLD,
            Err(e) => {
                warn!("Could not read relevancy threshold, using default: {}", e);
                DEFAULT_RELEVANCY_THRESHOLD
            }
        }
    }

    fn stopped_at(&self, checkpoint: &str) -> bool {
        let stop = self.state.stop_requested();
        if stop {
            info!("Stop observed at checkpoint '{}'", checkpoint);
        }
        stop
    }
}

fn retention_cutoff() -> DateTime<Utc> {
    Utc::now() - Duration::hours(RETENTION_HOURS)
}

fn truncate_label(title: &str) -> &str {
    match title.char_indices().nth(LABEL_MAX_CHARS) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

/// Prefer the feed-provided author, then the model-inferred one, each gated
/// by a placeholder blacklist; fall back to the literal "Unknown".
fn resolve_author(feed_author: Option<&str>, model_author: &str) -> String {
    let feed_author = feed_author.unwrap_or("").trim();
    if !feed_author.is_empty() && !AUTHOR_PLACEHOLDERS.contains(&feed_author.to_lowercase().as_str())
    {
        return feed_author.to_string();
    }

    let model_author = model_author.trim();
    if !model_author.is_empty()
        && !MODEL_AUTHOR_PLACEHOLDERS.contains(&model_author.to_lowercase().as_str())
    {
        return model_author.to_string();
    }

    "Unknown".to_string()
}
