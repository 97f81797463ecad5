use chrono::{Duration, Utc};
use newsbrief::classifier::{Classifier, DEFAULT_MODEL};
use newsbrief::fetcher::StaticFeedClient;
use newsbrief::llm::MockLlmBackend;
use newsbrief::pipeline::{Pipeline, RunOutcome};
use newsbrief::state::StartOutcome;
use newsbrief::store::{MemoryStore, RecordStore, CONFIG_RELEVANCY_THRESHOLD};
use newsbrief::types::{FeedSource, PipelineError, RawEntry};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn source(name: &str, url: &str) -> FeedSource {
    FeedSource {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: url.to_string(),
        access_key: None,
        active: true,
    }
}

fn entry(title: &str, link: &str) -> RawEntry {
    RawEntry {
        link: link.to_string(),
        title: title.to_string(),
        author: None,
        published: Some(Utc::now()),
        description: Some(format!("Body text for {}", title)),
        summary: None,
    }
}

fn verdict_json(score: i32, category: &str, author: &str) -> String {
    format!(
        r#"{{"bullets": ["Key fact"], "category": "{}", "relevancy_score": {}, "author": "{}"}}"#,
        category, score, author
    )
}

fn pipeline_with(
    store: Arc<MemoryStore>,
    feeds: StaticFeedClient,
    backend: Arc<MockLlmBackend>,
) -> Pipeline {
    let classifier = Classifier::new(backend, DEFAULT_MODEL.to_string());
    Pipeline::new(store, Arc::new(feeds), classifier)
}

#[tokio::test]
async fn saves_relevant_entry_with_canonical_category() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#3366ff").await;

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/rss", vec![entry("Chips", "http://a.test/1")]);
    // The model answers with a lowercased category name; the store's casing
    // must win.
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(85, "tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 1, total: 1 });

    let articles = store.list_articles().await.unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].category_name, "Tech");
    assert_eq!(articles[0].category_color, "#3366ff");
    assert_eq!(articles[0].relevancy_score, 85);
    assert_eq!(articles[0].summary, "\u{2022} Key fact");
}

#[tokio::test]
async fn threshold_boundary_saves_at_exactly_threshold() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;
    store.set_config(CONFIG_RELEVANCY_THRESHOLD, "60").await;

    let feeds = StaticFeedClient::new().with_entries(
        "http://feed.test/rss",
        vec![
            entry("Exactly At", "http://a.test/at"),
            entry("Just Below", "http://a.test/below"),
        ],
    );
    let backend = Arc::new(MockLlmBackend::with_handler(|prompt| {
        if prompt.contains("Exactly At") {
            Ok(verdict_json(60, "Tech", ""))
        } else {
            Ok(verdict_json(59, "Tech", ""))
        }
    }));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 1, total: 2 });

    let articles = store.list_articles().await.unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].title, "Exactly At");
}

#[tokio::test]
async fn low_score_entry_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/rss", vec![entry("Meh", "http://a.test/1")]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(40, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 0, total: 1 });
    assert_eq!(store.article_count().await, 0);
}

#[tokio::test]
async fn unknown_category_from_model_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let feeds = StaticFeedClient::new().with_entries(
        "http://feed.test/rss",
        vec![
            entry("Invented", "http://a.test/1"),
            entry("Uncategorized", "http://a.test/2"),
        ],
    );
    let backend = Arc::new(MockLlmBackend::with_handler(|prompt| {
        if prompt.contains("Invented") {
            Ok(verdict_json(90, "Gossip", ""))
        } else {
            Ok(verdict_json(90, "", ""))
        }
    }));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 0, total: 2 });
    assert_eq!(store.article_count().await, 0);
}

#[tokio::test]
async fn stale_entries_are_skipped_but_counted() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let mut old = entry("Old Story", "http://a.test/old");
    old.published = Some(Utc::now() - Duration::hours(48));

    let feeds = StaticFeedClient::new().with_entries("http://feed.test/rss", vec![old]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(95, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 0, total: 1 });

    let progress = pipeline.progress();
    assert_eq!(progress.processed, 1);
    assert_eq!(progress.saved, 0);
}

#[tokio::test]
async fn rerun_with_identical_content_saves_nothing_new() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/rss", vec![entry("Story", "http://a.test/1")]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(80, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let first = pipeline.run_once().await;
    assert_eq!(first, RunOutcome::Completed { saved: 1, total: 1 });

    let second = pipeline.run_once().await;
    assert_eq!(second, RunOutcome::Completed { saved: 0, total: 1 });
    assert_eq!(store.article_count().await, 1);
}

#[tokio::test]
async fn duplicate_link_across_sources_saved_once() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("first", "http://feed.test/a")).await;
    store.add_source(source("second", "http://feed.test/b")).await;
    store.add_category("Tech", "#fff").await;

    let shared = entry("Same Story", "http://a.test/shared");
    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/a", vec![shared.clone()])
        .with_entries("http://feed.test/b", vec![shared]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(80, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 1, total: 2 });
    assert_eq!(store.article_count().await, 1);
}

#[tokio::test]
async fn one_transport_failure_does_not_abort_the_run() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let entries: Vec<RawEntry> = (1..=5)
        .map(|i| entry(&format!("Entry {}", i), &format!("http://a.test/{}", i)))
        .collect();
    let feeds = StaticFeedClient::new().with_entries("http://feed.test/rss", entries);
    let backend = Arc::new(MockLlmBackend::with_handler(|prompt| {
        if prompt.contains("Entry 3") {
            Err(PipelineError::Backend("connection reset".to_string()))
        } else {
            Ok(verdict_json(80, "Tech", ""))
        }
    }));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 4, total: 5 });
}

#[tokio::test]
async fn progress_counts_every_entry_seen() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let mut stale = entry("Stale", "http://a.test/stale");
    stale.published = Some(Utc::now() - Duration::hours(30));
    let mut empty = entry("Empty", "http://a.test/empty");
    empty.description = None;
    empty.summary = None;
    let good = entry("Good", "http://a.test/good");

    let feeds =
        StaticFeedClient::new().with_entries("http://feed.test/rss", vec![stale, empty, good]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(80, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 1, total: 3 });

    let progress = pipeline.progress();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.processed, 3);
    assert_eq!(progress.saved, 1);
    assert!(progress.saved <= progress.processed && progress.processed <= progress.total);
    assert!(!progress.is_running);
}

#[tokio::test]
async fn stop_request_halts_before_next_classification() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let feeds = StaticFeedClient::new().with_entries(
        "http://feed.test/rss",
        vec![
            entry("First", "http://a.test/1"),
            entry("Second", "http://a.test/2"),
        ],
    );

    // The handler flips the stop flag while "classifying" the first entry;
    // the second entry must never reach the backend.
    let state_slot: Arc<Mutex<Option<Arc<newsbrief::state::RunState>>>> =
        Arc::new(Mutex::new(None));
    let slot = state_slot.clone();
    let backend = Arc::new(MockLlmBackend::with_handler(move |prompt| {
        if prompt.contains("First") {
            if let Some(state) = slot.lock().unwrap().as_ref() {
                state.request_stop();
            }
        }
        Ok(verdict_json(80, "Tech", ""))
    }));
    let backend_handle = backend.clone();
    let pipeline = pipeline_with(store.clone(), feeds, backend);
    *state_slot.lock().unwrap() = Some(pipeline.state());

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Stopped { saved: 1 });

    // One probe call plus one classification; nothing for the second entry.
    assert_eq!(backend_handle.call_count(), 2);
    assert_eq!(store.article_count().await, 1);
}

#[tokio::test]
async fn run_slot_is_exclusive() {
    let store = Arc::new(MemoryStore::new());
    store.add_category("Tech", "#fff").await;

    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(80, "Tech", "")));
    let pipeline = pipeline_with(store, StaticFeedClient::new(), backend);

    // Claim the slot as a concurrent run would.
    assert!(pipeline.state().begin());
    assert_eq!(pipeline.run_once().await, RunOutcome::Busy);
    assert!(pipeline.request_stop());
    pipeline.state().finish("done");

    // Slot released: a fresh run proceeds.
    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 0, total: 0 });
}

#[tokio::test]
async fn start_runs_in_background_and_records_outcome() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/rss", vec![entry("Story", "http://a.test/1")]);
    let backend = Arc::new(MockLlmBackend::returning(&verdict_json(80, "Tech", "")));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    assert_eq!(pipeline.start(), StartOutcome::Started);
    // The slot is claimed synchronously, so an immediate re-trigger loses.
    assert_eq!(pipeline.start(), StartOutcome::Busy);

    for _ in 0..200 {
        if !pipeline.progress().is_running {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert!(!pipeline.progress().is_running);
    assert_eq!(
        pipeline.state().last_outcome().as_deref(),
        Some("Processed 1 relevant articles from 1 entries")
    );
    assert_eq!(store.article_count().await, 1);
}

#[tokio::test]
async fn stop_request_without_active_run_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(MockLlmBackend::returning("{}"));
    let pipeline = pipeline_with(store, StaticFeedClient::new(), backend);

    assert!(!pipeline.request_stop());
}

#[tokio::test]
async fn no_active_categories_fails_before_any_model_call() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;

    let backend = Arc::new(MockLlmBackend::returning("{}"));
    let backend_handle = backend.clone();
    let pipeline = pipeline_with(store, StaticFeedClient::new(), backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(
        outcome,
        RunOutcome::Failed("No active categories found".to_string())
    );
    assert_eq!(backend_handle.call_count(), 0);
}

#[tokio::test]
async fn probe_failure_aborts_before_touching_sources() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let backend = Arc::new(MockLlmBackend::failing(
        "The security token has expired",
    ));
    let pipeline = pipeline_with(store.clone(), StaticFeedClient::new(), backend);

    let outcome = pipeline.run_once().await;
    match outcome {
        RunOutcome::Failed(msg) => {
            assert!(msg.starts_with("Model connectivity check failed:"), "{}", msg);
            assert!(msg.contains("expired"), "{}", msg);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(store.article_count().await, 0);

    // The flag is released even after a failed run.
    assert!(!pipeline.progress().is_running);
}

#[tokio::test]
async fn author_resolution_prefers_feed_then_model_then_unknown() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(source("news", "http://feed.test/rss")).await;
    store.add_category("Tech", "#fff").await;

    let mut from_feed = entry("Feed Author", "http://a.test/feed");
    from_feed.author = Some("Alice Reporter".to_string());
    let mut placeholder = entry("Placeholder Author", "http://a.test/model");
    placeholder.author = Some("unknown".to_string());
    let nobody = entry("No Author", "http://a.test/none");

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/rss", vec![from_feed, placeholder, nobody]);
    let backend = Arc::new(MockLlmBackend::with_handler(|prompt| {
        if prompt.contains("Placeholder Author") {
            Ok(verdict_json(80, "Tech", "Bob Byline"))
        } else {
            Ok(verdict_json(80, "Tech", ""))
        }
    }));
    let pipeline = pipeline_with(store.clone(), feeds, backend);

    let outcome = pipeline.run_once().await;
    assert_eq!(outcome, RunOutcome::Completed { saved: 3, total: 3 });

    let articles = store.list_articles().await.unwrap();
    let author_of = |title: &str| {
        articles
            .iter()
            .find(|a| a.title == title)
            .map(|a| a.author.clone())
            .unwrap()
    };
    assert_eq!(author_of("Feed Author"), "Alice Reporter");
    assert_eq!(author_of("Placeholder Author"), "Bob Byline");
    assert_eq!(author_of("No Author"), "Unknown");
}

#[tokio::test]
async fn entry_content_prefers_description_over_summary() {
    let mut e = entry("X", "http://a.test/x");
    e.description = Some("described".to_string());
    e.summary = Some("summarized".to_string());
    assert_eq!(e.content(), "described");

    e.description = None;
    assert_eq!(e.content(), "summarized");

    e.summary = None;
    assert_eq!(e.content(), "");
}

#[tokio::test]
async fn static_feed_client_serves_configured_urls_only() {
    use newsbrief::fetcher::FeedClient;

    let feeds = StaticFeedClient::new()
        .with_entries("http://feed.test/a", vec![entry("A", "http://a.test/1")]);

    assert_eq!(feeds.fetch(&source("a", "http://feed.test/a")).await.len(), 1);
    assert!(feeds.fetch(&source("b", "http://feed.test/b")).await.is_empty());
}
