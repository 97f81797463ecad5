pub mod classifier;
pub mod fetcher;
pub mod llm;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod types;

pub use classifier::{Classifier, DEFAULT_MODEL};
pub use fetcher::{FeedClient, FeedFetcher, StaticFeedClient};
pub use llm::{HttpLlmBackend, LlmBackend, MockLlmBackend};
pub use pipeline::{Pipeline, RunOutcome};
pub use state::{ProgressSnapshot, RunState, StartOutcome};
pub use store::{MemoryStore, PgStore, RecordStore};
pub use types::*;
