use crate::llm::LlmBackend;
use crate::types::{Category, ClassificationVerdict, Topic, VerdictStatus};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Model cost/latency vs. context tradeoff: only this many characters of the
/// article body go into the prompt.
const CONTENT_PREVIEW_CHARS: usize = 2500;
const ANALYSIS_MAX_TOKENS: u32 = 1200;
const PROBE_MAX_TOKENS: u32 = 5;

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Shape the model is instructed to answer with. Every field defaults so a
/// partially valid object still decodes.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    bullets: Vec<String>,
    #[serde(default)]
    category: String,
    #[serde(default)]
    relevancy_score: i32,
    #[serde(default)]
    author: String,
}

/// Classifies articles against a caller-supplied category vocabulary and
/// topic rubric via one model call per article.
#[derive(Clone)]
pub struct Classifier {
    backend: Arc<dyn LlmBackend>,
    model: String,
}

impl Classifier {
    pub fn new(backend: Arc<dyn LlmBackend>, model: String) -> Self {
        Self { backend, model }
    }

    /// Analyze one article. Never errors: transport failures and undecodable
    /// model output both come back as a `Failed` verdict, and a stop request
    /// observed before the call comes back as `Cancelled` without spending
    /// model quota.
    pub async fn analyze(
        &self,
        title: &str,
        author: &str,
        content: &str,
        url: &str,
        categories: &[Category],
        topics: &[Topic],
        cancel: &(dyn Fn() -> bool + Send + Sync),
    ) -> ClassificationVerdict {
        if cancel() {
            info!("Stop requested before model call for '{}'", title);
            return ClassificationVerdict::cancelled();
        }

        let prompt = build_prompt(title, author, content, categories, topics);
        debug!(
            "Analyzing '{}' ({}): prompt {} chars, {} categories, {} topics",
            title,
            url,
            prompt.len(),
            categories.len(),
            topics.len()
        );

        let response = match self
            .backend
            .complete(&self.model, &prompt, ANALYSIS_MAX_TOKENS)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Model call failed for '{}': {}", title, e);
                return ClassificationVerdict::failed();
            }
        };

        match decode_verdict(&response) {
            Some(raw) => {
                let summary = render_summary(raw.bullets);
                debug!(
                    "Verdict for '{}': category='{}', score={}",
                    title, raw.category, raw.relevancy_score
                );
                ClassificationVerdict {
                    status: VerdictStatus::Ok,
                    summary,
                    category: raw.category,
                    relevancy_score: raw.relevancy_score.clamp(0, 100),
                    author: raw.author,
                }
            }
            None => {
                warn!("Undecodable model output for '{}'", title);
                ClassificationVerdict::failed()
            }
        }
    }

    /// Minimal-cost pre-flight check that the backend is reachable with the
    /// current credentials. Returns a user-facing message either way.
    pub async fn check_connectivity(&self) -> (bool, String) {
        match self
            .backend
            .complete(&self.model, "hi", PROBE_MAX_TOKENS)
            .await
        {
            Ok(_) => (true, "Model backend connected successfully".to_string()),
            Err(e) => (false, classify_probe_failure(&e.to_string())),
        }
    }
}

fn build_prompt(
    title: &str,
    author: &str,
    content: &str,
    categories: &[Category],
    topics: &[Topic],
) -> String {
    let category_names = categories
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut relevancy_section = String::new();
    if !topics.is_empty() {
        relevancy_section.push_str(
            "\n\nRELEVANCY CRITERIA:\nThe article should be related to these topics and keywords:\n",
        );
        for topic in topics {
            relevancy_section.push_str(&format!("- {}: {}\n", topic.name, topic.keywords));
        }
        relevancy_section.push_str(
            "\nScore the relevancy (0-100) based on how well the article relates to these topics. \
             Score 75+ if clearly relevant, 50-74 if somewhat related, below 50 if not related.",
        );
    }

    format!(
        "Analyze this article and create an executive briefing.\n\n\
         Title: {title}\n\
         Author: {author}\n\
         Content: {content}{relevancy_section}\n\n\
         Create a unified list of 4-5 bulleted statements merging key facts and quotes.\n\
         Avoid redundant information.\n\n\
         Match against Categories: {category_names}\n\n\
         IMPORTANT RULES:\n\
         1. Return ONLY valid JSON, no explanatory text before or after\n\
         2. The \"category\" field MUST be EXACTLY one of these values: {category_names}\n\
         3. Do NOT create new category names or use variations\n\
         4. If the article doesn't match any category well, use an empty string \"\"\n\
         5. For \"author\": extract the author name from the content if the provided Author is \
         empty or unknown. Look for bylines like \"By [Name]\" or reporter attributions. \
         If none can be found, return an empty string \"\"\n\n\
         Return ONLY this JSON format:\n\
         {{\"bullets\": [\"Bullet 1\", \"Bullet 2\"], \"category\": \"category_name\", \
         \"relevancy_score\": 85, \"author\": \"Author Name\"}}",
        content = truncate_chars(content, CONTENT_PREVIEW_CHARS),
    )
}

/// Character-boundary-safe prefix of `s`.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Two-stage defensive decode: strip any explanatory wrapper around the JSON
/// object, try a strict parse, and on failure retry once after normalizing
/// quotes and whitespace. Both failing means the output is unusable.
fn decode_verdict(response: &str) -> Option<RawVerdict> {
    let json = extract_json_object(response)?;

    if let Ok(raw) = serde_json::from_str::<RawVerdict>(json) {
        return Some(raw);
    }

    let cleaned = normalize_json_text(json);
    match serde_json::from_str::<RawVerdict>(&cleaned) {
        Ok(raw) => {
            debug!("Verdict decode recovered after cleanup pass");
            Some(raw)
        }
        Err(e) => {
            warn!("Verdict decode failed even after cleanup: {}", e);
            None
        }
    }
}

/// Models sometimes wrap the object in prose; keep only the span from the
/// first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn normalize_json_text(json: &str) -> String {
    let mut cleaned = json.replace('\'', "\"").replace('\n', " ");
    while cleaned.contains("  ") {
        cleaned = cleaned.replace("  ", " ");
    }
    cleaned
}

/// Strip bullet-marker prefixes, drop duplicates (case- and quote-insensitive)
/// and join the survivors into bullet-prefixed lines.
fn render_summary(bullets: Vec<String>) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut cleaned = Vec::new();

    for bullet in bullets {
        let text = bullet
            .trim()
            .trim_start_matches('\u{2022}')
            .trim_start_matches('-')
            .trim()
            .to_string();

        let normalized: String = text
            .to_lowercase()
            .chars()
            .filter(|c| *c != '"' && *c != '\'')
            .collect();
        let normalized = normalized.trim().to_string();

        if !normalized.is_empty() && seen.insert(normalized) {
            cleaned.push(text);
        }
    }

    cleaned
        .into_iter()
        .map(|b| format!("\u{2022} {}", b))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map known backend failure text onto user-facing categories; anything
/// unrecognized passes through verbatim.
fn classify_probe_failure(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("credentials") {
        "API credentials not configured or invalid".to_string()
    } else if lower.contains("expired") {
        "API credentials have expired. Please refresh your credentials.".to_string()
    } else if lower.contains("region") {
        "Backend region is not configured properly".to_string()
    } else if lower.contains("access denied") {
        "Access denied to the model backend".to_string()
    } else {
        format!("Model connection failed: {}", error)
    }
}
