//! Question Classifier
//!
//! Routes a question to the passage-only path or the SQL path. Always
//! resolves to a route: a failed or malformed completion falls back to a
//! keyword heuristic.

use crate::agent::contracts::Route;
use crate::llm::{ChatMessage, CompletionService};
use crate::text_extract::extract_json_object;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

lazy_static! {
    static ref DATASET_YEAR: Regex = Regex::new(r"\b199[6-9]\b").unwrap();
}

const AGGREGATION_KEYWORDS: [&str; 4] = ["how many", "sum", "count", "total"];

const ROUTER_PROMPT: &str = r#"You are a Query Router.
Your task is to classify the User Question into one of two paths:

1. "rag": For static knowledge, policies, text lookup. (e.g. "What is the return policy?", "Days to return?")
2. "hybrid": For database queries, math, counting, rankings, or specific year data (1997).

### EXAMPLES
- "Return window for beverages?" -> "rag"
- "Top 3 products by sales?" -> "hybrid"
- "Revenue in 1997?" -> "hybrid"
- "Who is the best customer?" -> "hybrid"

### OUTPUT
Return a JSON object: {"classification": "..."}
"#;

/// Deterministic fallback: aggregation keywords or a dataset year mean SQL.
pub fn heuristic_route(question: &str) -> Route {
    let q = question.to_lowercase();
    if AGGREGATION_KEYWORDS.iter().any(|k| q.contains(k)) || DATASET_YEAR.is_match(&q) {
        Route::Hybrid
    } else {
        Route::Rag
    }
}

/// Parse `{"classification": "..."}`. A well-formed object without the key
/// routes to hybrid; unparsable text or an unknown label is `None`.
pub fn parse_route(raw: &str) -> Option<Route> {
    let value = extract_json_object(raw).ok()?;
    match value.get("classification") {
        None => Some(Route::Hybrid),
        Some(label) => match label.as_str()?.trim().to_lowercase().as_str() {
            "rag" => Some(Route::Rag),
            "hybrid" => Some(Route::Hybrid),
            _ => None,
        },
    }
}

pub struct QuestionClassifier {
    llm: Arc<dyn CompletionService>,
}

impl QuestionClassifier {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, question: &str) -> Route {
        let messages = vec![
            ChatMessage::system(ROUTER_PROMPT),
            ChatMessage::user(format!("Question: {}", question)),
        ];

        let route = match self.llm.complete(&messages).await {
            Ok(raw) => parse_route(&raw).unwrap_or_else(|| {
                warn!("Unparsable router output, using keyword heuristic: {:?}", raw);
                heuristic_route(question)
            }),
            Err(e) => {
                warn!("Router call failed, using keyword heuristic: {}", e);
                heuristic_route(question)
            }
        };

        info!("Classified question as {}", route.as_str());
        route
    }
}
