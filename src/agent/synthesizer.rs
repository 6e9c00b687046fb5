//! Answer Synthesizer
//!
//! Asks for a strict `{final_answer, explanation, citations}` object and
//! scrapes it out of the completion. Failure here is a per-question null
//! answer, never an error.

use crate::doc_rag::Passage;
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionService};
use crate::text_extract::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub final_answer: Option<Value>,
    pub explanation: Option<String>,
    pub citations: Vec<String>,
}

impl SynthesizedAnswer {
    /// Null answer whose explanation carries the raw execution result.
    pub fn parse_failure(execution_result: &str) -> Self {
        Self {
            final_answer: None,
            explanation: Some(format!("JSON Parsing Failed. Raw result: {}", execution_result)),
            citations: Vec::new(),
        }
    }
}

/// Parse the synthesizer reply. `null` answers are kept as `None`.
pub fn parse_answer(raw: &str) -> Result<SynthesizedAnswer> {
    let value = extract_json_object(raw)?;

    let final_answer = value
        .get("final_answer")
        .filter(|v| !v.is_null())
        .cloned();
    let explanation = value.get("explanation").and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    });
    let citations = match value.get("citations") {
        Some(Value::Array(items)) => items.iter().filter_map(citation_text).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };

    Ok(SynthesizedAnswer {
        final_answer,
        explanation,
        citations,
    })
}

fn citation_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn CompletionService>,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub fn build_messages(
        question: &str,
        execution_result: &str,
        passages: &[Passage],
        format_hint: &str,
    ) -> Vec<ChatMessage> {
        let docs_text = passages
            .iter()
            .map(|p| format!("- {}", p.text))
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            r#"You are a JSON Bot.

### INPUT
- Question: {question}
- SQL Result: {execution_result}
- Docs: {docs_text}
- Hint: {format_hint}

### RULES
1. **SQL Answer:** If SQL Result has data, extract the answer from it.
2. **RAG Answer:** If SQL Result is empty/error, use **Docs** to answer.
3. **Format:** Strict JSON. Keys: "final_answer", "explanation", "citations".

### EXAMPLE (RAG)
Input: SQL: "No SQL", Docs: "Return window is 14 days."
Output: {{"final_answer": 14, "explanation": "Policy says 14 days.", "citations": ["Policy"]}}
"#
        );
        vec![ChatMessage::system(system), ChatMessage::user("JSON:")]
    }

    pub async fn synthesize(
        &self,
        question: &str,
        execution_result: &str,
        passages: &[Passage],
        format_hint: &str,
    ) -> SynthesizedAnswer {
        let messages = Self::build_messages(question, execution_result, passages, format_hint);
        let parsed = match self.llm.complete(&messages).await {
            Ok(raw) => parse_answer(&raw).map_err(|e| {
                warn!("Synthesizer output unparsable ({}): {:?}", e, raw);
                e
            }),
            Err(e) => {
                warn!("Synthesizer call failed: {}", e);
                Err(e)
            }
        };
        parsed.unwrap_or_else(|_| SynthesizedAnswer::parse_failure(execution_result))
    }
}
