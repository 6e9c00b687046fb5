//! Batch Runner
//!
//! JSONL in, JSONL out: one output record per non-blank input line, written
//! and flushed as soon as the question finishes. Each question runs in its
//! own task so a panic becomes that question's failure record.

use crate::agent::contracts::{Route, SessionState};
use crate::agent::graph::Orchestrator;
use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub const NO_EXPLANATION: &str = "No explanation provided.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub format_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: String,
    pub final_answer: Option<Value>,
    pub sql: String,
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<String>,
}

/// 1.0 for a valid execution, 0.8 for the passage-only route, else 0.0.
/// A null answer is always 0.0.
pub fn confidence(state: &SessionState) -> f64 {
    if state.final_answer.is_none() {
        return 0.0;
    }
    if state.is_valid() {
        1.0
    } else if state.classification == Some(Route::Rag) {
        0.8
    } else {
        0.0
    }
}

impl AnswerRecord {
    pub fn from_session(id: impl Into<String>, state: &SessionState) -> Self {
        let sql = if state.is_hybrid() {
            state.query.clone()
        } else {
            String::new()
        };
        let citations: BTreeSet<String> = state.citations.iter().cloned().collect();

        Self {
            id: id.into(),
            final_answer: state.final_answer.clone(),
            sql,
            confidence: confidence(state),
            explanation: state
                .explanation
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| NO_EXPLANATION.to_string()),
            citations: citations.into_iter().collect(),
        }
    }

    /// Terminal record for a question whose traversal did not complete.
    pub fn failure(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            id: id.into(),
            final_answer: None,
            sql: String::new(),
            confidence: 0.0,
            explanation: format!("System Error: {}", reason),
            citations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub total_secs: f64,
}

impl BatchSummary {
    pub fn average_secs(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.total_secs / self.processed as f64
        }
    }
}

/// Run one question behind a task boundary.
pub async fn answer_question(orchestrator: &Arc<Orchestrator>, record: &BatchRecord) -> AnswerRecord {
    let orchestrator = Arc::clone(orchestrator);
    let question = record.question.clone();
    let format_hint = record.format_hint.clone();

    let handle = tokio::spawn(async move { orchestrator.run(&question, &format_hint).await });
    match handle.await {
        Ok(Ok(state)) => AnswerRecord::from_session(record.id.clone(), &state),
        Ok(Err(e)) => {
            error!("Question {} failed: {}", record.id, e);
            AnswerRecord::failure(record.id.clone(), e)
        }
        Err(e) => {
            error!("Question {} aborted: {}", record.id, e);
            AnswerRecord::failure(record.id.clone(), e)
        }
    }
}

/// Best-effort id from a line that is not a valid record.
fn recover_id(line: &str) -> String {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| match v.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_default()
}

/// Answer every non-blank line of `input`, writing one JSON line per record.
pub async fn process_lines<W: Write>(
    orchestrator: &Arc<Orchestrator>,
    input: &str,
    out: &mut W,
) -> Result<BatchSummary> {
    let started = Instant::now();
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    let total = lines.len();
    let mut summary = BatchSummary::default();

    for (i, line) in lines.into_iter().enumerate() {
        let question_started = Instant::now();

        let answer = match serde_json::from_str::<BatchRecord>(line) {
            Ok(record) => {
                info!("[{}/{}] {}: {}", i + 1, total, record.id, preview(&record.question));
                answer_question(orchestrator, &record).await
            }
            Err(e) => {
                error!("[{}/{}] invalid record: {}", i + 1, total, e);
                AnswerRecord::failure(recover_id(line), format!("invalid record: {}", e))
            }
        };

        if answer.final_answer.is_none() {
            summary.failed += 1;
        }
        info!(
            "   -> confidence {:.1}, {:.2}s",
            answer.confidence,
            question_started.elapsed().as_secs_f64()
        );

        serde_json::to_writer(&mut *out, &answer)?;
        out.write_all(b"\n")?;
        out.flush()?;
        summary.processed += 1;
    }

    summary.total_secs = started.elapsed().as_secs_f64();
    Ok(summary)
}

/// File-to-file batch run.
pub async fn run_batch(
    orchestrator: &Arc<Orchestrator>,
    input_path: &Path,
    output_path: &Path,
) -> Result<BatchSummary> {
    let input = std::fs::read_to_string(input_path).map_err(|e| {
        CopilotError::Batch(format!("Cannot read {}: {}", input_path.display(), e))
    })?;
    let file = File::create(output_path).map_err(|e| {
        CopilotError::Batch(format!("Cannot create {}: {}", output_path.display(), e))
    })?;
    let mut out = BufWriter::new(file);

    info!("Batch {} -> {}", input_path.display(), output_path.display());
    let summary = process_lines(orchestrator, &input, &mut out).await?;
    info!(
        "Batch complete: {} records, {} without answer, {:.2}s total, {:.2}s avg",
        summary.processed,
        summary.failed,
        summary.total_secs,
        summary.average_secs()
    );
    Ok(summary)
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}
