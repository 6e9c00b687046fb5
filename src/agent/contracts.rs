use crate::agent::planner::QueryPlan;
use crate::doc_rag::Passage;
use crate::execution_loop::is_error_result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Result text for sessions that never reached the SQL path.
pub const NO_SQL_EXECUTED: &str = "No SQL executed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Answer from retrieved passages only
    Rag,
    /// Plan, generate SQL, execute, then answer
    Hybrid,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Rag => "rag",
            Route::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    Classify,
    Retrieve,
    Plan,
    GenerateSql,
    Execute,
    Retry,
    Synthesize,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts_ms: u64,
    pub event_type: TraceEventType,
    #[serde(default)]
    pub payload: Value,
}

impl TraceEvent {
    pub fn now(event_type: TraceEventType, payload: Value) -> Self {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            ts_ms,
            event_type,
            payload,
        }
    }
}

/// Per-question state threaded through the pipeline.
///
/// `question` and `format_hint` are fixed at construction. The execution
/// fields only change through [`SessionState::record_execution`], which keeps
/// `is_valid` consistent with the result text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    question: String,
    format_hint: String,
    pub classification: Option<Route>,
    pub retrieved_passages: Vec<Passage>,
    pub plan: Option<QueryPlan>,
    pub query: String,
    execution_result: Option<String>,
    is_valid: bool,
    attempt_count: u32,
    pub final_answer: Option<Value>,
    pub explanation: Option<String>,
    pub citations: Vec<String>,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
}

impl SessionState {
    pub fn new(question: impl Into<String>, format_hint: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            format_hint: format_hint.into(),
            classification: None,
            retrieved_passages: Vec::new(),
            plan: None,
            query: String::new(),
            execution_result: None,
            is_valid: false,
            attempt_count: 0,
            final_answer: None,
            explanation: None,
            citations: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn format_hint(&self) -> &str {
        &self.format_hint
    }

    /// Last execution result, if any query has run.
    pub fn execution_result(&self) -> Option<&str> {
        self.execution_result.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Store an execution outcome; a failure bumps `attempt_count`.
    /// Returns whether the result is valid.
    pub fn record_execution(&mut self, result: impl Into<String>) -> bool {
        let result = result.into();
        self.is_valid = !is_error_result(&result);
        if !self.is_valid {
            self.attempt_count += 1;
        }
        self.execution_result = Some(result);
        self.is_valid
    }

    pub fn is_hybrid(&self) -> bool {
        self.classification == Some(Route::Hybrid)
    }

    pub fn push_trace(&mut self, event_type: TraceEventType, payload: Value) {
        self.trace.push(TraceEvent::now(event_type, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_execution_tracks_validity() {
        let mut state = SessionState::new("q", "int");
        assert!(!state.record_execution("SQL error occurred: no such table: foo"));
        assert_eq!(state.attempt_count(), 1);
        assert!(state.record_execution("total\n  5"));
        assert!(state.is_valid());
        assert_eq!(state.attempt_count(), 1);
        assert!(!state.record_execution("Error: Only SELECT queries are allowed."));
        assert!(!state.is_valid());
        assert_eq!(state.attempt_count(), 2);
    }

    #[test]
    fn test_route_serde() {
        assert_eq!(serde_json::to_value(Route::Hybrid).unwrap(), json!("hybrid"));
        let route: Route = serde_json::from_value(json!("rag")).unwrap();
        assert_eq!(route, Route::Rag);
    }

    #[test]
    fn test_trace_event_type_serde() {
        let event = TraceEvent::now(TraceEventType::GenerateSql, json!({"sql": "SELECT 1"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "generate_sql");
        assert!(value["ts_ms"].as_u64().unwrap() > 0);
    }
}
