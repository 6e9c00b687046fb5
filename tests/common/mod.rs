#![allow(dead_code)]

use async_trait::async_trait;
use retail_copilot::agent::{AgentDeps, Orchestrator};
use retail_copilot::config::AgentConfig;
use retail_copilot::doc_rag::{Passage, PassageSearch};
use retail_copilot::error::{CopilotError, Result};
use retail_copilot::llm::{ChatMessage, CompletionService};
use retail_copilot::sql_engine::QueryExecutor;
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const ROUTER: &str = "router";
pub const PLANNER: &str = "planner";
pub const PREDICTOR: &str = "predictor";
pub const FALLBACK: &str = "fallback";
pub const SYNTHESIZER: &str = "synthesizer";

pub const BEVERAGES_1997_PLAN: &str = "TIME_SCOPE: RANGE\nSTART_DATE: 1997-01-01\nEND_DATE: 1997-12-31\nRANKING_INTENT: None\nMETRIC_FORMULA: SUM(UnitPrice * Quantity)";

pub const BEVERAGES_2017_SQL: &str = "SELECT SUM(oi.UnitPrice * oi.Quantity) AS revenue FROM order_items oi \
JOIN orders o ON oi.OrderID = o.OrderID JOIN products p ON oi.ProductID = p.ProductID \
JOIN categories c ON p.CategoryID = c.CategoryID \
WHERE c.CategoryName = 'Beverages' AND o.OrderDate >= '2017-01-01' AND o.OrderDate <= '2017-12-31'";

/// Which stage a request comes from, judged by its system message.
pub fn stage_of(messages: &[ChatMessage]) -> &'static str {
    let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
    if system.starts_with("You are a Query Router") {
        ROUTER
    } else if system.starts_with("You are a Query Parameter Extractor") {
        PLANNER
    } else if system.starts_with("Your input fields are") {
        PREDICTOR
    } else if system.starts_with("You are a SQLite Expert") {
        FALLBACK
    } else if system.starts_with("You are a JSON Bot") {
        SYNTHESIZER
    } else {
        "unknown"
    }
}

/// Completion fake with one reply queue per stage. An empty queue is an
/// LLM error for that call.
#[derive(Default)]
pub struct StageLlm {
    replies: Mutex<HashMap<&'static str, VecDeque<String>>>,
    calls: Mutex<Vec<(&'static str, Vec<ChatMessage>)>>,
}

impl StageLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: &'static str, text: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(text.into());
        self
    }

    pub fn calls_to(&self, stage: &str) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, stage: &str) -> usize {
        self.calls_to(stage).len()
    }
}

#[async_trait]
impl CompletionService for StageLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let stage = stage_of(messages);
        self.calls.lock().unwrap().push((stage, messages.to_vec()));
        self.replies
            .lock()
            .unwrap()
            .get_mut(stage)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| CopilotError::Llm(format!("no scripted reply for {}", stage)))
    }
}

pub fn predictor_reply(sql: &str) -> String {
    format!("[[ ## sql_query ## ]]\n{}\n\n[[ ## completed ## ]]", sql)
}

pub struct FixedPassages(pub Vec<Passage>);

impl PassageSearch for FixedPassages {
    fn search(&self, _query: &str, top_k: usize) -> Vec<Passage> {
        self.0.iter().take(top_k).cloned().collect()
    }
}

pub fn policy_passages() -> Vec<Passage> {
    vec![
        Passage {
            id: "product_policy::chunk1".to_string(),
            text: "## Returns\nUnopened Beverages: 14 days.".to_string(),
            source: "product_policy".to_string(),
            score: 2.1,
        },
        Passage {
            id: "marketing_calendar::chunk1".to_string(),
            text: "## Summer Beverages 1997\nDates: 1997-06-01 to 1997-06-30.".to_string(),
            source: "marketing_calendar".to_string(),
            score: 0.7,
        },
    ]
}

/// Returns scripted results in order, repeating the last one.
pub struct ScriptedExecutor {
    results: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(results: &[&str]) -> Self {
        Self {
            results: results.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn query(&self, _sql: &str) -> String {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .get(n)
            .or_else(|| self.results.last())
            .cloned()
            .unwrap_or_default()
    }
}

pub struct PanickingExecutor;

impl QueryExecutor for PanickingExecutor {
    fn query(&self, _sql: &str) -> String {
        panic!("driver crashed")
    }
}

pub fn orchestrator(
    llm: Arc<StageLlm>,
    retriever: Arc<dyn PassageSearch>,
    executor: Arc<dyn QueryExecutor>,
) -> Arc<Orchestrator> {
    let deps = AgentDeps {
        llm,
        retriever,
        executor,
        schema_context: "Table orders has columns: OrderID, CustomerID, OrderDate".to_string(),
        demos: Vec::new(),
        config: AgentConfig::default(),
    };
    Arc::new(Orchestrator::new(deps))
}

/// Small Northwind database: one Beverages order in 2017 worth 180.
pub fn northwind_fixture() -> std::result::Result<(TempDir, PathBuf), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("northwind.sqlite");
    let conn = Connection::open(&path)?;
    conn.execute_batch(
        r#"
        CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT);
        CREATE TABLE "Order Details" (OrderID INTEGER, ProductID INTEGER, UnitPrice REAL, Quantity INTEGER, Discount REAL);
        CREATE TABLE Products (ProductID INTEGER PRIMARY KEY, ProductName TEXT, CategoryID INTEGER);
        CREATE TABLE Categories (CategoryID INTEGER PRIMARY KEY, CategoryName TEXT);
        CREATE TABLE Customers (CustomerID TEXT PRIMARY KEY, CompanyName TEXT);
        INSERT INTO Categories VALUES (1, 'Beverages'), (2, 'Condiments');
        INSERT INTO Products VALUES (1, 'Chai', 1), (2, 'Aniseed Syrup', 2);
        INSERT INTO Customers VALUES ('ALFKI', 'Alfreds Futterkiste');
        INSERT INTO Orders VALUES (10248, 'ALFKI', '2017-03-01'), (10249, 'ALFKI', '2018-01-15');
        INSERT INTO "Order Details" VALUES (10248, 1, 18.0, 10, 0.0), (10249, 2, 10.0, 5, 0.1);
        "#,
    )?;
    Ok((dir, path))
}
