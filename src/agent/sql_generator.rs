//! SQL Generator
//!
//! Turns a plan (optionally carrying repair context) into one SQLite query.
//! The structured predictor is tried first; any failure there falls back to
//! a direct prompt with the same rules.

use crate::error::{CopilotError, Result};
use crate::llm::{ChatMessage, CompletionService};
use crate::signature::{FieldSpec, Fields, Predictor, Signature};
use crate::text_extract::clean_sql;
use std::sync::Arc;
use tracing::{debug, warn};

const SQL_RULES: &str = r#"### CRITICAL RULES
1. **Join Orders:** ALWAYS `JOIN orders o ON oi.OrderID = o.OrderID` to filter by Date.
2. **Join Categories:** To filter by "CategoryName", you MUST `JOIN categories c ON p.CategoryID = c.CategoryID`.
3. **Dates:** Use `>=` and `<=`. **NEVER** use `BETWEEN`.
4. **Grouping:**
   - If Plan says "Top X": `GROUP BY` the entity.
   - If Plan says "None": **DO NOT GROUP BY**. `SELECT SUM(...)`."#;

const SQL_SCHEMA: &str = r#"### SCHEMA (LOWERCASE VIEWS)
- orders (o): OrderID, CustomerID, OrderDate (YYYY-MM-DD)
- order_items (oi): OrderID, ProductID, UnitPrice, Quantity, Discount
- products (p): ProductID, ProductName, CategoryID (**NO CategoryName**)
- categories (c): CategoryID, CategoryName (**CategoryName is HERE**)
- customers (cust): CustomerID, CompanyName"#;

/// Signature of the primary strategy.
pub fn generate_sql_signature() -> Signature {
    Signature {
        instructions: format!(
            "You are a SQLite Expert.\n\n{}\n\n{}\n\n### FORMAT\nReturn raw SQL only. No markdown.",
            SQL_SCHEMA, SQL_RULES
        ),
        inputs: vec![
            FieldSpec::new("question", "The user's business question"),
            FieldSpec::new(
                "schema_context",
                "Schema info (usually implied, but kept for context)",
            ),
            FieldSpec::new(
                "plan_constraints",
                "The execution plan: Time Scope, Intent, Filters, Formulas",
            ),
        ],
        outputs: vec![FieldSpec::new("sql_query", "Valid SQLite query string")],
    }
}

pub struct SqlGenerator {
    predictor: Predictor,
    llm: Arc<dyn CompletionService>,
    schema_context: String,
}

impl SqlGenerator {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        schema_context: String,
        demos: Vec<Fields>,
    ) -> Self {
        let predictor = Predictor::new(generate_sql_signature(), Arc::clone(&llm)).with_demos(demos);
        Self {
            predictor,
            llm,
            schema_context,
        }
    }

    /// Generate cleaned SQL for `question` under `plan_constraints`.
    pub async fn generate(&self, question: &str, plan_constraints: &str) -> Result<String> {
        let raw = match self.predict(question, plan_constraints).await {
            Ok(sql) => sql,
            Err(e) => {
                warn!("Structured SQL prediction failed, using direct prompt: {}", e);
                self.fallback(plan_constraints).await.map_err(|fallback_err| {
                    CopilotError::Synthesis(format!(
                        "primary: {}; fallback: {}",
                        e, fallback_err
                    ))
                })?
            }
        };

        let sql = clean_sql(&raw);
        debug!("Generated SQL:\n{}", sql);
        Ok(sql)
    }

    async fn predict(&self, question: &str, plan_constraints: &str) -> Result<String> {
        let mut inputs = Fields::new();
        inputs.insert("question".to_string(), question.to_string());
        inputs.insert("schema_context".to_string(), self.schema_context.clone());
        inputs.insert("plan_constraints".to_string(), plan_constraints.to_string());

        let mut outputs = self.predictor.predict(&inputs).await?;
        outputs
            .remove("sql_query")
            .ok_or_else(|| CopilotError::Prediction("sql_query missing".to_string()))
    }

    async fn fallback(&self, plan_constraints: &str) -> Result<String> {
        let system = format!(
            "You are a SQLite Expert.\n\n{}\n\n{}\n\n### FORMAT\nReturn raw SQL only.\n",
            SQL_SCHEMA, SQL_RULES
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(format!("\n### PLAN\n{}\n", plan_constraints)),
        ];
        self.llm.complete(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies in order; records every request.
    struct Scripted {
        replies: Mutex<Vec<Result<String>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(CopilotError::Llm("script exhausted".to_string())))
        }
    }

    #[tokio::test]
    async fn test_primary_strategy() {
        let llm = Arc::new(Scripted::new(vec![Ok(
            "[[ ## sql_query ## ]]\n```sql\nSELECT 1;\n```\n\n[[ ## completed ## ]]".to_string(),
        )]));
        let generator = SqlGenerator::new(llm.clone(), "schema".to_string(), Vec::new());
        let sql = generator.generate("q", "PLAN").await.unwrap();
        assert_eq!(sql, "SELECT 1;");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0][1].content.contains("[[ ## plan_constraints ## ]]\nPLAN"));
    }

    #[tokio::test]
    async fn test_fallback_when_primary_malformed() {
        let llm = Arc::new(Scripted::new(vec![
            Ok("no sections here".to_string()),
            Ok("```sql\nSELECT COUNT(*) FROM orders\n```".to_string()),
        ]));
        let generator = SqlGenerator::new(llm.clone(), "schema".to_string(), Vec::new());
        let sql = generator.generate("q", "PLAN").await.unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM orders");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1][1].content.contains("### PLAN\nPLAN"));
    }

    #[tokio::test]
    async fn test_both_strategies_fail() {
        let llm = Arc::new(Scripted::new(vec![
            Err(CopilotError::Llm("timeout".to_string())),
            Err(CopilotError::Llm("timeout".to_string())),
        ]));
        let generator = SqlGenerator::new(llm, "schema".to_string(), Vec::new());
        let err = generator.generate("q", "PLAN").await.unwrap_err();
        assert!(matches!(err, CopilotError::Synthesis(_)));
    }

    #[tokio::test]
    async fn test_demos_are_sent() {
        let mut demo = Fields::new();
        demo.insert("question".to_string(), "demo q".to_string());
        demo.insert("sql_query".to_string(), "SELECT 2".to_string());
        let llm = Arc::new(Scripted::new(vec![Ok("[[ ## sql_query ## ]]\nSELECT 3".to_string())]));
        let generator = SqlGenerator::new(llm.clone(), "schema".to_string(), vec![demo]);
        generator.generate("q", "PLAN").await.unwrap();
        let seen = llm.seen.lock().unwrap();
        // system + demo pair + live input
        assert_eq!(seen[0].len(), 4);
        assert!(seen[0][2].content.contains("SELECT 2"));
    }
}
