//! Query Planner
//!
//! Extracts a constraint plan (time scope, dates, ranking intent, metric
//! formula) from the question and retrieved passages, then shifts dataset
//! years into the stored calendar.

use crate::doc_rag::Passage;
use crate::error::{CopilotError, Result};
use crate::llm::{ChatMessage, CompletionService};
use crate::text_extract::strip_code_fences;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref YEAR_TOKEN: Regex = Regex::new(r"\b(199\d)\b").unwrap();
}

/// Offset between the documented calendar and the stored order dates.
pub const YEAR_SHIFT: i32 = 20;

const SHIFTED_YEARS: std::ops::RangeInclusive<i32> = 1996..=1999;

const PLAN_FIELDS: [&str; 5] = [
    "TIME_SCOPE",
    "START_DATE",
    "END_DATE",
    "RANKING_INTENT",
    "METRIC_FORMULA",
];

const QUERY_KEYWORDS: [&str; 4] = ["SELECT", "WHERE", "BETWEEN", "FROM"];

const PLANNER_PROMPT: &str = r#"You are a Query Parameter Extractor.

### TIME SHIFT RULES
- 1996 -> 2016, 1997 -> 2017, 1998 -> 2018

### INSTRUCTIONS
1. **Dates:**
   - If "All Time", set scope ALL_TIME.
   - Else, set RANGE and apply +20 Year Shift.

2. **Metric Formula:**
   - Extract ONLY the math (e.g., `SUM(UnitPrice * Quantity)`).
   - **CRITICAL:** Do NOT write "SELECT", "WHERE", "BETWEEN" in this field. Math only.
   - Apply substitutions (e.g. Cost = 0.7 * Price).

3. **Ranking & Grouping (CRITICAL):**
   - **Identify the Entity:** Check if the user asks for a Customer, Product, or Category.
   - **Do NOT Default to Customer:** If asked for "Top Category", set intent to "Top 1 Category".
   - **Aggregates (Force NONE):** If the question asks for "Total Revenue", "AOV", or "How much..." (even if filtered by a specific Category like Beverages), YOU MUST set RANKING_INTENT: "None".

### FORMAT (Strict ONLY YAML) (DO NOT RETURN ANYTHING ELSE)
TIME_SCOPE: <'RANGE' or 'ALL_TIME'>
START_DATE: <YYYY-MM-DD or None>
END_DATE: <YYYY-MM-DD or None>
RANKING_INTENT: <e.g. "Top 1 Category", "Top 3 Products", "Top 1 Customer", or "None">
METRIC_FORMULA: <Math Only>
"#;

/// Rewrite every standalone year 1996-1999 as year + 20. Other years,
/// including already shifted ones, are left alone.
pub fn apply_time_shift(text: &str) -> String {
    YEAR_TOKEN
        .replace_all(text, |caps: &Captures| {
            let token = &caps[1];
            match token.parse::<i32>() {
                Ok(year) if SHIFTED_YEARS.contains(&year) => (year + YEAR_SHIFT).to_string(),
                _ => token.to_string(),
            }
        })
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeScope {
    Range,
    AllTime,
}

/// Corrected plan text plus a read-only parsed view of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    text: String,
}

impl QueryPlan {
    /// Apply the year shift to raw planner output.
    pub fn from_raw(raw: &str) -> Self {
        Self {
            text: apply_time_shift(raw),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Value of `KEY: value`, key matched case-insensitively, quotes and
    /// backticks stripped. Empty values are absent.
    pub fn field(&self, key: &str) -> Option<String> {
        strip_code_fences(&self.text).lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            let k = k.trim().trim_start_matches('-').trim();
            if !k.eq_ignore_ascii_case(key) {
                return None;
            }
            let v = v.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        })
    }

    pub fn time_scope(&self) -> Option<TimeScope> {
        let value = self.field("TIME_SCOPE")?.to_uppercase();
        match value.as_str() {
            "RANGE" => Some(TimeScope::Range),
            "ALL_TIME" | "ALL TIME" => Some(TimeScope::AllTime),
            _ => None,
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.date_field("START_DATE")
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.date_field("END_DATE")
    }

    /// `None` when the plan says `None` (a plain aggregate).
    pub fn ranking_intent(&self) -> Option<String> {
        self.field("RANKING_INTENT")
            .filter(|v| !v.eq_ignore_ascii_case("none"))
    }

    pub fn metric_formula(&self) -> Option<String> {
        self.field("METRIC_FORMULA")
    }

    /// Violations of the plan contract. Informational only.
    pub fn contract_warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = PLAN_FIELDS
            .iter()
            .filter(|key| self.field(key).is_none())
            .map(|key| format!("missing field {}", key))
            .collect();

        if let Some(formula) = self.metric_formula() {
            let upper = formula.to_uppercase();
            for keyword in QUERY_KEYWORDS {
                if upper.split(|c: char| !c.is_ascii_alphanumeric() && c != '_').any(|w| w == keyword) {
                    warnings.push(format!("METRIC_FORMULA contains {}", keyword));
                }
            }
        }
        warnings
    }

    fn date_field(&self, key: &str) -> Option<NaiveDate> {
        let value = self.field(key)?;
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()
    }
}

pub struct QueryPlanner {
    llm: Arc<dyn CompletionService>,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub fn build_messages(question: &str, passages: &[Passage]) -> Vec<ChatMessage> {
        let docs_text = if passages.is_empty() {
            String::new()
        } else {
            let sections: Vec<String> = passages
                .iter()
                .map(|p| format!("-- Source: {}\n{}", p.id, p.text))
                .collect();
            format!("RETRIEVED KNOWLEDGE:\n{}", sections.join("\n\n"))
        };
        let user = format!("\nUSER QUESTION: {}\n\n{}\n\nOUTPUT:\n", question, docs_text);
        vec![ChatMessage::system(PLANNER_PROMPT), ChatMessage::user(user)]
    }

    pub async fn plan(&self, question: &str, passages: &[Passage]) -> Result<QueryPlan> {
        let messages = Self::build_messages(question, passages);
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| CopilotError::Planning(e.to_string()))?;

        let plan = QueryPlan::from_raw(&raw);
        debug!("Plan:\n{}", plan.text());
        for warning in plan.contract_warnings() {
            warn!("Plan contract: {}", warning);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_PLAN: &str = "TIME_SCOPE: RANGE\nSTART_DATE: 1997-01-01\nEND_DATE: 1997-12-31\nRANKING_INTENT: \"None\"\nMETRIC_FORMULA: `SUM(UnitPrice * Quantity)`";

    #[test]
    fn test_time_shift() {
        assert_eq!(apply_time_shift("Orders in 1997 and 2017"), "Orders in 2017 and 2017");
        assert_eq!(apply_time_shift("1996 1998 1999"), "2016 2018 2019");
        assert_eq!(apply_time_shift("1995 2000 19970"), "1995 2000 19970");
        assert_eq!(apply_time_shift("1997-06-01"), "2017-06-01");
    }

    #[test]
    fn test_time_shift_is_idempotent() {
        let once = apply_time_shift(RAW_PLAN);
        assert_eq!(apply_time_shift(&once), once);
    }

    #[test]
    fn test_plan_view() {
        let plan = QueryPlan::from_raw(RAW_PLAN);
        assert_eq!(plan.time_scope(), Some(TimeScope::Range));
        assert_eq!(plan.start_date(), NaiveDate::from_ymd_opt(2017, 1, 1));
        assert_eq!(plan.end_date(), NaiveDate::from_ymd_opt(2017, 12, 31));
        assert_eq!(plan.ranking_intent(), None);
        assert_eq!(plan.metric_formula().as_deref(), Some("SUM(UnitPrice * Quantity)"));
        assert!(plan.contract_warnings().is_empty());
    }

    #[test]
    fn test_plan_view_all_time_and_ranking() {
        let plan = QueryPlan::from_raw(
            "```yaml\ntime_scope: ALL_TIME\nSTART_DATE: None\nEND_DATE: None\nRANKING_INTENT: \"Top 3 Products\"\nMETRIC_FORMULA: SUM(UnitPrice * Quantity * (1 - Discount))\n```",
        );
        assert_eq!(plan.time_scope(), Some(TimeScope::AllTime));
        assert_eq!(plan.start_date(), None);
        assert_eq!(plan.ranking_intent().as_deref(), Some("Top 3 Products"));
    }

    #[test]
    fn test_contract_warnings() {
        let plan = QueryPlan::from_raw("TIME_SCOPE: RANGE\nMETRIC_FORMULA: SELECT SUM(x) FROM t WHERE y BETWEEN 1 AND 2");
        let warnings = plan.contract_warnings();
        assert!(warnings.contains(&"missing field START_DATE".to_string()));
        assert!(warnings.contains(&"missing field RANKING_INTENT".to_string()));
        assert!(warnings.contains(&"METRIC_FORMULA contains SELECT".to_string()));
        assert!(warnings.contains(&"METRIC_FORMULA contains BETWEEN".to_string()));
    }

    #[test]
    fn test_build_messages_embeds_sources() {
        let passages = vec![Passage {
            id: "marketing_calendar::chunk1".to_string(),
            text: "## Summer Beverages 1997".to_string(),
            source: "marketing_calendar".to_string(),
            score: 1.2,
        }];
        let messages = QueryPlanner::build_messages("Revenue in Summer 1997?", &passages);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("-- Source: marketing_calendar::chunk1"));
        assert!(messages[1].content.contains("USER QUESTION: Revenue in Summer 1997?"));
    }
}
