//! Error Recovery
//!
//! Builds the repair block appended to the plan when a generated query
//! failed. The plan record itself is never modified.

pub const REPAIR_HINT: &str = "HINT: Check Joins and Column Names.";

/// The failing query and its exact error text from the previous attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairContext {
    pub previous_sql: String,
    pub previous_error: String,
}

impl RepairContext {
    pub fn new(previous_sql: impl Into<String>, previous_error: impl Into<String>) -> Self {
        Self {
            previous_sql: previous_sql.into(),
            previous_error: previous_error.into(),
        }
    }

    /// Plan text followed by a delimited `### FIX ERROR` block.
    pub fn augment_plan(&self, plan: &str) -> String {
        format!(
            "{}\n\n### FIX ERROR\nSQL: {}\nERROR: {}\n\n{}",
            plan, self.previous_sql, self.previous_error, REPAIR_HINT
        )
    }
}

/// Plan constraints for one synthesis call, with repair context if any.
pub fn plan_constraints(plan: &str, repair: Option<&RepairContext>) -> String {
    match repair {
        Some(ctx) => ctx.augment_plan(plan),
        None => plan.to_string(),
    }
}
