//! Orchestrator
//!
//! Drives one question through classify, retrieve, plan, generate, execute,
//! repair and synthesize as an explicit stage machine:
//!
//! ```text
//! Classify -> Retrieve -> Plan -> GenerateSql -> Execute -> Repair
//!                 |                   ^                      |
//!                 |                   +------- Retry --------+
//!                 |                                          | Done
//!                 +------------------ rag ----------> Synthesize -> Done
//! ```

use crate::agent::classifier::QuestionClassifier;
use crate::agent::contracts::{Route, SessionState, TraceEventType, NO_SQL_EXECUTED};
use crate::agent::planner::QueryPlanner;
use crate::agent::sql_generator::SqlGenerator;
use crate::agent::synthesizer::AnswerSynthesizer;
use crate::config::AgentConfig;
use crate::doc_rag::{DocRetriever, PassageSearch};
use crate::error::{CopilotError, Result};
use crate::execution_loop::{
    plan_constraints, ErrorClassifier, RepairContext, RepairController, RepairState, ResultClass,
};
use crate::llm::{CompletionService, LlmClient};
use crate::signature::{Fields, SavedModule};
use crate::sql_engine::{QueryExecutor, SqliteEngine};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every collaborator the orchestrator needs, constructed up front.
pub struct AgentDeps {
    pub llm: Arc<dyn CompletionService>,
    pub retriever: Arc<dyn PassageSearch>,
    pub executor: Arc<dyn QueryExecutor>,
    /// Schema description passed to the structured SQL predictor
    pub schema_context: String,
    pub demos: Vec<Fields>,
    pub config: AgentConfig,
}

impl AgentDeps {
    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let client = LlmClient::from_config(&config)?;
        info!("Completions from {} using {}", config.base_url, client.model());
        let llm: Arc<dyn CompletionService> = Arc::new(client);

        let engine = SqliteEngine::open(&config.db_path, config.max_result_rows)?;
        let schema_context = engine.describe_schema()?;
        info!("Using database {}", engine.db_path().display());

        let retriever = match DocRetriever::from_dir(&config.docs_dir) {
            Ok(r) => r,
            Err(e) => {
                warn!("Retriever unavailable, continuing without passages: {}", e);
                DocRetriever::empty()
            }
        };

        let demos = SavedModule::load(&config.sql_module_path)?.demos;
        info!(
            "Loaded {} SQL demos, {} passages indexed",
            demos.len(),
            retriever.len()
        );

        Ok(Self {
            llm,
            retriever: Arc::new(retriever),
            executor: Arc::new(engine),
            schema_context,
            demos,
            config,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Classify,
    Retrieve,
    Plan,
    GenerateSql,
    Execute,
    Repair,
    Synthesize,
    Done,
}

pub struct Orchestrator {
    classifier: QuestionClassifier,
    planner: QueryPlanner,
    sql_generator: SqlGenerator,
    synthesizer: AnswerSynthesizer,
    retriever: Arc<dyn PassageSearch>,
    executor: Arc<dyn QueryExecutor>,
    controller: RepairController,
    error_classifier: ErrorClassifier,
    top_k: usize,
}

impl Orchestrator {
    pub fn new(deps: AgentDeps) -> Self {
        let AgentDeps {
            llm,
            retriever,
            executor,
            schema_context,
            demos,
            config,
        } = deps;

        Self {
            classifier: QuestionClassifier::new(Arc::clone(&llm)),
            planner: QueryPlanner::new(Arc::clone(&llm)),
            sql_generator: SqlGenerator::new(Arc::clone(&llm), schema_context, demos),
            synthesizer: AnswerSynthesizer::new(llm),
            retriever,
            executor,
            controller: RepairController::new(config.max_sql_attempts),
            error_classifier: ErrorClassifier::new(),
            top_k: config.top_k,
        }
    }

    /// Run one question to completion. Stage-level failures are recovered
    /// in place; only a planner failure or a crashed query task is returned
    /// as `Err`.
    pub async fn run(&self, question: &str, format_hint: &str) -> Result<SessionState> {
        let mut state = SessionState::new(question, format_hint);
        let mut repair: Option<RepairContext> = None;
        let mut stage = Stage::Classify;

        while stage != Stage::Done {
            debug!("Stage {:?}", stage);
            stage = match stage {
                Stage::Classify => {
                    let route = self.classifier.classify(state.question()).await;
                    state.classification = Some(route);
                    state.push_trace(TraceEventType::Classify, json!({ "route": route }));
                    Stage::Retrieve
                }
                Stage::Retrieve => {
                    state.retrieved_passages = self.retriever.search(state.question(), self.top_k);
                    info!("Retrieved {} passages", state.retrieved_passages.len());
                    let ids: Vec<&str> = state.retrieved_passages.iter().map(|p| p.id.as_str()).collect();
                    let payload = json!({ "ids": ids });
                    state.push_trace(TraceEventType::Retrieve, payload);
                    match state.classification {
                        Some(Route::Hybrid) => Stage::Plan,
                        _ => Stage::Synthesize,
                    }
                }
                Stage::Plan => {
                    let plan = match self.planner.plan(state.question(), &state.retrieved_passages).await {
                        Ok(plan) => plan,
                        Err(e) => {
                            state.push_trace(TraceEventType::Error, json!({ "stage": "plan", "error": e.to_string() }));
                            return Err(e);
                        }
                    };
                    state.push_trace(
                        TraceEventType::Plan,
                        json!({ "plan": plan.text(), "warnings": plan.contract_warnings() }),
                    );
                    state.plan = Some(plan);
                    Stage::GenerateSql
                }
                Stage::GenerateSql => self.generate_sql(&mut state, repair.as_ref()).await,
                Stage::Execute => self.execute(&mut state).await?,
                Stage::Repair => match self.controller.decide(state.is_valid(), state.attempt_count()) {
                    RepairState::Retry => {
                        let error = state.execution_result().unwrap_or_default().to_string();
                        repair = Some(RepairContext::new(state.query.clone(), error));
                        state.push_trace(
                            TraceEventType::Retry,
                            json!({ "attempt_count": state.attempt_count() }),
                        );
                        Stage::GenerateSql
                    }
                    RepairState::Done => Stage::Synthesize,
                },
                Stage::Synthesize => {
                    let execution_result = state
                        .execution_result()
                        .unwrap_or(NO_SQL_EXECUTED)
                        .to_string();
                    let answer = self
                        .synthesizer
                        .synthesize(
                            state.question(),
                            &execution_result,
                            &state.retrieved_passages,
                            state.format_hint(),
                        )
                        .await;
                    state.push_trace(
                        TraceEventType::Synthesize,
                        json!({ "answered": answer.final_answer.is_some() }),
                    );
                    state.final_answer = answer.final_answer;
                    state.explanation = answer.explanation;
                    state.citations = answer.citations;
                    Stage::Done
                }
                Stage::Done => Stage::Done,
            };
        }

        Ok(state)
    }

    async fn generate_sql(&self, state: &mut SessionState, repair: Option<&RepairContext>) -> Stage {
        let plan_text = state.plan.as_ref().map(|p| p.text()).unwrap_or_default();
        let constraints = plan_constraints(plan_text, repair);

        match self.sql_generator.generate(state.question(), &constraints).await {
            Ok(sql) => {
                state.push_trace(TraceEventType::GenerateSql, json!({ "sql": sql }));
                state.query = sql;
                Stage::Execute
            }
            Err(e) => {
                warn!("Query synthesis failed: {}", e);
                state.query.clear();
                state.record_execution(format!("Error: query synthesis failed: {}", e));
                state.push_trace(
                    TraceEventType::Error,
                    json!({ "stage": "generate_sql", "error": e.to_string() }),
                );
                Stage::Repair
            }
        }
    }

    async fn execute(&self, state: &mut SessionState) -> Result<Stage> {
        let executor = Arc::clone(&self.executor);
        let sql = state.query.clone();
        let result = tokio::task::spawn_blocking(move || executor.query(&sql))
            .await
            .map_err(|e| CopilotError::Database(format!("Query task failed: {}", e)))?;

        match self.error_classifier.classify(&result) {
            ResultClass::Valid => info!("Query executed"),
            ResultClass::Invalid(class) => warn!("Query failed ({}): {}", class, result),
        }
        let valid = state.record_execution(result);
        state.push_trace(
            TraceEventType::Execute,
            json!({ "valid": valid, "attempt_count": state.attempt_count() }),
        );
        Ok(Stage::Repair)
    }
}
