pub mod agent;
pub mod batch;
pub mod config;
pub mod doc_rag;
pub mod error;
pub mod execution_loop;
pub mod llm;
pub mod signature;
pub mod sql_engine;
pub mod text_extract;

pub use agent::{AgentDeps, Orchestrator, Route, SessionState};
pub use batch::{AnswerRecord, BatchRecord};
pub use config::AgentConfig;
pub use error::{CopilotError, Result};
