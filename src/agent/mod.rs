pub mod classifier;
pub mod contracts;
pub mod graph;
pub mod planner;
pub mod sql_generator;
pub mod synthesizer;

pub use classifier::QuestionClassifier;
pub use contracts::{Route, SessionState, TraceEvent, TraceEventType};
pub use graph::{AgentDeps, Orchestrator};
pub use planner::{apply_time_shift, QueryPlan, QueryPlanner, TimeScope};
pub use sql_generator::SqlGenerator;
pub use synthesizer::{AnswerSynthesizer, SynthesizedAnswer};
