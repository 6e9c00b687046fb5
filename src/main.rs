use retail_copilot::agent::{AgentDeps, Orchestrator};
use retail_copilot::batch::{run_batch, AnswerRecord};
use retail_copilot::config::AgentConfig;
use retail_copilot::sql_engine::SqliteEngine;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retail-copilot")]
#[command(about = "Answers retail analytics questions over Northwind and the policy docs")]
#[command(version)]
struct Args {
    /// SQLite database (or set COPILOT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Markdown docs directory (or set COPILOT_DOCS_DIR)
    #[arg(long, global = true)]
    docs: Option<PathBuf>,

    /// Saved SQL demos (or set COPILOT_SQL_MODULE)
    #[arg(long, global = true)]
    sql_module: Option<PathBuf>,

    /// Model name (or set OPENAI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// OpenAI-compatible endpoint (or set OPENAI_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key (or set OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Passages retrieved per question
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Retry threshold; failed runs make this many generations minus one (at least one)
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every question in a JSONL file
    Batch {
        /// Input JSONL with {id, question, format_hint}
        #[arg(long)]
        batch: PathBuf,

        /// Output JSONL
        #[arg(long)]
        out: PathBuf,
    },
    /// Answer a single question and print the record
    Ask {
        question: String,

        #[arg(long, default_value = "")]
        format_hint: String,

        /// Also print the stage trace
        #[arg(long)]
        trace: bool,
    },
    /// Print the schema context given to SQL generation
    Schema,
}

impl Args {
    fn apply_overrides(&self, config: &mut AgentConfig) {
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(docs) = &self.docs {
            config.docs_dir = docs.clone();
        }
        if let Some(module) = &self.sql_module {
            config.sql_module_path = module.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_sql_attempts = max_attempts;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::from_env()?;
    args.apply_overrides(&mut config);
    config.validate()?;

    match args.command {
        Commands::Batch { batch, out } => run_batch_command(config, batch, out).await,
        Commands::Ask {
            question,
            format_hint,
            trace,
        } => run_ask(config, question, format_hint, trace).await,
        Commands::Schema => {
            let engine = SqliteEngine::open(&config.db_path, config.max_result_rows)?;
            println!("{}", engine.describe_schema()?);
            Ok(())
        }
    }
}

async fn run_batch_command(config: AgentConfig, batch: PathBuf, out: PathBuf) -> Result<()> {
    if !batch.exists() {
        anyhow::bail!("Input file '{}' not found", batch.display());
    }

    let orchestrator = Arc::new(Orchestrator::new(AgentDeps::from_config(config)?));
    let summary = run_batch(&orchestrator, &batch, &out).await?;
    info!("Results saved to {}", out.display());
    if summary.failed > 0 {
        info!("{} of {} questions have no answer", summary.failed, summary.processed);
    }
    Ok(())
}

async fn run_ask(config: AgentConfig, question: String, format_hint: String, trace: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(AgentDeps::from_config(config)?);

    let (record, events) = match orchestrator.run(&question, &format_hint).await {
        Ok(state) => (AnswerRecord::from_session("ask", &state), state.trace),
        Err(e) => {
            error!("Question failed: {}", e);
            (AnswerRecord::failure("ask", e), Vec::new())
        }
    };

    let output = if trace {
        json!({ "record": record, "trace": events })
    } else {
        serde_json::to_value(&record)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
