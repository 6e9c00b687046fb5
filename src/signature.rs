//! Structured Prediction
//!
//! A signature names the input and output fields of a generation task. The
//! `Predictor` renders it (plus saved demonstrations) into chat messages and
//! parses the `[[ ## field ## ]]` sections back out of the completion.

use crate::error::{CopilotError, Result};
use crate::llm::{ChatMessage, CompletionService};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

lazy_static! {
    static ref FIELD_HEADER: Regex = Regex::new(r"\[\[ ## (\w+) ## \]\]").unwrap();
}

/// Named values for one prediction (inputs or outputs).
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub instructions: String,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
}

impl Signature {
    fn system_prompt(&self) -> String {
        let mut parts = Vec::new();

        parts.push("Your input fields are:".to_string());
        for (i, f) in self.inputs.iter().enumerate() {
            parts.push(format!("{}. `{}`: {}", i + 1, f.name, f.description));
        }
        parts.push("Your output fields are:".to_string());
        for (i, f) in self.outputs.iter().enumerate() {
            parts.push(format!("{}. `{}`: {}", i + 1, f.name, f.description));
        }

        parts.push(String::new());
        parts.push("All interactions will be structured in the following way, with the appropriate values filled in.".to_string());
        for f in self.inputs.iter().chain(self.outputs.iter()) {
            parts.push(format!("\n[[ ## {} ## ]]\n{{{}}}", f.name, f.name));
        }
        parts.push("\n[[ ## completed ## ]]".to_string());

        parts.push(String::new());
        parts.push("In adhering to this structure, your objective is:".to_string());
        parts.push(self.instructions.trim().to_string());

        parts.join("\n")
    }

    fn render_inputs(&self, values: &Fields) -> String {
        let mut body = String::new();
        for f in &self.inputs {
            let value = values.get(&f.name).map(String::as_str).unwrap_or("");
            body.push_str(&format!("[[ ## {} ## ]]\n{}\n\n", f.name, value));
        }
        let outputs: Vec<String> = self
            .outputs
            .iter()
            .map(|f| format!("`[[ ## {} ## ]]`", f.name))
            .collect();
        body.push_str(&format!(
            "Respond with the corresponding output fields, starting with {}, and then ending with the marker for `[[ ## completed ## ]]`.",
            outputs.join(", then ")
        ));
        body
    }

    fn render_outputs(&self, values: &Fields) -> String {
        let mut body = String::new();
        for f in &self.outputs {
            let value = values.get(&f.name).map(String::as_str).unwrap_or("");
            body.push_str(&format!("[[ ## {} ## ]]\n{}\n\n", f.name, value));
        }
        body.push_str("[[ ## completed ## ]]");
        body
    }

    /// Split a completion into its declared output sections.
    pub fn parse_outputs(&self, raw: &str) -> Result<Fields> {
        let mut sections: BTreeMap<String, String> = BTreeMap::new();
        let headers: Vec<(String, usize, usize)> = FIELD_HEADER
            .captures_iter(raw)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let name = c.get(1)?.as_str().to_string();
                Some((name, whole.start(), whole.end()))
            })
            .collect();

        for (i, (name, _, body_start)) in headers.iter().enumerate() {
            let body_end = headers.get(i + 1).map(|h| h.1).unwrap_or(raw.len());
            sections
                .entry(name.clone())
                .or_insert_with(|| raw[*body_start..body_end].trim().to_string());
        }

        let mut out = Fields::new();
        for f in &self.outputs {
            match sections.remove(&f.name) {
                Some(v) if !v.is_empty() => {
                    out.insert(f.name.clone(), v);
                }
                _ => {
                    return Err(CopilotError::Prediction(format!(
                        "Completion is missing output field '{}'",
                        f.name
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// Saved module: demonstrations of complete input/output field sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedModule {
    #[serde(default)]
    pub demos: Vec<Fields>,
}

#[derive(Deserialize)]
struct RawModule {
    #[serde(default)]
    demos: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct NestedRawModule {
    predict: RawModule,
}

impl SavedModule {
    /// Load demos from `path`. A missing file is an empty module.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No saved SQL module at {:?}; predicting without demos", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| {
            CopilotError::Config(format!("Invalid saved module {:?}: {}", path, e))
        })
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let raw_module: RawModule = if value.get("predict").is_some() {
            serde_json::from_value::<NestedRawModule>(value)?.predict
        } else {
            serde_json::from_value(value)?
        };

        // Saved demos carry bookkeeping flags next to the fields; keep text only
        let demos = raw_module
            .demos
            .into_iter()
            .map(|demo| {
                demo.into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect::<Fields>()
            })
            .collect();
        Ok(Self { demos })
    }
}

pub struct Predictor {
    signature: Signature,
    demos: Vec<Fields>,
    llm: Arc<dyn CompletionService>,
}

impl Predictor {
    pub fn new(signature: Signature, llm: Arc<dyn CompletionService>) -> Self {
        Self {
            signature,
            demos: Vec::new(),
            llm,
        }
    }

    pub fn with_demos(mut self, demos: Vec<Fields>) -> Self {
        self.demos = demos;
        self
    }

    pub fn build_messages(&self, inputs: &Fields) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.signature.system_prompt())];
        for demo in &self.demos {
            messages.push(ChatMessage::user(self.signature.render_inputs(demo)));
            messages.push(ChatMessage::assistant(self.signature.render_outputs(demo)));
        }
        messages.push(ChatMessage::user(self.signature.render_inputs(inputs)));
        messages
    }

    pub async fn predict(&self, inputs: &Fields) -> Result<Fields> {
        let messages = self.build_messages(inputs);
        debug!("Predictor call with {} demos", self.demos.len());
        let raw = self.llm.complete(&messages).await?;
        self.signature.parse_outputs(&raw)
    }
}
