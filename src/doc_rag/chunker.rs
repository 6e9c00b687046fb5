//! Markdown Chunker
//!
//! Splits policy/marketing documents at second-level headings.

use serde::{Deserialize, Serialize};

pub const HEADING_SPLIT: &str = "\n## ";

/// One retrievable section of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `<document>::chunk<index>`
    pub id: String,
    pub text: String,
    /// Document stem the chunk came from
    pub source: String,
}

/// Split `text` at heading boundaries. Sections after the first get their
/// `## ` marker back; blank sections are dropped but keep their index so ids
/// stay stable when a document is edited elsewhere.
pub fn chunk_document(text: &str, document: &str) -> Vec<Chunk> {
    text.split(HEADING_SPLIT)
        .enumerate()
        .filter_map(|(i, section)| {
            let trimmed = section.trim();
            if trimmed.is_empty() {
                return None;
            }
            let body = if i > 0 {
                format!("## {}", trimmed)
            } else {
                trimmed.to_string()
            };
            Some(Chunk {
                id: format!("{}::chunk{}", document, i),
                text: body,
                source: document.to_string(),
            })
        })
        .collect()
}
