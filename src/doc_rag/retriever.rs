//! Document Retriever
//!
//! Indexes a directory of markdown documents into an in-RAM tantivy index
//! and returns the top-K chunks for a question, ranked by BM25.

use crate::doc_rag::chunker::{chunk_document, Chunk};
use crate::error::{CopilotError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, info, warn};

lazy_static! {
    // Anything that could be read as query syntax
    static ref QUERY_NOISE: Regex = Regex::new(r"[^a-z0-9\s]").unwrap();
}

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Retrieved passage, as threaded through the session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub source: String,
    pub score: f64,
}

/// Ranked lexical search capability.
pub trait PassageSearch: Send + Sync {
    /// At most `top_k` passages, highest score first, zero scores excluded.
    fn search(&self, query: &str, top_k: usize) -> Vec<Passage>;
}

/// Lowercase the question and blank out everything but letters, digits and
/// whitespace so the query parser only ever sees plain terms.
pub fn normalize_query(query: &str) -> String {
    QUERY_NOISE
        .replace_all(&query.to_lowercase(), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct ChunkIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    source_field: Field,
    body_field: Field,
}

impl ChunkIndex {
    fn build(chunks: &[Chunk]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STORED);
        let source_field = schema_builder.add_text_field("source", STORED);
        let body_field = schema_builder.add_text_field("body", TEXT | STORED);
        let index = Index::create_in_ram(schema_builder.build());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(index_error)?;
        for chunk in chunks {
            let mut doc = TantivyDocument::new();
            doc.add_text(id_field, &chunk.id);
            doc.add_text(source_field, &chunk.source);
            doc.add_text(body_field, &chunk.text);
            writer.add_document(doc).map_err(index_error)?;
        }
        writer.commit().map_err(index_error)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error)?;

        Ok(Self {
            index,
            reader,
            id_field,
            source_field,
            body_field,
        })
    }

    fn stored_text(&self, doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        let terms = normalize_query(query);
        if terms.is_empty() {
            return Vec::new();
        }

        // Default conjunction is OR, so any shared term scores.
        let parser = QueryParser::for_index(&self.index, vec![self.body_field]);
        let (parsed, errors) = parser.parse_query_lenient(&terms);
        if !errors.is_empty() {
            debug!("Ignored {} query parse errors", errors.len());
        }

        let searcher = self.reader.searcher();
        let top_docs = match searcher.search(&parsed, &TopDocs::with_limit(top_k)) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Passage search failed: {}", e);
                return Vec::new();
            }
        };

        top_docs
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .filter_map(|(score, address)| match searcher.doc::<TantivyDocument>(address) {
                Ok(doc) => Some(Passage {
                    id: self.stored_text(&doc, self.id_field),
                    text: self.stored_text(&doc, self.body_field),
                    source: self.stored_text(&doc, self.source_field),
                    score: f64::from(score),
                }),
                Err(e) => {
                    warn!("Failed to load passage: {}", e);
                    None
                }
            })
            .collect()
    }
}

fn index_error(e: tantivy::TantivyError) -> CopilotError {
    CopilotError::Retrieval(format!("Index build failed: {}", e))
}

#[derive(Default)]
pub struct DocRetriever {
    index: Option<ChunkIndex>,
    chunk_count: usize,
}

impl DocRetriever {
    /// Index every `*.md` file directly under `docs_dir`.
    pub fn from_dir(docs_dir: impl AsRef<Path>) -> Result<Self> {
        let docs_dir = docs_dir.as_ref();
        if !docs_dir.is_dir() {
            return Err(CopilotError::Retrieval(format!(
                "Docs directory not found: {}",
                docs_dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(docs_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map(|e| e == "md").unwrap_or(false))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let text = std::fs::read_to_string(&path)?;
            documents.push((stem, text));
        }

        let retriever = Self::from_documents(documents)?;
        info!(
            "Indexed {} chunks from {}",
            retriever.len(),
            docs_dir.display()
        );
        Ok(retriever)
    }

    /// Index in-memory `(document name, markdown)` pairs.
    pub fn from_documents<I, S, T>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let chunks: Vec<Chunk> = documents
            .into_iter()
            .flat_map(|(name, text)| chunk_document(text.as_ref(), name.as_ref()))
            .collect();
        if chunks.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            index: Some(ChunkIndex::build(&chunks)?),
            chunk_count: chunks.len(),
        })
    }

    /// Retriever with nothing indexed; every search is empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunk_count
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }
}

impl PassageSearch for DocRetriever {
    fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        let index = match &self.index {
            Some(index) if top_k > 0 => index,
            _ => return Vec::new(),
        };
        let passages = index.search(query, top_k);
        debug!("Retrieved {} passages for query", passages.len());
        passages
    }
}
