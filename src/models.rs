//! Core data models used throughout Docent.
//!
//! These types represent the documents, chunks, and conversation turns that
//! flow through the upload and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous piece of a parsed document, e.g. one PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page: None,
        }
    }

    pub fn page(text: impl Into<String>, page: u32) -> Self {
        Self {
            text: text.into(),
            page: Some(page),
        }
    }
}

/// An uploaded (or request-supplied) document. Immutable once created.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_name: String,
    pub mime_type: String,
    pub segments: Vec<Segment>,
}

impl Document {
    /// Builds a document whose id is derived from its name and content, so the
    /// same file uploaded twice keeps one id.
    pub fn new(source_name: &str, mime_type: &str, segments: Vec<Segment>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_name.as_bytes());
        hasher.update([0u8]);
        for seg in &segments {
            hasher.update(seg.text.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());

        Self {
            id: digest[..16].to_string(),
            source_name: source_name.to_string(),
            mime_type: mime_type.to_string(),
            segments,
        }
    }

    pub fn from_text(source_name: &str, text: &str) -> Self {
        Self::new(source_name, "text/plain", vec![Segment::text(text)])
    }

    /// The full text, segments joined by blank lines.
    pub fn raw_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// An embedded window of a document's text, owned by the vector index.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `{document_id}-{chunk_index}`.
    pub id: String,
    pub document_id: String,
    pub source_name: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A chunk scored against a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
