use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{repo::Document, search::SearchHit};

const LIST_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Pagination {
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}

/// List entry: metadata plus the start of the extracted text.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub error: Option<String>,
    pub excerpt: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub indexed_at: Option<OffsetDateTime>,
}

impl From<&Document> for DocumentSummary {
    fn from(d: &Document) -> Self {
        let mut excerpt: String = d.extracted_text.chars().take(LIST_EXCERPT_CHARS).collect();
        if d.extracted_text.chars().count() > LIST_EXCERPT_CHARS {
            excerpt.push('…');
        }
        Self {
            id: d.id,
            filename: d.filename.clone(),
            content_type: d.content_type.clone(),
            size_bytes: d.size_bytes,
            status: d.status.clone(),
            error: d.error.clone(),
            excerpt,
            created_at: d.created_at,
            indexed_at: d.indexed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentDetails {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub text: String,
}

impl From<Document> for DocumentDetails {
    fn from(d: Document) -> Self {
        Self {
            summary: DocumentSummary::from(&d),
            text: d.extracted_text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: usize,
    pub failed: usize,
    pub results: Vec<UploadResult>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub document_id: Uuid,
    pub filename: String,
    pub score: f32,
    pub excerpt: Option<String>,
    pub filename_match: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<SearchHit<'_>> for SearchResult {
    fn from(h: SearchHit<'_>) -> Self {
        Self {
            document_id: h.document.id,
            filename: h.document.filename.clone(),
            score: h.score,
            excerpt: h.excerpt,
            filename_match: h.filename_match,
            created_at: h.document.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReindexResponse {
    pub documents: usize,
    pub indexed: usize,
    pub failed: usize,
}
