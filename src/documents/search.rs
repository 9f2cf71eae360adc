//! Ranking of a user's documents against a query vector.

use std::collections::HashMap;

use uuid::Uuid;

use super::repo::{ChunkEmbedding, Document};

/// Added to the content score when the query appears in the filename.
pub const FILENAME_BOOST: f32 = 0.3;
/// Score given to a filename match without a content match.
pub const FILENAME_ONLY_SCORE: f32 = 0.6;
const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub top_k: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub document: &'a Document,
    pub score: f32,
    pub excerpt: Option<String>,
    pub filename_match: bool,
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn rank<'a>(
    query: &str,
    query_vec: &[f32],
    documents: &'a [Document],
    chunks: &[ChunkEmbedding],
    opts: SearchOptions,
) -> Vec<SearchHit<'a>> {
    let mut best: HashMap<Uuid, (f32, &str)> = HashMap::new();
    for chunk in chunks {
        let score = cosine_similarity(query_vec, &chunk.embedding);
        let entry = best
            .entry(chunk.document_id)
            .or_insert((f32::MIN, chunk.content.as_str()));
        if score > entry.0 {
            *entry = (score, chunk.content.as_str());
        }
    }

    let needle = query.trim().to_lowercase();
    let content_floor = opts.threshold * 0.5;

    let mut hits: Vec<SearchHit<'a>> = documents
        .iter()
        .filter_map(|doc| {
            let filename_match = !needle.is_empty() && doc.filename.to_lowercase().contains(&needle);
            let content = best.get(&doc.id).filter(|(s, _)| *s >= content_floor);

            let (score, excerpt) = match (content, filename_match) {
                (Some((s, text)), true) => ((s + FILENAME_BOOST).min(1.0), Some(excerpt(text))),
                (Some((s, text)), false) => (*s, Some(excerpt(text))),
                (None, true) => (FILENAME_ONLY_SCORE, None),
                (None, false) => return None,
            };
            (score >= opts.threshold).then_some(SearchHit {
                document: doc,
                score,
                excerpt,
                filename_match,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
    });
    hits.truncate(opts.top_k);
    hits
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
