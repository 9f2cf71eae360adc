//! Fixed-size character windows with overlap.

#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// Target window length in characters.
    pub size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 2000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

pub fn chunk_text(text: &str, config: ChunkConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let size = config.size.max(1);
    let overlap = config.overlap.min(size / 2);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let target_end = (start + size).min(total);
        let end = find_break_point(&chars, start, target_end);

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                text: piece.to_string(),
            });
        }

        if end >= total {
            break;
        }
        // always advance, even when the break point sits inside the overlap
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Moves `target_end` back to a paragraph break, line break or sentence end
/// found in the last fifth of the window.
fn find_break_point(chars: &[char], start: usize, target_end: usize) -> usize {
    let total = chars.len();
    if target_end >= total {
        return total;
    }
    let search_start = target_end - (target_end - start) / 5;

    for i in (search_start..target_end).rev() {
        if chars[i] == '\n' && chars.get(i + 1) == Some(&'\n') {
            return i + 2;
        }
    }
    for i in (search_start..target_end).rev() {
        if chars[i] == '\n' {
            return i + 1;
        }
    }
    for i in (search_start..target_end).rev() {
        if matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
        {
            return i + 1;
        }
    }
    target_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig { size, overlap }
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        assert!(chunk_text("", ChunkConfig::default()).is_empty());
        assert!(chunk_text("   \n\n  ", ChunkConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("This is a short text.", ChunkConfig::default());
        assert_eq!(
            chunks,
            vec![Chunk {
                index: 0,
                text: "This is a short text.".into()
            }]
        );
    }

    #[test]
    fn long_text_overlaps_and_covers_everything() {
        let text = "A".repeat(3000);
        let chunks = chunk_text(&text, cfg(1000, 100));
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 1000));
        // 0..1000, 900..1900, 1800..2800, 2700..3000
        assert_eq!(chunks[3].text.len(), 300);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let para = "word ".repeat(17); // 85 chars
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = chunk_text(&text, cfg(100, 0));
        assert_eq!(chunks[0].text, para.trim());
        assert_eq!(chunks[1].text, para.trim());
    }

    #[test]
    fn falls_back_to_sentence_end() {
        let sentence = "Alpha beta gamma delta. ";
        let text = sentence.repeat(10);
        let chunks = chunk_text(&text, cfg(50, 0));
        assert!(chunks.iter().all(|c| c.text.ends_with('.')));
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "é".repeat(250);
        let chunks = chunk_text(&text, cfg(100, 10));
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert_eq!(chunks.len(), 3);
    }
}
