//! Overlapping-window text chunker.
//!
//! Splits document text into windows of at most `chunk_size` characters,
//! consecutive windows sharing roughly `chunk_overlap` characters. Inside each
//! window the cut point prefers, in order: a paragraph break, a line break, a
//! sentence terminator, a comma, a space. A hard character cut is used only
//! when the window contains none of these.
//!
//! Chunks are exact substrings of their source. Each carries its starting
//! character offset, so dropping the overlap from every chunk after the first
//! and concatenating reconstructs the source text exactly.

use crate::config::ChunkingConfig;
use crate::models::Document;

/// Break levels, highest preference first. A break sits *after* the separator.
const BREAK_LEVELS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? ", ".\t", "!\t", "?\t"],
    &[", "],
    &[" ", "\t"],
];

/// A chunk of text before it has been embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub text: String,
    /// Contiguous and zero-based across the whole document.
    pub chunk_index: usize,
    /// Page of the segment this chunk came from, if the source is paginated.
    pub page: Option<u32>,
    /// Character offset of the chunk within its segment.
    pub start: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// `chunk_overlap` is clamped below `chunk_size`; config validation
    /// rejects that case before it gets here.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split a single unstructured text. Indices start at 0.
    ///
    /// Empty or whitespace-only input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<ChunkCandidate> {
        let mut out = Vec::new();
        self.split_into(text, None, &mut out);
        out
    }

    /// Split every segment of a document independently, numbering chunks
    /// continuously across segments.
    pub fn split_document(&self, document: &Document) -> Vec<ChunkCandidate> {
        let mut out = Vec::new();
        for segment in &document.segments {
            self.split_into(&segment.text, segment.page, &mut out);
        }
        out
    }

    fn split_into(&self, text: &str, page: Option<u32>, out: &mut Vec<ChunkCandidate>) {
        if text.trim().is_empty() {
            return;
        }

        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut start = 0;

        loop {
            let hard_end = (start + self.chunk_size).min(n);
            let end = if hard_end == n {
                n
            } else {
                self.find_break(&chars, start, hard_end)
            };

            out.push(ChunkCandidate {
                text: chars[start..end].iter().collect(),
                chunk_index: out.len(),
                page,
                start,
            });

            if end == n {
                break;
            }
            start = next_start(&chars, start, end, self.chunk_overlap);
        }
    }

    /// Pick the cut point for the window `[start, hard_end)`.
    ///
    /// Structural breaks (everything above word level) are only taken from
    /// the back half of the window so a stray early newline does not produce
    /// a sliver of a chunk.
    fn find_break(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let half = start + (hard_end - start) / 2;
        let last = BREAK_LEVELS.len() - 1;

        for (level, patterns) in BREAK_LEVELS.iter().enumerate() {
            let floor = if level == last { start + 1 } else { half.max(start + 1) };
            let best = patterns
                .iter()
                .filter_map(|p| last_break(chars, floor, hard_end, p))
                .max();
            if let Some(pos) = best {
                return pos;
            }
        }

        hard_end
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Position just after the last occurrence of `pattern` that ends inside
/// `[floor, hard_end]`.
fn last_break(chars: &[char], floor: usize, hard_end: usize, pattern: &str) -> Option<usize> {
    let pat: Vec<char> = pattern.chars().collect();
    let len = pat.len();
    if hard_end < len {
        return None;
    }

    let mut idx = hard_end - len;
    loop {
        let pos = idx + len;
        if pos < floor {
            return None;
        }
        if chars[idx..pos] == pat[..] {
            return Some(pos);
        }
        if idx == 0 {
            return None;
        }
        idx -= 1;
    }
}

/// Start of the window following `[start, end)`: `overlap` characters back
/// from `end`, nudged forward to the next word start when one exists before
/// `end`. Always strictly greater than `start`.
fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    let candidate = end.saturating_sub(overlap).max(start + 1);
    (candidate..end)
        .find(|&p| chars[p - 1].is_whitespace() && !chars[p].is_whitespace())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Segment;

    /// Drop each chunk's overlap with its predecessor and concatenate.
    fn reconstruct(chunks: &[ChunkCandidate]) -> String {
        let mut out = String::new();
        let mut prev_end = 0;
        for (i, c) in chunks.iter().enumerate() {
            let len = c.text.chars().count();
            if i == 0 {
                out.push_str(&c.text);
            } else {
                assert!(c.start <= prev_end, "gap before chunk {}", i);
                out.extend(c.text.chars().skip(prev_end - c.start));
            }
            prev_end = c.start + len;
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                if i % 7 == 6 {
                    format!("Sentence {} closes a paragraph.\n\n", i)
                } else {
                    format!("Sentence number {} talks about topic {}. ", i, i * 3)
                }
            })
            .collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = Chunker::new(1000, 200).split("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_and_whitespace_yield_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\n\t ").is_empty());
    }

    #[test]
    fn test_reconstructs_source_exactly() {
        let text = sample_text();
        for (size, overlap) in [(100, 20), (150, 60), (64, 0), (500, 200), (37, 36)] {
            let chunks = Chunker::new(size, overlap).split(&text);
            assert!(chunks.len() > 1, "size {} should split", size);
            assert_eq!(reconstruct(&chunks), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_chunks_respect_size_and_indices_contiguous() {
        let text = sample_text();
        let chunks = Chunker::new(120, 30).split(&text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(c.text.chars().count() <= 120);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = sample_text();
        let chunks = Chunker::new(200, 50).split(&text);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].start + pair[0].text.chars().count();
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start < prev_end, "expected overlap");
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let first = "a".repeat(30) + " " + &"b".repeat(30) + ".";
        let text = format!("{}\n\n{} tail words here", first, "c".repeat(40));
        let chunks = Chunker::new(80, 10).split(&text);
        assert!(chunks[0].text.ends_with(".\n\n"), "{:?}", chunks[0].text);
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let text = "The first sentence is here. The second one keeps going on and on";
        let chunks = Chunker::new(50, 5).split(text);
        assert_eq!(chunks[0].text, "The first sentence is here. ");
    }

    #[test]
    fn test_boundary_sentence_survives_in_some_chunk() {
        let text = sample_text();
        let chunks = Chunker::new(180, 90).split(&text);
        for sentence in text.split(". ").filter(|s| s.len() > 5) {
            let sentence = sentence.trim();
            assert!(
                chunks.iter().any(|c| c.text.contains(sentence)),
                "sentence lost: {:?}",
                sentence
            );
        }
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(250);
        let chunks = Chunker::new(100, 20).split(&text);
        assert_eq!(chunks[0].text.len(), 100);
        assert_eq!(chunks[1].start, 80);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "héllo wörld ünïcödé ".repeat(20);
        let chunks = Chunker::new(33, 7).split(&text);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_pages_continue_numbering() {
        let doc = Document::new(
            "paper.pdf",
            "application/pdf",
            vec![
                Segment::page("Page one has some words in it. ".repeat(6), 1),
                Segment::page("   ", 2),
                Segment::page("Page three is short.", 3),
            ],
        );
        let chunks = Chunker::new(60, 10).split_document(&doc);
        assert!(chunks.len() >= 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.page, Some(3));
        assert_eq!(last.text, "Page three is short.");
        assert!(chunks.iter().all(|c| c.page != Some(2)));
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let a = Chunker::new(90, 25).split(&text);
        let b = Chunker::new(90, 25).split(&text);
        assert_eq!(a, b);
    }
}
