//! Corpus chunking for retrieval.
//!
//! This module turns a raw, line-oriented corpus into [`Chunk`]s: the smallest
//! units the retriever can return and a human can read back as a citation.
//!
//! Chunking happens in three passes:
//!
//! 1. **Unit split**: the corpus is cut on the configured [`Boundary`]
//!    (single lines by default, blank-line separated paragraphs, or a custom
//!    regular expression).
//! 2. **Oversize split**: when `max_chars` is set, any unit longer than that is
//!    broken down recursively, trying sentence ends first, then whitespace, and
//!    finally raw character boundaries. The resulting segments are greedily
//!    merged back together up to `max_chars`.
//! 3. **Noise filter**: units whose trimmed text is shorter than `min_chars`
//!    (blank lines, stray punctuation, chapter numerals) are dropped, and so are
//!    units without a single letter or digit (`==========`, `* * * * *`).
//!
//! Surviving chunks get ids `0, 1, 2, ...` in traversal order and a source label
//! of the form `"<label>:<line>"` pointing at the line the chunk starts on.
//! Ids are only stable within a single run with a single configuration.
//!
//! ```
//! use sunzi_chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default().with_min_chars(5)).unwrap();
//! let chunks = chunker.chunk("Know your enemy.\nSpeed wins wars.\nx\n");
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text(), "Know your enemy.");
//! assert_eq!(chunks[0].source_label(), "corpus:1");
//! assert_eq!(chunks[1].id(), 1);
//! ```
use crate::error::{ChunkError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Identifier of a chunk within one ingestion run.
pub type ChunkId = i64;

/// Delimiters used to break an oversize unit down, most significant first.
///
/// - `\n`: line breaks inside a paragraph.
/// - `[.!?;:]\s+`: sentence and clause ends.
/// - `\s+`: any whitespace run.
pub const SENTENCE_DELIMITERS: &[&str] = &[r"\n", r"[.!?;:]\s+", r"\s+"];

/// Default minimum number of characters a trimmed chunk must have.
pub const DEFAULT_MIN_CHARS: usize = 10;

/// Where the corpus is cut into units before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Every line is a unit.
    #[default]
    Line,
    /// Runs of text separated by one or more blank lines.
    Paragraph,
    /// A custom regular expression; every match separates two units.
    Pattern(String),
}

impl Boundary {
    fn pattern(&self) -> &str {
        match self {
            Boundary::Line => r"\n",
            Boundary::Paragraph => r"\n[ \t\r]*\n\s*",
            Boundary::Pattern(pattern) => pattern,
        }
    }
}

/// A unit of corpus text, the smallest item the retriever returns.
///
/// Chunks are immutable once created: the text is stored trimmed, is never
/// shorter than the chunker's `min_chars` and contains at least one letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    id: ChunkId,
    text: String,
    source_label: String,
}

impl Chunk {
    /// Rehydrate a chunk from storage. The chunker is the only producer of new chunks.
    pub fn new(id: ChunkId, text: impl Into<String>, source_label: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            source_label: source_label.into(),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    /// Lowercased text with whitespace runs collapsed to single spaces.
    ///
    /// Two chunks with equal normalized text are considered duplicates.
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration for [`Chunker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Unit boundary
    pub boundary: Boundary,
    /// Minimum trimmed length, in characters, of an emitted chunk
    pub min_chars: usize,
    /// Maximum length, in characters, of an emitted chunk (unbounded if `None`)
    pub max_chars: Option<usize>,
    /// Label prefix used for citations, usually the corpus file name
    pub source_label: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            boundary: Boundary::Line,
            min_chars: DEFAULT_MIN_CHARS,
            max_chars: None,
            source_label: "corpus".to_string(),
        }
    }
}

impl ChunkerConfig {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
            ..Self::default()
        }
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    pub fn with_source_label(mut self, source_label: impl Into<String>) -> Self {
        self.source_label = source_label.into();
        self
    }

    /// Check the numeric limits without compiling any pattern.
    pub fn validate(&self) -> Result<()> {
        if self.min_chars == 0 {
            return Err(ChunkError::invalid_config("min_chars must be at least 1"));
        }
        if let Some(max_chars) = self.max_chars {
            if max_chars < self.min_chars {
                return Err(ChunkError::invalid_config(format!(
                    "max_chars ({max_chars}) must not be smaller than min_chars ({})",
                    self.min_chars
                )));
            }
        }
        Ok(())
    }
}

/// Splits corpus text into [`Chunk`]s. Pure: no I/O and no shared state.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    boundary: Regex,
    delimiters: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ChunkError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Chunker {
    /// Validate the configuration and compile the boundary pattern.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        let boundary = compile(config.boundary.pattern())?;
        let delimiters = SENTENCE_DELIMITERS
            .iter()
            .map(|pattern| compile(pattern))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            boundary,
            delimiters,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `raw` into chunks.
    ///
    /// Every returned chunk has trimmed text of at least `min_chars` characters
    /// (and at most `max_chars`, when set) with some alphanumeric content, and ids
    /// are strictly increasing.
    pub fn chunk(&self, raw: &str) -> Vec<Chunk> {
        let newlines: Vec<usize> = raw.match_indices('\n').map(|(at, _)| at).collect();
        let line_at = |offset: usize| newlines.partition_point(|&nl| nl < offset) + 1;

        let mut chunks = Vec::new();
        for unit in self.units(raw) {
            for range in self.fit(raw, unit) {
                let text = &raw[range.clone()];
                if is_trivial(text, self.config.min_chars) {
                    continue;
                }
                chunks.push(Chunk {
                    id: chunks.len() as ChunkId,
                    text: text.to_string(),
                    source_label: format!("{}:{}", self.config.source_label, line_at(range.start)),
                });
            }
        }
        chunks
    }

    /// Byte ranges of the units between boundary matches.
    fn units(&self, raw: &str) -> Vec<Range<usize>> {
        let mut units = Vec::new();
        let mut start = 0;
        for mat in self.boundary.find_iter(raw) {
            if mat.start() > start {
                units.push(start..mat.start());
            }
            start = mat.end();
        }
        if start < raw.len() {
            units.push(start..raw.len());
        }
        units
    }

    /// Trim a unit and, if needed, break it into pieces no longer than `max_chars`.
    fn fit(&self, raw: &str, unit: Range<usize>) -> Vec<Range<usize>> {
        let unit = trim_range(raw, unit);
        if unit.is_empty() {
            return Vec::new();
        }
        let Some(max_chars) = self.config.max_chars else {
            return vec![unit];
        };

        let segments = self.split_recursively_into_segments(
            &raw[unit.clone()],
            0,
            max_chars,
            unit.start,
        );
        merge_segments(raw, segments, max_chars)
            .into_iter()
            .map(|range| trim_range(raw, range))
            .filter(|range| !range.is_empty())
            .collect()
    }

    // Returns contiguous byte ranges covering `text` (offset by `current_offset`),
    // none longer than `max_chars` characters. Delimiter matches are kept as their
    // own segments so that merging restores the original text exactly.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        max_chars: usize,
        current_offset: usize,
    ) -> Vec<Range<usize>> {
        let mut segments = Vec::new();
        if text.is_empty() {
            return segments;
        }

        if text.chars().count() <= max_chars {
            segments.push(current_offset..current_offset + text.len());
            return segments;
        }

        // Out of delimiters: cut on character boundaries.
        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            let starts: Vec<usize> = text
                .char_indices()
                .map(|(at, _)| at)
                .step_by(max_chars)
                .collect();
            for (n, &start) in starts.iter().enumerate() {
                let end = starts.get(n + 1).copied().unwrap_or(text.len());
                segments.push(current_offset + start..current_offset + end);
            }
            return segments;
        };

        let mut local_start = 0;
        for mat in delimiter.find_iter(text) {
            if mat.start() > local_start {
                segments.extend(self.split_recursively_into_segments(
                    &text[local_start..mat.start()],
                    delimiter_idx + 1,
                    max_chars,
                    current_offset + local_start,
                ));
            }
            segments.extend(self.split_recursively_into_segments(
                mat.as_str(),
                delimiter_idx + 1,
                max_chars,
                current_offset + mat.start(),
            ));
            local_start = mat.end();
        }

        if local_start < text.len() {
            segments.extend(self.split_recursively_into_segments(
                &text[local_start..],
                delimiter_idx + 1,
                max_chars,
                current_offset + local_start,
            ));
        }

        segments
    }
}

fn trim_range(raw: &str, range: Range<usize>) -> Range<usize> {
    let text = &raw[range.clone()];
    let trimmed_start = text.trim_start();
    if trimmed_start.is_empty() {
        return range.start..range.start;
    }
    let lead = text.len() - trimmed_start.len();
    let trail = trimmed_start.len() - trimmed_start.trim_end().len();
    range.start + lead..range.end - trail
}

/// Greedily join adjacent segments while the result stays within `max_chars`.
fn merge_segments(raw: &str, segments: Vec<Range<usize>>, max_chars: usize) -> Vec<Range<usize>> {
    let mut merged = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;

    for segment in segments {
        let segment_chars = raw[segment.clone()].chars().count();
        current = match current.take() {
            Some((range, chars)) if chars + segment_chars <= max_chars => {
                Some((range.start..segment.end, chars + segment_chars))
            }
            Some((range, _)) => {
                merged.push(range);
                Some((segment, segment_chars))
            }
            None => Some((segment, segment_chars)),
        };
    }

    if let Some((range, _)) = current {
        merged.push(range);
    }
    merged
}

/// Too short to be worth retrieving, or a separator with no words in it.
fn is_trivial(text: &str, min_chars: usize) -> bool {
    text.chars().count() < min_chars || !text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(config: ChunkerConfig) -> Chunker {
        Chunker::new(config).expect("valid config")
    }

    #[test]
    fn test_line_chunks_filter_noise() {
        let chunks = chunker(ChunkerConfig::default().with_min_chars(5))
            .chunk("Know your enemy.\nSpeed wins wars.\nx\n");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text(), "Know your enemy.");
        assert_eq!(chunks[1].text(), "Speed wins wars.");
        assert_eq!(chunks[0].id(), 0);
        assert_eq!(chunks[1].id(), 1);
    }

    #[test]
    fn test_separator_lines_are_dropped() {
        let raw = "Know your enemy and know yourself.\n==============\n* * * * * * *\n-- 42 --\n";
        let chunks = chunker(ChunkerConfig::default().with_min_chars(5)).chunk(raw);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec!["Know your enemy and know yourself.", "-- 42 --"]);
        assert_eq!(chunks[1].id(), 1);
        assert_eq!(chunks[1].source_label(), "corpus:4");
    }

    #[test]
    fn test_default_minimum_is_ten_characters() {
        let raw = "123456789\n1234567890\n   short   \n";
        let chunks = chunker(ChunkerConfig::default()).chunk(raw);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "1234567890");
    }

    #[test]
    fn test_minimum_counts_characters_not_bytes() {
        // The second line is six characters but twelve bytes.
        let raw = "Düşmanını tanı\nçğıöşü\n";
        let chunks = chunker(ChunkerConfig::default().with_min_chars(7)).chunk(raw);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "Düşmanını tanı");
    }

    #[test]
    fn test_chunks_are_trimmed_and_labelled_by_line() {
        let raw = "\n\n   All warfare is based on deception.  \r\n\nHence, when able to attack, we must seem unable.\n";
        let chunks = chunker(ChunkerConfig::new("art_of_war.txt")).chunk(raw);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text(), "All warfare is based on deception.");
        assert_eq!(chunks[0].source_label(), "art_of_war.txt:3");
        assert_eq!(
            chunks[1].text(),
            "Hence, when able to attack, we must seem unable."
        );
        assert_eq!(chunks[1].source_label(), "art_of_war.txt:5");
    }

    #[test]
    fn test_paragraph_boundary() {
        let raw = "Laying Plans\nThe art of war is of vital importance to the State.\n\n\n\
                   Waging War\nWhen you engage in actual fighting, victory is long in coming.\n";
        let chunks =
            chunker(ChunkerConfig::default().with_boundary(Boundary::Paragraph)).chunk(raw);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text().starts_with("Laying Plans\nThe art of war"));
        assert!(chunks[1].text().starts_with("Waging War\n"));
        assert_eq!(chunks[1].source_label(), "corpus:5");
    }

    #[test]
    fn test_custom_pattern_boundary() {
        let raw = "First teaching is long enough|Second teaching is long enough|no";
        let chunks = chunker(
            ChunkerConfig::default().with_boundary(Boundary::Pattern(r"\|".to_string())),
        )
        .chunk(raw);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text(), "Second teaching is long enough");
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = Chunker::new(
            ChunkerConfig::default().with_boundary(Boundary::Pattern("(".to_string())),
        );
        assert!(matches!(result, Err(ChunkError::InvalidPattern { .. })));
    }

    #[test]
    fn test_invalid_limits_are_rejected() {
        assert!(Chunker::new(ChunkerConfig::default().with_min_chars(0)).is_err());
        assert!(
            Chunker::new(
                ChunkerConfig::default()
                    .with_min_chars(20)
                    .with_max_chars(10)
            )
            .is_err()
        );
    }

    #[test]
    fn test_oversize_units_are_split_on_sentences() {
        let sentence = "Move swiftly where the enemy is unprepared. ";
        let raw = sentence.repeat(20);
        let max_chars = 100;
        let chunks = chunker(ChunkerConfig::default().with_max_chars(max_chars)).chunk(&raw);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text().chars().count() <= max_chars);
            assert!(chunk.text().chars().count() >= DEFAULT_MIN_CHARS);
            assert!(chunk.text().ends_with('.'));
        }
        // Nothing but whitespace is lost.
        let original: String = raw.split_whitespace().collect();
        let rebuilt: String = chunks
            .iter()
            .flat_map(|c| c.text().split_whitespace())
            .collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_oversize_unit_without_delimiters_splits_on_char_boundaries() {
        let raw = "ş".repeat(25);
        let chunks = chunker(
            ChunkerConfig::default()
                .with_min_chars(1)
                .with_max_chars(10),
        )
        .chunk(&raw);

        let lengths: Vec<usize> = chunks.iter().map(|c| c.text().chars().count()).collect();
        assert_eq!(lengths, vec![10, 10, 5]);
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let raw = (0..50)
            .map(|i| {
                if i % 3 == 0 {
                    "-".to_string()
                } else {
                    format!("Teaching number {i} about strategy")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker(ChunkerConfig::default()).chunk(&raw);

        assert!(!chunks.is_empty());
        assert!(chunks.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn test_empty_corpus() {
        assert!(chunker(ChunkerConfig::default()).chunk("").is_empty());
        assert!(chunker(ChunkerConfig::default()).chunk("\n\n  \n").is_empty());
    }

    #[test]
    fn test_normalized_text() {
        let chunk = Chunk::new(7, "  Know   your\tENEMY. ", "corpus:1");
        assert_eq!(chunk.normalized_text(), "know your enemy.");
    }
}
