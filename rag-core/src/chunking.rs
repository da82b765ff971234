//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`SentenceChunker`]: greedily packs whole sentences up to a target size
//! - [`FixedSizeChunker`]: slides a fixed character window with optional overlap
//! - [`SmartChunker`]: packs lines, keeping dialogue lines whole and
//!   sentence-splitting only overlong lines
//!
//! All sizes are counted in characters, not bytes. Line terminators are
//! normalized to `\n` before any splitting happens.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Chinese and Western sentence terminators plus newline, one or more in a row.
static SENTENCE_DELIMITERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[。！？；\n]+").expect("sentence delimiter pattern is valid"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Lines shorter than this may be treated as a dialogue turn.
const DIALOGUE_MAX_CHARS: usize = 100;

const QUOTE_CHARS: [char; 7] = ['"', '“', '”', '「', '」', '『', '』'];

/// The chunking strategy to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Pack whole sentences.
    #[serde(alias = "sentences")]
    Sentence,
    /// Fixed character windows over whitespace-collapsed text.
    FixedSize,
    /// Line-oriented packing that keeps dialogue together.
    Smart,
}

impl ChunkStrategy {
    /// The separator that, placed between chunks, rebuilds the normalized text
    /// (modulo consumed delimiters and whitespace).
    pub fn separator(self) -> &'static str {
        match self {
            Self::Sentence | Self::FixedSize => "",
            Self::Smart => "\n",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Sentence => "sentence",
            Self::FixedSize => "fixed_size",
            Self::Smart => "smart",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sentence" | "sentences" => Ok(Self::Sentence),
            "fixed_size" => Ok(Self::FixedSize),
            "smart" => Ok(Self::Smart),
            other => Err(RagError::invalid(format!(
                "unknown chunking strategy '{other}' (expected sentence, fixed_size, or smart)"
            ))),
        }
    }
}

/// Replace `\r\n` and lone `\r` with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Which strategy this chunker implements.
    fn strategy(&self) -> ChunkStrategy;

    /// Split raw text into trimmed, non-empty chunk strings.
    ///
    /// Line endings are normalized first. Blank input yields an empty `Vec`.
    fn split(&self, text: &str) -> Vec<String>;

    /// Split a document into [`Chunk`]s.
    ///
    /// Chunk IDs are `{document_id}_{sequence_index}`; each chunk inherits the
    /// document metadata plus `document_id`, `source`, and `chunk_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if the document content is blank.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.content.trim().is_empty() {
            return Err(RagError::invalid(format!("document '{}' has empty content", document.id)));
        }

        let chunks: Vec<Chunk> = self
            .split(&document.content)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = document.metadata.clone();
                metadata.insert("document_id".to_string(), Value::from(document.id.clone()));
                metadata.insert("source".to_string(), Value::from(document.source.clone()));
                metadata.insert("chunk_index".to_string(), Value::from(i));
                Chunk {
                    id: format!("{}_{i}", document.id),
                    document_id: document.id.clone(),
                    text,
                    sequence_index: i,
                    metadata,
                }
            })
            .collect();

        debug!(
            document.id = %document.id,
            strategy = %self.strategy(),
            chunk_count = chunks.len(),
            "chunked document"
        );
        Ok(chunks)
    }
}

fn check_target_size(target_size: usize) -> Result<()> {
    if target_size == 0 {
        return Err(RagError::invalid("target_size must be greater than zero"));
    }
    Ok(())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Packs consecutive sentences into chunks of at most `target_size` characters.
///
/// Sentence delimiters (`。！？；` and newline) are consumed, but each one still
/// counts toward the size budget of the sentence it terminates. A sentence
/// longer than `target_size` becomes its own chunk; sentences are never split.
///
/// # Example
///
/// ```rust
/// use rag_core::chunking::{Chunker, SentenceChunker};
///
/// let chunker = SentenceChunker::new(10).unwrap();
/// let chunks = chunker.split("这是第一句。这是第二句！这是第三句？这是第四句");
/// assert_eq!(chunks.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    target_size: usize,
}

impl SentenceChunker {
    /// Create a new `SentenceChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `target_size` is zero.
    pub fn new(target_size: usize) -> Result<Self> {
        check_target_size(target_size)?;
        Ok(Self { target_size })
    }
}

impl Chunker for SentenceChunker {
    fn strategy(&self) -> ChunkStrategy {
        ChunkStrategy::Sentence
    }

    fn split(&self, text: &str) -> Vec<String> {
        pack_sentences(&normalize_line_endings(text), self.target_size)
    }
}

/// Trimmed sentences paired with their length budget: the sentence's
/// characters plus one for the terminator that ended it, if any.
fn sentences(text: &str) -> Vec<(&str, usize)> {
    fn push<'a>(out: &mut Vec<(&'a str, usize)>, fragment: &'a str, terminated: bool) {
        let sentence = fragment.trim();
        if !sentence.is_empty() {
            out.push((sentence, char_len(sentence) + usize::from(terminated)));
        }
    }

    let mut out = Vec::new();
    let mut start = 0;
    for delimiter in SENTENCE_DELIMITERS.find_iter(text) {
        push(&mut out, &text[start..delimiter.start()], true);
        start = delimiter.end();
    }
    push(&mut out, &text[start..], false);
    out
}

fn pack_sentences(text: &str, target_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_size = 0;

    for (sentence, len) in sentences(text) {
        if len > target_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_size = 0;
            }
            chunks.push(sentence.to_string());
            continue;
        }

        if !current.is_empty() && current_size + len > target_size {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push_str(sentence);
        current_size += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits whitespace-collapsed text into windows of `target_size` characters.
///
/// Consecutive windows start `target_size - overlap` characters apart, so they
/// share `overlap` characters. This strategy ignores sentence boundaries.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    target_size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `target_size` is zero or
    /// `overlap >= target_size`.
    pub fn new(target_size: usize, overlap: usize) -> Result<Self> {
        check_target_size(target_size)?;
        if overlap >= target_size {
            return Err(RagError::invalid(format!(
                "overlap ({overlap}) must be less than target_size ({target_size})"
            )));
        }
        Ok(Self { target_size, overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn strategy(&self) -> ChunkStrategy {
        ChunkStrategy::FixedSize
    }

    fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize_line_endings(text);
        let collapsed = WHITESPACE_RUN.replace_all(normalized.trim(), " ");
        let chars: Vec<char> = collapsed.chars().collect();
        let stride = self.target_size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.target_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let window = window.trim();
            if !window.is_empty() {
                chunks.push(window.to_string());
            }
            start += stride;
        }
        chunks
    }
}

/// Line-oriented chunker tuned for dialogue-heavy narrative text.
///
/// Lines are accumulated greedily. An overlong line (more than 1.5× the target)
/// is sentence-split on its own. Short quoted lines that would overflow the
/// current chunk open a new chunk instead of being glued to the narrative
/// before them. Any other overflowing line opens a new chunk only once the
/// current one holds more than 30% of the target; otherwise the chunk is
/// allowed to run slightly over.
#[derive(Debug, Clone)]
pub struct SmartChunker {
    target_size: usize,
}

impl SmartChunker {
    /// Create a new `SmartChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `target_size` is zero.
    pub fn new(target_size: usize) -> Result<Self> {
        check_target_size(target_size)?;
        Ok(Self { target_size })
    }
}

fn is_dialogue(line: &str) -> bool {
    line.contains(QUOTE_CHARS)
}

impl Chunker for SmartChunker {
    fn strategy(&self) -> ChunkStrategy {
        ChunkStrategy::Smart
    }

    fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize_line_endings(text);
        let target = self.target_size;

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0;

        for line in normalized.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            let len = char_len(line);

            // len > 1.5 * target
            if len * 2 > target * 3 {
                if !current.is_empty() {
                    chunks.push(current.join("\n"));
                    current.clear();
                    current_size = 0;
                }
                chunks.extend(pack_sentences(line, target));
                continue;
            }

            let overflows = !current.is_empty() && current_size + len > target;
            let dialogue_break = overflows && len < DIALOGUE_MAX_CHARS && is_dialogue(line);
            // current_size > 0.3 * target
            let full_enough = overflows && current_size * 10 > target * 3;

            if dialogue_break || full_enough {
                chunks.push(current.join("\n"));
                current.clear();
                current_size = 0;
            }
            current.push(line);
            current_size += len;
        }

        if !current.is_empty() {
            chunks.push(current.join("\n"));
        }
        chunks
    }
}

/// Build a boxed [`Chunker`] for a strategy.
///
/// `overlap` is only consulted for [`ChunkStrategy::FixedSize`].
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] for a zero `target_size` or an
/// overlap that is not smaller than it.
pub fn chunker_for(
    strategy: ChunkStrategy,
    target_size: usize,
    overlap: usize,
) -> Result<Box<dyn Chunker>> {
    let chunker: Box<dyn Chunker> = match strategy {
        ChunkStrategy::Sentence => Box::new(SentenceChunker::new(target_size)?),
        ChunkStrategy::FixedSize => Box::new(FixedSizeChunker::new(target_size, overlap)?),
        ChunkStrategy::Smart => Box::new(SmartChunker::new(target_size)?),
    };
    Ok(chunker)
}

/// Chunk raw text with the named strategy.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] if `strategy` is unrecognized,
/// `target_size` is zero, or `text` is blank.
pub fn chunk_text(
    text: &str,
    strategy: &str,
    target_size: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    let strategy: ChunkStrategy = strategy.parse()?;
    let chunker = chunker_for(strategy, target_size, overlap)?;
    if text.trim().is_empty() {
        return Err(RagError::invalid("text to chunk cannot be empty"));
    }
    Ok(chunker.split(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace() && !"。！？；".contains(*c)).collect()
    }

    #[test]
    fn sentence_strategy_packs_four_short_sentences() {
        let text = "这是第一句。这是第二句！这是第三句？这是第四句";
        let chunks = chunk_text(text, "sentence", 10, 0).unwrap();

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        assert_eq!(chunks.concat(), "这是第一句这是第二句这是第三句这是第四句");
    }

    #[test]
    fn sentence_strategy_groups_until_target() {
        let chunks = SentenceChunker::new(10).unwrap().split("一二三。四五六。七八九十。甲乙");
        assert_eq!(chunks, vec!["一二三四五六", "七八九十甲乙"]);
    }

    #[test]
    fn oversized_sentence_is_emitted_whole() {
        let long = "长".repeat(25);
        let text = format!("短句。{long}。又一短句");
        let chunks = SentenceChunker::new(10).unwrap().split(&text);
        assert_eq!(chunks, vec!["短句".to_string(), long, "又一短句".to_string()]);
    }

    #[test]
    fn crlf_is_normalized_before_splitting() {
        let chunks = SentenceChunker::new(2).unwrap().split("甲\r\n乙\r丙");
        assert_eq!(chunks, vec!["甲", "乙", "丙"]);
    }

    #[test]
    fn fixed_size_windows_with_overlap() {
        let chunks = FixedSizeChunker::new(4, 1).unwrap().split("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
    }

    #[test]
    fn fixed_size_collapses_whitespace() {
        let chunks = FixedSizeChunker::new(100, 0).unwrap().split("a \n\n  b\t\tc");
        assert_eq!(chunks, vec!["a b c"]);
    }

    #[test]
    fn fixed_size_counts_characters_not_bytes() {
        let chunks = FixedSizeChunker::new(3, 0).unwrap().split("北京上海广州深圳");
        assert_eq!(chunks, vec!["北京上", "海广州", "深圳"]);
    }

    #[test]
    fn fixed_size_rejects_overlap_not_below_target() {
        assert!(matches!(FixedSizeChunker::new(10, 10), Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn smart_keeps_dialogue_line_out_of_narrative() {
        let narrative = "旁".repeat(8);
        let text = format!("{narrative}\n“你好吗？”他问。");
        let chunks = SmartChunker::new(10).unwrap().split(&text);
        assert_eq!(chunks, vec![narrative, "“你好吗？”他问。".to_string()]);
    }

    #[test]
    fn smart_glues_short_line_to_small_accumulator() {
        // Accumulator holds 2 chars (20% of 10), so an overflowing plain line is appended.
        let text = "甲乙\n丙丁戊己庚辛壬癸子";
        let chunks = SmartChunker::new(10).unwrap().split(text);
        assert_eq!(chunks, vec!["甲乙\n丙丁戊己庚辛壬癸子"]);
    }

    #[test]
    fn smart_flushes_when_accumulator_is_full_enough() {
        let text = "甲乙丙丁\n戊己庚辛壬癸子";
        let chunks = SmartChunker::new(10).unwrap().split(text);
        assert_eq!(chunks, vec!["甲乙丙丁", "戊己庚辛壬癸子"]);
    }

    #[test]
    fn smart_sentence_splits_overlong_line() {
        let line = format!("{}。{}。{}", "甲".repeat(6), "乙".repeat(6), "丙".repeat(6));
        let text = format!("开头\n{line}\n结尾");
        let chunks = SmartChunker::new(10).unwrap().split(&text);
        assert_eq!(
            chunks,
            vec![
                "开头".to_string(),
                "甲".repeat(6),
                "乙".repeat(6),
                "丙".repeat(6),
                "结尾".to_string(),
            ]
        );
    }

    #[test]
    fn smart_round_trip_preserves_content() {
        let text = "第一行叙述。\n\n“对话一！”\n第二行叙述，比较长一些的句子。\n“对话二？”";
        let chunks = SmartChunker::new(12).unwrap().split(text);
        assert_eq!(strip(&chunks.join(ChunkStrategy::Smart.separator())), strip(text));
    }

    #[test]
    fn rejects_unknown_strategy_and_zero_target() {
        assert!(matches!(chunk_text("abc", "paragraph", 10, 0), Err(RagError::InvalidArgument(_))));
        assert!(matches!(chunk_text("abc", "smart", 0, 0), Err(RagError::InvalidArgument(_))));
        assert!(matches!(chunk_text("   ", "smart", 10, 0), Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn strategy_parses_aliases_and_serde_names() {
        assert_eq!("sentences".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::Sentence);
        assert_eq!("fixed_size".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::FixedSize);
        let parsed: ChunkStrategy = serde_json::from_str("\"sentences\"").unwrap();
        assert_eq!(parsed, ChunkStrategy::Sentence);
        assert_eq!(serde_json::to_string(&ChunkStrategy::FixedSize).unwrap(), "\"fixed_size\"");
    }

    #[test]
    fn chunk_attaches_ids_and_metadata() {
        let mut doc = Document::new("novel", "第一句。第二句。第三句。", "local").unwrap();
        doc.metadata.insert("title".into(), Value::from("测试"));

        let chunks = SentenceChunker::new(3).unwrap().chunk(&doc).unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("novel_{i}"));
            assert_eq!(chunk.sequence_index, i);
            assert_eq!(chunk.metadata["chunk_index"], Value::from(i));
            assert_eq!(chunk.metadata["source"], Value::from("local"));
            assert_eq!(chunk.metadata["title"], Value::from("测试"));
        }
    }
}
