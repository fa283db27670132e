use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// How far back from a window end the splitter looks for a natural break.
const BREAKPOINT_SEARCH_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap_size: 150,
            min_chunk_size: 50,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.chunk_size == 0 {
            return Err(AgentError::ConfigError("chunk_size must be greater than 0".to_string()));
        }
        if self.overlap_size >= self.chunk_size {
            return Err(AgentError::ConfigError(format!(
                "overlap_size ({}) must be smaller than chunk_size ({})",
                self.overlap_size, self.chunk_size
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(AgentError::ConfigError(format!(
                "min_chunk_size ({}) must not exceed chunk_size ({})",
                self.min_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A span of the preprocessed document. Offsets and counts are in code points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub index: usize,
    pub char_count: usize,
    pub word_count: usize,
}

/// Sentence-aware splitter producing overlapping, bounded chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Normalizes whitespace: line endings unified, each line's whitespace runs
    /// collapsed, empty lines dropped, lines joined with single spaces.
    pub fn preprocess(text: &str) -> String {
        text.replace("\r\n", "\n")
            .replace('\r', "\n")
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let text = Self::preprocess(text);
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len == 0 {
            return Vec::new();
        }

        if len <= self.config.chunk_size {
            return vec![make_chunk(&chars, 0, len, 0)];
        }

        let ChunkerConfig {
            chunk_size,
            overlap_size,
            min_chunk_size,
        } = self.config;

        let mut chunks: Vec<Chunk> = Vec::new();
        // Leading span too short to stand alone; prepended to the first full chunk.
        let mut carry: Option<(usize, usize)> = None;
        let mut start = 0;

        loop {
            let max_end = (start + chunk_size).min(len);
            let end = if max_end < len {
                find_breakpoint(&chars, start, max_end)
            } else {
                len
            };

            if let Some((from, to)) = trimmed_bounds(&chars, start, end) {
                if to - from >= min_chunk_size {
                    let from = carry.take().map_or(from, |(c, _)| c.min(from));
                    chunks.push(make_chunk(&chars, from, to, chunks.len()));
                } else if let Some(last) = chunks.last_mut() {
                    // Short fragments extend the previous chunk so no text is lost.
                    if to > last.end_offset {
                        *last = make_chunk(&chars, last.start_offset, to, last.index);
                    }
                } else {
                    carry = Some(carry.map_or((from, to), |(c, _)| (c.min(from), to)));
                }
            }

            if end >= len {
                break;
            }

            let mut next_start = end.saturating_sub(overlap_size);
            if next_start <= start {
                // Forced advance, capped at the breakpoint so nothing is skipped.
                next_start = (start + (chunk_size - overlap_size)).min(end);
            }
            if next_start >= len {
                break;
            }
            start = next_start;
        }

        if let Some((from, to)) = carry {
            chunks.push(make_chunk(&chars, from, to, 0));
        }

        log::debug!(
            "Split {} code points into {} chunks (size={}, overlap={}, min={})",
            len,
            chunks.len(),
            chunk_size,
            overlap_size,
            min_chunk_size
        );

        chunks
    }
}

/// Returns an exclusive end in `(start, max_end]`.
fn find_breakpoint(chars: &[char], start: usize, max_end: usize) -> usize {
    let search_from = max_end.saturating_sub(BREAKPOINT_SEARCH_WINDOW).max(start);

    for i in (search_from..max_end).rev() {
        if matches!(chars[i], '.' | '!' | '?') {
            let at_boundary = chars.get(i + 1).map_or(true, |c| c.is_whitespace());
            if at_boundary {
                return i + 1;
            }
        }
    }

    for i in (search_from..max_end).rev() {
        if i > start && chars[i].is_whitespace() {
            return i;
        }
    }

    max_end
}

fn trimmed_bounds(chars: &[char], start: usize, end: usize) -> Option<(usize, usize)> {
    let mut from = start;
    let mut to = end;
    while from < to && chars[from].is_whitespace() {
        from += 1;
    }
    while to > from && chars[to - 1].is_whitespace() {
        to -= 1;
    }
    (from < to).then_some((from, to))
}

fn make_chunk(chars: &[char], start: usize, end: usize, index: usize) -> Chunk {
    let text: String = chars[start..end].iter().collect();
    let word_count = text.split_whitespace().count();
    Chunk {
        char_count: end - start,
        text,
        start_offset: start,
        end_offset: end,
        index,
        word_count,
    }
}
