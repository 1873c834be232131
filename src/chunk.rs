//! Recursive character text splitter.
//!
//! Splits a document's text into overlapping windows of at most
//! `chunk_size` characters, preferring natural boundaries. Separators are
//! tried in priority order (paragraph, line, sentence, word):
//!
//! 1. Pick the first separator that occurs in the text.
//! 2. Split on it, keeping the separator at the start of the following
//!    piece so no characters are lost.
//! 3. Greedily merge pieces into windows up to `chunk_size`. When a window is
//!    flushed, pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain; those carry into the next window.
//! 4. A piece that is itself longer than `chunk_size` is split again with
//!    the remaining, finer separators. If none remain it is emitted whole.
//!
//! Windows are whitespace-trimmed and empty windows are dropped. Lengths
//! are counted in `char`s, not bytes.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.separators.clone(),
        )
    }

    /// Split `text` into windows.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split `text` and tag every window with `source`.
    pub fn split_document(&self, text: &str, source: &str) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .map(|window| Chunk::new(window, source))
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let pieces = split_keep_separator(text, separator);

        let mut windows = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                windows.extend(self.merge(&small));
                small.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    windows.push(trimmed.to_string());
                }
            } else {
                windows.extend(self.split_recursive(piece, finer));
            }
        }

        if !small.is_empty() {
            windows.extend(self.merge(&small));
        }
        windows
    }

    /// Greedy merge of small pieces into overlapping windows.
    ///
    /// Pieces already carry their separator, so they are joined with `""`.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_window(&mut windows, &current);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(dropped) => total -= char_len(dropped),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }

        push_window(&mut windows, &current);
        windows
    }
}

fn push_window(windows: &mut Vec<String>, current: &VecDeque<&str>) {
    let joined: String = current.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// First separator present in `text`, plus the finer separators after it.
/// Falls back to the last separator when none occur.
fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep.as_str()) {
            return (sep.as_str(), &separators[i + 1..]);
        }
    }
    match separators.last() {
        Some(last) => (last.as_str(), &[]),
        None => ("", &[]),
    }
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. Concatenating the result reproduces `text`.
fn split_keep_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::from_config(&ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            ..ChunkingConfig::default()
        })
    }

    #[test]
    fn small_text_single_window() {
        let windows = splitter(2000, 500).split_text("Hello, world!");
        assert_eq!(windows, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_windows() {
        assert!(splitter(2000, 500).split_text("").is_empty());
        assert!(splitter(2000, 500).split_text("  \n\n  ").is_empty());
    }

    #[test]
    fn separator_pieces_reconstruct_text() {
        let text = "alpha beta\n\ngamma.\ndelta";
        let pieces = split_keep_separator(text, "\n\n");
        assert_eq!(pieces, vec!["alpha beta", "\n\ngamma.\ndelta"]);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn windows_respect_chunk_size() {
        let text = (0..200)
            .map(|i| format!("Code {} is billable once per day.", 10000 + i))
            .collect::<Vec<_>>()
            .join(" ");
        let windows = splitter(120, 30).split_text(&text);
        assert!(windows.len() > 1);
        for w in &windows {
            assert!(char_len(w) <= 120, "window too long: {}", char_len(w));
        }
    }

    #[test]
    fn paragraph_boundaries_preferred() {
        let text = "First paragraph about wastage.\n\nSecond paragraph about units.";
        let windows = splitter(40, 0).split_text(text);
        assert_eq!(
            windows,
            vec![
                "First paragraph about wastage.".to_string(),
                "Second paragraph about units.".to_string()
            ]
        );
    }

    #[test]
    fn adjacent_windows_overlap() {
        let words: Vec<String> = (0..60).map(|i| format!("w{:02}", i)).collect();
        let text = words.join(" ");
        let windows = splitter(50, 20).split_text(&text);
        assert!(windows.len() > 2);
        for pair in windows.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected '{}' carried into next window",
                last_word
            );
        }
    }

    #[test]
    fn overlap_removed_reconstructs_words() {
        let words: Vec<String> = (0..80).map(|i| format!("t{}", i)).collect();
        let text = words.join(" ");
        let windows = splitter(64, 16).split_text(&text);

        let mut rebuilt: Vec<String> = Vec::new();
        for w in &windows {
            for word in w.split_whitespace() {
                if !rebuilt.iter().rev().take(16).any(|seen| seen == word) {
                    rebuilt.push(word.to_string());
                }
            }
        }
        assert_eq!(rebuilt, words);
    }

    #[test]
    fn unsplittable_piece_emitted_whole() {
        let long_word = "x".repeat(50);
        let windows = splitter(10, 2).split_text(&long_word);
        assert_eq!(windows, vec![long_word]);
    }

    #[test]
    fn multibyte_text_is_safe() {
        let text = "é".repeat(30) + " " + &"ü".repeat(30);
        let windows = splitter(32, 4).split_text(&text);
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn document_chunks_carry_source() {
        let chunks = splitter(2000, 500).split_document("Modifier 59 rules.", "lcd.pdf");
        assert_eq!(chunks, vec![Chunk::new("Modifier 59 rules.", "lcd.pdf")]);
    }
}
