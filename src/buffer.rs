use std::ops::Range;

use ropey::Rope;

/// A line-addressable document backed by a rope.
///
/// Positions are char offsets into the whole document. Lines are
/// numbered from 1, matching the way editors report them.
#[derive(Debug, Clone, Default)]
pub struct DocumentBuffer {
    rope: Rope,
    revision: u64,
}

impl DocumentBuffer {
    /// Create a new buffer from a string.
    pub fn from_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            revision: 0,
        }
    }

    /// Replace the whole document, e.g. after reloading it from disk.
    pub fn replace_text(&mut self, text: &str) {
        self.rope = Rope::from_str(text);
        self.revision += 1;
    }

    /// Incremented on every mutation.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Total number of lines in the buffer.
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Total length of the document in chars.
    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    /// Text of the 1-based line `number`, without its line terminator.
    pub fn line(&self, number: usize) -> Option<String> {
        if number == 0 || number > self.rope.len_lines() {
            return None;
        }
        let s = self.rope.line(number - 1).to_string();
        Some(s.trim_end_matches('\n').trim_end_matches('\r').to_string())
    }

    /// The 1-based line containing char offset `pos`.
    ///
    /// Offsets past the end map to the last line.
    pub fn line_of(&self, pos: usize) -> usize {
        let pos = pos.min(self.rope.len_chars());
        self.rope.char_to_line(pos) + 1
    }

    /// Char offset of the first char of the 1-based line `number`.
    pub fn line_start(&self, number: usize) -> usize {
        let idx = number.saturating_sub(1).min(self.rope.len_lines());
        self.rope.line_to_char(idx)
    }

    /// Insert `text` at char offset `pos`.
    pub fn insert(&mut self, pos: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        let pos = pos.min(self.rope.len_chars());
        self.rope.insert(pos, text);
        self.revision += 1;
    }

    /// Remove the chars in `range`. Out-of-range ends are clamped.
    pub fn delete(&mut self, range: Range<usize>) {
        let len = self.rope.len_chars();
        let start = range.start.min(len);
        let end = range.end.min(len);
        if start >= end {
            return;
        }
        self.rope.remove(start..end);
        self.revision += 1;
    }

    /// The full text content of the buffer.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }
}
