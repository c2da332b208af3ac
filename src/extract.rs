//! Recover mermaid source text from a live document.
//!
//! The live view only knows where a diagram placeholder sits in the
//! document, so the diagram body is re-read from the buffer on every pass
//! instead of being cached.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::buffer::DocumentBuffer;

/// Opening fence, matched against the line with leading whitespace removed.
static OPEN_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```+\s*mermaid\s*$").unwrap());

/// Closing fence, matched against the raw line.
static CLOSE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```+\s*$").unwrap());

/// Whether a block must be terminated by a closing fence to count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClosingFence {
    /// Lines up to the end of the document are taken as the body.
    #[default]
    Optional,
    /// An unterminated block yields no source.
    Required,
}

/// A mermaid fenced block found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// 1-based line of the opening fence.
    pub start_line: usize,
    /// 1-based line of the closing fence, if the block is terminated.
    pub end_line: Option<usize>,
    /// Body lines joined with `\n`, verbatim.
    pub body: String,
}

impl FencedBlock {
    /// Last line that belongs to the block.
    pub fn last_line(&self, line_count: usize) -> usize {
        self.end_line.unwrap_or(line_count)
    }
}

pub fn is_open_fence(line: &str) -> bool {
    OPEN_FENCE.is_match(line.trim_start())
}

pub fn is_close_fence(line: &str) -> bool {
    CLOSE_FENCE.is_match(line)
}

fn is_any_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Extract the body of the mermaid block containing char offset `pos`.
///
/// Returns `None` when `pos` is not inside a mermaid block or the body is
/// blank.
pub fn extract_source_at(
    buffer: &DocumentBuffer,
    pos: usize,
    closing: ClosingFence,
) -> Option<String> {
    let start = buffer.line_of(pos);
    let open = find_opening_fence(buffer, start)?;

    let mut body = Vec::new();
    let mut terminated = false;
    for number in open + 1..=buffer.line_count() {
        let text = buffer.line(number)?;
        if is_close_fence(&text) {
            terminated = true;
            break;
        }
        body.push(text);
    }

    if !terminated && closing == ClosingFence::Required {
        return None;
    }

    let source = body.join("\n");
    if source.trim().is_empty() {
        None
    } else {
        Some(source)
    }
}

/// Walk backward from `start` to line 1 looking for a mermaid opener.
///
/// Crossing any other fence means `start` lies outside a mermaid block.
/// The starting line itself may be the block's closing fence.
fn find_opening_fence(buffer: &DocumentBuffer, start: usize) -> Option<usize> {
    for number in (1..=start).rev() {
        let text = buffer.line(number)?;
        if is_open_fence(&text) {
            return Some(number);
        }
        if !is_any_fence(&text) {
            continue;
        }
        if number < start || !is_close_fence(&text) {
            return None;
        }
    }
    None
}

/// Enumerate every mermaid block in document order.
///
/// Fenced blocks in other languages are skipped whole, so a mermaid fence
/// quoted inside them is not picked up.
pub fn find_blocks(buffer: &DocumentBuffer) -> Vec<FencedBlock> {
    let line_count = buffer.line_count();
    let mut blocks = Vec::new();
    let mut number = 1;

    while number <= line_count {
        let Some(text) = buffer.line(number) else {
            break;
        };

        if is_open_fence(&text) {
            let start_line = number;
            let mut body = Vec::new();
            let mut end_line = None;
            number += 1;
            while number <= line_count {
                let line = buffer.line(number).unwrap_or_default();
                if is_close_fence(&line) {
                    end_line = Some(number);
                    break;
                }
                body.push(line);
                number += 1;
            }
            blocks.push(FencedBlock {
                start_line,
                end_line,
                body: body.join("\n"),
            });
        } else if is_any_fence(&text) {
            number += 1;
            while number <= line_count {
                if buffer.line(number).is_some_and(|l| is_close_fence(&l)) {
                    break;
                }
                number += 1;
            }
        }
        number += 1;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(text: &str) -> DocumentBuffer {
        DocumentBuffer::from_text(text)
    }

    #[test]
    fn test_extracts_body_anywhere_inside_block() {
        let buf = buffer("```mermaid\nA-->B\n```");
        for pos in 0..buf.len_chars() {
            assert_eq!(
                extract_source_at(&buf, pos, ClosingFence::Optional).as_deref(),
                Some("A-->B"),
                "pos {pos}"
            );
        }
    }

    #[test]
    fn test_extracts_from_middle_of_document() {
        let text = "# Title\n\nSome prose.\n\n  ```mermaid  \ngraph TD\n  A-->B\n```\n\nAfter.";
        let buf = buffer(text);
        let pos = buf.line_start(7) + 2;
        assert_eq!(
            extract_source_at(&buf, pos, ClosingFence::Required).as_deref(),
            Some("graph TD\n  A-->B")
        );
    }

    #[test]
    fn test_longer_fences_are_accepted() {
        let buf = buffer("````mermaid\nA-->B\n````");
        assert_eq!(
            extract_source_at(&buf, 14, ClosingFence::Required).as_deref(),
            Some("A-->B")
        );
    }

    #[test]
    fn test_unknown_language_yields_none() {
        let buf = buffer("```python\nprint('hi')\n```");
        let pos = buf.line_start(2);
        assert_eq!(extract_source_at(&buf, pos, ClosingFence::Optional), None);
    }

    #[test]
    fn test_unknown_language_after_mermaid_block_yields_none() {
        let buf = buffer("```mermaid\nA-->B\n```\n```python\nx = 1\n```");
        let pos = buf.line_start(5);
        assert_eq!(extract_source_at(&buf, pos, ClosingFence::Optional), None);
    }

    #[test]
    fn test_prose_after_block_yields_none() {
        let buf = buffer("```mermaid\nA-->B\n```\nplain text");
        let pos = buf.line_start(4);
        assert_eq!(extract_source_at(&buf, pos, ClosingFence::Optional), None);
    }

    #[test]
    fn test_no_opening_fence_yields_none() {
        let buf = buffer("graph TD\nA-->B");
        assert_eq!(extract_source_at(&buf, 3, ClosingFence::Optional), None);
    }

    #[test]
    fn test_unterminated_block_depends_on_closing_policy() {
        let buf = buffer("```mermaid\nA-->B\nB-->C");
        let pos = buf.line_start(2);
        assert_eq!(
            extract_source_at(&buf, pos, ClosingFence::Optional).as_deref(),
            Some("A-->B\nB-->C")
        );
        assert_eq!(extract_source_at(&buf, pos, ClosingFence::Required), None);
    }

    #[test]
    fn test_blank_body_yields_none() {
        let buf = buffer("```mermaid\n   \n\n```");
        assert_eq!(extract_source_at(&buf, 0, ClosingFence::Optional), None);
    }

    #[test]
    fn test_body_lines_are_verbatim() {
        let buf = buffer("```mermaid\n%% ascii\n    A --> B   \n```");
        assert_eq!(
            extract_source_at(&buf, 0, ClosingFence::Required).as_deref(),
            Some("%% ascii\n    A --> B   ")
        );
    }

    #[test]
    fn test_find_blocks_in_order() {
        let text = "intro\n```mermaid\nA-->B\n```\n```rust\n```mermaid\n```\n```mermaid\nC-->D";
        let blocks = find_blocks(&buffer(text));
        assert_eq!(
            blocks,
            vec![
                FencedBlock {
                    start_line: 2,
                    end_line: Some(4),
                    body: "A-->B".to_string(),
                },
                FencedBlock {
                    start_line: 8,
                    end_line: None,
                    body: "C-->D".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_fence_predicates() {
        assert!(is_open_fence("```mermaid"));
        assert!(is_open_fence("   ``` mermaid  "));
        assert!(!is_open_fence("```mermaidjs"));
        assert!(!is_open_fence("```python"));
        assert!(is_close_fence("  ```  "));
        assert!(!is_close_fence("```mermaid"));
    }
}
