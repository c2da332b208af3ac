//! The live (editable) view of a document.
//!
//! `LivePreview` plays the part of the editor: it owns the document
//! buffer, knows which lines are on screen, and keeps one placeholder per
//! mermaid block. Placeholders keep their identity across edits as long as
//! their block's text is unchanged; an edited block gets a new placeholder,
//! just like an editor re-creating a widget.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use crate::buffer::DocumentBuffer;
use crate::extract::{self, FencedBlock};
use crate::host;
use crate::render::RenderTarget;
use crate::theme::Appearance;

/// Stable identity of one placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

/// One diagram occurrence in the live view.
#[derive(Debug, Clone)]
pub struct DiagramBlockHandle {
    id: BlockId,
    block: FencedBlock,
    pos: usize,
    pub target: RenderTarget,
}

impl DiagramBlockHandle {
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Char offset of the block's opening fence in the document.
    pub const fn pos(&self) -> usize {
        self.pos
    }

    pub const fn start_line(&self) -> usize {
        self.block.start_line
    }

    /// Block text as the host last saw it.
    pub fn body(&self) -> &str {
        &self.block.body
    }

    fn intersects(&self, viewport: &RangeInclusive<usize>, line_count: usize) -> bool {
        self.block.start_line <= *viewport.end()
            && self.block.last_line(line_count) >= *viewport.start()
    }
}

/// What changed in a view since the last update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ViewUpdate {
    pub doc_changed: bool,
    pub viewport_changed: bool,
    pub geometry_changed: bool,
    pub appearance_changed: bool,
}

impl ViewUpdate {
    pub const fn doc() -> Self {
        Self {
            doc_changed: true,
            viewport_changed: false,
            geometry_changed: false,
            appearance_changed: false,
        }
    }

    pub const fn is_empty(&self) -> bool {
        !(self.doc_changed || self.viewport_changed || self.geometry_changed || self.appearance_changed)
    }
}

#[derive(Debug)]
pub struct LivePreview {
    buffer: DocumentBuffer,
    blocks: Vec<DiagramBlockHandle>,
    viewport: Option<RangeInclusive<usize>>,
    appearance: Appearance,
    next_id: u64,
}

impl LivePreview {
    pub fn new(text: &str, appearance: Appearance) -> Self {
        let mut view = Self {
            buffer: DocumentBuffer::from_text(text),
            blocks: Vec::new(),
            viewport: None,
            appearance,
            next_id: 0,
        };
        view.rebuild_blocks();
        view
    }

    pub const fn buffer(&self) -> &DocumentBuffer {
        &self.buffer
    }

    pub const fn appearance(&self) -> Appearance {
        self.appearance
    }

    /// All placeholders, in document order.
    pub fn placeholders(&self) -> &[DiagramBlockHandle] {
        &self.blocks
    }

    /// Lines currently on screen. `None` means the whole document.
    pub fn viewport(&self) -> RangeInclusive<usize> {
        self.viewport
            .clone()
            .unwrap_or(1..=self.buffer.line_count())
    }

    /// Apply an edit to the document.
    pub fn edit(&mut self, f: impl FnOnce(&mut DocumentBuffer)) -> ViewUpdate {
        let before = self.buffer.revision();
        f(&mut self.buffer);
        if self.buffer.revision() == before {
            return ViewUpdate::default();
        }
        self.rebuild_blocks();
        ViewUpdate::doc()
    }

    /// Replace the whole document, e.g. after it changed on disk.
    pub fn replace_text(&mut self, text: &str) -> ViewUpdate {
        if self.buffer.text() == text {
            return ViewUpdate::default();
        }
        self.edit(|buffer| buffer.replace_text(text))
    }

    /// Scroll so that `lines` are visible.
    pub fn set_viewport(&mut self, lines: RangeInclusive<usize>) -> ViewUpdate {
        if self.viewport.as_ref() == Some(&lines) {
            return ViewUpdate::default();
        }
        self.viewport = Some(lines);
        ViewUpdate {
            viewport_changed: true,
            ..ViewUpdate::default()
        }
    }

    pub fn set_appearance(&mut self, appearance: Appearance) -> ViewUpdate {
        if self.appearance == appearance {
            return ViewUpdate::default();
        }
        self.appearance = appearance;
        ViewUpdate {
            appearance_changed: true,
            ..ViewUpdate::default()
        }
    }

    /// The document together with the placeholders on screen, in document
    /// order.
    pub fn visible_blocks_mut(&mut self) -> (&DocumentBuffer, Vec<&mut DiagramBlockHandle>) {
        let viewport = self.viewport();
        let line_count = self.buffer.line_count();
        let visible = self
            .blocks
            .iter_mut()
            .filter(|h| h.intersects(&viewport, line_count))
            .collect();
        (&self.buffer, visible)
    }

    /// Render the document to HTML with each placeholder's current content.
    ///
    /// Placeholders are matched to code blocks by the line of their opening
    /// fence, since the markdown parser strips indentation and trailing
    /// blank lines from the body.
    pub fn to_html(&self) -> String {
        host::render_markdown_with(&self.buffer.text(), |code| {
            if code.lang != "mermaid" {
                return None;
            }
            let handle = self
                .blocks
                .iter()
                .find(|h| h.start_line() == code.line)?;
            Some(handle.target.to_html())
        })
    }

    /// Re-derive placeholders after a document change.
    ///
    /// A new block takes over the first unclaimed old placeholder with the
    /// same body; everything else gets a fresh one.
    fn rebuild_blocks(&mut self) {
        let mut previous: HashMap<String, Vec<DiagramBlockHandle>> = HashMap::new();
        for handle in self.blocks.drain(..).rev() {
            previous
                .entry(handle.block.body.clone())
                .or_default()
                .push(handle);
        }

        let found = extract::find_blocks(&self.buffer);
        let mut blocks = Vec::with_capacity(found.len());
        for block in found {
            let pos = self.buffer.line_start(block.start_line);
            let reused = previous.get_mut(&block.body).and_then(Vec::pop);
            let handle = match reused {
                Some(mut handle) => {
                    handle.block = block;
                    handle.pos = pos;
                    handle
                }
                None => {
                    let id = BlockId(self.next_id);
                    self.next_id += 1;
                    DiagramBlockHandle {
                        id,
                        target: RenderTarget::with_host_content(block.body.clone()),
                        block,
                        pos,
                    }
                }
            };
            blocks.push(handle);
        }

        let dropped: usize = previous.values().map(Vec::len).sum();
        if dropped > 0 {
            tracing::trace!(dropped, "placeholders removed");
        }
        self.blocks = blocks;
    }
}
