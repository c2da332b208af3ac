// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. render::RenderTarget)
    clippy::module_name_repetitions
)]

//! # mermaid-lens
//!
//! Themed re-rendering of mermaid diagrams embedded in markdown.
//!
//! Every fenced `mermaid` block is rendered either as a themed SVG or as
//! Unicode box-drawing text, chosen per block by a `%% ascii` / `%% svg`
//! directive on its first line. Two views are supported:
//! - **Reading view**: the whole document is rendered to HTML once
//! - **Live view**: an editable document whose diagrams are kept in step
//!   with edits, settings and the light/dark appearance, re-rendering only
//!   what actually changed
//!
//! ## Modules
//!
//! - [`directive`]: Per-block render mode directive
//! - [`buffer`] / [`extract`]: Document buffer and fenced block lookup
//! - [`theme`] / [`appearance`]: Palettes and light/dark detection
//! - [`settings`]: Persisted preferences and render fingerprints
//! - [`render`]: Render dispatch into targets
//! - [`mermaid`]: Production SVG and text backend
//! - [`host`]: Plugin lifecycle and the reading view
//! - [`live`] / [`sync`]: Live view and its diagram synchronizer
//! - [`watcher`] / [`session`]: File watching and the live session
//! - [`export`]: Saving and copying diagrams

pub mod appearance;
pub mod buffer;
pub mod directive;
pub mod export;
pub mod extract;
pub mod host;
pub mod live;
pub mod mermaid;
pub mod render;
pub mod session;
pub mod settings;
pub mod sync;
pub mod theme;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::directive::{RenderMode, extract_mode_directive};
    pub use crate::extract::{ClosingFence, extract_source_at};
    pub use crate::host::{Host, MermaidPlugin, Plugin};
    pub use crate::live::LivePreview;
    pub use crate::render::{DiagramRenderer, Dispatcher, RenderOutput, RenderTarget};
    pub use crate::settings::{Settings, SettingsStore};
    pub use crate::sync::MermaidSync;
    pub use crate::theme::Appearance;
}
