//! Keeps rendered diagrams in a live view in step with the document and
//! the settings.
//!
//! Every placeholder remembers the fingerprint it was last rendered with.
//! A pass re-renders only placeholders whose fingerprint is missing or
//! stale, so typing elsewhere in the document costs nothing.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::extract::{ClosingFence, extract_source_at};
use crate::live::{BlockId, LivePreview, ViewUpdate};
use crate::render::Dispatcher;
use crate::settings::RenderFingerprint;

/// Hooks the host calls for a live view.
pub trait EditorExtension {
    /// The view was opened.
    fn attach(&mut self, view: &mut LivePreview);

    /// The view changed.
    fn update(&mut self, view: &mut LivePreview, update: &ViewUpdate);
}

#[derive(Debug)]
pub struct MermaidSync {
    dispatcher: Rc<RefCell<Dispatcher>>,
    rendered: HashMap<BlockId, RenderFingerprint>,
    render_count: usize,
}

impl MermaidSync {
    pub fn new(dispatcher: Rc<RefCell<Dispatcher>>) -> Self {
        Self {
            dispatcher,
            rendered: HashMap::new(),
            render_count: 0,
        }
    }

    /// Total renders performed since creation.
    pub const fn render_count(&self) -> usize {
        self.render_count
    }

    /// Fingerprint `id` was last rendered with.
    pub fn fingerprint_of(&self, id: BlockId) -> Option<&RenderFingerprint> {
        self.rendered.get(&id)
    }

    /// React to a view update. Returns how many placeholders were rendered.
    pub fn on_update(&mut self, view: &mut LivePreview, update: &ViewUpdate) -> usize {
        if update.appearance_changed {
            tracing::debug!(appearance = %view.appearance(), "appearance changed, relayout");
        }
        if update.is_empty() {
            return 0;
        }
        self.process(view)
    }

    /// Render every visible placeholder whose fingerprint is stale.
    ///
    /// Source is re-read from the document at the placeholder's position.
    /// Returns how many placeholders were rendered.
    pub fn process(&mut self, view: &mut LivePreview) -> usize {
        let appearance = view.appearance();
        let dispatcher = self.dispatcher.borrow();
        let fingerprint = dispatcher.settings().fingerprint(appearance);

        let live: HashSet<BlockId> = view.placeholders().iter().map(|h| h.id()).collect();
        self.rendered.retain(|id, _| live.contains(id));

        let (buffer, visible) = view.visible_blocks_mut();
        let mut rendered = 0;
        for handle in visible {
            if self.rendered.get(&handle.id()) == Some(&fingerprint) {
                continue;
            }

            let Some(source) = extract_source_at(buffer, handle.pos(), ClosingFence::Required)
            else {
                tracing::trace!(id = ?handle.id(), "no mermaid source at placeholder");
                continue;
            };

            dispatcher.render_into(&source, &mut handle.target, appearance);
            self.rendered.insert(handle.id(), fingerprint.clone());
            rendered += 1;
        }

        if rendered > 0 {
            tracing::debug!(rendered, %fingerprint, "live diagrams rendered");
        }
        self.render_count += rendered;
        rendered
    }
}

impl EditorExtension for MermaidSync {
    fn attach(&mut self, view: &mut LivePreview) {
        self.process(view);
    }

    fn update(&mut self, view: &mut LivePreview, update: &ViewUpdate) {
        self.on_update(view, update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::RenderMode;
    use crate::render::RenderOutput;
    use crate::render::tests::RecordingRenderer;
    use crate::settings::Settings;
    use crate::theme::Appearance;

    const DOC: &str = "# Notes\n\n```mermaid\nA-->B\n```\n\nprose\n\n```mermaid\n%% ascii\nC-->D\n```\n";

    type Fixture = (
        MermaidSync,
        LivePreview,
        Rc<RecordingRenderer>,
        Rc<RefCell<Dispatcher>>,
    );

    fn setup(doc: &str) -> Fixture {
        let renderer = Rc::new(RecordingRenderer::default());
        let dispatcher = Rc::new(RefCell::new(Dispatcher::new(
            Settings::default(),
            renderer.clone(),
        )));
        let sync = MermaidSync::new(dispatcher.clone());
        let view = LivePreview::new(doc, Appearance::Light);
        (sync, view, renderer, dispatcher)
    }

    #[test]
    fn test_attach_renders_visible_blocks() {
        let (mut sync, mut view, renderer, _) = setup(DOC);
        sync.attach(&mut view);

        assert_eq!(renderer.svg_calls.borrow().len(), 1);
        assert_eq!(renderer.ascii_calls.borrow()[0].0, "C-->D");
        let outputs: Vec<_> = view
            .placeholders()
            .iter()
            .map(|h| h.target.output().cloned())
            .collect();
        assert!(matches!(outputs[0], Some(RenderOutput::Svg { .. })));
        assert!(matches!(outputs[1], Some(RenderOutput::Ascii { .. })));
    }

    #[test]
    fn test_second_pass_is_a_noop() {
        let (mut sync, mut view, renderer, _) = setup(DOC);
        assert_eq!(sync.process(&mut view), 2);
        assert_eq!(sync.process(&mut view), 0);
        assert_eq!(renderer.total_calls(), 2);
        assert_eq!(sync.render_count(), 2);
    }

    #[test]
    fn test_edit_outside_blocks_renders_nothing() {
        let (mut sync, mut view, renderer, _) = setup(DOC);
        sync.attach(&mut view);

        let pos = view.buffer().line_start(7);
        let update = view.edit(|b| b.insert(pos, "more "));
        assert_eq!(sync.on_update(&mut view, &update), 0);
        assert_eq!(renderer.total_calls(), 2);
    }

    #[test]
    fn test_edited_block_is_rerendered_from_document() {
        let (mut sync, mut view, renderer, _) = setup(DOC);
        sync.attach(&mut view);

        let pos = view.buffer().line_start(4) + 5;
        let update = view.edit(|b| b.insert(pos, "\nB-->E"));
        assert_eq!(sync.on_update(&mut view, &update), 1);

        let calls = renderer.svg_calls.borrow();
        assert_eq!(calls.last().unwrap().0, "A-->B\nB-->E");
    }

    #[test]
    fn test_settings_change_rerenders_everything_once() {
        let (mut sync, mut view, renderer, dispatcher) = setup(DOC);
        sync.attach(&mut view);

        dispatcher.borrow_mut().set_settings(Settings {
            font: "Mono".to_string(),
            ..Settings::default()
        });
        let update = ViewUpdate {
            geometry_changed: true,
            ..ViewUpdate::default()
        };
        assert_eq!(sync.on_update(&mut view, &update), 2);
        assert_eq!(sync.on_update(&mut view, &update), 0);
        assert_eq!(renderer.total_calls(), 4);
    }

    #[test]
    fn test_appearance_toggle_relayouts_with_other_theme() {
        let (mut sync, mut view, renderer, _) = setup(DOC);
        sync.attach(&mut view);

        let update = view.set_appearance(Appearance::Dark);
        assert_eq!(sync.on_update(&mut view, &update), 2);
        let calls = renderer.svg_calls.borrow();
        assert_eq!(calls.last().unwrap().1.colors.bg.as_deref(), Some("#1e1e2e"));
    }

    #[test]
    fn test_appearance_toggle_with_shared_theme_is_a_noop() {
        let (mut sync, mut view, _, dispatcher) = setup(DOC);
        dispatcher.borrow_mut().set_settings(Settings {
            theme_light: "nord".to_string(),
            theme_dark: "nord".to_string(),
            ..Settings::default()
        });
        sync.attach(&mut view);

        let update = view.set_appearance(Appearance::Dark);
        assert_eq!(sync.on_update(&mut view, &update), 0);
    }

    #[test]
    fn test_offscreen_blocks_render_when_scrolled_into_view() {
        let (mut sync, mut view, _, _) = setup(DOC);
        view.set_viewport(1..=6);
        assert_eq!(sync.process(&mut view), 1);
        assert!(view.placeholders()[1].target.output().is_none());

        let update = view.set_viewport(8..=12);
        assert_eq!(sync.on_update(&mut view, &update), 1);
        assert!(view.placeholders()[1].target.output().is_some());
    }

    #[test]
    fn test_unterminated_block_is_left_to_host() {
        let (mut sync, mut view, renderer, _) = setup("```mermaid\nA-->B\n");
        assert_eq!(sync.process(&mut view), 0);
        assert_eq!(renderer.total_calls(), 0);
        assert_eq!(view.placeholders()[0].target.host_content(), Some("A-->B\n"));
    }

    #[test]
    fn test_removed_blocks_are_forgotten() {
        let (mut sync, mut view, _, _) = setup(DOC);
        sync.attach(&mut view);
        let first = view.placeholders()[0].id();
        assert!(sync.fingerprint_of(first).is_some());

        let update = view.replace_text("no diagrams left");
        sync.on_update(&mut view, &update);
        assert!(sync.fingerprint_of(first).is_none());
    }

    #[test]
    fn test_stamped_fingerprint_matches_settings() {
        let (mut sync, mut view, _, dispatcher) = setup(DOC);
        sync.attach(&mut view);
        let id = view.placeholders()[0].id();
        let expected = dispatcher.borrow().settings().fingerprint(Appearance::Light);
        assert_eq!(sync.fingerprint_of(id), Some(&expected));
    }

    #[test]
    fn test_failed_render_is_not_retried_until_something_changes() {
        let renderer = Rc::new(RecordingRenderer::failing("boom"));
        let dispatcher = Rc::new(RefCell::new(Dispatcher::new(
            Settings {
                default_mode: RenderMode::Svg,
                ..Settings::default()
            },
            renderer.clone(),
        )));
        let mut sync = MermaidSync::new(dispatcher);
        let mut view = LivePreview::new("```mermaid\nA-->\n```", Appearance::Light);

        assert_eq!(sync.process(&mut view), 1);
        assert_eq!(sync.process(&mut view), 0);
        assert!(view.placeholders()[0].target.output().unwrap().is_error());
    }

    #[test]
    fn test_rendered_diagrams_reach_the_html_snapshot() {
        for doc in [
            "```mermaid\nA-->B\n```\n",
            "```mermaid\nA-->B\n\n```\n",
            "  ```mermaid\n  A-->B\n  ```\n",
        ] {
            let (mut sync, mut view, _, _) = setup(doc);
            assert_eq!(sync.process(&mut view), 1, "{doc:?}");
            let html = view.to_html();
            assert!(
                html.contains(r#"<div class="mermaid-lens-container"><svg>"#),
                "{doc:?}: {html}"
            );
            assert!(!html.contains("language-mermaid"), "{doc:?}: {html}");
        }
    }
}
