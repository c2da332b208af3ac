//! The markdown host: plugin lifecycle, code block processors and the
//! static (reading) view.

use std::cell::RefCell;
use std::rc::Rc;

use comrak::nodes::{NodeHtmlBlock, NodeValue};
use comrak::{Arena, Options, format_html, parse_document};

use crate::live::{LivePreview, ViewUpdate};
use crate::render::{Dispatcher, RenderTarget};
use crate::settings::Settings;
use crate::sync::{EditorExtension, MermaidSync};
use crate::theme::Appearance;

/// Renders one fenced code block into a target.
pub type CodeBlockProcessor = Box<dyn Fn(&str, &mut RenderTarget, Appearance)>;

/// Priority the mermaid processor registers with, so it wins over the
/// host's built-in handling.
pub const MERMAID_PROCESSOR_PRIORITY: i32 = -100;

pub trait Plugin {
    fn name(&self) -> &str;

    /// Register processors and extensions.
    fn on_load(&mut self, ctx: &mut HostContext);

    fn on_unload(&mut self) {}

    fn on_settings_changed(&mut self, _settings: &Settings) {}
}

struct RegisteredProcessor {
    lang: String,
    priority: i32,
    processor: CodeBlockProcessor,
}

/// Registration surface handed to plugins while they load.
#[derive(Default)]
pub struct HostContext {
    processors: Vec<RegisteredProcessor>,
    extensions: Vec<Box<dyn EditorExtension>>,
}

impl HostContext {
    /// Register `processor` for fenced blocks tagged `lang`.
    ///
    /// The lowest priority number wins; ties go to the earliest
    /// registration.
    pub fn register_code_block_processor(
        &mut self,
        lang: impl Into<String>,
        priority: i32,
        processor: CodeBlockProcessor,
    ) {
        let lang = lang.into();
        tracing::debug!(%lang, priority, "code block processor registered");
        self.processors.push(RegisteredProcessor {
            lang,
            priority,
            processor,
        });
    }

    pub fn register_editor_extension(&mut self, extension: Box<dyn EditorExtension>) {
        self.extensions.push(extension);
    }

    fn processor_for(&self, lang: &str) -> Option<&CodeBlockProcessor> {
        self.processors
            .iter()
            .filter(|p| p.lang == lang)
            .min_by_key(|p| p.priority)
            .map(|p| &p.processor)
    }

    fn clear(&mut self) {
        self.processors.clear();
        self.extensions.clear();
    }
}

pub struct Host {
    appearance: Appearance,
    plugins: Vec<Box<dyn Plugin>>,
    context: HostContext,
}

impl Host {
    pub fn new(appearance: Appearance) -> Self {
        Self {
            appearance,
            plugins: Vec::new(),
            context: HostContext::default(),
        }
    }

    pub const fn appearance(&self) -> Appearance {
        self.appearance
    }

    pub fn set_appearance(&mut self, appearance: Appearance) {
        self.appearance = appearance;
    }

    pub fn load(&mut self, mut plugin: Box<dyn Plugin>) {
        plugin.on_load(&mut self.context);
        tracing::info!(plugin = plugin.name(), "plugin loaded");
        self.plugins.push(plugin);
    }

    /// Unload every plugin, newest first, and drop their registrations.
    pub fn unload(&mut self) {
        while let Some(mut plugin) = self.plugins.pop() {
            plugin.on_unload();
            tracing::info!(plugin = plugin.name(), "plugin unloaded");
        }
        self.context.clear();
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        for plugin in &mut self.plugins {
            plugin.on_settings_changed(settings);
        }
    }

    /// Render a markdown document for the reading view.
    pub fn render_markdown(&self, markdown: &str) -> String {
        render_markdown_with(markdown, |code| {
            let processor = self.context.processor_for(code.lang)?;
            let mut target = RenderTarget::with_host_content(code.body);
            processor(code.body, &mut target, self.appearance);
            Some(target.to_html())
        })
    }

    /// Open a live view and let every editor extension attach to it.
    pub fn open_live(&mut self, text: &str) -> LivePreview {
        let mut view = LivePreview::new(text, self.appearance);
        for extension in &mut self.context.extensions {
            extension.attach(&mut view);
        }
        view
    }

    pub fn dispatch_update(&mut self, view: &mut LivePreview, update: &ViewUpdate) {
        if update.is_empty() {
            return;
        }
        for extension in &mut self.context.extensions {
            extension.update(view, update);
        }
    }
}

/// Renders mermaid blocks through a shared dispatcher in both views.
pub struct MermaidPlugin {
    dispatcher: Rc<RefCell<Dispatcher>>,
    show_source: bool,
    zoom: bool,
}

impl MermaidPlugin {
    pub fn new(dispatcher: Rc<RefCell<Dispatcher>>) -> Self {
        Self {
            dispatcher,
            show_source: false,
            zoom: false,
        }
    }

    /// Append a collapsible source view below each rendered diagram.
    #[must_use]
    pub const fn with_source_toggle(mut self, show_source: bool) -> Self {
        self.show_source = show_source;
        self
    }

    /// Open rendered diagrams enlarged in a modal when clicked.
    #[must_use]
    pub const fn with_zoom(mut self, zoom: bool) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn dispatcher(&self) -> Rc<RefCell<Dispatcher>> {
        Rc::clone(&self.dispatcher)
    }
}

impl Plugin for MermaidPlugin {
    fn name(&self) -> &'static str {
        "mermaid-lens"
    }

    fn on_load(&mut self, ctx: &mut HostContext) {
        let dispatcher = Rc::clone(&self.dispatcher);
        let show_source = self.show_source;
        let zoom = self.zoom;
        ctx.register_code_block_processor(
            "mermaid",
            MERMAID_PROCESSOR_PRIORITY,
            Box::new(move |source: &str, target: &mut RenderTarget, appearance: Appearance| {
                dispatcher.borrow().render_into(source, target, appearance);
                if show_source {
                    target.attach_source(source);
                }
                if zoom {
                    target.enable_zoom();
                }
            }),
        );
        ctx.register_editor_extension(Box::new(MermaidSync::new(Rc::clone(&self.dispatcher))));
    }

    fn on_settings_changed(&mut self, settings: &Settings) {
        self.dispatcher.borrow_mut().set_settings(settings.clone());
    }
}

fn markdown_options() -> Options {
    let mut options = Options::default();

    // Enable GFM extensions
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;
    options.extension.superscript = true;
    options.extension.subscript = true;
    options.extension.description_lists = true;

    // Processor output is spliced in as raw HTML
    options.render.unsafe_ = true;

    options
}

/// A fenced code block as the reading view sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FencedCode<'a> {
    /// First word of the info string.
    pub lang: &'a str,
    /// Body without its final newline, indentation already stripped.
    pub body: &'a str,
    /// 1-based line of the opening fence.
    pub line: usize,
}

/// Render markdown to HTML, offering every fenced code block to `processor`.
///
/// Returning `Some(html)` replaces the block; `None` leaves it to the
/// default code block rendering.
pub fn render_markdown_with(
    markdown: &str,
    mut processor: impl FnMut(&FencedCode<'_>) -> Option<String>,
) -> String {
    let arena = Arena::new();
    let options = markdown_options();
    let root = parse_document(&arena, markdown, &options);

    for node in root.descendants() {
        let replacement = {
            let ast = node.data.borrow();
            match &ast.value {
                NodeValue::CodeBlock(block) if block.fenced => processor(&FencedCode {
                    lang: block.info.split_whitespace().next().unwrap_or_default(),
                    body: block.literal.strip_suffix('\n').unwrap_or(&block.literal),
                    line: ast.sourcepos.start.line,
                }),
                _ => None,
            }
        };
        if let Some(html) = replacement {
            node.data.borrow_mut().value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 6,
                literal: format!("{html}\n"),
            });
        }
    }

    let mut html = Vec::new();
    if let Err(err) = format_html(root, &options, &mut html) {
        tracing::warn!("failed to format markdown: {err}");
    }
    String::from_utf8_lossy(&html).into_owned()
}
