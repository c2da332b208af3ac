//! Render dispatch: pick SVG or text output for a diagram and write the
//! result (or an inline error) into a render target.

use std::fmt::Write as _;
use std::rc::Rc;

use thiserror::Error;

use crate::directive::{RenderMode, extract_mode_directive};
use crate::settings::Settings;
use crate::theme::{self, Appearance, ThemeColors};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Diagram(String),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("renderer produced no output")]
    Empty,

    #[error("failed to rasterize SVG: {0}")]
    Rasterize(String),
}

/// Options for SVG output. Colour roles left unset use renderer defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SvgOptions {
    pub colors: ThemeColors,
    pub font: Option<String>,
    pub transparent: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    #[default]
    None,
    Ansi,
}

/// Options for text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsciiOptions {
    pub color_mode: ColorMode,
    /// Plain ASCII instead of Unicode box-drawing characters.
    pub use_ascii: bool,
}

impl Default for AsciiOptions {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::None,
            use_ascii: false,
        }
    }
}

/// The diagram rendering library, consumed as two functions.
pub trait DiagramRenderer {
    /// Render `source` to SVG markup.
    ///
    /// # Errors
    ///
    /// Returns an error if the diagram is malformed or the backend fails.
    fn render_svg(&self, source: &str, options: &SvgOptions) -> Result<String, RenderError>;

    /// Render `source` to Unicode (or ASCII) text.
    ///
    /// # Errors
    ///
    /// Returns an error if the diagram is malformed or the backend fails.
    fn render_ascii(&self, source: &str, options: &AsciiOptions) -> Result<String, RenderError>;
}

const CLASS_PREFIX: &str = "mermaid-lens";

/// What a render pass left in a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    Svg { markup: String },
    Ascii { text: String, transparent: bool },
    Error { mode: RenderMode, message: String },
}

impl RenderOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn svg_markup(&self) -> Option<&str> {
        match self {
            Self::Svg { markup } => Some(markup),
            _ => None,
        }
    }
}

/// A surface a diagram is rendered into.
///
/// Until the first render it holds whatever the host put there (the raw
/// code block); rendering clears that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTarget {
    host_content: Option<String>,
    output: Option<RenderOutput>,
    source_view: Option<String>,
    zoomable: bool,
}

impl RenderTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// A target pre-filled by the host with its own rendering of `source`.
    pub fn with_host_content(source: impl Into<String>) -> Self {
        Self {
            host_content: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        self.host_content = None;
        self.output = None;
        self.source_view = None;
        self.zoomable = false;
    }

    /// Offer the diagram source behind a collapsible toggle.
    pub fn attach_source(&mut self, source: impl Into<String>) {
        self.source_view = Some(source.into());
    }

    /// Let a click on a rendered diagram open it enlarged in a modal.
    /// Error messages and host content are never zoomable.
    pub fn enable_zoom(&mut self) {
        self.zoomable = true;
    }

    pub const fn output(&self) -> Option<&RenderOutput> {
        self.output.as_ref()
    }

    pub fn host_content(&self) -> Option<&str> {
        self.host_content.as_deref()
    }

    pub const fn is_empty(&self) -> bool {
        self.host_content.is_none() && self.output.is_none()
    }

    /// HTML markup for the target's current content.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        match &self.output {
            Some(output @ (RenderOutput::Svg { .. } | RenderOutput::Ascii { .. })) => {
                let diagram = diagram_html(output);
                if self.zoomable {
                    let _ = write!(
                        html,
                        r#"<details class="{CLASS_PREFIX}-zoom"><summary title="Zoom">{diagram}</summary><div class="{CLASS_PREFIX}-zoom-modal">{diagram}</div></details>"#
                    );
                } else {
                    html.push_str(&diagram);
                }
            }
            Some(RenderOutput::Error { mode, message }) => {
                let container = match mode {
                    RenderMode::Svg => "container",
                    RenderMode::Ascii => "ascii",
                };
                let _ = write!(
                    html,
                    r#"<div class="{CLASS_PREFIX}-{container}"><div class="{CLASS_PREFIX}-error">{}</div></div>"#,
                    html_escape::encode_text(message)
                );
            }
            None => {
                if let Some(source) = &self.host_content {
                    let _ = write!(
                        html,
                        r#"<pre><code class="language-mermaid">{}</code></pre>"#,
                        html_escape::encode_text(source)
                    );
                }
            }
        }
        if let Some(source) = &self.source_view {
            let _ = write!(
                html,
                r#"<details class="{CLASS_PREFIX}-source"><summary>Source</summary><pre><code class="language-mermaid">{}</code></pre></details>"#,
                html_escape::encode_text(source)
            );
        }
        html
    }
}

fn diagram_html(output: &RenderOutput) -> String {
    match output {
        RenderOutput::Svg { markup } => {
            format!(r#"<div class="{CLASS_PREFIX}-container">{markup}</div>"#)
        }
        RenderOutput::Ascii { text, transparent } => {
            let modifier = if *transparent {
                format!(" {CLASS_PREFIX}-transparent")
            } else {
                String::new()
            };
            format!(
                r#"<div class="{CLASS_PREFIX}-ascii"><pre class="{CLASS_PREFIX}-ascii-pre{modifier}">{}</pre></div>"#,
                html_escape::encode_text(text)
            )
        }
        RenderOutput::Error { .. } => String::new(),
    }
}

/// Renders diagram sources with the configured settings.
#[derive(Clone)]
pub struct Dispatcher {
    settings: Settings,
    renderer: Rc<dyn DiagramRenderer>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(settings: Settings, renderer: Rc<dyn DiagramRenderer>) -> Self {
        Self { settings, renderer }
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Render `source` into `target`, replacing its content.
    ///
    /// Renderer failures become an inline error message in the target.
    /// Returns the mode that was used.
    pub fn render_into(
        &self,
        source: &str,
        target: &mut RenderTarget,
        appearance: Appearance,
    ) -> RenderMode {
        target.clear();
        let (mode, source) = extract_mode_directive(source, self.settings.default_mode);

        let result = match mode {
            RenderMode::Ascii => self.render_ascii(&source),
            RenderMode::Svg => self.render_svg(&source, appearance),
        };

        target.output = Some(result.unwrap_or_else(|err| {
            tracing::warn!(%mode, "mermaid render failed: {err}");
            RenderOutput::Error {
                mode,
                message: format!("Mermaid render error: {err}"),
            }
        }));
        mode
    }

    fn render_ascii(&self, source: &str) -> Result<RenderOutput, RenderError> {
        let text = self
            .renderer
            .render_ascii(source.trim(), &AsciiOptions::default())?;
        tracing::debug!(bytes = text.len(), "rendered mermaid text");
        Ok(RenderOutput::Ascii {
            text,
            transparent: self.settings.transparent,
        })
    }

    fn render_svg(&self, source: &str, appearance: Appearance) -> Result<RenderOutput, RenderError> {
        let options = self.svg_options(appearance);
        let markup = self.renderer.render_svg(source.trim(), &options)?;
        tracing::debug!(bytes = markup.len(), %appearance, "rendered mermaid svg");
        Ok(RenderOutput::Svg { markup })
    }

    /// SVG options for the theme active under `appearance`.
    pub fn svg_options(&self, appearance: Appearance) -> SvgOptions {
        let font = Some(self.settings.font.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        SvgOptions {
            colors: theme::resolve_colors(&self.settings, appearance),
            font,
            transparent: self.settings.transparent,
        }
    }
}
