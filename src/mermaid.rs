//! Production diagram backend.
//!
//! SVG comes from `mermaid-rs-renderer` with a theme built from the resolved
//! palette. Unicode text comes from an external command (by default
//! `mermaid-ascii`) that reads the diagram on stdin.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use mermaid_rs_renderer::{LayoutConfig, RenderOptions, Theme};
use once_cell::sync::Lazy;
use resvg::usvg::fontdb;

use crate::render::{AsciiOptions, DiagramRenderer, RenderError, SvgOptions};

pub const DEFAULT_ASCII_COMMAND: &str = "mermaid-ascii";

const TRANSPARENT: &str = "transparent";

/// Loading system fonts is slow, so it happens once.
static FONTDB: Lazy<Arc<fontdb::Database>> = Lazy::new(|| {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    tracing::debug!(faces = db.len(), "loaded system fonts");
    Arc::new(db)
});

/// Renders with `mermaid-rs-renderer` and an external text renderer.
#[derive(Debug, Clone)]
pub struct NativeRenderer {
    ascii_command: String,
    ascii_args: Vec<String>,
}

impl Default for NativeRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_ASCII_COMMAND)
    }
}

impl NativeRenderer {
    pub fn new(ascii_command: impl Into<String>) -> Self {
        Self {
            ascii_command: ascii_command.into(),
            ascii_args: Vec::new(),
        }
    }

    /// Extra arguments passed to the text renderer before any option flags.
    #[must_use]
    pub fn with_ascii_args(mut self, args: Vec<String>) -> Self {
        self.ascii_args = args;
        self
    }
}

impl DiagramRenderer for NativeRenderer {
    fn render_svg(&self, source: &str, options: &SvgOptions) -> Result<String, RenderError> {
        let opts = RenderOptions {
            theme: mermaid_theme(options),
            layout: LayoutConfig::default(),
        };
        let svg = mermaid_rs_renderer::render_with_options(source, opts)
            .map_err(|err| RenderError::Diagram(err.to_string()))?;
        Ok(fix_svg_font_families(&svg))
    }

    fn render_ascii(&self, source: &str, options: &AsciiOptions) -> Result<String, RenderError> {
        let mut args = self.ascii_args.clone();
        if options.use_ascii {
            args.push("--ascii".to_string());
        }

        let spawn_err = |source| RenderError::Spawn {
            command: self.ascii_command.clone(),
            source,
        };
        let mut child = Command::new(&self.ascii_command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A renderer that exits early closes its end; its status says why.
            match stdin.write_all(source.as_bytes()) {
                Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(spawn_err(err));
                }
                _ => {}
            }
        }
        let output = child.wait_with_output().map_err(spawn_err)?;

        if !output.status.success() {
            return Err(RenderError::Command {
                command: self.ascii_command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if text.is_empty() {
            return Err(RenderError::Empty);
        }
        Ok(text)
    }
}

/// Build a renderer theme from the resolved colour roles.
///
/// Roles the palette doesn't define keep the renderer's defaults.
pub fn mermaid_theme(options: &SvgOptions) -> Theme {
    let mut theme = Theme::modern();
    let colors = &options.colors;

    if let Some(bg) = &colors.bg {
        theme.background.clone_from(bg);
        theme.edge_label_background.clone_from(bg);
        theme.primary_color.clone_from(colors.surface.as_ref().unwrap_or(bg));
        theme.cluster_background.clone_from(colors.surface.as_ref().unwrap_or(bg));
        theme.sequence_actor_fill.clone_from(colors.surface.as_ref().unwrap_or(bg));
    }
    if let Some(fg) = &colors.fg {
        theme.text_color.clone_from(fg);
        theme.primary_text_color.clone_from(fg);
        let line = colors.line.as_ref().unwrap_or(fg);
        theme.line_color.clone_from(line);
        theme.sequence_actor_line.clone_from(line);
        let border = colors.border.as_ref().unwrap_or(line);
        theme.primary_border_color.clone_from(border);
        theme.sequence_actor_border.clone_from(border);
        theme
            .cluster_border
            .clone_from(colors.muted.as_ref().unwrap_or(border));
    }
    if let Some(accent) = &colors.accent {
        theme.secondary_color.clone_from(accent);
    }
    if let Some(muted) = &colors.muted {
        theme.tertiary_color.clone_from(muted);
    }
    if let Some(font) = &options.font {
        theme.font_family = format!("{font}, sans-serif");
    }
    if options.transparent {
        theme.background = TRANSPARENT.to_string();
        theme.edge_label_background = TRANSPARENT.to_string();
    }
    theme
}

/// Fix unescaped double quotes inside font-family attributes.
///
/// `mermaid-rs-renderer` emits font-family values like:
///   `font-family="Inter, ... "Segoe UI", sans-serif"`
/// The inner `"Segoe UI"` breaks XML parsing. We replace inner double
/// quotes with single quotes.
pub fn fix_svg_font_families(svg: &str) -> String {
    const MARKER: &str = "font-family=\"";
    let mut result = String::with_capacity(svg.len());
    let mut rest = svg;

    while let Some(pos) = rest.find(MARKER) {
        result.push_str(&rest[..pos + MARKER.len()]);
        rest = &rest[pos + MARKER.len()..];

        // The closing quote is a `"` followed by `>`, ` `, `/`, or the end.
        let mut end_offset = rest.len();
        let mut value_end = rest.len();
        for (i, ch) in rest.char_indices() {
            if ch != '"' {
                continue;
            }
            let after = rest.get(i + 1..i + 2).unwrap_or("");
            if after.is_empty() || after.starts_with(['>', ' ', '/']) {
                value_end = i;
                end_offset = i + 1;
                break;
            }
        }
        result.push_str(&rest[..value_end].replace('"', "'"));
        if end_offset > value_end {
            result.push('"');
        }
        rest = &rest[end_offset..];
    }
    result.push_str(rest);
    result
}

/// Rasterize SVG markup to PNG bytes at `target_width_px`.
///
/// The vector is scaled to the final width directly, preserving aspect
/// ratio. A transparent SVG stays transparent.
///
/// # Errors
///
/// Returns an error if the SVG cannot be parsed or the image cannot be
/// encoded.
pub fn rasterize_svg(svg: &str, target_width_px: u32) -> Result<Vec<u8>, RenderError> {
    let opts = resvg::usvg::Options {
        fontdb: FONTDB.clone(),
        ..Default::default()
    };

    let svg = fix_svg_font_families(svg);
    let tree = resvg::usvg::Tree::from_str(&svg, &opts)
        .map_err(|err| RenderError::Rasterize(err.to_string()))?;
    let size = tree.size();

    #[allow(clippy::cast_precision_loss)]
    let scale = target_width_px as f32 / size.width();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let width = (size.width() * scale).ceil() as u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let height = (size.height() * scale).ceil() as u32;

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
        RenderError::Rasterize(format!("failed to create pixmap {width}x{height}"))
    })?;

    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(pixmap.data(), width, height, image::ExtendedColorType::Rgba8)
        .map_err(|err| RenderError::Rasterize(err.to_string()))?;
    Ok(png)
}
