//! Save or copy a rendered diagram.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::mermaid::rasterize_svg;
use crate::render::{RenderError, RenderOutput};

/// Width PNG exports are scaled to.
pub const DEFAULT_PNG_WIDTH: u32 = 1600;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("the diagram did not render: {0}")]
    RenderFailed(String),

    #[error("the diagram is rendered as text (`%% ascii`); only SVG diagrams can be exported")]
    NotSvg,

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("clipboard unavailable: {0}")]
    Clipboard(#[from] arboard::Error),
}

/// `mermaid-YYYYMMDD-HHMMSS.<extension>`
pub fn timestamped_file_name(now: DateTime<Local>, extension: &str) -> String {
    format!("mermaid-{}.{extension}", now.format("%Y%m%d-%H%M%S"))
}

fn svg_markup(output: &RenderOutput) -> Result<&str, ExportError> {
    match output {
        RenderOutput::Svg { markup } => Ok(markup),
        RenderOutput::Ascii { .. } => Err(ExportError::NotSvg),
        RenderOutput::Error { message, .. } => Err(ExportError::RenderFailed(message.clone())),
    }
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(name);
    fs::write(&path, contents).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    tracing::info!(path = %path.display(), bytes = contents.len(), "diagram exported");
    Ok(path)
}

/// Save an SVG diagram into `dir` under a timestamped name.
///
/// # Errors
/// Returns an error if `output` is a failed or text diagram, or the file
/// cannot be written.
pub fn save_svg(dir: &Path, output: &RenderOutput, now: DateTime<Local>) -> Result<PathBuf, ExportError> {
    let markup = svg_markup(output)?;
    write_file(dir, &timestamped_file_name(now, "svg"), markup.as_bytes())
}

/// Rasterize an SVG diagram to `width` pixels and save it as PNG.
///
/// # Errors
/// Returns an error if `output` is a failed or text diagram, rasterization
/// fails, or the file cannot be written.
pub fn save_png(
    dir: &Path,
    output: &RenderOutput,
    width: u32,
    now: DateTime<Local>,
) -> Result<PathBuf, ExportError> {
    let markup = svg_markup(output)?;
    let png = rasterize_svg(markup, width)?;
    write_file(dir, &timestamped_file_name(now, "png"), &png)
}

/// Put the SVG markup on the system clipboard.
///
/// # Errors
/// Returns an error if `output` is a failed or text diagram, or the
/// clipboard is unavailable.
pub fn copy_to_clipboard(output: &RenderOutput) -> Result<(), ExportError> {
    let markup = svg_markup(output)?;
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(markup.to_string())?;
    tracing::info!(bytes = markup.len(), "diagram copied to clipboard");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::RenderMode;
    use crate::render::tests::RecordingRenderer;
    use crate::render::{Dispatcher, RenderTarget};
    use crate::settings::Settings;
    use crate::theme::Appearance;
    use chrono::TimeZone;
    use std::rc::Rc;
    use tempfile::tempdir;

    const SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20" viewBox="0 0 40 20"><rect width="40" height="20" fill="#4c566a"/></svg>"##;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, hour, min, sec)
            .single()
            .unwrap()
    }

    fn svg() -> RenderOutput {
        RenderOutput::Svg {
            markup: SVG.to_string(),
        }
    }

    #[test]
    fn test_timestamped_file_name() {
        assert_eq!(
            timestamped_file_name(at(14, 5, 7), "svg"),
            "mermaid-20240309-140507.svg"
        );
    }

    #[test]
    fn test_save_svg_writes_markup() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("exports");

        let path = save_svg(&out, &svg(), at(9, 0, 0)).unwrap();

        assert_eq!(path, out.join("mermaid-20240309-090000.svg"));
        assert_eq!(fs::read_to_string(path).unwrap(), SVG);
    }

    #[test]
    fn test_save_png_rasterizes() {
        let dir = tempdir().unwrap();
        let path = save_png(dir.path(), &svg(), 80, at(9, 0, 0)).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[test]
    fn test_text_and_error_outputs_are_not_exportable() {
        let dir = tempdir().unwrap();
        let ascii = RenderOutput::Ascii {
            text: "A".to_string(),
            transparent: false,
        };
        let error = RenderOutput::Error {
            mode: RenderMode::Svg,
            message: "bad".to_string(),
        };

        assert!(matches!(
            save_svg(dir.path(), &ascii, at(1, 2, 3)),
            Err(ExportError::NotSvg)
        ));
        assert!(matches!(
            save_png(dir.path(), &error, 100, at(1, 2, 3)),
            Err(ExportError::RenderFailed(ref message)) if message == "bad"
        ));
        assert!(matches!(copy_to_clipboard(&ascii), Err(ExportError::NotSvg)));
        assert!(matches!(copy_to_clipboard(&error), Err(ExportError::RenderFailed(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_render_reports_renderer_message() {
        let renderer = Rc::new(RecordingRenderer::failing("Parse error on line 2"));
        let dispatcher = Dispatcher::new(Settings::default(), renderer);
        let mut target = RenderTarget::new();
        dispatcher.render_into("graph TD\nA-->", &mut target, Appearance::Light);

        let dir = tempdir().unwrap();
        let err = save_svg(dir.path(), target.output().unwrap(), at(1, 2, 3)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Parse error on line 2"), "{message}");
        assert!(!message.contains("only SVG"), "{message}");
    }

    #[test]
    fn test_text_diagram_error_names_the_directive() {
        let ascii = RenderOutput::Ascii {
            text: "A".to_string(),
            transparent: false,
        };
        assert!(ExportError::NotSvg.to_string().contains("%% ascii"));
        assert!(matches!(svg_markup(&ascii), Err(ExportError::NotSvg)));
    }
}
