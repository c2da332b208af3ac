//! Per-diagram render mode directives.
//!
//! A mermaid block may start with a `%% ascii` or `%% svg` comment line to
//! override the global default mode for that block only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a diagram block is rendered.
#[derive(
    clap::ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Themed vector output.
    #[default]
    Svg,
    /// Unicode box-drawing text.
    Ascii,
}

impl RenderMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Ascii => "ascii",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "ascii" => Ok(Self::Ascii),
            other => Err(format!("unknown render mode '{other}' (expected svg or ascii)")),
        }
    }
}

const COMMENT_MARKER: &str = "%%";

/// Look for a mode directive in the leading comment lines of `source`.
///
/// Returns the effective mode and the source with the directive line
/// removed. When no directive is present the source comes back untouched.
pub fn extract_mode_directive(source: &str, fallback: RenderMode) -> (RenderMode, String) {
    let lines: Vec<&str> = source.split('\n').collect();

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with(COMMENT_MARKER) {
            break;
        }

        let Some(mode) = directive_mode(trimmed) else {
            continue;
        };

        let remaining = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, l)| *l)
            .collect::<Vec<_>>()
            .join("\n");
        return (mode, remaining);
    }

    (fallback, source.to_string())
}

fn directive_mode(trimmed: &str) -> Option<RenderMode> {
    let body = trimmed
        .strip_prefix(COMMENT_MARKER)
        .map_or(trimmed, str::trim_start)
        .to_lowercase();
    match body.as_str() {
        "ascii" => Some(RenderMode::Ascii),
        "svg" => Some(RenderMode::Svg),
        _ => None,
    }
}
