//! Named diagram palettes and light/dark theme resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Theme name that selects the user's own background/foreground colours.
pub const CUSTOM_THEME: &str = "custom";

/// Light or dark appearance of the surrounding environment.
#[derive(
    clap::ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Appearance {
    #[default]
    Light,
    Dark,
}

impl Appearance {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for Appearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Light => "light",
            Self::Dark => "dark",
        })
    }
}

/// Colour roles of a named palette. `bg` and `fg` are always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub name: &'static str,
    pub bg: &'static str,
    pub fg: &'static str,
    pub line: Option<&'static str>,
    pub accent: Option<&'static str>,
    pub muted: Option<&'static str>,
    pub surface: Option<&'static str>,
    pub border: Option<&'static str>,
}

const fn palette(
    name: &'static str,
    bg: &'static str,
    fg: &'static str,
    line: Option<&'static str>,
    accent: Option<&'static str>,
    muted: Option<&'static str>,
) -> Palette {
    Palette {
        name,
        bg,
        fg,
        line,
        accent,
        muted,
        surface: None,
        border: None,
    }
}

pub static PALETTES: &[Palette] = &[
    palette("zinc-light", "#FFFFFF", "#27272A", None, None, None),
    palette("zinc-dark", "#18181B", "#FAFAFA", None, None, None),
    palette(
        "tokyo-night",
        "#1a1b26",
        "#a9b1d6",
        Some("#3d59a1"),
        Some("#7aa2f7"),
        Some("#565f89"),
    ),
    palette(
        "tokyo-night-storm",
        "#24283b",
        "#a9b1d6",
        Some("#3d59a1"),
        Some("#7aa2f7"),
        Some("#565f89"),
    ),
    palette(
        "tokyo-night-light",
        "#d5d6db",
        "#343b58",
        Some("#34548a"),
        Some("#34548a"),
        Some("#9699a3"),
    ),
    palette(
        "catppuccin-mocha",
        "#1e1e2e",
        "#cdd6f4",
        Some("#585b70"),
        Some("#cba6f7"),
        Some("#6c7086"),
    ),
    palette(
        "catppuccin-latte",
        "#eff1f5",
        "#4c4f69",
        Some("#9ca0b0"),
        Some("#8839ef"),
        Some("#9ca0b0"),
    ),
    palette(
        "nord",
        "#2e3440",
        "#d8dee9",
        Some("#4c566a"),
        Some("#88c0d0"),
        Some("#616e88"),
    ),
    palette(
        "nord-light",
        "#eceff4",
        "#2e3440",
        Some("#aab1c0"),
        Some("#5e81ac"),
        Some("#7b88a1"),
    ),
    palette(
        "dracula",
        "#282a36",
        "#f8f8f2",
        Some("#6272a4"),
        Some("#bd93f9"),
        Some("#6272a4"),
    ),
    palette(
        "github-light",
        "#ffffff",
        "#1f2328",
        Some("#d1d9e0"),
        Some("#0969da"),
        Some("#59636e"),
    ),
    palette(
        "github-dark",
        "#0d1117",
        "#e6edf3",
        Some("#3d444d"),
        Some("#4493f8"),
        Some("#9198a1"),
    ),
    palette(
        "solarized-light",
        "#fdf6e3",
        "#657b83",
        Some("#93a1a1"),
        Some("#268bd2"),
        Some("#93a1a1"),
    ),
    palette(
        "solarized-dark",
        "#002b36",
        "#839496",
        Some("#586e75"),
        Some("#268bd2"),
        Some("#586e75"),
    ),
    palette(
        "one-dark",
        "#282c34",
        "#abb2bf",
        Some("#4b5263"),
        Some("#c678dd"),
        Some("#5c6370"),
    ),
];

/// Palettes meant for dark backgrounds. Used to sort a legacy single
/// `theme` setting into the light or dark slot.
pub const DARK_THEMES: &[&str] = &[
    "zinc-dark",
    "tokyo-night",
    "tokyo-night-storm",
    "catppuccin-mocha",
    "nord",
    "dracula",
    "github-dark",
    "solarized-dark",
    "one-dark",
];

pub fn palette_by_name(name: &str) -> Option<&'static Palette> {
    PALETTES.iter().find(|p| p.name == name)
}

pub fn is_dark_theme(name: &str) -> bool {
    DARK_THEMES.contains(&name)
}

/// Colours handed to the SVG renderer. Unset roles use renderer defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThemeColors {
    pub bg: Option<String>,
    pub fg: Option<String>,
    pub line: Option<String>,
    pub accent: Option<String>,
    pub muted: Option<String>,
    pub surface: Option<String>,
    pub border: Option<String>,
}

impl From<&Palette> for ThemeColors {
    fn from(p: &Palette) -> Self {
        let owned = |c: Option<&str>| c.map(str::to_string);
        Self {
            bg: Some(p.bg.to_string()),
            fg: Some(p.fg.to_string()),
            line: owned(p.line),
            accent: owned(p.accent),
            muted: owned(p.muted),
            surface: owned(p.surface),
            border: owned(p.border),
        }
    }
}

/// Theme name configured for `appearance`.
pub fn active_theme_name(settings: &Settings, appearance: Appearance) -> &str {
    match appearance {
        Appearance::Light => &settings.theme_light,
        Appearance::Dark => &settings.theme_dark,
    }
}

/// Resolve the colours for `appearance`.
///
/// `custom` yields only the user's background and foreground. An unknown
/// theme name yields no colours at all.
pub fn resolve_colors(settings: &Settings, appearance: Appearance) -> ThemeColors {
    let name = active_theme_name(settings, appearance);
    if name == CUSTOM_THEME {
        return ThemeColors {
            bg: Some(settings.custom_bg.clone()),
            fg: Some(settings.custom_fg.clone()),
            ..ThemeColors::default()
        };
    }
    palette_by_name(name).map(ThemeColors::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_dark_theme_has_a_palette() {
        for name in DARK_THEMES {
            assert!(palette_by_name(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn test_palette_names_are_unique() {
        let mut names: Vec<_> = PALETTES.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PALETTES.len());
    }

    #[test]
    fn test_resolve_follows_appearance() {
        let settings = Settings::default();
        let light = resolve_colors(&settings, Appearance::Light);
        let dark = resolve_colors(&settings, Appearance::Dark);
        assert_eq!(light.bg.as_deref(), Some("#eff1f5"));
        assert_eq!(dark.bg.as_deref(), Some("#1e1e2e"));
    }

    #[test]
    fn test_resolve_custom_only_sets_bg_and_fg() {
        let settings = Settings {
            theme_dark: CUSTOM_THEME.to_string(),
            custom_bg: "#000000".to_string(),
            custom_fg: "#ff00ff".to_string(),
            ..Settings::default()
        };
        let colors = resolve_colors(&settings, Appearance::Dark);
        assert_eq!(
            colors,
            ThemeColors {
                bg: Some("#000000".to_string()),
                fg: Some("#ff00ff".to_string()),
                ..ThemeColors::default()
            }
        );
    }

    #[test]
    fn test_resolve_omits_undefined_roles() {
        let settings = Settings {
            theme_light: "zinc-light".to_string(),
            ..Settings::default()
        };
        let colors = resolve_colors(&settings, Appearance::Light);
        assert!(colors.bg.is_some());
        assert!(colors.line.is_none());
        assert!(colors.accent.is_none());
    }

    #[test]
    fn test_unknown_theme_resolves_to_nothing() {
        let settings = Settings {
            theme_light: "no-such-theme".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            resolve_colors(&settings, Appearance::Light),
            ThemeColors::default()
        );
    }

    #[test]
    fn test_dracula_is_dark() {
        assert!(is_dark_theme("dracula"));
        assert!(!is_dark_theme("github-light"));
        assert_eq!(Appearance::Light.toggled(), Appearance::Dark);
    }
}
