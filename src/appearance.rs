//! Detect whether the surrounding terminal is light or dark.

use std::time::Duration;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::theme::Appearance;

/// Appearance selection from the command line.
#[derive(clap::ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AppearanceMode {
    #[default]
    Auto,
    Light,
    Dark,
}

impl AppearanceMode {
    /// Resolve to a concrete appearance, querying the terminal for `Auto`.
    pub fn resolve(self) -> Appearance {
        match self {
            Self::Light => Appearance::Light,
            Self::Dark => Appearance::Dark,
            Self::Auto => detect_appearance(),
        }
    }
}

/// Query the terminal background, then `COLORFGBG`, then assume light.
pub fn detect_appearance() -> Appearance {
    let _raw = enable_raw_mode();
    let result = query_terminal_background();
    let _ = disable_raw_mode();

    if let Some((r, g, b)) = result.ok().flatten() {
        let appearance = appearance_from_rgb(r, g, b);
        tracing::debug!(r, g, b, %appearance, "terminal background detected");
        return appearance;
    }

    appearance_from_colorfgbg(std::env::var("COLORFGBG").ok().as_deref())
        .unwrap_or(Appearance::Light)
}

pub fn appearance_from_rgb(r: u8, g: u8, b: u8) -> Appearance {
    let luma = 0.0722f32.mul_add(
        f32::from(b),
        0.2126f32.mul_add(f32::from(r), 0.7152 * f32::from(g)),
    );
    if luma >= 140.0 {
        Appearance::Light
    } else {
        Appearance::Dark
    }
}

/// `COLORFGBG` is `fg;bg` (sometimes `fg;default;bg`); the last field is the
/// background's ANSI colour index.
pub fn appearance_from_colorfgbg(value: Option<&str>) -> Option<Appearance> {
    let bg = value?.rsplit(';').next()?.trim().parse::<u8>().ok()?;
    match bg {
        0..=6 | 8 => Some(Appearance::Dark),
        7 | 9..=15 => Some(Appearance::Light),
        _ => None,
    }
}

/// How long the terminal gets to answer the background query.
const OSC_REPLY_TIMEOUT: Duration = Duration::from_millis(75);

#[cfg(not(unix))]
fn query_terminal_background() -> std::io::Result<Option<(u8, u8, u8)>> {
    Ok(None)
}

/// Ask the terminal for its background colour (OSC 11).
///
/// Goes through `/dev/tty` so a piped stdout does not matter. The reply is
/// read on a detached thread; a terminal that never answers costs only the
/// timeout.
#[cfg(unix)]
fn query_terminal_background() -> std::io::Result<Option<(u8, u8, u8)>> {
    use std::io::Write;
    use std::sync::mpsc;

    let mut tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")?;
    let reader = tty.try_clone()?;

    tty.write_all(b"\x1b]11;?\x07")?;
    tty.flush()?;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        if let Some(reply) = read_osc_reply(reader) {
            let _ = tx.send(reply);
        }
    });

    Ok(rx
        .recv_timeout(OSC_REPLY_TIMEOUT)
        .ok()
        .and_then(|bytes| parse_osc11_reply(&String::from_utf8_lossy(&bytes))))
}

/// Collect bytes until an OSC terminator (BEL or ST). `None` on EOF or a
/// read error before the reply is complete.
#[cfg_attr(not(unix), allow(dead_code))]
fn read_osc_reply(mut reader: impl std::io::Read) -> Option<Vec<u8>> {
    let mut chunk = [0u8; 256];
    let mut reply = Vec::new();
    loop {
        let n = reader.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        reply.extend_from_slice(&chunk[..n]);
        if is_osc_terminated(&reply) {
            return Some(reply);
        }
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn is_osc_terminated(bytes: &[u8]) -> bool {
    bytes.contains(&b'\x07') || bytes.windows(2).any(|w| w == b"\x1b\\")
}

pub fn parse_osc11_reply(reply: &str) -> Option<(u8, u8, u8)> {
    // Expect: ESC ] 11 ; rgb:RRRR/GGGG/BBBB BEL or ST
    let start = reply.find("rgb:")?;
    let data = &reply[start + 4..];
    let mut parts = data.split(['/', '\x07', '\x1b']);
    let r = parts.next()?;
    let g = parts.next()?;
    let b = parts.next()?;
    Some((
        parse_osc_component(r)?,
        parse_osc_component(g)?,
        parse_osc_component(b)?,
    ))
}

fn parse_osc_component(s: &str) -> Option<u8> {
    let hex = s.trim();
    if hex.len() >= 4 {
        let v = u16::from_str_radix(&hex[..4], 16).ok()?;
        u8::try_from(v >> 8).ok()
    } else if hex.len() == 2 {
        u8::from_str_radix(hex, 16).ok()
    } else {
        None
    }
}
