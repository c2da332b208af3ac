//! mermaid-lens - themed re-rendering of mermaid diagrams in markdown.
//!
//! # Usage
//!
//! ```bash
//! mermaid-lens render NOTES.md -o notes.html
//! mermaid-lens watch NOTES.md -o notes.html --appearance dark
//! mermaid-lens export NOTES.md --block 2 --png
//! mermaid-lens settings set theme-dark tokyo-night
//! ```

use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mermaid_lens::appearance::{AppearanceMode, detect_appearance};
use mermaid_lens::buffer::DocumentBuffer;
use mermaid_lens::directive::RenderMode;
use mermaid_lens::export::{self, DEFAULT_PNG_WIDTH};
use mermaid_lens::extract::find_blocks;
use mermaid_lens::host::{Host, MermaidPlugin};
use mermaid_lens::mermaid::{DEFAULT_ASCII_COMMAND, NativeRenderer};
use mermaid_lens::render::{DiagramRenderer, Dispatcher, RenderTarget};
use mermaid_lens::session::{
    APPEARANCE_POLL_INTERVAL, DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL, Session,
};
use mermaid_lens::settings::{SettingsStore, global_settings_path};
use mermaid_lens::theme::{self, Appearance};

/// Themed SVG and Unicode rendering of mermaid blocks in markdown
#[derive(Parser, Debug)]
#[command(name = "mermaid-lens", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the per-user location)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Command that renders diagrams as text, reading them on stdin
    #[arg(long, global = true, value_name = "CMD", default_value = DEFAULT_ASCII_COMMAND)]
    ascii_command: String,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a markdown file to HTML
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,

        /// Override the default render mode
        #[arg(long, value_enum)]
        mode: Option<RenderMode>,

        #[arg(long, value_enum, default_value = "auto")]
        appearance: AppearanceMode,

        /// Add a collapsible source view under each diagram
        #[arg(long)]
        show_source: bool,

        /// Open a diagram enlarged when it is clicked
        #[arg(long)]
        zoom: bool,
    },

    /// Keep an HTML snapshot of a markdown file up to date
    Watch {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,

        /// `auto` keeps following the terminal's light/dark background
        #[arg(long, value_enum, default_value = "auto")]
        appearance: AppearanceMode,
    },

    /// Save or copy one diagram as SVG or PNG
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// 1-based index of the diagram in the file
        #[arg(long, default_value_t = 1)]
        block: usize,

        /// Directory to save into
        #[arg(long, value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Save a PNG instead of an SVG
        #[arg(long)]
        png: bool,

        /// PNG width in pixels
        #[arg(long, default_value_t = DEFAULT_PNG_WIDTH)]
        width: u32,

        /// Copy the SVG to the clipboard instead of saving it
        #[arg(long, conflicts_with = "png")]
        clipboard: bool,

        #[arg(long, value_enum, default_value = "auto")]
        appearance: AppearanceMode,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// List the built-in themes
    Themes,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Restore the defaults
    Reset,
    /// Change one setting, e.g. `set theme-dark nord`
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let settings_path = cli.settings.clone().unwrap_or_else(global_settings_path);
    let store = SettingsStore::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let renderer: Rc<dyn DiagramRenderer> = Rc::new(NativeRenderer::new(cli.ascii_command));

    match cli.command {
        Commands::Render {
            file,
            output,
            mode,
            appearance,
            show_source,
            zoom,
        } => render(
            &file,
            output.as_deref(),
            &store,
            renderer,
            mode,
            appearance.resolve(),
            ReadingViewOptions { show_source, zoom },
        ),
        Commands::Watch {
            file,
            output,
            appearance,
        } => {
            ensure_exists(&file)?;
            let mut session = Session::open(file, output, store, renderer, appearance.resolve())?;
            if appearance == AppearanceMode::Auto {
                session.follow_appearance(APPEARANCE_POLL_INTERVAL, detect_appearance);
            }
            session.run(DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL)
        }
        Commands::Export {
            file,
            block,
            dir,
            png,
            width,
            clipboard,
            appearance,
        } => {
            let request = ExportRequest {
                block,
                dir,
                png,
                width,
                clipboard,
            };
            export_diagram(&file, &store, renderer, appearance.resolve(), &request)
        }
        Commands::Settings { action } => settings(store, action),
        Commands::Themes => {
            themes();
            Ok(())
        }
    }
}

fn ensure_exists(file: &Path) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    Ok(())
}

fn read_markdown(file: &Path) -> Result<String> {
    ensure_exists(file)?;
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

struct ReadingViewOptions {
    show_source: bool,
    zoom: bool,
}

fn render(
    file: &Path,
    output: Option<&Path>,
    store: &SettingsStore,
    renderer: Rc<dyn DiagramRenderer>,
    mode: Option<RenderMode>,
    appearance: Appearance,
    view: ReadingViewOptions,
) -> Result<()> {
    let markdown = read_markdown(file)?;

    let mut settings = store.settings().clone();
    if let Some(mode) = mode {
        settings.default_mode = mode;
    }
    let dispatcher = Rc::new(RefCell::new(Dispatcher::new(settings, renderer)));
    let mut host = Host::new(appearance);
    host.load(Box::new(
        MermaidPlugin::new(dispatcher)
            .with_source_toggle(view.show_source)
            .with_zoom(view.zoom),
    ));

    let html = host.render_markdown(&markdown);
    host.unload();

    match output {
        Some(path) => std::fs::write(path, html)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => std::io::stdout()
            .write_all(html.as_bytes())
            .context("Failed to write to stdout"),
    }
}

struct ExportRequest {
    block: usize,
    dir: PathBuf,
    png: bool,
    width: u32,
    clipboard: bool,
}

fn export_diagram(
    file: &Path,
    store: &SettingsStore,
    renderer: Rc<dyn DiagramRenderer>,
    appearance: Appearance,
    request: &ExportRequest,
) -> Result<()> {
    let markdown = read_markdown(file)?;
    let blocks = find_blocks(&DocumentBuffer::from_text(&markdown));
    let Some(block) = request
        .block
        .checked_sub(1)
        .and_then(|idx| blocks.get(idx))
    else {
        anyhow::bail!(
            "{} has {} mermaid block(s), no block {}",
            file.display(),
            blocks.len(),
            request.block
        );
    };

    let dispatcher = Dispatcher::new(store.settings().clone(), renderer);
    let mut target = RenderTarget::new();
    dispatcher.render_into(&block.body, &mut target, appearance);
    let output = target
        .output()
        .context("Diagram produced no output")?;

    let failed = || format!("Cannot export diagram {} of {}", request.block, file.display());

    if request.clipboard {
        export::copy_to_clipboard(output).with_context(failed)?;
        println!("Copied diagram {} to the clipboard", request.block);
        return Ok(());
    }

    let now = chrono::Local::now();
    let path = if request.png {
        export::save_png(&request.dir, output, request.width, now)
    } else {
        export::save_svg(&request.dir, output, now)
    }
    .with_context(failed)?;
    println!("{}", path.display());
    Ok(())
}

fn settings(mut store: SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let json = serde_json::to_string_pretty(store.settings())?;
            println!("{json}");
        }
        SettingsAction::Path => println!("{}", store.path().display()),
        SettingsAction::Reset => {
            store.reset()?;
            println!("Settings reset to defaults");
        }
        SettingsAction::Set { key, value } => {
            store.set(&key, &value)?;
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn themes() {
    for palette in theme::PALETTES {
        let bucket = if theme::is_dark_theme(palette.name) {
            "dark"
        } else {
            "light"
        };
        println!("{:<20} {bucket:<5} {}", palette.name, palette.bg);
    }
    println!("{:<20} {:<5} (custom background/foreground)", theme::CUSTOM_THEME, "any");
}
