//! A live session: a document on disk mirrored into an HTML snapshot that
//! follows edits to the document and to the settings.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::host::{Host, MermaidPlugin};
use crate::live::{LivePreview, ViewUpdate};
use crate::render::{DiagramRenderer, Dispatcher};
use crate::settings::{Settings, SettingsStore};
use crate::theme::Appearance;
use crate::watcher::{FileWatcher, WatchTarget};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How often an automatic appearance is re-detected while watching.
pub const APPEARANCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

type AppearanceSource = Box<dyn FnMut() -> Appearance>;

pub struct Session {
    host: Host,
    view: LivePreview,
    store: SettingsStore,
    settings_rx: Receiver<Settings>,
    document: PathBuf,
    output: PathBuf,
    appearance_source: Option<(Duration, AppearanceSource)>,
}

impl Session {
    /// Load `document`, render its diagrams and write the first snapshot.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read or the snapshot
    /// cannot be written.
    pub fn open(
        document: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        mut store: SettingsStore,
        renderer: Rc<dyn DiagramRenderer>,
        appearance: Appearance,
    ) -> Result<Self> {
        let document = document.into();
        let text = read_document(&document)?;

        let dispatcher = Rc::new(RefCell::new(Dispatcher::new(
            store.settings().clone(),
            renderer,
        )));
        let mut host = Host::new(appearance);
        host.load(Box::new(MermaidPlugin::new(dispatcher)));

        let settings_rx = store.subscribe();
        let view = host.open_live(&text);

        let session = Self {
            host,
            view,
            store,
            settings_rx,
            document,
            output: output.into(),
            appearance_source: None,
        };
        session.write_snapshot()?;
        Ok(session)
    }

    pub const fn view(&self) -> &LivePreview {
        &self.view
    }

    pub const fn settings(&self) -> &Settings {
        self.store.settings()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Write the live view's HTML to the output file.
    ///
    /// # Errors
    /// Returns an error if the output file cannot be written.
    pub fn write_snapshot(&self) -> Result<()> {
        let html = self.view.to_html();
        fs::write(&self.output, html)
            .with_context(|| format!("failed to write {}", self.output.display()))?;

        let blocks = self.view.placeholders();
        let rendered = blocks.iter().filter(|h| h.target.output().is_some()).count();
        let failed = blocks
            .iter()
            .filter(|h| h.target.output().is_some_and(|o| o.is_error()))
            .count();
        tracing::info!(
            output = %self.output.display(),
            diagrams = blocks.len(),
            rendered,
            failed,
            "snapshot written"
        );
        Ok(())
    }

    /// Re-read the document. Returns `true` if its text changed.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read.
    pub fn reload_document(&mut self) -> Result<bool> {
        let text = read_document(&self.document)?;
        let update = self.view.replace_text(&text);
        if update.is_empty() {
            return Ok(false);
        }
        self.host.dispatch_update(&mut self.view, &update);
        Ok(true)
    }

    /// Re-read the settings document. Returns `true` if the settings changed.
    ///
    /// # Errors
    /// Returns an error if the settings file exists but cannot be read.
    pub fn reload_settings(&mut self) -> Result<bool> {
        self.store.reload().context("failed to reload settings")?;
        Ok(self.apply_pending_settings())
    }

    fn apply_pending_settings(&mut self) -> bool {
        let Some(settings) = self.settings_rx.try_iter().last() else {
            return false;
        };
        tracing::debug!(fingerprint = %settings.fingerprint(self.view.appearance()), "settings changed");
        self.host.apply_settings(&settings);
        let update = ViewUpdate {
            geometry_changed: true,
            ..ViewUpdate::default()
        };
        self.host.dispatch_update(&mut self.view, &update);
        true
    }

    /// Switch between light and dark. Returns `true` if anything changed.
    pub fn set_appearance(&mut self, appearance: Appearance) -> bool {
        self.host.set_appearance(appearance);
        let update = self.view.set_appearance(appearance);
        self.host.dispatch_update(&mut self.view, &update);
        !update.is_empty()
    }

    /// Re-check the appearance with `detect` every `interval` while running.
    pub fn follow_appearance(
        &mut self,
        interval: Duration,
        detect: impl FnMut() -> Appearance + 'static,
    ) {
        self.appearance_source = Some((interval, Box::new(detect)));
    }

    /// Switch to whatever the appearance source reports, rewriting the
    /// snapshot if that changed anything.
    ///
    /// # Errors
    /// Returns an error if the snapshot write fails.
    pub fn poll_appearance(&mut self) -> Result<bool> {
        let Some((_, detect)) = self.appearance_source.as_mut() else {
            return Ok(false);
        };
        let appearance = detect();
        if !self.set_appearance(appearance) {
            return Ok(false);
        }
        tracing::info!(%appearance, "appearance changed");
        self.write_snapshot()?;
        Ok(true)
    }

    /// React to watched files changing, rewriting the snapshot if needed.
    ///
    /// # Errors
    /// Returns an error if a reload or the snapshot write fails.
    pub fn handle_changes(&mut self, changes: &[WatchTarget]) -> Result<bool> {
        let mut changed = false;
        for target in changes {
            changed |= match target {
                WatchTarget::Document => self.reload_document()?,
                WatchTarget::Settings => self.reload_settings()?,
            };
        }
        if changed {
            self.write_snapshot()?;
        }
        Ok(changed)
    }

    /// Watch the document and settings until interrupted.
    ///
    /// # Errors
    /// Returns an error if the document cannot be watched.
    pub fn run(self, debounce: Duration, poll_interval: Duration) -> Result<()> {
        self.run_until(debounce, poll_interval, || false)
    }

    /// Watch the document and settings until `stop` returns `true`.
    ///
    /// # Errors
    /// Returns an error if the document cannot be watched.
    pub fn run_until(
        mut self,
        debounce: Duration,
        poll_interval: Duration,
        mut stop: impl FnMut() -> bool,
    ) -> Result<()> {
        let mut watcher = FileWatcher::new(debounce).context("failed to create file watcher")?;
        watcher
            .watch(WatchTarget::Document, &self.document)
            .with_context(|| format!("failed to watch {}", self.document.display()))?;
        if let Err(err) = watcher.watch(WatchTarget::Settings, self.store.path()) {
            tracing::warn!(
                path = %self.store.path().display(),
                "settings changes will not be picked up: {err}"
            );
        }
        tracing::info!(document = %self.document.display(), "watching for changes");

        let mut last_check = Instant::now();
        while !stop() {
            let check_due = self
                .appearance_source
                .as_ref()
                .is_some_and(|(interval, _)| last_check.elapsed() >= *interval);
            if check_due {
                last_check = Instant::now();
                if let Err(err) = self.poll_appearance() {
                    tracing::warn!("{err:#}");
                }
            }

            let changes = watcher.take_changes();
            if !changes.is_empty() {
                tracing::debug!(?changes, "files changed");
                if let Err(err) = self.handle_changes(&changes) {
                    tracing::warn!("{err:#}");
                }
            }
            std::thread::sleep(poll_interval);
        }
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::RecordingRenderer;
    use tempfile::{TempDir, tempdir};

    const DOC: &str = "# Plan\n\n```mermaid\nA-->B\n```\n\n```mermaid\n%% ascii\nC-->D\n```\n";

    struct Fixture {
        dir: TempDir,
        renderer: Rc<RecordingRenderer>,
        session: Session,
    }

    impl Fixture {
        fn doc_path(&self) -> PathBuf {
            self.dir.path().join("plan.md")
        }

        fn settings_path(&self) -> PathBuf {
            self.dir.path().join("settings.json")
        }

        fn snapshot(&self) -> String {
            fs::read_to_string(self.session.output()).unwrap()
        }
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("plan.md");
        fs::write(&doc, DOC).unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
        let renderer = Rc::new(RecordingRenderer::default());
        let session = Session::open(
            &doc,
            dir.path().join("plan.html"),
            store,
            renderer.clone(),
            Appearance::Light,
        )
        .unwrap();
        Fixture {
            dir,
            renderer,
            session,
        }
    }

    #[test]
    fn test_open_renders_and_writes_snapshot() {
        let fx = fixture();
        assert_eq!(fx.renderer.total_calls(), 2);

        let html = fx.snapshot();
        assert!(html.contains("<h1>Plan</h1>"));
        assert!(html.contains("mermaid-lens-container"));
        assert!(html.contains("mermaid-lens-ascii"));
    }

    #[test]
    fn test_missing_document_is_an_error() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
        let result = Session::open(
            dir.path().join("nope.md"),
            dir.path().join("out.html"),
            store,
            Rc::new(RecordingRenderer::default()),
            Appearance::Light,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_document_edit_rerenders_changed_block_only() {
        let mut fx = fixture();
        fs::write(fx.doc_path(), DOC.replace("A-->B", "A-->X")).unwrap();

        assert!(fx.session.handle_changes(&[WatchTarget::Document]).unwrap());
        assert_eq!(fx.renderer.total_calls(), 3);
        assert!(fx.snapshot().contains("A-->X"));
    }

    #[test]
    fn test_unchanged_document_is_ignored() {
        let mut fx = fixture();
        assert!(!fx.session.handle_changes(&[WatchTarget::Document]).unwrap());
        assert_eq!(fx.renderer.total_calls(), 2);
    }

    #[test]
    fn test_settings_edit_rerenders_everything() {
        let mut fx = fixture();
        fs::write(fx.settings_path(), r#"{"themeLight":"nord-light"}"#).unwrap();

        assert!(fx.session.handle_changes(&[WatchTarget::Settings]).unwrap());
        assert_eq!(fx.renderer.total_calls(), 4);
        assert_eq!(fx.session.settings().theme_light, "nord-light");
        let calls = fx.renderer.svg_calls.borrow();
        assert_eq!(calls.last().unwrap().1.colors.bg.as_deref(), Some("#eceff4"));
    }

    #[test]
    fn test_appearance_switch_relayouts() {
        let mut fx = fixture();
        assert!(fx.session.set_appearance(Appearance::Dark));
        assert_eq!(fx.renderer.total_calls(), 4);
        assert!(!fx.session.set_appearance(Appearance::Dark));
    }

    #[test]
    fn test_run_until_stops() {
        let fx = fixture();
        let mut polls = 0;
        fx.session
            .run_until(Duration::from_millis(10), Duration::from_millis(1), || {
                polls += 1;
                polls > 3
            })
            .unwrap();
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_appearance_source_is_followed() {
        let mut fx = fixture();
        assert!(!fx.session.poll_appearance().unwrap());

        let reported = Rc::new(std::cell::Cell::new(Appearance::Light));
        let reporter = Rc::clone(&reported);
        fx.session
            .follow_appearance(Duration::ZERO, move || reporter.get());
        assert!(!fx.session.poll_appearance().unwrap());

        reported.set(Appearance::Dark);
        assert!(fx.session.poll_appearance().unwrap());
        assert_eq!(fx.session.view().appearance(), Appearance::Dark);
        assert_eq!(fx.renderer.total_calls(), 4);
        let calls = fx.renderer.svg_calls.borrow();
        assert_eq!(calls.last().unwrap().1.colors.bg.as_deref(), Some("#1e1e2e"));
    }

    #[test]
    fn test_run_until_follows_appearance() {
        let mut fx = fixture();
        fx.session
            .follow_appearance(Duration::ZERO, || Appearance::Dark);
        let renderer = Rc::clone(&fx.renderer);

        let mut polls = 0;
        fx.session
            .run_until(Duration::from_millis(10), Duration::from_millis(1), || {
                polls += 1;
                polls > 2
            })
            .unwrap();

        assert_eq!(renderer.total_calls(), 4);
        let calls = renderer.svg_calls.borrow();
        assert_eq!(calls.last().unwrap().1.colors.bg.as_deref(), Some("#1e1e2e"));
    }
}
