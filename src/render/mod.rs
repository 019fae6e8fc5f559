//! Writing the assembled document: directly for html, through a headless
//! engine for pdf, png and jpeg.

mod chrome;
pub mod settings;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{EffectiveOptions, Format};
use crate::paths::{OutputError, file_uri};

pub use chrome::ChromeEngine;
pub use settings::{Capture, ImageFormat, Paper, PrintSettings, ScreenshotSettings};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch the rendering engine: {0}")]
    Launch(String),
    #[error("failed to load {url}: {message}")]
    Navigate { url: String, message: String },
    #[error("failed to print pdf: {0}")]
    Print(String),
    #[error("failed to capture screenshot: {0}")]
    Screenshot(String),
    #[error("failed to close the rendering engine: {0}")]
    Close(String),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown paper format `{0}`")]
    PaperFormat(String),
    #[error("invalid length `{value}` for `markdown-pdf.{key}`")]
    Length { key: &'static str, value: String },
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Where the engine binary lives, checked once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInstall {
    Found(PathBuf),
    /// Remediation text for the user.
    Missing(String),
}

impl EngineInstall {
    /// The configured `executablePath` if it exists, else a system Chrome.
    pub fn verify(configured: &str) -> Self {
        if !configured.is_empty() {
            let path = PathBuf::from(shellexpand::tilde(configured).as_ref());
            if path.is_file() {
                return Self::Found(path);
            }
            tracing::warn!(path = %path.display(), "configured executablePath does not exist");
        }

        match headless_chrome::browser::default_executable() {
            Ok(path) => Self::Found(path),
            Err(err) => Self::Missing(format!(
                "Chrome or Chromium is required for pdf, png and jpeg output but none was found ({err}). \
                 Install Chrome or Chromium, or set markdown-pdf.executablePath to its binary."
            )),
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        match self {
            Self::Found(path) => Some(path),
            Self::Missing(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    pub executable: &'a Path,
    /// Value for the browser's `--lang` switch.
    pub lang: &'a str,
}

pub trait RenderEngine {
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn EngineSession>, RenderError>;
}

/// One running engine instance.
pub trait EngineSession {
    fn navigate(&mut self, url: &str) -> Result<(), RenderError>;
    fn print_pdf(&mut self, settings: &PrintSettings) -> Result<Vec<u8>, RenderError>;
    fn screenshot(&mut self, settings: &ScreenshotSettings) -> Result<Vec<u8>, RenderError>;
    fn close(self: Box<Self>) -> Result<(), RenderError>;
}

/// Closes the engine on every exit path.
struct SessionGuard {
    session: Option<Box<dyn EngineSession>>,
}

impl SessionGuard {
    fn new(session: Box<dyn EngineSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut Box<dyn EngineSession>, RenderError> {
        self.session
            .as_mut()
            .ok_or_else(|| RenderError::Close("engine session already closed".to_string()))
    }

    fn close(mut self) -> Result<(), RenderError> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(err) = session.close()
        {
            tracing::warn!(error = %err, "engine teardown failed");
        }
    }
}

/// The `<stem>_tmp.html` file handed to the engine.
struct ScratchFile {
    path: PathBuf,
    keep: bool,
}

impl ScratchFile {
    fn create(output: &Path, html: &str, keep: bool) -> Result<Self, RenderError> {
        let stem = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = output.with_file_name(format!("{stem}_tmp.html"));
        fs::write(&path, html).map_err(|source| RenderError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, keep })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.keep {
            tracing::debug!(path = %self.path.display(), "keeping scratch file");
            return;
        }
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove scratch file");
        }
    }
}

pub struct RenderJob<'a> {
    pub html: &'a str,
    pub output: &'a Path,
    pub format: Format,
    pub options: &'a EffectiveOptions,
    /// Engine binary; unused for html.
    pub executable: Option<&'a Path>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub warnings: Vec<String>,
}

pub struct Renderer<'e> {
    engine: &'e dyn RenderEngine,
    lang: String,
}

impl<'e> Renderer<'e> {
    pub fn new(engine: &'e dyn RenderEngine, lang: impl Into<String>) -> Self {
        Self {
            engine,
            lang: lang.into(),
        }
    }

    pub fn render(&self, job: &RenderJob<'_>) -> Result<RenderOutcome, RenderError> {
        let Some(capture) = Capture::for_format(job.format, job.options)? else {
            write_output(job.output, job.html.as_bytes())?;
            return Ok(RenderOutcome::default());
        };

        let executable = job
            .executable
            .ok_or_else(|| RenderError::Launch("no engine executable available".to_string()))?;

        let scratch = ScratchFile::create(job.output, job.html, job.options.debug)?;
        let session = self.engine.launch(&LaunchSpec {
            executable,
            lang: &self.lang,
        })?;
        let mut guard = SessionGuard::new(session);
        tracing::info!(format = %job.format, output = %job.output.display(), "rendering");

        let url = file_uri(&scratch.path);
        guard.session()?.navigate(&url)?;
        let bytes = match &capture {
            Capture::Pdf(settings) => guard.session()?.print_pdf(settings)?,
            Capture::Image(settings) => guard.session()?.screenshot(settings)?,
        };
        write_output(job.output, &bytes)?;

        let mut outcome = RenderOutcome::default();
        if let Err(err) = guard.close() {
            tracing::warn!(error = %err, "engine did not close cleanly");
            outcome.warnings.push(err.to_string());
        }
        Ok(outcome)
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    fs::write(path, bytes).map_err(|source| RenderError::Write {
        path: path.to_path_buf(),
        source,
    })
}
