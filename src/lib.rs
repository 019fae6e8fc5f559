//! # mdprint
//!
//! Markdown to HTML, PDF, PNG and JPEG. Markdown is parsed with comrak,
//! rewritten by an ordered set of tree stages, wrapped in a styled page and
//! then either written as-is or printed by headless Chrome.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use mdprint::{Settings, markdown_to_html};
//!
//! let html = markdown_to_html("# Hello\n\n:smile:", Path::new("hello.md"), &Settings::default())
//!     .expect("conversion failed");
//! std::fs::write("hello.html", html).unwrap();
//! ```
//!
//! ## Exporting files
//!
//! [`Exporter`] runs a whole command against a document on disk: it resolves
//! settings, converts once per requested format and drives the engine.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use mdprint::{ChromeEngine, Command, ConsoleReporter, EngineInstall, Exporter, Settings};
//!
//! let settings = Settings::discover(None, None).unwrap();
//! let install = EngineInstall::verify("");
//! let exporter = Exporter {
//!     settings: &settings,
//!     engine: &ChromeEngine,
//!     install: &install,
//!     reporter: &ConsoleReporter,
//!     workspace_root: None,
//!     emoji_dir: None,
//!     lang: "en-US",
//! };
//! let summary = exporter.export(Some(Path::new("README.md")), Command::All).unwrap();
//! println!("{} written", summary.outputs.len());
//! ```

pub mod config;
pub mod convert;
pub mod export;
pub mod frontmatter;
pub mod paths;
pub mod render;
pub mod report;
pub mod slug;
pub mod styles;
pub mod template;

#[cfg(feature = "cli")]
pub mod watch;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use config::{ConfigError, EffectiveOptions, Format, Settings, UnsupportedFormat};
pub use convert::{ConvertError, ConvertOptions, ConvertedDocument, convert_markdown_to_html};
pub use export::{Command, ExportSummary, Exporter, FormatFailure};
pub use frontmatter::{FrontMatter, FrontMatterError, ParsedMarkdown, split_frontmatter};
pub use render::{ChromeEngine, EngineInstall, RenderEngine, RenderError};
pub use report::{ConsoleReporter, Reporter};
pub use template::compose_document;

/// Top-level error type combining all pipeline stages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),
    #[error("{0}")]
    ResourceMissing(String),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("front-matter: {0}")]
    FrontMatter(#[from] FrontMatterError),
    #[error("convert: {0}")]
    Transform(#[from] ConvertError),
    #[error("render: {0}")]
    Render(#[from] RenderError),
    #[error("settings: {0}")]
    Config(#[from] ConfigError),
}

/// Convert Markdown text to a complete standalone HTML page in one call.
///
/// `source_path` anchors relative includes, images and stylesheets; the file
/// itself does not need to exist.
pub fn markdown_to_html(markdown: &str, source_path: &Path, settings: &Settings) -> Result<String, Error> {
    let parsed = split_frontmatter(markdown)?;
    let options = EffectiveOptions::for_document(settings, &parsed.frontmatter)?;

    let styles = styles::assemble_styles(
        &styles::StyleOptions::from(&options),
        &paths::HrefContext {
            source_path,
            workspace_root: None,
            relative_to_document: true,
        },
    );
    let converted = convert_markdown_to_html(
        &parsed.body,
        &ConvertOptions::from_effective(Format::Html, source_path, &options, None),
    )?;
    for warning in styles.warnings.iter().chain(&converted.warnings) {
        tracing::warn!("{warning}");
    }

    let title = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(compose_document(&template::DocumentParts {
        title: &title,
        style: &styles.to_html(),
        content: &converted.html,
        diagram_script: &template::mermaid_script_tag(&options.mermaid_server),
    }))
}
