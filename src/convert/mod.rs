//! Markdown to HTML body.
//!
//! Conversion runs in three phases: source extensions rewrite the raw text,
//! comrak parses it into a node tree, and an ordered [`Pipeline`] of tree
//! stages rewrites nodes before the tree is formatted as HTML.

pub mod emoji;
pub mod extensions;
pub mod highlight;
pub mod pipeline;
pub mod stages;

use std::path::PathBuf;
use std::string::FromUtf8Error;

use comrak::{Arena, ComrakOptions, format_html, parse_document};
use thiserror::Error;

use crate::config::{EffectiveOptions, Format, PlantumlOptions};

pub use pipeline::{NodeKind, Pipeline, StageContext, TreeStage};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to include {}: {source}", path.display())]
    Include {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("circular include of {}", .0.display())]
    CircularInclude(PathBuf),
    #[error("stage `{stage}` rewrites {kind} nodes but runs before `{emitter}`, which emits them")]
    StageOrder {
        stage: &'static str,
        emitter: &'static str,
        kind: NodeKind,
    },
    #[error("html rewrite failed: {message}")]
    Html { message: String },
    #[error("plantuml encoding failed: {0}")]
    Diagram(#[source] std::io::Error),
    #[error("failed to format html: {0}")]
    Format(#[source] std::io::Error),
    #[error("formatted html is not valid utf-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: Format,
    pub source_path: PathBuf,
    pub breaks: bool,
    pub emoji: bool,
    /// Directory holding `<name>.png` emoji images.
    pub emoji_dir: Option<PathBuf>,
    pub include: bool,
    pub plantuml: PlantumlOptions,
}

impl ConvertOptions {
    pub fn new(format: Format, source_path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            source_path: source_path.into(),
            breaks: false,
            emoji: true,
            emoji_dir: None,
            include: true,
            plantuml: PlantumlOptions {
                open_marker: "@startuml".to_string(),
                close_marker: "@enduml".to_string(),
                server: "http://www.plantuml.com/plantuml".to_string(),
            },
        }
    }

    pub fn from_effective(
        format: Format,
        source_path: impl Into<PathBuf>,
        options: &EffectiveOptions,
        emoji_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            format,
            source_path: source_path.into(),
            breaks: options.breaks,
            emoji: options.emoji,
            emoji_dir,
            include: options.include_enabled,
            plantuml: options.plantuml.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub html: String,
    /// Problems that did not stop the conversion.
    pub warnings: Vec<String>,
}

pub fn convert_markdown_to_html(
    markdown: &str,
    options: &ConvertOptions,
) -> Result<ConvertedDocument, ConvertError> {
    let pipeline = Pipeline::for_options(options)?;

    let mut source = if options.include {
        extensions::expand_includes(markdown, &options.source_path)?
    } else {
        markdown.to_string()
    };
    source = extensions::expand_containers(&source);
    source = extensions::expand_plantuml(&source, &options.plantuml)?;

    let mut comrak_options = ComrakOptions::default();
    comrak_options.extension.table = true;
    comrak_options.extension.strikethrough = true;
    comrak_options.extension.tasklist = true;
    comrak_options.extension.autolink = true;
    comrak_options.render.unsafe_ = true;
    comrak_options.render.hardbreaks = options.breaks;

    let arena = Arena::new();
    let root = parse_document(&arena, &source, &comrak_options);

    let mut context = StageContext::new(options.format, &options.source_path);
    pipeline.run(&arena, root, &mut context)?;

    let mut buffer = Vec::with_capacity(source.len() * 2);
    format_html(root, &comrak_options, &mut buffer).map_err(ConvertError::Format)?;
    let html = pipeline.finish(String::from_utf8(buffer)?)?;

    Ok(ConvertedDocument {
        html,
        warnings: context.warnings,
    })
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
