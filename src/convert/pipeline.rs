//! Ordered tree stages run between parsing and HTML formatting.
//!
//! Each stage declares which node kinds it rewrites and which it emits. A
//! stage that rewrites kind K must not run before a stage that emits K,
//! otherwise the emitted nodes would never see the rewrite.

use std::fmt::{Display, Formatter};
use std::path::Path;

use comrak::Arena;
use comrak::nodes::{AstNode, NodeValue};

use super::ConvertError;
use super::ConvertOptions;
use super::stages::{CodeBlocks, EmojiShortcodes, HeadingAnchors, ImageSources, RawHtmlImages};
use crate::config::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Text,
    Heading,
    Image,
    CodeBlock,
    HtmlBlock,
    HtmlInline,
}

impl NodeKind {
    pub fn of(value: &NodeValue) -> Option<Self> {
        match value {
            NodeValue::Text(_) => Some(Self::Text),
            NodeValue::Heading(_) => Some(Self::Heading),
            NodeValue::Image(_) => Some(Self::Image),
            NodeValue::CodeBlock(_) => Some(Self::CodeBlock),
            NodeValue::HtmlBlock(_) => Some(Self::HtmlBlock),
            NodeValue::HtmlInline(_) => Some(Self::HtmlInline),
            _ => None,
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Heading => "heading",
            Self::Image => "image",
            Self::CodeBlock => "code block",
            Self::HtmlBlock => "html block",
            Self::HtmlInline => "inline html",
        };
        f.write_str(name)
    }
}

/// Per-conversion state shared by every stage.
pub struct StageContext<'p> {
    pub format: Format,
    pub source_path: &'p Path,
    pub warnings: Vec<String>,
}

impl<'p> StageContext<'p> {
    pub fn new(format: Format, source_path: &'p Path) -> Self {
        Self {
            format,
            source_path,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stage, source = %self.source_path.display(), "{message}");
        self.warnings.push(format!("{stage}: {message}"));
    }
}

pub trait TreeStage {
    fn name(&self) -> &'static str;

    /// Node kinds whose values this stage changes.
    fn rewrites(&self) -> &'static [NodeKind];

    /// Node kinds this stage creates.
    fn emits(&self) -> &'static [NodeKind] {
        &[]
    }

    fn apply<'a>(
        &self,
        arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError>;

    /// Post-process the formatted HTML.
    fn finish(&self, html: String) -> Result<String, ConvertError> {
        Ok(html)
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn TreeStage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|stage| stage.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn TreeStage>>) -> Result<Self, ConvertError> {
        for (index, stage) in stages.iter().enumerate() {
            for later in &stages[index + 1..] {
                if let Some(kind) = stage
                    .rewrites()
                    .iter()
                    .find(|kind| later.emits().contains(kind))
                {
                    return Err(ConvertError::StageOrder {
                        stage: stage.name(),
                        emitter: later.name(),
                        kind: *kind,
                    });
                }
            }
        }
        Ok(Self { stages })
    }

    /// The standard stage order for a conversion.
    pub fn for_options(options: &ConvertOptions) -> Result<Self, ConvertError> {
        let mut stages: Vec<Box<dyn TreeStage>> =
            vec![Box::new(HeadingAnchors), Box::new(CodeBlocks)];
        if options.emoji {
            stages.push(Box::new(EmojiShortcodes::new(options.emoji_dir.clone())));
        }
        stages.push(Box::new(ImageSources));
        if options.format != Format::Html {
            stages.push(Box::new(RawHtmlImages));
        }
        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run<'a>(
        &self,
        arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        for stage in &self.stages {
            tracing::trace!(stage = stage.name(), "applying tree stage");
            stage.apply(arena, root, context)?;
        }
        Ok(())
    }

    pub fn finish(&self, html: String) -> Result<String, ConvertError> {
        self.stages
            .iter()
            .try_fold(html, |html, stage| stage.finish(html))
    }
}

/// Pre-order walk collecting nodes of one kind. Collected up front so stages
/// can mutate the tree while iterating.
pub(crate) fn collect_nodes<'a>(root: &'a AstNode<'a>, kind: NodeKind) -> Vec<&'a AstNode<'a>> {
    root.descendants()
        .filter(|node| NodeKind::of(&node.data.borrow().value) == Some(kind))
        .collect()
}
