use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use comrak::Arena;
use comrak::nodes::{Ast, AstNode, LineColumn, NodeHtmlBlock, NodeValue};
use lol_html::{RewriteStrSettings, element, rewrite_str};
use regex::{Captures, Regex};

use super::emoji;
use super::highlight::Highlighter;
use super::pipeline::{NodeKind, StageContext, TreeStage, collect_nodes};
use super::{ConvertError, escape_html};
use crate::config::Format;
use crate::paths::{ResolveContext, resolve_image_path};
use crate::slug::slugify;

const ANCHOR_MARKER: &str = "mdprint-anchor:";

static ANCHORED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<h([1-6])><!--mdprint-anchor:([^>]*)-->").unwrap());

static MERMAID_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmermaid\b").unwrap());

/// Gives every heading an `id` derived from its text.
pub struct HeadingAnchors;

impl TreeStage for HeadingAnchors {
    fn name(&self) -> &'static str {
        "heading-anchors"
    }

    fn rewrites(&self) -> &'static [NodeKind] {
        &[NodeKind::Heading]
    }

    fn emits(&self) -> &'static [NodeKind] {
        &[NodeKind::HtmlInline]
    }

    fn apply<'a>(
        &self,
        arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        _context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        for heading in collect_nodes(root, NodeKind::Heading) {
            let slug = slugify(&plain_text(heading));
            let marker = NodeValue::HtmlInline(format!("<!--{ANCHOR_MARKER}{slug}-->"));
            heading.prepend(new_node(arena, marker));
        }
        Ok(())
    }

    fn finish(&self, html: String) -> Result<String, ConvertError> {
        let replaced = ANCHORED_HEADING.replace_all(&html, |caps: &Captures<'_>| {
            let level = &caps[1];
            match &caps[2] {
                "" => format!("<h{level}>"),
                slug => format!("<h{level} id=\"{slug}\">"),
            }
        });
        Ok(replaced.into_owned())
    }
}

/// Fenced code becomes highlighted markup or a diagram container.
pub struct CodeBlocks;

impl TreeStage for CodeBlocks {
    fn name(&self) -> &'static str {
        "code-blocks"
    }

    fn rewrites(&self) -> &'static [NodeKind] {
        &[NodeKind::CodeBlock]
    }

    fn emits(&self) -> &'static [NodeKind] {
        &[NodeKind::HtmlBlock]
    }

    fn apply<'a>(
        &self,
        _arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        for node in collect_nodes(root, NodeKind::CodeBlock) {
            let (info, literal) = match &node.data.borrow().value {
                NodeValue::CodeBlock(block) if block.fenced => {
                    (block.info.clone(), block.literal.clone())
                }
                _ => continue,
            };
            let language = info.split_whitespace().next().unwrap_or_default();

            let html = if MERMAID_LANGUAGE.is_match(language) {
                format!("<div class=\"mermaid\">{literal}</div>")
            } else {
                let body = match Highlighter::global().highlight(language, &literal) {
                    Ok(Some(highlighted)) => highlighted,
                    Ok(None) => escape_html(&literal),
                    Err(err) => {
                        context.warn(self.name(), format!("highlighting `{language}` failed: {err}"));
                        escape_html(&literal)
                    }
                };
                format!("<pre class=\"hljs\"><code><div>{body}</div></code></pre>")
            };

            node.data.borrow_mut().value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: format!("{html}\n"),
            });
        }
        Ok(())
    }
}

/// Replaces `:name:` shortcodes with an inline image from the emoji
/// directory when one is stored there, otherwise with the Unicode glyph.
pub struct EmojiShortcodes {
    dir: Option<PathBuf>,
}

impl EmojiShortcodes {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    fn image_data(&self, files: &[String], cache: &mut HashMap<String, Option<String>>) -> Option<String> {
        let dir = self.dir.as_ref()?;
        files.iter().find_map(|file| {
            cache
                .entry(file.clone())
                .or_insert_with(|| {
                    fs::read(dir.join(file))
                        .ok()
                        .filter(|bytes| !bytes.is_empty())
                        .map(|bytes| STANDARD.encode(bytes))
                })
                .clone()
        })
    }
}

impl TreeStage for EmojiShortcodes {
    fn name(&self) -> &'static str {
        "emoji"
    }

    fn rewrites(&self) -> &'static [NodeKind] {
        &[NodeKind::Text]
    }

    fn emits(&self) -> &'static [NodeKind] {
        &[NodeKind::HtmlInline]
    }

    fn apply<'a>(
        &self,
        _arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        _context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        merge_adjacent_text(root);

        let mut cache = HashMap::new();
        for node in collect_nodes(root, NodeKind::Text) {
            if node.ancestors().any(|ancestor| {
                matches!(ancestor.data.borrow().value, NodeValue::Image(_))
            }) {
                continue;
            }

            let text = match &node.data.borrow().value {
                NodeValue::Text(text) => text.clone(),
                _ => continue,
            };

            let mut html = String::with_capacity(text.len());
            let mut last = 0;
            let mut replaced = false;
            for caps in emoji::SHORTCODE.captures_iter(&text) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let name = name.as_str();
                let Some(found) = emoji::lookup(name) else {
                    continue;
                };
                html.push_str(&escape_html(&text[last..whole.start()]));
                match self.image_data(&emoji::image_files(name, found), &mut cache) {
                    Some(data) => html.push_str(&format!(
                        "<img class=\"emoji\" alt=\"{name}\" src=\"data:image/png;base64,{data}\" />"
                    )),
                    None => html.push_str(found.as_str()),
                }
                last = whole.end();
                replaced = true;
            }

            if replaced {
                html.push_str(&escape_html(&text[last..]));
                node.data.borrow_mut().value = NodeValue::HtmlInline(html);
            }
        }
        Ok(())
    }
}

/// Runs every Markdown image source through the path resolver.
pub struct ImageSources;

impl TreeStage for ImageSources {
    fn name(&self) -> &'static str {
        "image-sources"
    }

    fn rewrites(&self) -> &'static [NodeKind] {
        &[NodeKind::Image]
    }

    fn apply<'a>(
        &self,
        _arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        let resolve = ResolveContext {
            source_path: context.source_path,
            format: context.format,
        };
        for node in collect_nodes(root, NodeKind::Image) {
            let url = match &node.data.borrow().value {
                NodeValue::Image(link) => link.url.clone(),
                _ => continue,
            };
            match resolve_image_path(&url, &resolve) {
                Ok(resolved) => {
                    if let NodeValue::Image(link) = &mut node.data.borrow_mut().value {
                        link.url = resolved;
                    }
                }
                Err(err) => context.warn(self.name(), err.to_string()),
            }
        }
        Ok(())
    }
}

/// Rewrites `<img src>` inside raw HTML blocks for the standalone renderer.
pub struct RawHtmlImages;

impl TreeStage for RawHtmlImages {
    fn name(&self) -> &'static str {
        "raw-html-images"
    }

    fn rewrites(&self) -> &'static [NodeKind] {
        &[NodeKind::HtmlBlock]
    }

    fn apply<'a>(
        &self,
        _arena: &'a Arena<AstNode<'a>>,
        root: &'a AstNode<'a>,
        context: &mut StageContext<'_>,
    ) -> Result<(), ConvertError> {
        if context.format == Format::Html {
            return Ok(());
        }

        for node in collect_nodes(root, NodeKind::HtmlBlock) {
            let literal = match &node.data.borrow().value {
                NodeValue::HtmlBlock(block) if block.literal.contains("<img") => {
                    block.literal.clone()
                }
                _ => continue,
            };

            let (rewritten, warnings) =
                rewrite_img_sources(&literal, context.source_path, context.format)?;
            for warning in warnings {
                context.warn(self.name(), warning);
            }
            if let NodeValue::HtmlBlock(block) = &mut node.data.borrow_mut().value {
                block.literal = rewritten;
            }
        }
        Ok(())
    }
}

fn rewrite_img_sources(
    html: &str,
    source_path: &std::path::Path,
    format: Format,
) -> Result<(String, Vec<String>), ConvertError> {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let source_path = source_path.to_path_buf();

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", {
                let warnings = Rc::clone(&warnings);
                move |el| {
                    let Some(src) = el.get_attribute("src") else {
                        return Ok(());
                    };
                    let context = ResolveContext {
                        source_path: &source_path,
                        format,
                    };
                    match resolve_image_path(&src, &context) {
                        Ok(resolved) => el.set_attribute("src", &resolved)?,
                        Err(err) => warnings.borrow_mut().push(err.to_string()),
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| ConvertError::Html {
        message: err.to_string(),
    })?;

    let warnings = warnings.borrow().clone();
    Ok((rewritten, warnings))
}

fn new_node<'a>(arena: &'a Arena<AstNode<'a>>, value: NodeValue) -> &'a AstNode<'a> {
    arena.alloc(AstNode::new(RefCell::new(Ast::new(
        value,
        LineColumn { line: 0, column: 0 },
    ))))
}

fn plain_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    for descendant in node.descendants() {
        match &descendant.data.borrow().value {
            NodeValue::Text(value) => text.push_str(value),
            NodeValue::Code(code) => text.push_str(&code.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => text.push(' '),
            _ => {}
        }
    }
    text
}

/// The inline parser splits text at `:`; shortcodes need whole runs.
fn merge_adjacent_text<'a>(root: &'a AstNode<'a>) {
    for node in collect_nodes(root, NodeKind::Text) {
        if node.parent().is_none() {
            continue;
        }
        while let Some(next) = node.next_sibling() {
            let extra = match &next.data.borrow().value {
                NodeValue::Text(text) => text.clone(),
                _ => break,
            };
            if let NodeValue::Text(text) = &mut node.data.borrow_mut().value {
                text.push_str(&extra);
            }
            next.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use comrak::{ComrakOptions, format_html, parse_document};

    use super::*;
    use crate::convert::pipeline::Pipeline;

    fn render(markdown: &str, stages: Vec<Box<dyn TreeStage>>, format: Format) -> (String, Vec<String>) {
        let mut options = ComrakOptions::default();
        options.render.unsafe_ = true;
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &options);
        let pipeline = Pipeline::new(stages).unwrap();
        let mut context = StageContext::new(format, Path::new("/docs/doc.md"));
        pipeline.run(&arena, root, &mut context).unwrap();
        let mut out = Vec::new();
        format_html(root, &options, &mut out).unwrap();
        let html = pipeline.finish(String::from_utf8(out).unwrap()).unwrap();
        (html, context.warnings)
    }

    #[test]
    fn heading_gets_slug_id() {
        let (html, _) = render("# Hello World!\n\n## Sub `code`\n", vec![Box::new(HeadingAnchors)], Format::Html);
        assert!(html.contains("<h1 id=\"hello-world\">Hello World!</h1>"));
        assert!(html.contains("<h2 id=\"sub-code\">"));
    }

    #[test]
    fn heading_without_slug_has_no_id() {
        let (html, _) = render("# !!!\n", vec![Box::new(HeadingAnchors)], Format::Html);
        assert!(html.contains("<h1>!!!</h1>"));
    }

    #[test]
    fn mermaid_block_becomes_diagram() {
        let (html, _) = render(
            "```mermaid\ngraph TD; A-->B\n```\n",
            vec![Box::new(CodeBlocks)],
            Format::Pdf,
        );
        assert!(html.contains("<div class=\"mermaid\">graph TD; A-->B\n</div>"));
        assert!(!html.contains("hljs"));
    }

    #[test]
    fn unknown_language_is_escaped() {
        let (html, _) = render(
            "```nosuchlang\n<tag> & more\n```\n",
            vec![Box::new(CodeBlocks)],
            Format::Pdf,
        );
        assert!(html.contains("<pre class=\"hljs\"><code><div>&lt;tag&gt; &amp; more\n</div></code></pre>"));
    }

    #[test]
    fn known_language_is_highlighted() {
        let (html, _) = render(
            "```rust\nlet x = 1;\n```\n",
            vec![Box::new(CodeBlocks)],
            Format::Pdf,
        );
        assert!(html.contains("<pre class=\"hljs\"><code><div><span class=\"hl-"));
    }

    #[test]
    fn indented_code_is_left_alone() {
        let (html, _) = render("    plain code\n", vec![Box::new(CodeBlocks)], Format::Pdf);
        assert!(html.contains("<pre><code>plain code"));
    }

    #[test]
    fn image_sources_resolved_for_pdf() {
        let (html, _) = render("![x](./img.png)\n", vec![Box::new(ImageSources)], Format::Pdf);
        assert!(html.contains("src=\"file:///docs/img.png\""));
    }

    #[test]
    fn image_sources_kept_for_html() {
        let (html, _) = render("![x](./img.png)\n", vec![Box::new(ImageSources)], Format::Html);
        assert!(html.contains("<img src=\"img.png\""));
    }

    #[test]
    fn bad_escape_warns_and_keeps_reference() {
        let (html, warnings) =
            render("![x](bad%zz.png)\n", vec![Box::new(ImageSources)], Format::Pdf);
        assert_eq!(warnings.len(), 1);
        assert!(html.contains("bad%25zz.png") || html.contains("bad%zz.png"));
    }

    #[test]
    fn raw_html_images_rewritten() {
        let (html, _) = render(
            "<div>\n<img src=\"/abs/pic.png\" alt=\"p\">\n</div>\n",
            vec![Box::new(RawHtmlImages)],
            Format::Png,
        );
        assert!(html.contains("src=\"file:///abs/pic.png\""));
    }

    #[test]
    fn emoji_replaced_when_image_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("smile.png"), [1u8, 2, 3]).unwrap();
        let (html, _) = render(
            "Hi :smile: and :nosuchemoji: <b>\n",
            vec![Box::new(EmojiShortcodes::new(Some(dir.path().to_path_buf())))],
            Format::Html,
        );
        assert!(html.contains("<img class=\"emoji\" alt=\"smile\" src=\"data:image/png;base64,AQID\" />"));
        assert!(html.contains(":nosuchemoji:"));
    }

    #[test]
    fn emoji_without_image_falls_back_to_glyph() {
        let dir = tempfile::tempdir().unwrap();
        let (html, _) = render(
            "Hi :smile: & :nosuchemoji:\n",
            vec![Box::new(EmojiShortcodes::new(Some(dir.path().to_path_buf())))],
            Format::Html,
        );
        assert!(html.contains("Hi 😄 &amp; :nosuchemoji:"));
        assert!(!html.contains("class=\"emoji\""));
    }

    #[test]
    fn emoji_without_directory_uses_glyph() {
        let (html, _) = render(
            "# Hello :smile: World\n\n:rocket::+1:\n",
            vec![Box::new(EmojiShortcodes::new(None))],
            Format::Html,
        );
        assert!(html.contains("Hello 😄 World"));
        assert!(html.contains("🚀👍"));
    }

    #[test]
    fn emoji_image_found_under_alias() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("+1.png"), [1u8, 2, 3]).unwrap();
        let (html, _) = render(
            "Nice :thumbsup:\n",
            vec![Box::new(EmojiShortcodes::new(Some(dir.path().to_path_buf())))],
            Format::Html,
        );
        assert!(html.contains("<img class=\"emoji\" alt=\"thumbsup\" src=\"data:image/png;base64,AQID\" />"));
    }
}
