use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::convert::escape_html;

const TEMPLATE: &str = include_str!("template.html");

/// Base Markdown preview stylesheet.
pub const MARKDOWN_CSS: &str = include_str!("markdown.css");

/// Print-oriented stylesheet for standalone output.
pub const PRINT_CSS: &str = include_str!("md2pdf.css");

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{(title|style|content|mermaid)\}\}\}").unwrap());

#[derive(Debug, Clone, Default)]
pub struct DocumentParts<'a> {
    pub title: &'a str,
    /// Concatenated `<style>` and `<link>` fragments.
    pub style: &'a str,
    pub content: &'a str,
    pub diagram_script: &'a str,
}

/// Fill the bundled page template.
///
/// Substitution is a single pass, so text inside the content that looks like
/// a placeholder is left alone.
pub fn compose_document(parts: &DocumentParts<'_>) -> String {
    PLACEHOLDER
        .replace_all(TEMPLATE, |caps: &Captures<'_>| match &caps[1] {
            "title" => escape_html(parts.title),
            "style" => parts.style.to_string(),
            "content" => parts.content.to_string(),
            _ => parts.diagram_script.to_string(),
        })
        .into_owned()
}

pub fn mermaid_script_tag(server: &str) -> String {
    if server.is_empty() {
        return String::new();
    }
    format!("<script src=\"{}\"></script>", escape_html(server))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_placeholders_filled() {
        let html = compose_document(&DocumentParts {
            title: "doc.md",
            style: "<style>body{}</style>",
            content: "<h1 id=\"t\">T</h1>",
            diagram_script: "<script src=\"m.js\"></script>",
        });
        assert!(html.contains("<title>doc.md</title>"));
        assert!(html.contains("<style>body{}</style>"));
        assert!(html.contains("<h1 id=\"t\">T</h1>"));
        assert!(html.contains("<script src=\"m.js\"></script>"));
        assert!(!html.contains("{{{"));
    }

    #[test]
    fn title_is_escaped() {
        let html = compose_document(&DocumentParts {
            title: "<a & b>",
            ..DocumentParts::default()
        });
        assert!(html.contains("<title>&lt;a &amp; b&gt;</title>"));
    }

    #[test]
    fn content_placeholders_not_expanded() {
        let html = compose_document(&DocumentParts {
            style: "STYLE",
            content: "literal {{{style}}}",
            ..DocumentParts::default()
        });
        assert!(html.contains("literal {{{style}}}"));
    }

    #[test]
    fn mermaid_tag() {
        assert_eq!(
            mermaid_script_tag("https://unpkg.com/mermaid/dist/mermaid.min.js"),
            "<script src=\"https://unpkg.com/mermaid/dist/mermaid.min.js\"></script>"
        );
        assert_eq!(mermaid_script_tag(""), "");
    }

    #[test]
    fn bundled_stylesheets_present() {
        assert!(MARKDOWN_CSS.contains("body"));
        assert!(PRINT_CSS.contains(".emoji"));
    }
}
