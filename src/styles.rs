use std::fs;
use std::path::Path;

use crate::config::EffectiveOptions;
use crate::convert::highlight::Highlighter;
use crate::paths::{HrefContext, fix_href};
use crate::template::{MARKDOWN_CSS, PRINT_CSS};

#[derive(Debug, Clone, Default)]
pub struct StyleOptions {
    pub include_default_styles: bool,
    /// `markdown.styles` from the host Markdown settings.
    pub host_styles: Vec<String>,
    pub highlight: bool,
    /// A bundled theme name or a path to a `.css` file.
    pub highlight_style: String,
    pub styles: Vec<String>,
}

impl From<&EffectiveOptions> for StyleOptions {
    fn from(options: &EffectiveOptions) -> Self {
        Self {
            include_default_styles: options.include_default_styles,
            host_styles: options.host_styles.clone(),
            highlight: options.highlight,
            highlight_style: options.highlight_style.clone(),
            styles: options.styles.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StyleBundle {
    pub fragments: Vec<String>,
    pub warnings: Vec<String>,
}

impl StyleBundle {
    pub fn to_html(&self) -> String {
        self.fragments.concat()
    }
}

/// Collect every stylesheet for a document, in cascade order.
pub fn assemble_styles(options: &StyleOptions, hrefs: &HrefContext<'_>) -> StyleBundle {
    let mut bundle = StyleBundle::default();

    if options.include_default_styles {
        bundle.fragments.push(inline_css(MARKDOWN_CSS));
        bundle
            .fragments
            .extend(links(&options.host_styles, hrefs));
    }

    if options.highlight {
        match highlight_css(&options.highlight_style, hrefs) {
            Ok(css) => bundle.fragments.push(css),
            Err(warning) => {
                tracing::warn!(style = %options.highlight_style, "{warning}");
                bundle.warnings.push(warning);
            }
        }
    }

    if options.include_default_styles {
        bundle.fragments.push(inline_css(PRINT_CSS));
    }

    bundle.fragments.extend(links(&options.styles, hrefs));
    bundle
}

fn links(entries: &[String], hrefs: &HrefContext<'_>) -> Vec<String> {
    entries
        .iter()
        .map(|entry| fix_href(entry, hrefs))
        .filter(|href| !href.is_empty())
        .map(|href| format!("\n<link rel=\"stylesheet\" href=\"{href}\" type=\"text/css\">"))
        .collect()
}

fn highlight_css(style: &str, hrefs: &HrefContext<'_>) -> Result<String, String> {
    if style.to_ascii_lowercase().ends_with(".css") {
        let path = css_file_path(style, hrefs);
        return Ok(inline_css_file(&path));
    }

    match Highlighter::global().theme_css(style) {
        Ok(Some(css)) => Ok(inline_css(&css)),
        Ok(None) => {
            let known: Vec<&str> = Highlighter::global().theme_names().collect();
            Err(format!(
                "unknown highlight style `{style}`; bundled themes: {}",
                known.join(", ")
            ))
        }
        Err(err) => Err(format!("failed to build highlight style `{style}`: {err}")),
    }
}

fn css_file_path(style: &str, hrefs: &HrefContext<'_>) -> std::path::PathBuf {
    let expanded = shellexpand::tilde(style);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match hrefs.workspace_root {
        Some(root) if !hrefs.relative_to_document => root.join(path),
        _ => hrefs
            .source_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(path),
    }
}

pub fn inline_css(css: &str) -> String {
    format!("\n<style>\n{css}\n</style>\n")
}

/// A local stylesheet inlined; missing or empty files contribute nothing.
pub fn inline_css_file(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(css) if !css.trim().is_empty() => inline_css(&css),
        Ok(_) => String::new(),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "stylesheet not readable");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hrefs() -> HrefContext<'static> {
        HrefContext {
            source_path: Path::new("/work/docs/doc.md"),
            workspace_root: Some(Path::new("/work")),
            relative_to_document: false,
        }
    }

    fn options() -> StyleOptions {
        StyleOptions {
            include_default_styles: true,
            host_styles: vec!["host.css".to_string()],
            highlight: true,
            highlight_style: String::new(),
            styles: vec!["https://cdn.example.com/user.css".to_string()],
        }
    }

    #[test]
    fn fragments_in_cascade_order() {
        let bundle = assemble_styles(&options(), &hrefs());
        assert_eq!(bundle.fragments.len(), 5);
        assert!(bundle.fragments[0].contains(MARKDOWN_CSS.trim()));
        assert_eq!(
            bundle.fragments[1],
            "\n<link rel=\"stylesheet\" href=\"file:///work/host.css\" type=\"text/css\">"
        );
        assert!(bundle.fragments[2].contains(".hl-"));
        assert!(bundle.fragments[3].contains(PRINT_CSS.trim()));
        assert!(bundle.fragments[4].contains("https://cdn.example.com/user.css"));
        assert!(bundle.warnings.is_empty());
    }

    #[test]
    fn without_defaults_only_highlight_and_user_styles() {
        let mut options = options();
        options.include_default_styles = false;
        let bundle = assemble_styles(&options, &hrefs());
        assert_eq!(bundle.fragments.len(), 2);
        assert!(!bundle.to_html().contains("host.css"));
    }

    #[test]
    fn highlight_disabled() {
        let mut options = options();
        options.highlight = false;
        let bundle = assemble_styles(&options, &hrefs());
        assert!(!bundle.to_html().contains(".hl-"));
    }

    #[test]
    fn unknown_theme_warns() {
        let mut options = options();
        options.highlight_style = "no-such-theme".to_string();
        let bundle = assemble_styles(&options, &hrefs());
        assert_eq!(bundle.fragments.len(), 4);
        assert_eq!(bundle.warnings.len(), 1);
        assert!(bundle.warnings[0].contains("no-such-theme"));
        assert!(bundle.warnings[0].contains("InspiredGitHub"));
    }

    #[test]
    fn css_file_highlight_style() {
        let dir = tempfile::tempdir().unwrap();
        let css = dir.path().join("theme.css");
        fs::write(&css, ".hljs { color: red; }").unwrap();
        let mut options = options();
        options.highlight_style = css.to_string_lossy().into_owned();
        let bundle = assemble_styles(&options, &hrefs());
        assert!(bundle.to_html().contains(".hljs { color: red; }"));
    }

    #[test]
    fn missing_or_empty_css_file_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(inline_css_file(&dir.path().join("missing.css")), "");
        let empty = dir.path().join("empty.css");
        fs::write(&empty, "  \n").unwrap();
        assert_eq!(inline_css_file(&empty), "");
    }
}
