use std::sync::OnceLock;

use syntect::{
    highlighting::ThemeSet,
    html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

/// Class prefix shared by highlighted markup and the generated theme CSS.
pub const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

pub const DEFAULT_THEME: &str = "InspiredGitHub";

/// Syntax and theme definitions, loaded once per process.
pub struct Highlighter {
    syntaxes: SyntaxSet,
    themes: ThemeSet,
}

impl Highlighter {
    pub fn global() -> &'static Highlighter {
        static HIGHLIGHTER: OnceLock<Highlighter> = OnceLock::new();
        HIGHLIGHTER.get_or_init(|| Highlighter {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            themes: ThemeSet::load_defaults(),
        })
    }

    /// Class-annotated markup for `code`, or `None` for an unknown language.
    pub fn highlight(&self, language: &str, code: &str) -> Result<Option<String>, syntect::Error> {
        let Some(syntax) = self.find_syntax(language) else {
            return Ok(None);
        };

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntaxes, CLASS_STYLE);
        for line in LinesWithEndings::from(code) {
            generator.parse_html_for_line_which_includes_newline(line)?;
        }
        Ok(Some(generator.finalize()))
    }

    /// Stylesheet for a bundled theme, `None` when no theme has that name.
    pub fn theme_css(&self, name: &str) -> Result<Option<String>, syntect::Error> {
        let name = if name.is_empty() { DEFAULT_THEME } else { name };
        let Some(theme) = self.themes.themes.get(name) else {
            return Ok(None);
        };
        css_for_theme_with_class_style(theme, CLASS_STYLE).map(Some)
    }

    /// Bundled theme names, sorted.
    pub fn theme_names(&self) -> impl Iterator<Item = &str> {
        self.themes.themes.keys().map(String::as_str)
    }

    fn find_syntax(&self, token: &str) -> Option<&SyntaxReference> {
        let lowercase = token.trim().to_ascii_lowercase();
        if lowercase.is_empty() {
            return None;
        }
        self.syntaxes
            .find_syntax_by_token(&lowercase)
            .or_else(|| self.syntaxes.find_syntax_by_name(token.trim()))
            .or_else(|| self.syntaxes.find_syntax_by_extension(&lowercase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_language_is_highlighted() {
        let html = Highlighter::global()
            .highlight("rust", "fn main() {}\n")
            .unwrap()
            .unwrap();
        assert!(html.contains("hl-"));
        assert!(html.contains("main"));
    }

    #[test]
    fn unknown_language_is_none() {
        let result = Highlighter::global()
            .highlight("definitely-not-a-language", "x")
            .unwrap();
        assert!(result.is_none());
        assert!(Highlighter::global().highlight("  ", "x").unwrap().is_none());
    }

    #[test]
    fn markup_is_escaped() {
        let html = Highlighter::global()
            .highlight("html", "<b>&</b>\n")
            .unwrap()
            .unwrap();
        assert!(html.contains("&lt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn default_theme_css() {
        let css = Highlighter::global().theme_css("").unwrap().unwrap();
        assert!(css.contains(".hl-"));
        assert!(Highlighter::global().theme_css("no-such-theme").unwrap().is_none());
        assert!(Highlighter::global().theme_names().any(|name| name == DEFAULT_THEME));
    }
}
