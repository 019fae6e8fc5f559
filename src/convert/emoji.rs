use std::sync::LazyLock;

use emojis::Emoji;
use regex::Regex;

/// `:name:` shortcodes.
pub static SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([A-Za-z0-9_+\-]+):").unwrap());

/// The emoji a GitHub-style shortcode names, aliases included.
pub fn lookup(name: &str) -> Option<&'static Emoji> {
    emojis::get_by_shortcode(name)
}

/// File names an image for `name` may be stored under, the typed name first.
pub fn image_files(name: &str, emoji: &Emoji) -> Vec<String> {
    let mut files = vec![format!("{name}.png")];
    for alias in emoji.shortcodes() {
        let file = format!("{alias}.png");
        if !files.contains(&file) {
            files.push(file);
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcodes_resolve_with_aliases() {
        assert_eq!(lookup("smile").map(Emoji::as_str), Some("😄"));
        assert_eq!(lookup("+1").map(Emoji::as_str), Some("👍"));
        assert_eq!(lookup("thumbsup"), lookup("+1"));
        assert_eq!(lookup("rocket").map(Emoji::as_str), Some("🚀"));
        assert!(lookup("not_an_emoji_name").is_none());
    }

    #[test]
    fn image_candidates_include_aliases() {
        let thumbs = lookup("thumbsup").unwrap();
        let files = image_files("thumbsup", thumbs);
        assert_eq!(files[0], "thumbsup.png");
        assert!(files.contains(&"+1.png".to_string()));
    }

    #[test]
    fn shortcode_pattern() {
        let names: Vec<&str> = SHORTCODE
            .captures_iter("a :smile::+1: b :not closed")
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        assert_eq!(names, vec!["smile", "+1"]);
    }
}
