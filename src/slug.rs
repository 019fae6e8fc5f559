use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters `encodeURI` leaves alone, plus `%` because every `%` that
/// survives punctuation stripping starts a well-formed escape.
const SLUG_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#')
    .remove(b'%');

const CJK_PUNCTUATION: &str = "。，、；：？！…—·ˉ¨‘’“”々～‖∶＂＇｀｜〃〔〕〈〉《》「」『』．〖〗【】（）［］｛｝";

/// Turn heading text into an anchor id.
///
/// The result is stable under repeated application: escapes produced by a
/// previous pass are recognised and kept rather than stripped as `%`.
pub fn slugify(heading: &str) -> String {
    let lowered = heading.trim().to_lowercase();

    let mut hyphenated = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                hyphenated.push('-');
            }
            in_whitespace = true;
        } else {
            in_whitespace = false;
            hyphenated.push(ch);
        }
    }

    let chars: Vec<char> = hyphenated.chars().collect();
    let mut kept = String::with_capacity(hyphenated.len());
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        if ch == '%'
            && let (Some(high), Some(low)) = (chars.get(index + 1), chars.get(index + 2))
            && high.is_ascii_hexdigit()
            && low.is_ascii_hexdigit()
        {
            kept.push('%');
            kept.push(high.to_ascii_uppercase());
            kept.push(low.to_ascii_uppercase());
            index += 3;
            continue;
        }
        if !is_stripped(ch) {
            kept.push(ch);
        }
        index += 1;
    }

    let trimmed = kept.trim_matches('-');
    utf8_percent_encode(trimmed, SLUG_ENCODE_SET).to_string()
}

fn is_stripped(ch: char) -> bool {
    matches!(
        ch,
        ']' | '['
            | '!'
            | '\''
            | '#'
            | '$'
            | '%'
            | '&'
            | '('
            | ')'
            | '*'
            | '+'
            | ','
            | '.'
            | '/'
            | ':'
            | ';'
            | '<'
            | '='
            | '>'
            | '?'
            | '@'
            | '\\'
            | '^'
            | '_'
            | '{'
            | '|'
            | '}'
            | '~'
            | '`'
    ) || CJK_PUNCTUATION.contains(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_heading() {
        assert_eq!(slugify("Hello World!"), "hello-world");
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(slugify("  a \t  b\nc  "), "a-b-c");
    }

    #[test]
    fn ascii_punctuation_removed() {
        assert_eq!(slugify("What's new in v1.2? (beta)"), "whats-new-in-v12-beta");
        assert_eq!(slugify("foo_bar::baz"), "foobarbaz");
    }

    #[test]
    fn leading_and_trailing_hyphens_stripped() {
        assert_eq!(slugify("- item -"), "item");
        assert_eq!(slugify("--x--"), "x");
    }

    #[test]
    fn hyphens_inside_are_kept() {
        assert_eq!(slugify("a - b"), "a---b");
    }

    #[test]
    fn cjk_punctuation_removed_and_encoded() {
        assert_eq!(
            slugify("你好，世界"),
            "%E4%BD%A0%E5%A5%BD%E4%B8%96%E7%95%8C"
        );
        assert_eq!(slugify("【注意】"), "%E6%B3%A8%E6%84%8F");
    }

    #[test]
    fn double_quotes_are_escaped() {
        assert_eq!(slugify("\"quoted\""), "%22quoted%22");
    }

    #[test]
    fn stray_percent_is_stripped() {
        assert_eq!(slugify("100% done"), "100-done");
    }

    #[test]
    fn percent_hex_sequence_is_kept_as_escape() {
        // Indistinguishable from an escape written by a previous pass.
        assert_eq!(slugify("50%ab off"), "50%AB-off");
        assert_eq!(slugify(&slugify("50%ab off")), "50%AB-off");
        assert_eq!(slugify("50%az off"), "50az-off");
    }

    #[test]
    fn idempotent() {
        let headings = [
            "Hello World!",
            "Café au lait",
            "你好，世界",
            "\"quoted\" text",
            "a - b",
            "Section 1.2: Setup & Install",
            "100% done",
            "Ünïcödé Ωmega",
        ];
        for heading in headings {
            let once = slugify(heading);
            assert_eq!(slugify(&once), once, "heading: {heading}");
        }
    }

    #[test]
    fn empty_heading() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}
