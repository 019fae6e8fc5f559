//! Source-level extensions applied before the Markdown parser sees the text:
//! file inclusion, generic `:::` containers and PlantUML blocks.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine as _;
use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use regex::Regex;

use super::{ConvertError, escape_html};
use crate::config::PlantumlOptions;
use crate::paths::normalize_lexically;

static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\[[^\]]+\]\(([^)]+\.[^)]+)\)").unwrap());

const PLANTUML_ALPHABET: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

static PLANTUML_BASE64: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    GeneralPurpose::new(&Alphabet::new(PLANTUML_ALPHABET).unwrap(), general_purpose::NO_PAD)
});

/// Replace `:[alt](path.ext)` with the referenced file, recursively.
pub fn expand_includes(markdown: &str, source_path: &Path) -> Result<String, ConvertError> {
    let mut stack = vec![normalize_lexically(source_path)];
    let dir = source_path.parent().unwrap_or_else(|| Path::new(""));
    include_into(markdown, dir, &mut stack)
}

fn include_into(text: &str, dir: &Path, stack: &mut Vec<PathBuf>) -> Result<String, ConvertError> {
    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;

    for caps in INCLUDE.captures_iter(text) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let path = normalize_lexically(&dir.join(target.as_str().trim()));
        if stack.contains(&path) {
            return Err(ConvertError::CircularInclude(path));
        }

        let content = fs::read_to_string(&path).map_err(|source| ConvertError::Include {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "including file");

        let nested_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        stack.push(path);
        let nested = include_into(&content, &nested_dir, stack)?;
        stack.pop();

        expanded.push_str(&text[last..whole.start()]);
        expanded.push_str(nested.trim_end_matches('\n'));
        last = whole.end();
    }

    expanded.push_str(&text[last..]);
    Ok(expanded)
}

#[derive(Debug, Clone, Copy)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let trimmed = strip_indent(line)?;
        let marker = trimmed.chars().next()?;
        if marker != '`' && marker != '~' {
            return None;
        }
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        (len >= 3).then_some(Self { marker, len })
    }

    fn closes(&self, line: &str) -> bool {
        let Some(trimmed) = strip_indent(line) else {
            return false;
        };
        let len = trimmed.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && trimmed[len * self.marker.len_utf8()..].trim().is_empty()
    }
}

/// At most three spaces of indentation, as for any block marker.
fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent <= 3).then(|| &line[indent..])
}

/// Turn `::: name` ... `:::` into `<div class="name">` HTML blocks.
pub fn expand_containers(markdown: &str) -> String {
    let mut output = String::with_capacity(markdown.len());
    let mut fence: Option<Fence> = None;
    let mut open: Vec<usize> = Vec::new();

    for line in markdown.lines() {
        if let Some(current) = fence {
            if current.closes(line) {
                fence = None;
            }
            output.push_str(line);
            output.push('\n');
            continue;
        }
        if let Some(opened) = Fence::open(line) {
            fence = Some(opened);
            output.push_str(line);
            output.push('\n');
            continue;
        }

        let marker = strip_indent(line).filter(|rest| rest.starts_with(":::"));
        let Some(rest) = marker else {
            output.push_str(line);
            output.push('\n');
            continue;
        };

        // Indentation keeps the container inside an enclosing list item.
        let indent = &line[..line.len() - rest.len()];
        let colons = rest.chars().take_while(|c| *c == ':').count();
        let info = rest[colons..].trim();
        if !info.is_empty() {
            open.push(colons);
            output.push_str(&format!("{indent}<div class=\"{}\">\n\n", escape_html(info)));
        } else if open.last().is_some_and(|len| colons >= *len) {
            open.pop();
            output.push_str(&format!("\n{indent}</div>\n\n"));
        } else {
            output.push_str(line);
            output.push('\n');
        }
    }

    for _ in open {
        output.push_str("\n</div>\n\n");
    }
    output
}

/// Replace PlantUML blocks with images served by the PlantUML server.
pub fn expand_plantuml(markdown: &str, options: &PlantumlOptions) -> Result<String, ConvertError> {
    let open_marker = options.open_marker.trim();
    let close_marker = options.close_marker.trim();
    if open_marker.is_empty() || close_marker.is_empty() {
        return Ok(markdown.to_string());
    }

    let mut output = String::with_capacity(markdown.len());
    let mut fence: Option<Fence> = None;
    let mut diagram: Option<(String, Vec<&str>)> = None;

    for line in markdown.lines() {
        if let Some((alt, body)) = diagram.as_mut() {
            if line.trim() == close_marker {
                let source = format!("@startuml\n{}\n@enduml", body.join("\n"));
                let url = format!(
                    "{}/svg/{}",
                    options.server.trim_end_matches('/'),
                    plantuml_encode(&source)?
                );
                output.push_str(&format!("\n![{alt}]({url})\n\n"));
                diagram = None;
            } else {
                body.push(line);
            }
            continue;
        }

        if let Some(current) = fence {
            if current.closes(line) {
                fence = None;
            }
        } else if let Some(opened) = Fence::open(line) {
            fence = Some(opened);
        } else if let Some(rest) = line.trim().strip_prefix(open_marker) {
            let alt = rest.trim();
            let alt = if alt.is_empty() { "uml diagram" } else { alt };
            diagram = Some((alt.to_string(), Vec::new()));
            continue;
        }

        output.push_str(line);
        output.push('\n');
    }

    // An unterminated block stays as written.
    if let Some((_, body)) = diagram {
        output.push_str(open_marker);
        output.push('\n');
        for line in body {
            output.push_str(line);
            output.push('\n');
        }
    }

    Ok(output)
}

/// Raw deflate followed by PlantUML's URL-safe base64 variant.
pub fn plantuml_encode(source: &str) -> Result<String, ConvertError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(source.as_bytes())
        .map_err(ConvertError::Diagram)?;
    let compressed = encoder.finish().map_err(ConvertError::Diagram)?;

    // The server expects whole quads; a short tail is filled with `0`.
    let mut encoded = PLANTUML_BASE64.encode(compressed);
    while encoded.len() % 4 != 0 {
        encoded.push('0');
    }
    Ok(encoded)
}
