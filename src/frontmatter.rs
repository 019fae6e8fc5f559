use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Per-document overrides read from a leading `---` YAML block.
///
/// Only the keys listed in [`crate::config::FRONT_MATTER_KEYS`] take part in
/// option resolution; anything else in the block is accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMatter {
    #[serde(default)]
    pub breaks: Option<bool>,
    #[serde(default)]
    pub emoji: Option<bool>,
    #[serde(default)]
    pub plantuml_open_marker: Option<String>,
    #[serde(default)]
    pub plantuml_close_marker: Option<String>,
}

impl FrontMatter {
    /// The highest-precedence configuration layer for this document.
    pub fn to_layer(&self) -> Map<String, Value> {
        let mut layer = Map::new();
        if let Some(breaks) = self.breaks {
            layer.insert("breaks".to_string(), Value::Bool(breaks));
        }
        if let Some(emoji) = self.emoji {
            layer.insert("emoji".to_string(), Value::Bool(emoji));
        }
        if let Some(marker) = &self.plantuml_open_marker {
            layer.insert("plantumlOpenMarker".to_string(), Value::String(marker.clone()));
        }
        if let Some(marker) = &self.plantuml_close_marker {
            layer.insert("plantumlCloseMarker".to_string(), Value::String(marker.clone()));
        }
        layer
    }
}

#[derive(Debug, Clone)]
pub struct ParsedMarkdown {
    pub frontmatter: FrontMatter,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FrontMatterError {
    #[error("front-matter must have opening and closing ---")]
    Unclosed,
    #[error("front-matter yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub fn split_frontmatter(input: &str) -> Result<ParsedMarkdown, FrontMatterError> {
    let normalized = input.trim_start_matches('\u{feff}');
    let mut lines = normalized.lines();
    let first = lines.next();

    if first.map(str::trim_end) != Some("---") {
        return Ok(ParsedMarkdown {
            frontmatter: FrontMatter::default(),
            body: normalized.to_string(),
        });
    }

    let mut block = String::new();
    let mut found_end = false;
    let mut remaining_lines: Vec<&str> = Vec::new();

    for line in lines {
        if !found_end {
            if line.trim_end() == "---" {
                found_end = true;
                continue;
            }
            block.push_str(line);
            block.push('\n');
        } else {
            remaining_lines.push(line);
        }
    }

    if !found_end {
        return Err(FrontMatterError::Unclosed);
    }

    let frontmatter = if block.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str(&block)?
    };

    Ok(ParsedMarkdown {
        frontmatter,
        body: remaining_lines.join("\n"),
    })
}
