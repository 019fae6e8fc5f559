//! Settings files, layered option lookup and the typed option set.
//!
//! Settings are read from VS Code style `settings.json` files. Every option
//! lives under the `markdown-pdf` section; `markdown.styles` is the one key
//! read from the host Markdown section.

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::frontmatter::FrontMatter;

pub const SECTION: &str = "markdown-pdf";
const HOST_STYLES_KEY: &str = "markdown.styles";
const USER_SETTINGS: &str = "~/.config/mdprint/settings.json";

/// Keys a document may override in its own front-matter.
pub const FRONT_MATTER_KEYS: [&str; 4] =
    ["breaks", "emoji", "plantumlOpenMarker", "plantumlCloseMarker"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Html,
    Pdf,
    Png,
    Jpeg,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::Html, Format::Pdf, Format::Png, Format::Jpeg];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Whether producing this format needs the headless engine.
    pub fn uses_engine(self) -> bool {
        !matches!(self, Self::Html)
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} is not a supported output type")]
pub struct UnsupportedFormat(pub String);

impl FromStr for Format {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "pdf" => Ok(Self::Pdf),
            "png" => Ok(Self::Png),
            "jpeg" => Ok(Self::Jpeg),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings in {origin} must be a JSON object")]
    NotAnObject { origin: String },
    #[error("invalid value for `markdown-pdf.{key}`: {message}")]
    InvalidValue { key: String, message: String },
    #[error("no value or default for `markdown-pdf.{0}`")]
    MissingDefault(String),
}

/// Merged contents of the settings files that apply to a workspace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    tree: Map<String, Value>,
}

impl Settings {
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Ok(Self {
                tree: expand_dotted(map),
            }),
            _ => Err(ConfigError::NotAnObject {
                origin: "settings value".to_string(),
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(map) => Ok(Self {
                tree: expand_dotted(map),
            }),
            _ => Err(ConfigError::NotAnObject {
                origin: path.display().to_string(),
            }),
        }
    }

    /// User settings, overlaid by the explicit file or the workspace file.
    pub fn discover(
        explicit: Option<&Path>,
        workspace_root: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let user = PathBuf::from(shellexpand::tilde(USER_SETTINGS).as_ref());
        if user.is_file() {
            settings.merge(Self::load(&user)?);
            tracing::debug!(path = %user.display(), "loaded user settings");
        }

        let overlay = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => workspace_root
                .map(|root| root.join(".vscode").join("settings.json"))
                .filter(|path| path.is_file()),
        };
        if let Some(path) = overlay {
            settings.merge(Self::load(&path)?);
            tracing::debug!(path = %path.display(), "loaded workspace settings");
        }

        Ok(settings)
    }

    /// Deep-merge `other` on top of `self`.
    pub fn merge(&mut self, other: Settings) {
        merge_maps(&mut self.tree, other.tree);
    }

    /// The `markdown-pdf` section.
    pub fn section(&self) -> Map<String, Value> {
        match self.tree.get(SECTION) {
            Some(Value::Object(section)) => section.clone(),
            _ => Map::new(),
        }
    }

    /// `markdown.styles` from the host Markdown settings.
    pub fn host_styles(&self) -> Vec<String> {
        lookup(&self.tree, HOST_STYLES_KEY)
            .and_then(|value| serde_json::from_value::<Vec<String>>(value.clone()).ok())
            .unwrap_or_default()
    }
}

fn expand_dotted(map: Map<String, Value>) -> Map<String, Value> {
    let mut expanded = Map::new();
    for (key, value) in map {
        let value = match value {
            Value::Object(inner) => Value::Object(expand_dotted(inner)),
            other => other,
        };
        let segments: Vec<&str> = key.split('.').collect();
        let Some((head, rest)) = segments.split_first() else {
            continue;
        };
        let nested = rest.iter().rev().fold(value, |inner, segment| {
            let mut wrapper = Map::new();
            wrapper.insert((*segment).to_string(), inner);
            Value::Object(wrapper)
        });
        let mut single = Map::new();
        single.insert((*head).to_string(), nested);
        merge_maps(&mut expanded, single);
    }
    expanded
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) => {
                if let Some(Value::Object(existing)) = base.get_mut(&key) {
                    merge_maps(existing, incoming);
                } else {
                    base.insert(key, Value::Object(incoming));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Nearest ancestor of `document` that holds `.vscode` or `.git`.
pub fn find_workspace_root(document: &Path) -> Option<PathBuf> {
    let start = if document.is_dir() {
        document
    } else {
        document.parent()?
    };
    start
        .ancestors()
        .find(|dir| dir.join(".vscode").is_dir() || dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Built-in value for every recognized option.
pub fn defaults() -> Map<String, Value> {
    let value = json!({
        "type": ["pdf"],
        "convertOnSave": false,
        "convertOnSaveExclude": [],
        "outputDirectory": "",
        "outputDirectoryRelativePathFile": false,
        "styles": [],
        "stylesRelativePathFile": false,
        "includeDefaultStyles": true,
        "highlight": true,
        "highlightStyle": "",
        "breaks": false,
        "emoji": true,
        "executablePath": "",
        "scale": 1,
        "displayHeaderFooter": true,
        "headerTemplate": "<div style=\"font-size: 9px; margin-left: 1cm;\"> <span class='title'></span></div> <div style=\"font-size: 9px; margin-left: auto; margin-right: 1cm; \"> <span class='date'></span></div>",
        "footerTemplate": "<div style=\"font-size: 9px; margin: 0 auto;\"> <span class='pageNumber'></span> / <span class='totalPages'></span></div>",
        "printBackground": true,
        "orientation": "portrait",
        "pageRanges": "",
        "format": "A4",
        "width": "",
        "height": "",
        "margin": {
            "top": "1.5cm",
            "right": "1cm",
            "bottom": "1cm",
            "left": "1cm"
        },
        "quality": 100,
        "clip": {
            "x": null,
            "y": null,
            "width": null,
            "height": null
        },
        "omitBackground": false,
        "plantumlOpenMarker": "@startuml",
        "plantumlCloseMarker": "@enduml",
        "plantumlServer": "http://www.plantuml.com/plantuml",
        "mermaidServer": "https://unpkg.com/mermaid/dist/mermaid.min.js",
        "markdown-it-include": {
            "enable": true
        },
        "StatusbarMessageTimeout": 10000,
        "debug": false,
        "localMirror": false
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Front-matter over settings over defaults, resolved per key.
#[derive(Debug, Clone, Default)]
pub struct Layers {
    front_matter: Map<String, Value>,
    settings: Map<String, Value>,
    defaults: Map<String, Value>,
}

impl Layers {
    pub fn new(
        front_matter: Map<String, Value>,
        settings: Map<String, Value>,
        defaults: Map<String, Value>,
    ) -> Self {
        Self {
            front_matter,
            settings,
            defaults,
        }
    }

    pub fn for_document(settings: &Settings, front_matter: &FrontMatter) -> Self {
        Self::new(front_matter.to_layer(), settings.section(), defaults())
    }

    fn front_matter_value(&self, key: &str) -> Option<&Value> {
        if !FRONT_MATTER_KEYS.contains(&key) {
            return None;
        }
        lookup(&self.front_matter, key).filter(|value| is_present(value))
    }

    /// The winning raw value for `key`, if any layer has one.
    pub fn value(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.front_matter_value(key)
            && *value != Value::Bool(false)
        {
            return Some(value);
        }
        lookup(&self.settings, key)
            .filter(|value| is_present(value))
            .or_else(|| lookup(&self.defaults, key).filter(|value| is_present(value)))
    }

    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.value(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.optional(key)?
            .ok_or_else(|| ConfigError::MissingDefault(key.to_string()))
    }

    /// Boolean lookup where a front-matter `false` wins over everything.
    pub fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        if let Some(Value::Bool(value)) = self.front_matter_value(key) {
            return Ok(*value);
        }
        match self.value(key) {
            Some(Value::Bool(value)) => Ok(*value),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected true or false, found {other}"),
            }),
            None => Ok(false),
        }
    }

    /// String lookup that also accepts numbers (`"margin.top": 20`).
    pub fn text(&self, key: &str) -> Result<String, ConfigError> {
        match self.value(key) {
            None => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a string, found {other}"),
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Margins {
    pub top: String,
    pub right: String,
    pub bottom: String,
    pub left: String,
}

/// Paper selection after width/height have been considered.
#[derive(Debug, Clone, PartialEq)]
pub enum PageSize {
    Named(String),
    Custom { width: String, height: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub scale: f64,
    pub display_header_footer: bool,
    pub header_template: String,
    pub footer_template: String,
    pub print_background: bool,
    pub orientation: String,
    pub page_ranges: String,
    pub format: String,
    pub width: String,
    pub height: String,
    pub margin: Margins,
}

impl PdfOptions {
    /// Explicit width or height replace the named format; a missing side is
    /// filled with US Letter dimensions.
    pub fn page_size(&self) -> PageSize {
        if self.width.is_empty() && self.height.is_empty() {
            return PageSize::Named(self.format.clone());
        }
        let side = |value: &str, fallback: &str| {
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        PageSize::Custom {
            width: side(&self.width, "8.5in"),
            height: side(&self.height, "11in"),
        }
    }

    pub fn landscape(&self) -> bool {
        self.orientation.eq_ignore_ascii_case("landscape")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub quality: u8,
    pub clip_x: Option<f64>,
    pub clip_y: Option<f64>,
    pub clip_width: Option<f64>,
    pub clip_height: Option<f64>,
    pub omit_background: bool,
}

impl ImageOptions {
    /// A clip region only when all four fields are set.
    pub fn clip(&self) -> Option<Clip> {
        Some(Clip {
            x: self.clip_x?,
            y: self.clip_y?,
            width: self.clip_width?,
            height: self.clip_height?,
        })
    }

    pub fn quality_for(&self, format: Format) -> Option<u8> {
        matches!(format, Format::Jpeg).then_some(self.quality)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantumlOptions {
    pub open_marker: String,
    pub close_marker: String,
    pub server: String,
}

/// Every option resolved to exactly one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub formats: Vec<String>,
    pub convert_on_save: bool,
    pub convert_on_save_exclude: Vec<String>,
    pub output_directory: String,
    pub output_directory_relative_path_file: bool,
    pub styles: Vec<String>,
    pub styles_relative_path_file: bool,
    pub include_default_styles: bool,
    pub host_styles: Vec<String>,
    pub highlight: bool,
    pub highlight_style: String,
    pub breaks: bool,
    pub emoji: bool,
    pub executable_path: String,
    pub pdf: PdfOptions,
    pub image: ImageOptions,
    pub plantuml: PlantumlOptions,
    pub mermaid_server: String,
    pub include_enabled: bool,
    pub status_timeout: Duration,
    pub debug: bool,
    pub local_mirror: bool,
}

impl EffectiveOptions {
    pub fn resolve(layers: &Layers, host_styles: Vec<String>) -> Result<Self, ConfigError> {
        let formats = match layers.get::<OneOrMany>("type")? {
            OneOrMany::One(single) => vec![single],
            OneOrMany::Many(many) => many,
        };

        let quality: f64 = layers.get("quality")?;

        Ok(Self {
            formats,
            convert_on_save: layers.flag("convertOnSave")?,
            convert_on_save_exclude: layers.get("convertOnSaveExclude")?,
            output_directory: layers.text("outputDirectory")?,
            output_directory_relative_path_file: layers.flag("outputDirectoryRelativePathFile")?,
            styles: layers.get("styles")?,
            styles_relative_path_file: layers.flag("stylesRelativePathFile")?,
            include_default_styles: layers.flag("includeDefaultStyles")?,
            host_styles,
            highlight: layers.flag("highlight")?,
            highlight_style: layers.text("highlightStyle")?,
            breaks: layers.flag("breaks")?,
            emoji: layers.flag("emoji")?,
            executable_path: layers.text("executablePath")?,
            pdf: PdfOptions {
                scale: layers.get("scale")?,
                display_header_footer: layers.flag("displayHeaderFooter")?,
                header_template: layers.text("headerTemplate")?,
                footer_template: layers.text("footerTemplate")?,
                print_background: layers.flag("printBackground")?,
                orientation: layers.text("orientation")?,
                page_ranges: layers.text("pageRanges")?,
                format: layers.text("format")?,
                width: layers.text("width")?,
                height: layers.text("height")?,
                margin: Margins {
                    top: layers.text("margin.top")?,
                    right: layers.text("margin.right")?,
                    bottom: layers.text("margin.bottom")?,
                    left: layers.text("margin.left")?,
                },
            },
            image: ImageOptions {
                quality: quality.clamp(0.0, 100.0).round() as u8,
                clip_x: layers.optional("clip.x")?,
                clip_y: layers.optional("clip.y")?,
                clip_width: layers.optional("clip.width")?,
                clip_height: layers.optional("clip.height")?,
                omit_background: layers.flag("omitBackground")?,
            },
            plantuml: PlantumlOptions {
                open_marker: layers.text("plantumlOpenMarker")?,
                close_marker: layers.text("plantumlCloseMarker")?,
                server: layers.text("plantumlServer")?,
            },
            mermaid_server: layers.text("mermaidServer")?,
            include_enabled: layers.flag("markdown-it-include.enable")?,
            status_timeout: Duration::from_millis(layers.get("StatusbarMessageTimeout")?),
            debug: layers.flag("debug")?,
            local_mirror: layers.flag("localMirror")?,
        })
    }

    pub fn for_document(settings: &Settings, front_matter: &FrontMatter) -> Result<Self, ConfigError> {
        Self::resolve(
            &Layers::for_document(settings, front_matter),
            settings.host_styles(),
        )
    }

    /// The `type` tokens as formats, deduplicated in order.
    pub fn requested_formats(&self) -> Result<Vec<Format>, UnsupportedFormat> {
        let mut formats = Vec::with_capacity(self.formats.len());
        for token in &self.formats {
            let format: Format = token.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}
