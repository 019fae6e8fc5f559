//! Resolution of asset references, stylesheet hrefs and output locations.
//!
//! Image sources go through [`resolve_image_path`], which keeps references
//! untouched for the live `html` output and turns everything that points at
//! the filesystem into a `file:` URL for the standalone renderer.

use std::fs;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use crate::config::Format;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed percent-encoding in `{reference}` at byte {position}")]
pub struct DecodeError {
    pub reference: String,
    pub position: usize,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error(
        "the output directory `{}` does not exist; check the markdown-pdf.outputDirectory setting",
        .0.display()
    )]
    MissingDirectory(PathBuf),
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub source_path: &'a Path,
    pub format: Format,
}

/// Normalize an image reference for the given output format.
pub fn resolve_image_path(
    reference: &str,
    context: &ResolveContext<'_>,
) -> Result<String, DecodeError> {
    let decoded = percent_decode_strict(reference)?;
    let unquoted: String = decoded.chars().filter(|c| !matches!(c, '"' | '\'')).collect();

    if context.format == Format::Html {
        return Ok(strip_current_dir(&unquoted).to_string());
    }

    let href = unquoted.replace('\\', "/").replace('#', "%23");
    match scheme_of(&href) {
        Some(scheme) if scheme.eq_ignore_ascii_case("file") => {
            if href.starts_with("file:///") {
                Ok(href)
            } else if let Some(rest) = href.strip_prefix("file://") {
                Ok(format!("file:///{rest}"))
            } else {
                Ok(href)
            }
        }
        Some(scheme) if scheme.len() > 1 => Ok(reference.to_string()),
        _ => {
            let resolved = resolve_against_document(&href, context.source_path).replace('#', "%23");
            Ok(to_file_url(&resolved))
        }
    }
}

fn strip_current_dir(reference: &str) -> &str {
    let mut rest = reference;
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest
}

/// Decode `%XX` escapes, rejecting truncated escapes and invalid UTF-8.
fn percent_decode_strict(reference: &str) -> Result<String, DecodeError> {
    let malformed = |position| DecodeError {
        reference: reference.to_string(),
        position,
    };
    // percent_decode_str passes a stray `%` through unchanged.
    let bytes = reference.as_bytes();
    if let Some(position) = bytes.iter().enumerate().position(|(index, byte)| {
        *byte == b'%'
            && !bytes
                .get(index + 1..index + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit))
    }) {
        return Err(malformed(position));
    }

    percent_decode_str(reference)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| malformed(err.valid_up_to()))
}

/// The URL scheme of `reference`, if it starts with one.
///
/// A one-letter scheme is a Windows drive letter (`C:/images/a.png`).
pub(crate) fn scheme_of(reference: &str) -> Option<&str> {
    let colon = reference.find(':')?;
    let candidate = &reference[..colon];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(candidate)
    } else {
        None
    }
}

fn resolve_against_document(href: &str, source_path: &Path) -> String {
    if let Some(unc) = href.strip_prefix("//") {
        return format!("//{}", collapse_segments(unc));
    }

    let is_drive = scheme_of(href).is_some_and(|scheme| scheme.len() == 1);
    let joined = if href.starts_with('/') || is_drive {
        href.to_string()
    } else {
        let dir = source_path
            .parent()
            .map(|dir| dir.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        format!("{}/{href}", dir.trim_end_matches('/'))
    };

    if let Some(rest) = joined.strip_prefix('/') {
        format!("/{}", collapse_segments(rest))
    } else if let Some((drive, rest)) = joined.split_once(':')
        && drive.len() == 1
    {
        format!("{drive}:/{}", collapse_segments(rest.trim_start_matches('/')))
    } else {
        collapse_segments(&joined)
    }
}

fn collapse_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn to_file_url(path: &str) -> String {
    if path.starts_with("//") {
        format!("file:{path}")
    } else if path.starts_with('/') {
        format!("file://{path}")
    } else {
        format!("file:///{path}")
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Build a `file://` URL for an absolute path.
pub fn file_uri(path: &Path) -> String {
    let normalized = normalize_lexically(path);
    Url::from_file_path(&normalized)
        .map(String::from)
        .unwrap_or_else(|()| format!("file://{}", normalized.display()))
}

#[derive(Debug, Clone, Copy)]
pub struct HrefContext<'a> {
    pub source_path: &'a Path,
    pub workspace_root: Option<&'a Path>,
    /// `markdown-pdf.stylesRelativePathFile`
    pub relative_to_document: bool,
}

/// Resolve a stylesheet entry into something usable as a `<link href>`.
pub fn fix_href(href: &str, context: &HrefContext<'_>) -> String {
    if href.is_empty() {
        return String::new();
    }

    if scheme_of(href).is_some_and(|s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https")) {
        return href.to_string();
    }

    if href.starts_with('~') {
        return file_uri(Path::new(shellexpand::tilde(href).as_ref()));
    }

    let path = Path::new(href);
    if path.is_absolute() {
        return file_uri(path);
    }

    if !context.relative_to_document
        && let Some(root) = context.workspace_root
    {
        return file_uri(&root.join(path));
    }

    let dir = context.source_path.parent().unwrap_or_else(|| Path::new(""));
    file_uri(&dir.join(path))
}

#[derive(Debug, Clone, Copy)]
pub struct OutputDirectory<'a> {
    /// `markdown-pdf.outputDirectory`; empty means next to the source.
    pub directory: &'a str,
    /// `markdown-pdf.outputDirectoryRelativePathFile`
    pub relative_to_document: bool,
    pub workspace_root: Option<&'a Path>,
}

/// Where the artifact for `source` in `format` is written.
///
/// Home-relative, workspace-relative and document-relative directories are
/// created on demand; an absolute directory must already exist.
pub fn output_path(
    source: &Path,
    format: Format,
    output: &OutputDirectory<'_>,
) -> Result<PathBuf, OutputError> {
    let target = source.with_extension(format.extension());
    if output.directory.is_empty() {
        return Ok(target);
    }

    let file_name = target.file_name().map(PathBuf::from).unwrap_or_default();

    if output.directory.starts_with('~') {
        let dir = PathBuf::from(shellexpand::tilde(output.directory).as_ref());
        create_dir(&dir)?;
        return Ok(dir.join(file_name));
    }

    let configured = Path::new(output.directory);
    if configured.is_absolute() {
        if !configured.is_dir() {
            return Err(OutputError::MissingDirectory(configured.to_path_buf()));
        }
        return Ok(configured.join(file_name));
    }

    let base = match output.workspace_root {
        Some(root) if !output.relative_to_document => root.to_path_buf(),
        _ => source.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let dir = normalize_lexically(&base.join(configured));
    create_dir(&dir)?;
    Ok(dir.join(file_name))
}

fn create_dir(dir: &Path) -> Result<(), OutputError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|source| OutputError::CreateDirectory {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_context(source: &Path) -> ResolveContext<'_> {
        ResolveContext {
            source_path: source,
            format: Format::Pdf,
        }
    }

    #[test]
    fn absolute_path_becomes_three_slash_file_url() {
        let source = Path::new("/docs/guide/doc.md");
        let resolved = resolve_image_path("/abs/img.png", &pdf_context(source)).unwrap();
        assert_eq!(resolved, "file:///abs/img.png");
    }

    #[test]
    fn relative_path_resolves_against_document() {
        let source = Path::new("/docs/guide/doc.md");
        let context = pdf_context(source);
        assert_eq!(
            resolve_image_path("./img.png", &context).unwrap(),
            "file:///docs/guide/img.png"
        );
        assert_eq!(
            resolve_image_path("../shared/a%20b.png", &context).unwrap(),
            "file:///docs/shared/a b.png"
        );
    }

    #[test]
    fn unc_path_keeps_double_slash() {
        let source = Path::new("/docs/doc.md");
        let resolved = resolve_image_path("//server/share/x.png", &pdf_context(source)).unwrap();
        assert_eq!(resolved, "file://server/share/x.png");
    }

    #[test]
    fn windows_drive_path() {
        let source = Path::new("/docs/doc.md");
        let resolved = resolve_image_path("C:\\images\\x.png", &pdf_context(source)).unwrap();
        assert_eq!(resolved, "file:///C:/images/x.png");
    }

    #[test]
    fn file_scheme_normalized_to_three_slashes() {
        let source = Path::new("/docs/doc.md");
        let context = pdf_context(source);
        assert_eq!(
            resolve_image_path("file://host/a.png", &context).unwrap(),
            "file:///host/a.png"
        );
        assert_eq!(
            resolve_image_path("file:///a.png", &context).unwrap(),
            "file:///a.png"
        );
    }

    #[test]
    fn hash_is_reescaped() {
        let source = Path::new("/docs/doc.md");
        let resolved = resolve_image_path("img%23one.png", &pdf_context(source)).unwrap();
        assert_eq!(resolved, "file:///docs/img%23one.png");
    }

    #[test]
    fn quotes_are_stripped() {
        let source = Path::new("/docs/doc.md");
        let resolved = resolve_image_path("\"img.png\"", &pdf_context(source)).unwrap();
        assert_eq!(resolved, "file:///docs/img.png");
    }

    #[test]
    fn http_passes_through_unchanged() {
        let source = Path::new("/docs/doc.md");
        let reference = "https://example.com/a%20b.png#frag";
        assert_eq!(
            resolve_image_path(reference, &pdf_context(source)).unwrap(),
            reference
        );
    }

    #[test]
    fn data_uri_passes_through_unchanged() {
        let source = Path::new("/docs/doc.md");
        let reference = "data:image/png;base64,AAAA";
        assert_eq!(
            resolve_image_path(reference, &pdf_context(source)).unwrap(),
            reference
        );
    }

    #[test]
    fn html_target_only_decodes() {
        let source = Path::new("/docs/doc.md");
        let context = ResolveContext {
            source_path: source,
            format: Format::Html,
        };
        assert_eq!(resolve_image_path("./img.png", &context).unwrap(), "img.png");
        assert_eq!(
            resolve_image_path("my%20img.png", &context).unwrap(),
            "my img.png"
        );
        assert_eq!(
            resolve_image_path("file://host/a.png", &context).unwrap(),
            "file://host/a.png"
        );
    }

    #[test]
    fn html_and_pdf_differ_for_absolute_paths() {
        let source = Path::new("/docs/doc.md");
        for reference in ["/abs/img.png", "/var/tmp/x.jpg", "//server/x.png"] {
            let html = resolve_image_path(
                reference,
                &ResolveContext {
                    source_path: source,
                    format: Format::Html,
                },
            )
            .unwrap();
            let pdf = resolve_image_path(reference, &pdf_context(source)).unwrap();
            assert_ne!(html, pdf, "reference: {reference}");
        }
    }

    #[test]
    fn malformed_escape_is_a_decode_error() {
        let source = Path::new("/docs/doc.md");
        let err = resolve_image_path("bad%zzname.png", &pdf_context(source)).unwrap_err();
        assert_eq!(err.position, 3);
        assert!(resolve_image_path("trailing%2", &pdf_context(source)).is_err());
        assert!(resolve_image_path("%ff%fe.png", &pdf_context(source)).is_err());
    }

    #[test]
    fn escapes_decode_to_utf8() {
        assert_eq!(percent_decode_strict("caf%C3%A9%20menu.png").unwrap(), "café menu.png");
        assert_eq!(percent_decode_strict("plain.png").unwrap(), "plain.png");
        let err = percent_decode_strict("ok%C3").unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(percent_decode_strict("100%").unwrap_err().position, 3);
    }

    #[test]
    fn fix_href_variants() {
        let source = Path::new("/work/docs/doc.md");
        let workspace = Path::new("/work");
        let mut context = HrefContext {
            source_path: source,
            workspace_root: Some(workspace),
            relative_to_document: false,
        };

        assert_eq!(fix_href("", &context), "");
        assert_eq!(
            fix_href("https://cdn.example.com/a.css", &context),
            "https://cdn.example.com/a.css"
        );
        assert_eq!(fix_href("/etc/a.css", &context), "file:///etc/a.css");
        assert_eq!(
            fix_href("css/theme.css", &context),
            "file:///work/css/theme.css"
        );

        context.relative_to_document = true;
        assert_eq!(
            fix_href("../css/theme.css", &context),
            "file:///work/css/theme.css"
        );
        assert_eq!(
            fix_href("theme.css", &context),
            "file:///work/docs/theme.css"
        );

        context.relative_to_document = false;
        context.workspace_root = None;
        assert_eq!(
            fix_href("theme.css", &context),
            "file:///work/docs/theme.css"
        );
    }

    #[test]
    fn fix_href_encodes_spaces() {
        let context = HrefContext {
            source_path: Path::new("/work/doc.md"),
            workspace_root: None,
            relative_to_document: true,
        };
        assert_eq!(
            fix_href("my styles.css", &context),
            "file:///work/my%20styles.css"
        );
    }

    #[test]
    fn output_next_to_source_by_default() {
        let output = OutputDirectory {
            directory: "",
            relative_to_document: false,
            workspace_root: None,
        };
        let path = output_path(Path::new("/docs/doc.md"), Format::Pdf, &output).unwrap();
        assert_eq!(path, PathBuf::from("/docs/doc.pdf"));
    }

    #[test]
    fn output_document_and_workspace_relative() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        let source = workspace.join("notes").join("doc.md");

        let document_relative = OutputDirectory {
            directory: "out",
            relative_to_document: true,
            workspace_root: Some(workspace),
        };
        let path = output_path(&source, Format::Png, &document_relative).unwrap();
        assert_eq!(path, workspace.join("notes").join("out").join("doc.png"));
        assert!(workspace.join("notes").join("out").is_dir());

        let workspace_relative = OutputDirectory {
            directory: "build",
            relative_to_document: false,
            workspace_root: Some(workspace),
        };
        let path = output_path(&source, Format::Jpeg, &workspace_relative).unwrap();
        assert_eq!(path, workspace.join("build").join("doc.jpeg"));
    }

    #[test]
    fn missing_absolute_output_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let missing = missing.to_string_lossy().into_owned();
        let output = OutputDirectory {
            directory: &missing,
            relative_to_document: false,
            workspace_root: None,
        };
        let err = output_path(Path::new("/docs/doc.md"), Format::Html, &output).unwrap_err();
        assert!(matches!(err, OutputError::MissingDirectory(_)));
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/./../c")),
            PathBuf::from("/a/c")
        );
    }
}
