//! One conversion request, from document path to output files.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::Error;
use crate::config::{EffectiveOptions, Format, Settings, UnsupportedFormat, find_workspace_root};
use crate::convert::{ConvertOptions, convert_markdown_to_html};
use crate::frontmatter::{FrontMatter, ParsedMarkdown, split_frontmatter};
use crate::paths::{HrefContext, OutputDirectory, output_path};
use crate::render::{EngineInstall, RenderEngine, RenderError, RenderJob, Renderer};
use crate::report::Reporter;
use crate::styles::{StyleOptions, assemble_styles};
use crate::template::{DocumentParts, compose_document, mermaid_script_tag};

const MARKDOWN_EXTENSIONS: [&str; 9] = [
    "md", "markdown", "mdown", "mkd", "mkdn", "mdwn", "mdtxt", "mdtext", "rmd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Formats from the `type` setting.
    Settings,
    Pdf,
    Html,
    Png,
    Jpeg,
    All,
}

impl Command {
    pub fn formats(self, options: &EffectiveOptions) -> Result<Vec<Format>, UnsupportedFormat> {
        Ok(match self {
            Self::Settings => options.requested_formats()?,
            Self::Pdf => vec![Format::Pdf],
            Self::Html => vec![Format::Html],
            Self::Png => vec![Format::Png],
            Self::Jpeg => vec![Format::Jpeg],
            Self::All => Format::ALL.to_vec(),
        })
    }
}

#[derive(Debug)]
pub struct FormatFailure {
    pub format: Format,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<FormatFailure>,
}

impl ExportSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Exporter<'a> {
    pub settings: &'a Settings,
    pub engine: &'a dyn RenderEngine,
    pub install: &'a EngineInstall,
    pub reporter: &'a dyn Reporter,
    /// Overrides discovery from the document's ancestors.
    pub workspace_root: Option<&'a Path>,
    pub emoji_dir: Option<&'a Path>,
    pub lang: &'a str,
}

impl Exporter<'_> {
    /// Convert `document` into every format `command` asks for.
    ///
    /// A failing format is reported and recorded in the summary; the
    /// remaining formats still run.
    pub fn export(&self, document: Option<&Path>, command: Command) -> Result<ExportSummary, Error> {
        let document = self.check_document(document)?;

        let base = EffectiveOptions::for_document(self.settings, &FrontMatter::default())
            .inspect_err(|err| self.reporter.error(&err.to_string()))?;
        let formats = command
            .formats(&base)
            .inspect_err(|err| self.reporter.error(&err.to_string()))?;

        let workspace_root = self
            .workspace_root
            .map(Path::to_path_buf)
            .or_else(|| find_workspace_root(&document));

        let mut summary = ExportSummary::default();
        for format in formats {
            self.reporter
                .status(&format!("Converting ({format}) ..."), base.status_timeout);
            match self.export_format(&document, format, workspace_root.as_deref()) {
                Ok((output, options)) => {
                    tracing::info!(format = %format, output = %output.display(), "exported");
                    self.reporter
                        .status(&format!("OUTPUT : {}", output.display()), options.status_timeout);
                    summary.outputs.push(output);
                }
                Err(error) => {
                    self.reporter.error(&format!("{format}: {error}"));
                    summary.failures.push(FormatFailure { format, error });
                }
            }
        }
        Ok(summary)
    }

    fn check_document(&self, document: Option<&Path>) -> Result<PathBuf, Error> {
        let Some(document) = document else {
            return Err(self.precondition("No active Markdown document!"));
        };
        if !is_markdown(document) {
            return Err(self.precondition("It is not a markdown mode!"));
        }
        if !document.is_file() {
            return Err(self.precondition("Please save the file!"));
        }
        Ok(document
            .canonicalize()
            .unwrap_or_else(|_| document.to_path_buf()))
    }

    fn precondition(&self, message: &str) -> Error {
        self.reporter.warn(message);
        Error::Precondition(message.to_string())
    }

    fn export_format(
        &self,
        document: &Path,
        format: Format,
        workspace_root: Option<&Path>,
    ) -> Result<(PathBuf, EffectiveOptions), Error> {
        let source = fs::read_to_string(document).map_err(|source| Error::Read {
            path: document.to_path_buf(),
            source,
        })?;
        let ParsedMarkdown { frontmatter, body } = split_frontmatter(&source)?;
        let options = EffectiveOptions::for_document(self.settings, &frontmatter)?;

        let executable = if format.uses_engine() {
            match self.install {
                EngineInstall::Found(path) => Some(path.as_path()),
                EngineInstall::Missing(remediation) => {
                    return Err(Error::ResourceMissing(remediation.clone()));
                }
            }
        } else {
            None
        };

        let styles = assemble_styles(
            &StyleOptions::from(&options),
            &HrefContext {
                source_path: document,
                workspace_root,
                relative_to_document: options.styles_relative_path_file,
            },
        );
        self.warn_all(&styles.warnings);

        let converted = convert_markdown_to_html(
            &body,
            &ConvertOptions::from_effective(
                format,
                document,
                &options,
                self.emoji_dir.map(Path::to_path_buf),
            ),
        )?;
        self.warn_all(&converted.warnings);

        let title = document
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let style = styles.to_html();
        let diagram_script = mermaid_script_tag(&options.mermaid_server);
        let html = compose_document(&DocumentParts {
            title: &title,
            style: &style,
            content: &converted.html,
            diagram_script: &diagram_script,
        });

        let output = output_path(
            document,
            format,
            &OutputDirectory {
                directory: &options.output_directory,
                relative_to_document: options.output_directory_relative_path_file,
                workspace_root,
            },
        )
        .map_err(RenderError::from)?;

        let outcome = Renderer::new(self.engine, self.lang).render(&RenderJob {
            html: &html,
            output: &output,
            format,
            options: &options,
            executable,
        })?;
        self.warn_all(&outcome.warnings);

        Ok((output, options))
    }

    fn warn_all(&self, warnings: &[String]) {
        for warning in warnings {
            self.reporter.warn(warning);
        }
    }
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Whether a saved file should be converted with the `settings` command.
///
/// Exclude patterns are matched against the file name only. A pattern that
/// does not compile is logged and skipped.
pub fn should_convert_on_save(path: &Path, options: &EffectiveOptions) -> bool {
    if !options.convert_on_save || !is_markdown(path) {
        return false;
    }
    let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
        return false;
    };
    !options.convert_on_save_exclude.iter().any(|pattern| {
        match Regex::new(pattern) {
            Ok(re) => re.is_match(&name),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "invalid convertOnSaveExclude pattern");
                false
            }
        }
    })
}
