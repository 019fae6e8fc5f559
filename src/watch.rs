use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::config::EffectiveOptions;
use crate::export::{Command, Exporter, should_convert_on_save};
use crate::frontmatter::FrontMatter;

pub struct WatchCommand<'a> {
    pub exporter: Exporter<'a>,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("markdown-pdf.convertOnSave is disabled; enable it to watch documents")]
    Disabled,
    #[error(transparent)]
    Settings(#[from] crate::ConfigError),
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error("watch channel closed: {0}")]
    Channel(#[from] mpsc::RecvError),
}

struct Target {
    path: PathBuf,
    is_dir: bool,
}

impl Target {
    fn covers(&self, changed: &Path) -> bool {
        if self.is_dir {
            changed.starts_with(&self.path)
        } else {
            changed == self.path
        }
    }
}

/// Convert Markdown files under `paths` with the `settings` command each
/// time they are written. Runs until the watcher fails.
pub fn watch_documents(paths: &[PathBuf], command: &WatchCommand<'_>) -> Result<(), WatchError> {
    let exporter = &command.exporter;
    let options = EffectiveOptions::for_document(exporter.settings, &FrontMatter::default())?;
    if !options.convert_on_save {
        return Err(WatchError::Disabled);
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        Config::default(),
    )?;

    let mut targets = Vec::with_capacity(paths.len());
    for path in paths {
        let path = canonicalize(path);
        let is_dir = path.is_dir();
        let mode = if is_dir {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&path, mode)?;
        tracing::info!(path = %path.display(), "watching");
        targets.push(Target { path, is_dir });
    }

    loop {
        match rx.recv()? {
            Ok(Event {
                kind: EventKind::Modify(_) | EventKind::Create(_),
                paths,
                ..
            }) => {
                for changed in paths {
                    let changed = canonicalize(&changed);
                    if !targets.iter().any(|target| target.covers(&changed))
                        || !should_convert_on_save(&changed, &options)
                    {
                        continue;
                    }
                    // Failures were already reported per format.
                    if let Ok(summary) = exporter.export(Some(&changed), Command::Settings) {
                        tracing::debug!(
                            path = %changed.display(),
                            written = summary.outputs.len(),
                            failed = summary.failures.len(),
                            "converted on save"
                        );
                    }
                }
            }
            Ok(_) => {}
            Err(err) => exporter.reporter.error(&format!("watch: {err}")),
        }
    }
}

fn canonicalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
