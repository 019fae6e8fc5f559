use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use mdprint::config::find_workspace_root;
use mdprint::watch::{WatchCommand, watch_documents};
use mdprint::{
    ChromeEngine, Command, ConsoleReporter, EffectiveOptions, EngineInstall, Exporter, FrontMatter,
    Settings,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mdprint", version)]
#[command(about = "Markdown to HTML, PDF, PNG and JPEG converter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        help = "Settings file used instead of <workspace>/.vscode/settings.json."
    )]
    settings: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Workspace root. Defaults to the nearest ancestor with .vscode or .git."
    )]
    workspace: Option<PathBuf>,

    #[arg(
        long = "emoji-dir",
        global = true,
        env = "MDPRINT_EMOJI_DIR",
        help = "Directory holding emoji PNG images."
    )]
    emoji_dir: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false, help = "Verbose diagnostics.")]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert to the formats listed in markdown-pdf.type.
    Settings(DocumentArgs),
    /// Convert to PDF.
    Pdf(DocumentArgs),
    /// Convert to HTML.
    Html(DocumentArgs),
    /// Convert to PNG.
    Png(DocumentArgs),
    /// Convert to JPEG.
    Jpeg(DocumentArgs),
    /// Convert to HTML, PDF, PNG and JPEG.
    All(DocumentArgs),
    /// Convert Markdown files each time they are saved.
    Watch {
        #[arg(required = true, help = "Files or directories to watch.")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct DocumentArgs {
    #[arg(help = "Markdown document to convert.")]
    document: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(error) => {
            eprintln!("[mdprint] {error}");
            process::exit(1);
        }
    }
}

/// `Ok(false)` when some requested format failed; those were already reported.
fn run(cli: Cli) -> Result<bool, String> {
    let (command, targets) = match cli.command {
        Commands::Settings(args) => (Some(Command::Settings), args.document.into_iter().collect()),
        Commands::Pdf(args) => (Some(Command::Pdf), args.document.into_iter().collect()),
        Commands::Html(args) => (Some(Command::Html), args.document.into_iter().collect()),
        Commands::Png(args) => (Some(Command::Png), args.document.into_iter().collect()),
        Commands::Jpeg(args) => (Some(Command::Jpeg), args.document.into_iter().collect()),
        Commands::All(args) => (Some(Command::All), args.document.into_iter().collect()),
        Commands::Watch { paths } => (None, paths),
    };

    let workspace_root = cli
        .workspace
        .clone()
        .or_else(|| targets.first().and_then(|path| find_workspace_root(&absolute(path))));
    let settings = Settings::discover(cli.settings.as_deref(), workspace_root.as_deref())
        .map_err(|e| e.to_string())?;

    let base = EffectiveOptions::for_document(&settings, &FrontMatter::default())
        .map_err(|e| e.to_string())?;
    let install = EngineInstall::verify(&base.executable_path);
    let lang = browser_lang();
    let reporter = ConsoleReporter;

    let exporter = Exporter {
        settings: &settings,
        engine: &ChromeEngine,
        install: &install,
        reporter: &reporter,
        workspace_root: workspace_root.as_deref(),
        emoji_dir: cli.emoji_dir.as_deref(),
        lang: &lang,
    };

    let Some(command) = command else {
        watch_documents(&targets, &WatchCommand { exporter }).map_err(|e| format!("watch failed: {e}"))?;
        return Ok(true);
    };

    let summary = exporter
        .export(targets.first().map(PathBuf::as_path), command)
        .map_err(|e| e.to_string())?;
    if cli.verbose {
        for output in &summary.outputs {
            println!("written {}", output.display());
        }
    }
    Ok(summary.is_success())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `LANG=de_DE.UTF-8` becomes `de-DE`.
fn browser_lang() -> String {
    let raw = std::env::var("LANG").unwrap_or_default();
    let tag = raw.split(['.', '@']).next().unwrap_or_default();
    match tag {
        "" | "C" | "POSIX" => "en-US".to_string(),
        tag => tag.replace('_', "-"),
    }
}
