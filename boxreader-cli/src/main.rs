mod headless;
mod viewer;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use boxreader_ai::{load_or_default, AiConfig, AiConfigStore, JsonAiConfigStore};
use boxreader_core::settings::TomlSettingsStore;
use boxreader_core::store::{FileReadingStore, FileStateStore, ReadingStore};
use boxreader_core::{Rect, Session, SessionStores};
use boxreader_render::PdfiumRenderFactory;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "boxreader",
    version,
    about = "Terminal document viewer with glyph-level selection and streamed AI explanations"
)]
struct Args {
    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page", global = true)]
    page: Option<u32>,

    /// Document to open; defaults to the last opened one
    file: Option<PathBuf>,

    #[command(subcommand)]
    tool: Option<Tool>,
}

#[derive(Debug, Subcommand)]
enum Tool {
    /// Print the glyph index of a page as JSON
    Glyphs,
    /// List the matches of a query on a page
    Search { query: String },
    /// Print the text reconstructed from the glyphs inside a rectangle
    Select {
        /// Rectangle in page pixels, `x0,y0,x1,y1`
        #[arg(long)]
        rect: Rect,
    },
    /// Stream an explanation of the glyphs inside a rectangle
    Ask {
        /// Rectangle in page pixels, `x0,y0,x1,y1`
        #[arg(long)]
        rect: Rect,
        /// Instruction sent instead of the stored default
        #[arg(long)]
        instruction: Option<String>,
    },
}

/// File locations under the platform data and config directories.
struct AppPaths {
    settings: PathBuf,
    ai_config: PathBuf,
    state_dir: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
}

impl AppPaths {
    fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("net", "boxreader", "boxreader")
            .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
        let data_dir = project_dirs.data_local_dir().to_path_buf();
        let config_dir = project_dirs.config_dir();
        Ok(Self {
            settings: config_dir.join("settings.toml"),
            ai_config: config_dir.join("ai.json"),
            state_dir: data_dir.join("state"),
            log_dir: data_dir.join("logs"),
            data_dir,
        })
    }

    fn session_stores(&self) -> Result<SessionStores> {
        Ok(SessionStores {
            state: Arc::new(FileStateStore::new(self.state_dir.clone())?),
            settings: Arc::new(TomlSettingsStore::new(self.settings.clone())),
            reading: Arc::new(FileReadingStore::new(&self.data_dir)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let paths = AppPaths::resolve()?;
    let _log_guard = init_logging(&paths, args.tool.is_some())?;

    let ai_store = JsonAiConfigStore::new(paths.ai_config.clone());
    let ai_config = ensure_ai_config(&ai_store);
    let provider = PdfiumRenderFactory::new()?;

    match args.tool {
        Some(tool) => {
            let path = resolve_document(args.file, &FileReadingStore::new(&paths.data_dir))?;
            // subcommands leave settings and reading positions untouched
            let mut session = Session::new(SessionStores::in_memory());
            session
                .open_with(&provider, path.clone(), args.page)
                .await
                .with_context(|| format!("failed to open {:?}", path))?;
            headless::run(tool, &mut session, &ai_config).await
        }
        None => {
            let stores = paths.session_stores()?;
            let path = resolve_document(args.file, stores.reading.as_ref())?;
            let mut session = Session::new(stores);
            session
                .open_with(&provider, path.clone(), args.page)
                .await
                .with_context(|| format!("failed to open {:?}", path))?;
            viewer::run(session, ai_store).await
        }
    }
}

fn resolve_document(file: Option<PathBuf>, reading: &dyn ReadingStore) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file);
    }
    match reading.last_opened() {
        Ok(Some(path)) => Ok(PathBuf::from(path)),
        Ok(None) => Err(anyhow!("no document given and none opened before")),
        Err(err) => Err(err.context("no document given and the last opened one is unknown")),
    }
}

/// Loads the AI configuration, writing the defaults out on first run so
/// there is a file to edit.
fn ensure_ai_config(store: &JsonAiConfigStore) -> AiConfig {
    let config = load_or_default(store);
    if matches!(store.load(), Ok(None)) {
        if let Err(err) = store.save(&config) {
            warn!(?err, "failed to write default AI configuration");
        }
    }
    config
}

fn init_logging(paths: &AppPaths, console: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(&paths.log_dir)?;

    let file_appender = tracing_appender::rolling::never(&paths.log_dir, "boxreader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // writing to the terminal would corrupt the interactive viewer
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
