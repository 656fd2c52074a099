use std::env;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rostersync_core::config::{ServiceSection, SyncConfig, load_config, resolve_config_path};
use rostersync_core::list::RecordList;
use rostersync_core::pipeline::{SyncOptions, fetch_records, run_sync};
use rostersync_core::store::write_list;

#[derive(Debug, Parser)]
#[command(
    name = "rostersync",
    version,
    about = "Fetch a collection roster and merge it into an existing JSON list"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to the file with existing data"
    )]
    file: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Use a saved queryCollection response instead of the network"
    )]
    response: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "POLICY",
        help = "Duplicate handling for the existing list: report|keep-first|merge"
    )]
    duplicates: Option<String>,
    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log filter when RUST_LOG is unset"
    )]
    log_level: String,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics to stderr")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    file: Option<PathBuf>,
    config: Option<PathBuf>,
    response: Option<PathBuf>,
    duplicates: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            file: cli.file.clone(),
            config: cli.config.clone(),
            response: cli.response.clone(),
            duplicates: cli.duplicates.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch, merge and print the updated list (default)")]
    Sync,
    #[command(about = "Print freshly extracted records without merging")]
    Extract(ExtractArgs),
    #[command(about = "Print the resolved configuration as TOML")]
    Config,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long, help = "Print extraction counters to stderr")]
    stats: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(&cli.log_level);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        None | Some(Commands::Sync) => run_sync_command(&runtime),
        Some(Commands::Extract(args)) => run_extract(&runtime, args),
        Some(Commands::Config) => run_config(&runtime),
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_sync_command(runtime: &RuntimeOptions) -> Result<()> {
    let (config, config_path) = resolve_runtime_config(runtime)?;
    let options = sync_options(runtime, &config)?;
    if runtime.diagnostics {
        print_diagnostics(runtime, &config, &config_path);
    }

    let outcome = run_sync(&config, &options)?;
    if runtime.diagnostics {
        eprintln!("size_hint: {}", outcome.size_hint);
        eprintln!("requests: {}", outcome.request_count);
        eprintln!("extracted: {}", outcome.extract.records.len());
        eprintln!("updated: {}", outcome.merge.updated);
        eprintln!("unchanged: {}", outcome.merge.unchanged);
        eprintln!("added: {}", outcome.merge.added);
        eprintln!("duplicates: {}", outcome.merge.duplicates.len());
        eprintln!("removed_duplicates: {}", outcome.merge.removed_duplicates);
    }

    write_list(io::stdout().lock(), &outcome.list)
}

fn run_extract(runtime: &RuntimeOptions, args: ExtractArgs) -> Result<()> {
    let (config, config_path) = resolve_runtime_config(runtime)?;
    let options = sync_options(runtime, &config)?;
    if runtime.diagnostics {
        print_diagnostics(runtime, &config, &config_path);
    }

    let report = fetch_records(&config, &options)?;
    if args.stats {
        eprintln!("blocks_seen: {}", report.blocks_seen);
        eprintln!("skipped_not_page: {}", report.skipped_not_page);
        eprintln!("skipped_orphaned: {}", report.skipped_orphaned);
        eprintln!("skipped_archived: {}", report.skipped_archived);
        eprintln!("dropped_by_key: {}", report.dropped_by_key);
        eprintln!("records: {}", report.records.len());
    }

    write_list(io::stdout().lock(), &RecordList::new(report.records))
}

fn run_config(runtime: &RuntimeOptions) -> Result<()> {
    let (config, config_path) = resolve_runtime_config(runtime)?;
    if runtime.diagnostics {
        print_diagnostics(runtime, &config, &config_path);
    }
    let target = config.target();
    let resolved = SyncConfig {
        service: ServiceSection {
            endpoint: Some(config.endpoint()),
            collection_id: Some(target.collection_id),
            collection_view_id: Some(target.collection_view_id),
            space_id: Some(target.space_id),
            user_agent: Some(config.user_agent()),
            timeout_ms: config.timeout_ms(),
            max_limit: config.service.max_limit,
        },
        ..config
    };
    let rendered = toml::to_string_pretty(&resolved).context("failed to serialize config TOML")?;
    print!("{rendered}");
    Ok(())
}

fn sync_options(runtime: &RuntimeOptions, config: &SyncConfig) -> Result<SyncOptions> {
    SyncOptions::from_config(
        config,
        runtime.file.clone(),
        runtime.response.clone(),
        runtime.duplicates.as_deref(),
    )
}

fn resolve_runtime_config(runtime: &RuntimeOptions) -> Result<(SyncConfig, PathBuf)> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    let config_path = resolve_config_path(runtime.config.as_deref(), &cwd);
    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

fn print_diagnostics(runtime: &RuntimeOptions, config: &SyncConfig, config_path: &Path) {
    eprintln!("[diagnostics]");
    eprintln!(
        "config_path: {} ({})",
        normalize_path(config_path),
        if config_path.exists() { "found" } else { "missing" }
    );
    eprintln!(
        "file: {}",
        runtime
            .file
            .as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| "<none>".to_string())
    );
    eprintln!(
        "response: {}",
        runtime
            .response
            .as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| "<network>".to_string())
    );
    eprintln!("endpoint: {}", config.endpoint());
    eprintln!("collection_id: {}", config.target().collection_id);
    eprintln!("key_field: {}", config.key_field());
    eprintln!(
        "escape_link_text: {}",
        format_flag(config.render.escape_link_text)
    );
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
