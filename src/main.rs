use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdfetch::catalog::Catalog;
use sdfetch::cli::VerifyMode;
use sdfetch::config::{Category, Config};
use sdfetch::{commands, tokens};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tokens to fetch: [prefix:]url[name-or-dir][ name][|sha256], or paths/URLs of list files
    #[arg(index = 1)]
    tokens: Vec<String>,

    /// File with one token per line
    #[arg(short = 't', long = "tasks-file")]
    tasks_file: Option<PathBuf>,

    /// Root of the WebUI install the default directory layout is derived from
    #[arg(short = 'r', long, default_value = ".")]
    root: PathBuf,

    /// JSON config file (tokens, directory table, tool paths, ...)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent transfers (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Show live progress for every transfer
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Hash verification: auto (only when hash known), on (require hash), off (skip)
    #[arg(long = "verify-hash", value_enum)]
    verify_hash: Option<VerifyMode>,

    #[arg(long = "civitai-token", env = "CIVITAI_API_TOKEN", hide_env_values = true)]
    civitai_token: Option<String>,

    #[arg(long = "hf-token", env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Skip previews flagged as adult content
    #[arg(long)]
    constrained: bool,

    /// Catalog entries to fetch, as category:name (category:* for all)
    #[arg(short = 'p', long = "pick")]
    pick: Vec<String>,

    /// Catalog file to use instead of the builtin one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// List catalog entries and exit
    #[arg(long = "list-catalog")]
    list_catalog: bool,

    /// Look up a civitai model version by SHA-256 or by local file, then exit
    #[arg(short = 'l', long)]
    lookup: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdfetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = build_config(&args)?;

    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };
    if args.list_catalog {
        for category in Category::ALL {
            for name in catalog.names(category) {
                println!("{}:{}", category, name);
            }
        }
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;

    if let Some(target) = &args.lookup {
        return rt.block_on(commands::lookup(target, &config));
    }

    let mut batch = args.tokens.clone();
    if let Some(path) = &args.tasks_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open tasks file: {:?}", path))?;
        batch.push(content);
    }
    batch.extend(catalog.tokens_for(&args.pick)?);
    let batch: Vec<String> = batch.iter().flat_map(|t| tokens::split_tokens(t)).collect();

    if batch.is_empty() {
        bail!("Nothing to fetch: pass tokens, --tasks-file or --pick");
    }

    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("interrupted, stopping transfers (press Ctrl-C again to exit now)");
            on_interrupt.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
        commands::run_batch(batch, &config, cancel).await
    })?;

    if !report.is_success() {
        bail!("{} request(s) failed", report.failures().count());
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path, &args.root)?,
        None => Config::new(&args.root),
    };

    if let Some(token) = args.civitai_token.as_ref().filter(|t| !t.trim().is_empty()) {
        config.civitai_token = Some(token.trim().to_string());
    }
    if let Some(token) = args.hf_token.as_ref().filter(|t| !t.trim().is_empty()) {
        config.hf_token = Some(token.trim().to_string());
    }
    if let Some(concurrency) = args.concurrency.filter(|c| *c > 0) {
        config.concurrency = concurrency;
    }
    if let Some(mode) = args.verify_hash {
        config.verify = mode;
    }
    config.verbose |= args.verbose;
    config.constrained_env |= args.constrained;
    Ok(config)
}
