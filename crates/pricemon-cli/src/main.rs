use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use pricemon_core::metrics::serve as serve_metrics;
use pricemon_core::{BlockProcessor, LoopState, MonitorLoop, PrometheusMetrics, RetryPolicy};
use pricemon_data::{ChainClient, MonitorConfig, RpcChainClient, Store};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pricemon")]
#[command(about = "Per-block DEX pool price and deviation monitor")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// JSON configuration file.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample pool prices block by block. Without --to-block, follows the chain head.
    Run(RunArgs),
    /// Show what is stored per pair.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Configured pair names to track.
    #[arg(long = "pair", required = true, num_args = 1..)]
    pairs: Vec<String>,

    #[arg(long, alias = "from_block")]
    from_block: Option<u64>,

    /// Exclusive end block; selects bounded replay.
    #[arg(long, alias = "to_block")]
    to_block: Option<u64>,

    /// Overrides `metrics_addr` from the config file.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[arg(long = "pair", num_args = 1..)]
    pairs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let config = MonitorConfig::load(&cli.config)
        .wrap_err_with(|| format!("failed to load config {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => handle_run(config, args, cli.quiet).await,
        Commands::Status(args) => handle_status(&config, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn handle_run(config: MonitorConfig, args: RunArgs, quiet: bool) -> Result<()> {
    if let (Some(from), Some(to)) = (args.from_block, args.to_block) {
        if from > to {
            return Err(eyre!(
                "invalid range: from-block {} is greater than to-block {}",
                from,
                to
            ));
        }
    }

    let pairs = config
        .select_pairs(&args.pairs)
        .wrap_err("failed to select pairs")?;

    ensure_parent_dir(Path::new(&config.db_path))?;
    let store = Arc::new(Store::new(&config.db_path).wrap_err("failed to open SQLite store")?);

    let chain: Arc<dyn ChainClient> = Arc::new(
        RpcChainClient::connect(&config.rpc_url)
            .await
            .wrap_err("failed to connect to RPC")?,
    );

    let metrics =
        Arc::new(PrometheusMetrics::new().wrap_err("failed to create metrics registry")?);
    let cancel = CancellationToken::new();

    let metrics_addr = args.metrics_addr.unwrap_or(config.metrics_addr);
    let listener = TcpListener::bind(metrics_addr)
        .await
        .wrap_err_with(|| format!("failed to bind metrics server on {metrics_addr}"))?;
    let server = tokio::spawn(serve_metrics(
        listener,
        Arc::clone(&metrics),
        cancel.clone(),
    ));

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping after the current block");
            ctrl_c.cancel();
        }
    });

    let processor = BlockProcessor::new(
        Arc::clone(&chain),
        config.stable_coins.iter().cloned(),
        store,
        metrics,
        RetryPolicy::new(config.rpc_retries, config.rpc_retry_backoff),
    );
    let monitor = MonitorLoop::new(processor, chain, pairs, cancel.clone())
        .with_poll_interval(config.poll_interval)
        .with_progress(!quiet && args.to_block.is_some());

    let outcome = monitor
        .run(args.from_block, args.to_block)
        .await
        .wrap_err("monitor loop failed")?;

    cancel.cancel();
    match server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "metrics server exited with error"),
        Err(e) => tracing::warn!(error = %e, "metrics server task failed"),
        Ok(Ok(())) => {}
    }

    info!(
        state = ?outcome.state,
        processed = outcome.blocks_processed,
        skipped = outcome.blocks_skipped,
        last_block = ?outcome.last_block,
        "monitor stopped"
    );
    if outcome.state == LoopState::Cancelled {
        println!("Stopped by user after {} blocks", outcome.blocks_processed);
    }
    Ok(())
}

fn handle_status(config: &MonitorConfig, args: StatusArgs) -> Result<()> {
    let store = Store::new(&config.db_path).wrap_err("failed to open SQLite store")?;

    let summaries = store
        .pair_summaries()
        .wrap_err("failed to query pair summaries")?;
    let total = store.count_prices().wrap_err("failed to count samples")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Pair",
        "Samples",
        "First Block",
        "Last Block",
        "Last Price",
        "Last Sample (UTC)",
    ]);

    let mut shown = 0;
    for summary in summaries
        .iter()
        .filter(|s| args.pairs.is_empty() || args.pairs.contains(&s.pair_name))
    {
        let last_time = store
            .price_at(&summary.pair_name, summary.last_block)
            .wrap_err("failed to query latest sample")?
            .map(|sample| sample.datetime())
            .unwrap_or_else(|| "N/A".to_string());

        table.add_row(vec![
            summary.pair_name.clone(),
            summary.samples.to_string(),
            summary.first_block.to_string(),
            summary.last_block.to_string(),
            summary.last_price.clone(),
            last_time,
        ]);
        shown += 1;
    }

    if shown == 0 {
        println!("No samples stored in {}", config.db_path);
        return Ok(());
    }

    println!("{table}");
    println!("Total samples: {total} ({})", config.db_path);
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if path == Path::new(":memory:") {
        return Ok(());
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create directory {}", parent.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_multiple_pairs_and_block_aliases() {
        let cli = Cli::try_parse_from([
            "pricemon",
            "run",
            "--pair",
            "A",
            "B",
            "--from_block",
            "100",
            "--to-block",
            "105",
        ])
        .expect("args should parse");

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.pairs, vec!["A", "B"]);
        assert_eq!(args.from_block, Some(100));
        assert_eq!(args.to_block, Some(105));
        assert!(args.metrics_addr.is_none());
    }

    #[test]
    fn run_requires_a_pair() {
        assert!(Cli::try_parse_from(["pricemon", "run"]).is_err());
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from(["pricemon", "status", "-vv", "--config", "other.json"])
            .expect("args should parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("other.json"));
        assert!(matches!(cli.command, Commands::Status(ref a) if a.pairs.is_empty()));
    }

    #[test]
    fn ensure_parent_dir_skips_memory_and_bare_names() {
        assert!(ensure_parent_dir(Path::new(":memory:")).is_ok());
        assert!(ensure_parent_dir(Path::new("prices.sqlite")).is_ok());
    }
}
