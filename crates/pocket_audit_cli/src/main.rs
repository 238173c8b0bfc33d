//! pocket-audit CLI: run an audit, verify a result file.

use clap::{Parser, Subcommand};
use pocket_audit::chain::ResponseCache;
use pocket_audit::{run_audit, AuditConfig, HttpChainClient, JsonCodec, Overrides};
use pocket_audit_report::{default_result_path, verify_report_file, write_report};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Verify(args) => run_verify(args),
    }
}

#[derive(Parser)]
#[command(name = "pocket-audit")]
#[command(about = "Relay, claim and minting audit for a Pocket node RPC endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the configured window, collect chain data and write a report.
    Run(RunArgs),
    /// Check a result file against its digest sidecar.
    Verify(VerifyArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Config file; defaults to $POCKET_AUDIT_CONFIG, then ./config/config.json.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Result file; defaults to result/<MM-DD-YY>.json for yesterday.
    #[arg(long)]
    results: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    timeline_start: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    timeline_end: Option<i64>,
    #[arg(long)]
    timeline_unit: Option<String>,
    #[arg(long)]
    by_block_start: Option<u64>,
    #[arg(long)]
    by_block_end: Option<u64>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    http_retry: Option<u32>,
    #[arg(long)]
    blocks_per_session: Option<i64>,
    #[arg(long)]
    block_time_in_min: Option<i64>,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            timeline_start: self.timeline_start,
            timeline_end: self.timeline_end,
            timeline_unit: self.timeline_unit.clone(),
            by_block_start: self.by_block_start,
            by_block_end: self.by_block_end,
            endpoint: self.endpoint.clone(),
            http_retry: self.http_retry,
            blocks_per_session: self.blocks_per_session,
            block_time_in_min: self.block_time_in_min,
            cache_dir: self.cache_dir.clone(),
        }
    }
}

#[derive(Parser)]
struct VerifyArgs {
    #[arg(long)]
    report: PathBuf,
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AuditConfig::locate(args.config.as_deref());
    info!(path = %config_path.display(), "loading config");
    let config = AuditConfig::load_from_path(&config_path)?.apply(&args.overrides())?;
    let plan = config.plan()?;
    let cache = match &config.cache_dir {
        Some(dir) => Some(ResponseCache::open(dir.join("cache.sqlite"))?),
        None => None,
    };
    let client = HttpChainClient::new(config.client_config()?, Arc::new(JsonCodec), cache)?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        client.probe().await?;
        Ok::<_, Box<dyn std::error::Error>>(run_audit(&client, &JsonCodec, &plan).await?)
    })?;
    info!(requests = client.request_count(), "audit complete");

    let path = match args.results {
        Some(p) => p,
        None => default_result_path("result", OffsetDateTime::now_utc())?,
    };
    match write_report(&report, &path) {
        Ok(files) => println!("{}\t{}", files.report_path.display(), files.digest),
        Err(e) => {
            error!(path = %path.display(), error = %e, "unable to write result, printing instead");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let result = verify_report_file(&args.report)?;
    if result.matches {
        println!("OK\t{}", result.digest);
    } else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected={:?}",
            result.digest, result.expected
        );
        std::process::exit(1);
    }
    Ok(())
}
