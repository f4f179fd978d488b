use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use proxy_harvest::{
    proxy::{
        status_message, Candidate, Dispatcher, ProgressSnapshot, Protocol, ProxyCrawler,
        ProxyProbe, ValidationReport,
    },
    tui::ValidationDashboard,
    AppConfig, ClashConfig, DataStore, ValidationError,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Collects public proxy lists and validates them concurrently
#[derive(Parser)]
#[command(name = "proxy-harvest", version)]
#[command(about = "Collects public proxy lists and validates them concurrently")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch candidate lists from the configured sources
    Fetch {
        /// Protocols to fetch (http, socks5); all when omitted
        #[arg(short, long = "protocol")]
        protocols: Vec<Protocol>,
    },
    /// Validate previously fetched candidates
    Validate(ValidateArgs),
    /// Fetch, then validate
    Run(ValidateArgs),
    /// Print the status message for the stored stats
    Message,
    /// Write a Clash config from the stored stats
    Clash {
        /// Output file (relative paths land in the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct ValidateArgs {
    /// Protocols to validate (http, socks5); all when omitted
    #[arg(short, long = "protocol")]
    protocols: Vec<Protocol>,
    /// Maximum number of probes in flight
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,
    /// Per-probe timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// URL to test proxies against
    #[arg(long)]
    test_url: Option<String>,
    /// Status code the test URL answers with
    #[arg(long)]
    expected_status: Option<u16>,
    /// Give up on the whole run after this many seconds
    #[arg(long)]
    deadline: Option<u64>,
    /// Show a live dashboard while validating
    #[arg(long)]
    tui: bool,
}

impl ValidateArgs {
    fn apply(&self, config: &mut AppConfig) {
        let validator = &mut config.validator;
        if let Some(concurrency) = self.concurrency {
            validator.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            validator.timeout_secs = timeout;
        }
        if let Some(url) = &self.test_url {
            validator.test_url = url.clone();
        }
        if let Some(status) = self.expected_status {
            validator.expected_status = status;
        }
        if self.deadline.is_some() {
            validator.run_deadline_secs = self.deadline;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dashboard = matches!(
        &cli.command,
        Commands::Validate(args) | Commands::Run(args) if args.tui
    );
    init_logging(cli.verbose, dashboard);

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let store = DataStore::new(&config.data_dir);

    match cli.command {
        Commands::Fetch { protocols } => {
            fetch(&config, &store, &selected(&protocols)).await?;
        }
        Commands::Validate(args) => {
            args.apply(&mut config);
            validate(&config, &store, &args).await?;
        }
        Commands::Run(args) => {
            args.apply(&mut config);
            fetch(&config, &store, &selected(&args.protocols)).await?;
            validate(&config, &store, &args).await?;
        }
        Commands::Message => {
            let reports = store.load_reports()?;
            let mut stdout = std::io::stdout();
            write!(stdout, "{}", status_message(&reports))?;
            stdout.flush()?;
        }
        Commands::Clash { output } => {
            if let Some(file) = output {
                config.clash.file = file;
            }
            export_clash(&config, &store)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, dashboard: bool) {
    let default = if verbose {
        "debug"
    } else if dashboard {
        // Log lines would tear the alternate screen.
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn selected(protocols: &[Protocol]) -> Vec<Protocol> {
    if protocols.is_empty() {
        Protocol::ALL.to_vec()
    } else {
        protocols.to_vec()
    }
}

async fn fetch(config: &AppConfig, store: &DataStore, protocols: &[Protocol]) -> Result<()> {
    let crawler = ProxyCrawler::with_config(config.crawler_config())?;

    for &protocol in protocols {
        let sources = config.sources(protocol);
        info!(%protocol, sources = sources.len(), "fetching proxy lists");
        let candidates = crawler.collect(&sources).await;
        if candidates.is_empty() {
            warn!(%protocol, "no candidates found");
        }
        store.save_candidates(protocol, &candidates)?;
    }

    Ok(())
}

async fn validate(config: &AppConfig, store: &DataStore, args: &ValidateArgs) -> Result<()> {
    let mut validated = 0;

    for protocol in selected(&args.protocols) {
        let candidates = match store.load_candidates(protocol) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(%protocol, "{:#}", e);
                continue;
            }
        };

        let dispatcher =
            Dispatcher::with_proxy_probe(config.probe_config(), config.dispatch_config());
        let result = if args.tui {
            run_with_dashboard(dispatcher, protocol, candidates).await?
        } else {
            dispatcher.run(protocol, candidates).await
        };

        if persist(store, protocol, result)? {
            validated += 1;
        }
    }

    if validated == 0 {
        bail!("no protocol had candidates to validate");
    }
    Ok(())
}

async fn run_with_dashboard(
    dispatcher: Dispatcher<ProxyProbe>,
    protocol: Protocol,
    candidates: Vec<Candidate>,
) -> Result<std::result::Result<ValidationReport, ValidationError>> {
    let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let dispatcher = dispatcher
        .with_progress(progress_tx)
        .with_outcome_tap(outcome_tx);
    let token = cancel.clone();
    let handle =
        tokio::spawn(async move { dispatcher.run_until(protocol, candidates, token).await });

    let mut dashboard = ValidationDashboard::new(protocol, progress_rx, outcome_rx, cancel);
    dashboard.run().await?;

    Ok(handle.await?)
}

/// Store the outcome of one protocol's run, returning whether it produced a report.
///
/// An incomplete run still has its partial report saved before the error is returned.
fn persist(
    store: &DataStore,
    protocol: Protocol,
    result: std::result::Result<ValidationReport, ValidationError>,
) -> Result<bool> {
    match result {
        Ok(report) => {
            save(store, &report)?;
            Ok(true)
        }
        Err(ValidationError::NoCandidates) => {
            warn!(%protocol, "no candidates to validate, skipping");
            Ok(false)
        }
        Err(e) => {
            if let Some(partial) = e.partial_report() {
                save(store, partial)?;
            }
            Err(e.into())
        }
    }
}

fn export_clash(config: &AppConfig, store: &DataStore) -> Result<()> {
    let reports = store.load_reports()?;
    let clash = ClashConfig::from_reports(&reports, &config.clash, &config.validator.test_url)?;
    let path = store.save_clash(&clash, &config.clash.file)?;
    info!(
        proxies = clash.proxies.len(),
        path = %path.display(),
        "Clash config written"
    );
    Ok(())
}

fn save(store: &DataStore, report: &ValidationReport) -> Result<()> {
    let valid_path = store.save_valid(report)?;
    let stats_path = store.save_report(report)?;

    info!(
        protocol = %report.protocol,
        path = %valid_path.display(),
        stats = %stats_path.display(),
        "Valid {} proxies: {}/{}",
        report.protocol,
        report.valid_count,
        report.total_count
    );
    info!(
        protocol = %report.protocol,
        "Validation time: {:.2} seconds",
        report.validation_duration_seconds
    );
    Ok(())
}
