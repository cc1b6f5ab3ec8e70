//! `review-harvester` command line entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use review_harvester::crawling::orchestrator::exit_codes;
use review_harvester::crawling::{
    BatchOrchestrator, CompanyWorker, ConcurrencyGate, OrchestratorConfig, PageFetcher, RandomDelay, ResumeMode,
    RetryPolicy, RunReport, WorkerSettings,
};
use review_harvester::infrastructure::{
    AppConfig, CheckpointStore, CookieFileProvider, Credential, CredentialProvider, DelayRange,
    EnvCredentialProvider, HttpReviewSource, OutputWriter, StaticCredentialProvider, init_logging, load_targets,
};

#[derive(Parser, Debug)]
#[command(name = "review-harvester", version)]
#[command(about = "Resumable batch harvesting of company reviews")]
struct Cli {
    /// CSV (or .txt list) of company URLs or names
    #[arg(long)]
    input: PathBuf,

    /// CSV column holding the URL or name (auto-detected when omitted)
    #[arg(long)]
    url_column: Option<String>,

    /// Maximum in-flight HTTP requests across all companies
    #[arg(long)]
    concurrency: Option<usize>,

    /// Reviews requested per page
    #[arg(long)]
    limit: Option<u32>,

    /// Companies processed at the same time
    #[arg(long)]
    companies: Option<usize>,

    /// Delay between companies in seconds, `MIN-MAX` or a single value
    #[arg(long, value_name = "MIN-MAX")]
    delay: Option<String>,

    /// Delay before each request in milliseconds, `MIN-MAX` or a single value
    #[arg(long, value_name = "MIN-MAX")]
    request_delay: Option<String>,

    /// Companies per batch, with a rest between batches
    #[arg(long)]
    batch_size: Option<usize>,

    /// Rest between batches in seconds
    #[arg(long, value_name = "MIN-MAX")]
    batch_delay: Option<String>,

    /// Skip companies already done in the checkpoint
    #[arg(long)]
    resume: bool,

    /// Discard the checkpoint and start over
    #[arg(long, conflicts_with = "resume")]
    reset: bool,

    /// With --resume, also retry companies recorded as failed
    #[arg(long, requires = "resume")]
    retry_failed: bool,

    /// Cookie header captured from a browser session
    #[arg(long, conflicts_with = "cookie_file")]
    cookie: Option<String>,

    /// File holding the cookie header or a JSON cookie export
    #[arg(long)]
    cookie_file: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Config file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Flags override file and environment settings
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(n) = self.concurrency {
            config.crawling.max_concurrent_requests = n;
        }
        if let Some(n) = self.limit {
            config.crawling.page_size = n;
        }
        if let Some(n) = self.companies {
            config.crawling.max_active_companies = n;
        }
        if let Some(n) = self.batch_size {
            config.crawling.batch_size = Some(n);
        }
        if let Some(raw) = &self.delay {
            config.pacing.company_delay = DelayRange::parse_secs(raw).context("Invalid --delay")?;
        }
        if let Some(raw) = &self.request_delay {
            config.pacing.request_delay = DelayRange::parse_millis(raw).context("Invalid --request-delay")?;
        }
        if let Some(raw) = &self.batch_delay {
            config.pacing.batch_delay = DelayRange::parse_secs(raw).context("Invalid --batch-delay")?;
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir.clone_from(dir);
        }
        if let Some(path) = &self.checkpoint {
            config.paths.checkpoint_file.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        config.validate().context("Invalid configuration")?;
        Ok(())
    }

    fn resume_mode(&self, config: &AppConfig) -> ResumeMode {
        if self.resume && !self.reset {
            ResumeMode::Resume {
                retry_failed: self.retry_failed || config.crawling.retry_failed_on_resume,
            }
        } else {
            ResumeMode::Fresh
        }
    }

    fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        if let Some(cookie) = &self.cookie {
            Arc::new(StaticCredentialProvider::new(Credential::new(cookie.trim())))
        } else if let Some(path) = &self.cookie_file {
            Arc::new(CookieFileProvider::new(path))
        } else {
            Arc::new(EnvCredentialProvider)
        }
    }
}

fn delay(range: DelayRange) -> Arc<RandomDelay> {
    Arc::new(RandomDelay::new(range.min(), range.max()))
}

async fn run(cli: Cli, config: AppConfig) -> Result<RunReport> {
    let targets = load_targets(&cli.input, cli.url_column.as_deref())
        .with_context(|| format!("Failed to load companies from {}", cli.input.display()))?;
    if targets.is_empty() {
        warn!(input = %cli.input.display(), "⚠️ no companies found in input");
    }

    let source = HttpReviewSource::new(config.http.clone(), config.request_timeout())?;
    let gate = ConcurrencyGate::new(config.crawling.max_concurrent_requests);
    let fetcher = PageFetcher::new(
        Arc::new(source),
        gate,
        delay(config.pacing.request_delay),
        config.request_timeout(),
    );
    let settings = WorkerSettings {
        page_size: config.crawling.page_size,
        max_pages: config.crawling.max_pages,
        retry: RetryPolicy::from(&config.retry),
        page_delay: delay(config.pacing.page_delay),
    };
    let worker = CompanyWorker::new(fetcher, OutputWriter::new(&config.paths.output_dir), settings);

    let checkpoint = CheckpointStore::open(&config.paths.checkpoint_file)
        .await
        .context("Failed to open checkpoint")?;
    let orchestrator_config = OrchestratorConfig {
        max_active_companies: config.crawling.max_active_companies,
        batch_size: config.crawling.batch_size,
        company_delay: delay(config.pacing.company_delay),
        batch_delay: delay(config.pacing.batch_delay),
    };
    let mut orchestrator = BatchOrchestrator::new(worker, checkpoint, cli.credential_provider(), orchestrator_config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    let mode = cli.resume_mode(&config);
    let report = orchestrator.run(&targets, mode, &cancel).await?;
    Ok(report)
}

fn print_summary(report: &RunReport) {
    println!("\nRun {} finished in {:.1?}", report.run_id, report.elapsed);
    println!(
        "  this run: {} done, {} failed, {} skipped, {} reviews written",
        report.done(),
        report.failed(),
        report.skipped,
        report.reviews_written()
    );
    println!(
        "  checkpoint: {} done, {} failed, {} pending of {}",
        report.summary.done, report.summary.failed, report.summary.pending, report.summary.total
    );
    for company in report.outcomes.iter().filter(|c| c.outcome.is_failed()) {
        println!("  ✗ {}: {:?}", company.company, company.outcome);
    }
    if report.auth_expired {
        println!("  credentials expired: capture a fresh cookie and rerun with --resume");
    } else if report.cancelled {
        println!("  interrupted: rerun with --resume to continue");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::from(exit_codes::FATAL);
        }
    };
    if let Err(e) = cli.apply(&mut config) {
        eprintln!("❌ {e:#}");
        return ExitCode::from(exit_codes::FATAL);
    }

    let _log_guard = match init_logging(&config.logging, &config.paths.resolved_log_dir()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ Failed to initialize logging: {e:#}");
            return ExitCode::from(exit_codes::FATAL);
        }
    };
    info!(version = env!("CARGO_PKG_VERSION"), "📦 review-harvester starting");

    match run(cli, config).await {
        Ok(report) => {
            print_summary(&report);
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "💥 run aborted");
            eprintln!("❌ {e:#}");
            ExitCode::from(exit_codes::FATAL)
        }
    }
}
