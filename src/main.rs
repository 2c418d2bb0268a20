use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ad_scan_rs::cache::ResultCache;
use ad_scan_rs::content::{HtmlFileSource, DEFAULT_CARD_SELECTOR};
use ad_scan_rs::counter::RemoteCounter;
use ad_scan_rs::extract::{SubjectExtractor, DEFAULT_BASE_URL};
use ad_scan_rs::matcher::Matcher;
use ad_scan_rs::progress::TracingReporter;
use ad_scan_rs::scanner::{ScanController, ScanDeps, ScanSettings};
use ad_scan_rs::server;
use ad_scan_rs::service::{ArchiveClient, CountService, LibraryPageClient, ServiceConfig};
use ad_scan_rs::types::{parse_date, ScanReport, SearchParameters, StepOutcome, Tier};

const DEFAULT_RANGE_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceKind {
    /// Public ad-library search page, count parsed from the page text.
    Page,
    /// Ads-Archive JSON API; needs ADS_ARCHIVE_TOKEN.
    Archive,
}

/// ad-scan-rs: sequential, resumable advertiser scanner for ad-library page snapshots.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ad-scan-rs",
    version,
    about = "Sequential, resumable advertiser scanner for ad-library page snapshots.",
    long_about = None
)]
struct Cli {
    /// Saved ad-library page (HTML) to scan.
    #[arg(long)]
    page: PathBuf,

    /// Base URL used to resolve relative advertiser links.
    #[arg(long = "base-url", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// CSS selector matching one ad card.
    #[arg(long = "card-selector", default_value = DEFAULT_CARD_SELECTOR)]
    card_selector: String,

    /// Region (country code) to count ads in.
    #[arg(long, default_value = "US")]
    region: String,

    /// Range start, YYYY-MM-DD. Defaults to 14 days before --end.
    #[arg(long)]
    start: Option<String>,

    /// Range end, YYYY-MM-DD. Defaults to today (UTC).
    #[arg(long)]
    end: Option<String>,

    /// Delay between remote lookups in milliseconds.
    #[arg(long = "pacing-ms", default_value_t = 800)]
    pacing_ms: u64,

    /// Counts at or above this are classified high.
    #[arg(long, default_value_t = 25)]
    threshold: u64,

    /// Cache entry lifetime in seconds.
    #[arg(long = "cache-ttl-secs", default_value_t = 3600)]
    cache_ttl_secs: u64,

    /// Persist the count cache to this JSON file (optional).
    #[arg(long = "cache-file")]
    cache_file: Option<PathBuf>,

    /// Which count service to query.
    #[arg(long, value_enum, default_value_t = ServiceKind::Page)]
    service: ServiceKind,

    /// Write the scan report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the scan command API instead of scanning once.
    #[arg(long, default_value_t = false)]
    serve: bool,

    /// Bind address for --serve.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let params = search_parameters(&cli)?;
    info!(
        page = %cli.page.display(),
        region = params.region(),
        start = %params.start(),
        end = %params.end(),
        service = ?cli.service,
        "ad-scan-rs configuration"
    );

    let ttl = Duration::from_secs(cli.cache_ttl_secs);
    let cache = match cli.cache_file.as_ref() {
        Some(path) => ResultCache::with_persistence(ttl, path),
        None => ResultCache::new(ttl),
    };

    let source = Arc::new(HtmlFileSource::new(&cli.page, &cli.card_selector));
    let deps = ScanDeps {
        counter: RemoteCounter::new(Arc::new(cache), build_service(cli.service)?),
        extractor: SubjectExtractor::new(&cli.base_url)
            .with_context(|| format!("invalid --base-url {}", cli.base_url))?,
        matcher: Matcher::default(),
        source: source.clone(),
        reporter: Arc::new(TracingReporter),
        params,
        settings: ScanSettings {
            pacing: Duration::from_millis(cli.pacing_ms),
            high_threshold: cli.threshold,
        },
    };
    let controller = Arc::new(ScanController::new(deps));

    if cli.serve {
        let bind = cli.bind.clone();
        let api = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, api).await {
                warn!(error = %e, "HTTP API server error");
            }
        });
        info!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
        controller.cancel().await;
        return Ok(());
    }

    controller.start().await?;
    tokio::select! {
        _ = controller.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling scan");
            controller.cancel().await;
            controller.wait().await;
        }
    }

    let report = controller.report().await.unwrap_or_default();
    print_report_table(&report);
    if let Some(path) = cli.output.as_deref() {
        match write_report_json(path, &report) {
            Ok(()) => info!(path = %path.display(), "Wrote JSON report"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write JSON report"),
        }
    }
    for card in source.last_cards() {
        if let Some(a) = card.annotation() {
            debug!(label = %a.label(), "Card annotation");
        }
    }
    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("ad_scan_rs=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn search_parameters(cli: &Cli) -> Result<SearchParameters> {
    let end = match cli.end.as_deref() {
        Some(s) => parse_date(s)?,
        None => OffsetDateTime::now_utc().date(),
    };
    let start = match cli.start.as_deref() {
        Some(s) => parse_date(s)?,
        None => end - time::Duration::days(DEFAULT_RANGE_DAYS),
    };
    Ok(SearchParameters::new(&cli.region, start, end)?)
}

fn build_service(kind: ServiceKind) -> Result<Arc<dyn CountService>> {
    let config = ServiceConfig::from_env();
    let service: Arc<dyn CountService> = match kind {
        ServiceKind::Page => Arc::new(LibraryPageClient::new(&config.library_url)?),
        ServiceKind::Archive => {
            let Some(token) = config.archive_token.as_deref() else {
                bail!("--service archive requires ADS_ARCHIVE_TOKEN");
            };
            Arc::new(ArchiveClient::new(&config.archive_url, token)?)
        }
    };
    Ok(service)
}

fn print_report_table(report: &ScanReport) {
    let rows: Vec<[String; 5]> = report.outcomes.iter().map(outcome_row).collect();
    let headers = ["#", "subject", "count", "tier", "source"];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len().min(60));
        }
    }

    let s = &report.status;
    println!(
        "\nChecked: {} (high: {}, low: {}) of {} units, phase: {:?}",
        s.checked, s.high_count, s.low_count, s.total, s.phase
    );
    print_row(&headers.map(String::from), &widths);
    print_row(&widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        print_row(row, &widths);
    }
}

fn print_row(cells: &[String; 5], widths: &[usize; 5]) {
    let mut source = cells[4].clone();
    if source.len() > 60 {
        source.truncate(60);
    }
    println!(
        "{:>w0$}  {:<w1$}  {:>w2$}  {:<w3$}  {:<w4$}",
        cells[0],
        cells[1],
        cells[2],
        cells[3],
        source,
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3],
        w4 = widths[4]
    );
}

fn outcome_row(outcome: &StepOutcome) -> [String; 5] {
    match outcome {
        StepOutcome::Checked {
            index,
            result,
            tier,
        } => [
            index.to_string(),
            result.subject_id.clone(),
            result.count.to_string(),
            match tier {
                Tier::High => "high".into(),
                Tier::Low => "low".into(),
            },
            result.source_url.clone(),
        ],
        StepOutcome::Skipped { index } => [
            index.to_string(),
            "-".into(),
            "-".into(),
            "skipped".into(),
            String::new(),
        ],
        StepOutcome::Failed {
            index,
            subject_id,
            reason,
        } => [
            index.to_string(),
            subject_id.clone(),
            "?".into(),
            "unknown".into(),
            reason.clone(),
        ],
    }
}

fn write_report_json(path: &std::path::Path, report: &ScanReport) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
