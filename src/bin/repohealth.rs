use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use repohealth::metrics::{BucketCounts, Distribution, DurationSeries, MetricReport, SeriesPoint};
use repohealth::{DateRange, Granularity, MetricSpec, Period, RepoHealth, WaitOptions};

#[derive(Parser)]
#[command(name = "repohealth", about = "Pull request health metrics")]
struct Cli {
    /// Database path (default: ~/.repohealth/repohealth.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Seconds to wait for event data before giving up
    #[arg(long, default_value = "30")]
    wait_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import pull/change requests from a JSON array or JSON-lines file
    Import {
        /// Path to the event file
        file: String,
        /// Repository the events belong to
        #[arg(long)]
        repo: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute a metric for one or more repositories
    Metrics {
        #[command(subcommand)]
        target: MetricsTarget,
    },
    /// List imported repositories
    Repos {
        #[arg(long)]
        json: bool,
    },
    /// Delete every imported request of a repository
    Remove {
        repo: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show store status
    Status,
}

#[derive(Args)]
struct Selection {
    /// Repository to include (repeatable)
    #[arg(long = "repo", required = true)]
    repos: Vec<String>,
    /// Include requests created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// Include requests created on or before this date (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,
    /// Period instead of start/end (e.g. 2024, 2024-Q1, 2024-03, 2024-W05, 30d, ytd)
    #[arg(long, conflicts_with_all = ["start", "end"])]
    period: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl Selection {
    fn range(&self) -> anyhow::Result<DateRange> {
        Ok(match &self.period {
            Some(p) => Period::parse(p)?.to_range()?,
            None => DateRange::parse(self.start.as_deref(), self.end.as_deref())?,
        })
    }
}

#[derive(Subcommand)]
enum MetricsTarget {
    /// Mean and median days from open to close, per interval
    ReviewCycle {
        #[command(flatten)]
        sel: Selection,
        /// Interval: D, W, M or Y (default: config default_interval, else M)
        #[arg(long)]
        interval: Option<String>,
    },
    /// Distribution of days from open to merge
    ChangeDuration {
        #[command(flatten)]
        sel: Selection,
    },
    /// Open request count, at a date or per interval
    Open {
        #[command(flatten)]
        sel: Selection,
        /// Single point in time (YYYY-MM-DD or RFC 3339)
        #[arg(long, conflicts_with_all = ["interval", "start", "end", "period"])]
        at: Option<String>,
        #[arg(long)]
        interval: Option<String>,
    },
    /// Requests created, closed and merged per interval
    Counts {
        #[command(flatten)]
        sel: Selection,
        #[arg(long)]
        interval: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => repohealth::Database::open_at(path).await?,
        None => repohealth::Database::open().await?,
    };
    let rh = RepoHealth::new(db);
    let wait = WaitOptions {
        timeout: Duration::from_secs(cli.wait_timeout),
        ..WaitOptions::default()
    };

    match cli.command {
        Commands::Import { file, repo, json } => {
            let report = rh.import_file(&repo, &file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Imported {} requests into {}", report.imported, report.repo);
                print_dropped(report.dropped.len());
                for d in report.dropped.iter().take(10) {
                    println!("    {d}");
                }
            }
        }
        Commands::Metrics { target } => {
            handle_metrics(&rh, target, wait).await?;
        }
        Commands::Repos { json } => {
            let repos = rh.repos().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&repos)?);
            } else if repos.is_empty() {
                println!("No repositories imported.");
            } else {
                for r in &repos {
                    println!(
                        "{}: {} requests ({} open, {} merged), created {} .. {}",
                        r.repo,
                        r.requests,
                        r.open,
                        r.merged,
                        r.first_created.as_deref().unwrap_or("-"),
                        r.last_created.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Commands::Remove { repo } => {
            let n = rh.remove_repo(&repo).await?;
            println!("Removed {n} requests from {repo}");
        }
        Commands::Config { action } => {
            handle_config(&rh, action).await?;
        }
        Commands::Status => {
            print_status(&rh).await?;
        }
    }

    Ok(())
}

async fn cancel_on_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; never cancel.
        std::future::pending::<()>().await;
    }
}

async fn resolve_interval(
    rh: &RepoHealth,
    interval: Option<&str>,
    spec: Option<&MetricSpec>,
) -> anyhow::Result<Granularity> {
    Ok(match (interval, spec) {
        (Some(token), _) => Granularity::parse(token)?,
        (None, Some(spec)) => rh.default_granularity_for(spec).await?,
        (None, None) => rh.default_granularity().await?,
    })
}

async fn handle_metrics(rh: &RepoHealth, target: MetricsTarget, wait: WaitOptions) -> anyhow::Result<()> {
    match target {
        MetricsTarget::ReviewCycle { sel, interval } => {
            let spec = MetricSpec::review_cycle_duration();
            let granularity = resolve_interval(rh, interval.as_deref(), Some(&spec)).await?;
            let range = sel.range()?;
            let rows = rh.events(&sel.repos, wait, cancel_on_ctrl_c()).await?;
            let report = repohealth::aggregate(&rows, &spec, granularity, &range)?;
            if sel.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_header(&spec.title, &range, &report);
                if let Some(s) = report.outcome.data() {
                    print_duration_series(s);
                }
            }
        }
        MetricsTarget::ChangeDuration { sel } => {
            let range = sel.range()?;
            let rows = rh.events(&sel.repos, wait, cancel_on_ctrl_c()).await?;
            let spec = MetricSpec::change_request_duration();
            let report = repohealth::distribution(&rows, &spec, &range)?;
            if sel.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_header(&spec.title, &range, &report);
                if let Some(d) = report.outcome.data() {
                    print_distribution(d);
                }
            }
        }
        MetricsTarget::Open { sel, at, interval } => {
            let range = sel.range()?;
            let rows = rh.events(&sel.repos, wait, cancel_on_ctrl_c()).await?;
            if let Some(at) = at {
                // Every request created by `at` counts, however long ago.
                let at = match repohealth::date_util::parse_date(&at) {
                    Some(d) => repohealth::date_util::end_of_day(d),
                    None => repohealth::date_util::parse_timestamp(&at)
                        .map_err(|e| repohealth::Error::InvalidDate(format!("{at}: {e}")))?,
                };
                let normalized = repohealth::events::normalize(&rows);
                let open = repohealth::open_count_at(&normalized.events, at);
                if sel.json {
                    println!(
                        "{}",
                        serde_json::json!({ "at": at, "open": open, "dropped": normalized.dropped })
                    );
                } else {
                    println!("Open requests at {}: {open}", at.to_rfc3339());
                    print_dropped(normalized.dropped.len());
                }
            } else {
                let granularity = resolve_interval(rh, interval.as_deref(), None).await?;
                let report = repohealth::open_series(&rows, granularity, &range)?;
                if sel.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_header("Open Requests", &range, &report);
                    if let Some(points) = report.outcome.data() {
                        print_points(granularity, points);
                    }
                }
            }
        }
        MetricsTarget::Counts { sel, interval } => {
            let granularity = resolve_interval(rh, interval.as_deref(), None).await?;
            let range = sel.range()?;
            let rows = rh.events(&sel.repos, wait, cancel_on_ctrl_c()).await?;
            let report = repohealth::bucket_counts(&rows, granularity, &range)?;
            if sel.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_header("Requests per Interval", &range, &report);
                if let Some(counts) = report.outcome.data() {
                    print_counts(granularity, counts);
                }
            }
        }
    }
    Ok(())
}

async fn handle_config(rh: &RepoHealth, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match rh.config_get(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("(not set)"),
        },
        ConfigAction::Set { key, value } => {
            rh.config_set(&key, &value).await?;
            println!("Set {key} = {value}");
        }
        ConfigAction::List => {
            let items = rh.config_list().await?;
            if items.is_empty() {
                println!("No config values set.");
            }
            for (k, v) in items {
                println!("{k} = {v}");
            }
        }
    }
    Ok(())
}

async fn print_status(rh: &RepoHealth) -> anyhow::Result<()> {
    let repos = rh.repos().await?;
    let total: u64 = repos.iter().map(|r| r.requests).sum();
    println!("Repositories: {}", repos.len());
    println!("Requests:     {total}");
    println!("Interval:     {}", rh.default_granularity().await?.axis_title());

    let jobs = rh.recent_imports(5).await?;
    if !jobs.is_empty() {
        println!("Recent imports:");
        for j in jobs {
            println!(
                "  #{} {} [{}] {} imported, {} dropped at {}",
                j.id,
                j.repo,
                j.status,
                j.imported,
                j.dropped,
                j.completed_at.as_deref().unwrap_or(&j.started_at),
            );
        }
    }
    Ok(())
}

fn print_header<T>(title: &str, range: &DateRange, report: &MetricReport<T>) {
    if range.is_unbounded() {
        println!("{title}");
    } else {
        println!("{title} {range}");
    }
    if report.outcome.is_no_data() {
        println!("  No data available for the selected range");
    }
    print_dropped(report.dropped_count());
}

fn print_dropped(n: usize) {
    if n > 0 {
        println!("  Dropped {n} malformed rows");
    }
}

fn print_duration_series(s: &DurationSeries) {
    println!("  {:<12} {:>12} {:>12} {:>6}", s.granularity.axis_title(), "Mean (days)", "Median", "n");
    for ((mean, median), n) in s.mean.iter().zip(&s.median).zip(&s.samples) {
        println!(
            "  {:<12} {:>12.1} {:>12.1} {:>6}",
            s.granularity.label(mean.bucket),
            mean.value,
            median.value,
            n
        );
    }
    if s.mean.is_empty() {
        println!("  No closed requests in range");
    }
    if s.excluded_open > 0 {
        println!("  Still open (excluded): {}", s.excluded_open);
    }
    print_anomalies(s.anomalies.len());
}

fn print_distribution(d: &Distribution) {
    println!("  Merged requests: {}", d.stats.count);
    match d.stats.mean_days {
        Some(avg) => {
            println!("    Average: {avg:.1} days");
            println!("    Median:  {:.1} days", d.stats.median_days.unwrap_or(0.0));
            println!("    P90:     {:.1} days", d.stats.p90_days.unwrap_or(0.0));
            println!(
                "    Range:   {:.1}-{:.1} days",
                d.stats.min_days.unwrap_or(0.0),
                d.stats.max_days.unwrap_or(0.0)
            );
        }
        None => println!("    No merged requests in range"),
    }
    if d.excluded_open > 0 {
        println!("  Not merged (excluded): {}", d.excluded_open);
    }
    print_anomalies(d.anomalies.len());
}

fn print_anomalies(n: usize) {
    if n > 0 {
        println!("  Negative durations (excluded, check data): {n}");
    }
}

fn print_points(granularity: Granularity, points: &[SeriesPoint]) {
    for p in points {
        println!("  {:<12} {:>8}", granularity.label(p.bucket), p.value);
    }
}

fn print_counts(granularity: Granularity, counts: &[BucketCounts]) {
    println!("  {:<12} {:>8} {:>8} {:>8}", granularity.axis_title(), "Created", "Closed", "Merged");
    for c in counts {
        println!(
            "  {:<12} {:>8} {:>8} {:>8}",
            granularity.label(c.bucket),
            c.created,
            c.closed,
            c.merged
        );
    }
}
