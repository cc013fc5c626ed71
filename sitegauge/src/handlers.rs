use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sitegauge_core::config::expand_path;
use sitegauge_core::report::{ReportFormat, gather_report_data, generate_report, save_report};
use sitegauge_core::{
    AuditTrend, CrawlIngestionController, CrawlRun, Database, FinalizeOutcome, IssueStatus,
    Priority, Repository, Settings,
};
use sitegauge_scanner::{Crawler, ProgressCallback, StatusProbe};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

// Helpers shared by the handlers and exercised by the integration tests

/// Path part of a URL for compact progress output; `/` for the site root.
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// clap value parser for `issue set-status --status`.
pub fn parse_issue_status(s: &str) -> Result<IssueStatus, String> {
    IssueStatus::parse(s.trim()).ok_or_else(|| {
        format!("unknown issue status '{s}' (expected open, in_progress, fixed or ignored)")
    })
}

/// Plain-text summary of a finished crawl run. An aborted run says the
/// audit failed; it never reads as a clean audit.
pub fn summarize_run(run: &CrawlRun) -> String {
    let mut out = String::new();
    out.push_str(&format!("Crawl #{} of {}\n", run.crawl.id, run.crawl.root_url));
    out.push_str(&format!(
        "Pages stored: {}, duplicates: {}, skipped: {}, ignored: {}\n",
        run.tally.stored, run.tally.duplicates, run.tally.skipped, run.tally.ignored
    ));
    if let Some(summary) = &run.summary {
        if summary.fetch_errors > 0 {
            out.push_str(&format!("Fetch errors: {}\n", summary.fetch_errors));
        }
    }

    match &run.outcome {
        FinalizeOutcome::Completed(audit) | FinalizeOutcome::AlreadyCompleted(audit) => {
            out.push_str(&format!(
                "Audit #{}: {} pages, score {}/100\n",
                audit.id, audit.pages, audit.score
            ));
            let high: u64 = audit
                .counters
                .iter()
                .filter(|(kind, _)| kind.priority() == Some(Priority::High))
                .map(|(_, count)| count)
                .sum();
            out.push_str(&format!("High priority findings: {high}\n"));
        }
        FinalizeOutcome::Aborted(reason) => {
            out.push_str(&format!(
                "Audit failed: {}\n",
                reason.as_deref().unwrap_or("crawl aborted")
            ));
        }
    }
    out
}

/// Plain-text rendering of a client's audit trend.
pub fn format_trend(trend: &AuditTrend) -> String {
    let Some(latest) = &trend.latest else {
        return format!("No completed audit yet for client {}\n", trend.client_id);
    };

    let mut out = format!(
        "Latest audit #{} (crawl #{}): {} pages, score {}/100\n",
        latest.id, latest.crawl_id, latest.pages, latest.score
    );
    let Some(previous) = &trend.previous else {
        out.push_str("No previous audit to compare against\n");
        return out;
    };
    out.push_str(&format!(
        "Previous audit #{} (crawl #{}): {} pages, score {}/100\n",
        previous.id, previous.crawl_id, previous.pages, previous.score
    ));
    if let Some(delta) = trend.score_delta {
        out.push_str(&format!("Score change: {delta:+}\n"));
    }

    let changed: Vec<_> = trend
        .deltas
        .iter()
        .flatten()
        .filter(|(_, delta)| **delta != 0)
        .collect();
    if changed.is_empty() {
        out.push_str("No counter changed\n");
    } else {
        for (name, delta) in changed {
            out.push_str(&format!("  {name}: {delta:+}\n"));
        }
    }
    out
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> String {
    print!("{} ", msg.bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut response = String::new();
    if io::stdin().read_line(&mut response).is_err() {
        return String::new();
    }
    response.trim().to_lowercase()
}

fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.into());
    Ok(spinner)
}

/// Environment settings with the global `--database` override applied.
pub fn load_settings(matches: &ArgMatches) -> Result<Settings> {
    let mut settings = Settings::from_env().context("Invalid sitegauge environment")?;
    if let Some(path) = matches.get_one::<String>("database") {
        settings.database_path = expand_path(path);
    }
    Ok(settings)
}

fn open_database(settings: &Settings) -> Result<Database> {
    if !Database::exists(&settings.database_path) {
        bail!(
            "No database at {} (run `sitegauge init` first)",
            settings.database_path.display()
        );
    }
    Database::new(&settings.database_path)
        .with_context(|| format!("Failed to open {}", settings.database_path.display()))
}

fn controller(settings: &Settings, probe: bool) -> Result<CrawlIngestionController<Database>> {
    let db = open_database(settings)?;
    let controller = CrawlIngestionController::new(Arc::new(db));
    if !probe {
        return Ok(controller);
    }
    let probe = StatusProbe::new(
        settings.request_timeout_secs,
        settings.crawl_concurrency,
        &settings.user_agent,
    )?;
    Ok(controller.with_status_probe(probe))
}

pub fn handle_init(args: &ArgMatches, settings: &Settings) -> Result<()> {
    print_divider();
    println!("{}", "  SITEGAUGE INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let force = args.get_flag("force");
    let db_path = settings.database_path.as_path();
    println!(
        "{} Target: {}",
        "→".blue(),
        db_path.display().to_string().bright_white()
    );
    println!();

    if Database::exists(db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!(
                "{}",
                "Overwriting deletes every client, crawl and audit.".yellow()
            );
            let response = print_prompt("Do you want to continue? [y/N]:");
            println!();

            if response != "y" && response != "yes" {
                println!("{} Initialization cancelled.", "✗".red().bold());
                return Ok(());
            }
        }
        Database::drop(db_path)?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    println!("{} Creating database...", "→".blue());
    Database::new(db_path).context("Failed to create database")?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub fn handle_client_add(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let name = args
        .get_one::<String>("name")
        .ok_or_else(|| anyhow!("--name is required"))?;
    let db = open_database(settings)?;
    let client = db.create_client(name.trim())?;
    println!(
        "{} Client {} created: {}",
        "✓".green().bold(),
        client.id.to_string().cyan(),
        client.name.bright_white()
    );
    Ok(())
}

pub fn handle_client_list(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let clients = db.list_clients()?;
    if clients.is_empty() {
        println!("No clients yet. Add one with `sitegauge client add --name <NAME>`.");
        return Ok(());
    }

    print_divider();
    println!("{}", "  CLIENTS".bright_white().bold());
    print_divider();
    for client in clients {
        let crawls = db.crawls_for_client(client.id)?;
        println!(
            "  {:>4}  {:<32} {} crawl(s)",
            client.id.to_string().cyan(),
            client.name.bright_white(),
            crawls.len()
        );
    }
    println!();
    Ok(())
}

pub async fn handle_crawl(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let client_id = *args
        .get_one::<i64>("client")
        .ok_or_else(|| anyhow!("--client is required"))?;
    let url = args
        .get_one::<String>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let threads = args
        .get_one::<usize>("threads")
        .copied()
        .unwrap_or(settings.crawl_concurrency);
    let max_depth = args
        .get_one::<usize>("max-depth")
        .copied()
        .unwrap_or(settings.max_depth);
    let max_pages = args
        .get_one::<usize>("max-pages")
        .copied()
        .unwrap_or(settings.max_pages);
    let probe = args.get_flag("probe-links") || settings.probe_links;

    println!("\n🕷️  Crawling {}", url.bright_white());
    println!("Workers: {}", threads);
    println!("Max depth: {}", max_depth);
    println!("Max pages: {}", max_pages);
    println!(
        "Link probing: {}\n",
        if probe { "enabled" } else { "disabled" }
    );

    let controller = controller(settings, probe)?;
    let progress = spinner("Starting crawl...")?;
    let progress_bar = progress.clone();
    let callback: ProgressCallback = Arc::new(move |worker, url| {
        progress_bar.set_message(format!("[worker {}] {}", worker, extract_url_path(&url)));
    });

    let crawler = Crawler::with_timeout(settings.request_timeout_secs, &settings.user_agent)?
        .with_max_depth(max_depth)
        .with_max_pages(max_pages)
        .with_progress_callback(callback);

    let run = controller
        .run_crawl(client_id, url, &crawler, threads)
        .await;
    progress.finish_and_clear();
    let run = run?;

    print!("{}", summarize_run(&run));
    if let FinalizeOutcome::Aborted(_) = run.outcome {
        bail!("Audit failed for crawl #{}", run.crawl.id);
    }
    println!("\n{} Crawl complete!", "✓".green().bold());

    let output = args.get_one::<PathBuf>("output");
    let format = args.get_one::<String>("format");
    if output.is_some() || format.is_some() {
        let format = format
            .and_then(|f| ReportFormat::parse(f))
            .unwrap_or(ReportFormat::Text);
        let data = gather_report_data(&**controller.repository(), run.crawl.id, false)?;
        let report = generate_report(&data, format)?;
        write_report(&report, output)?;
    }
    Ok(())
}

pub async fn handle_serve(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(bind) = args.get_one::<String>("bind") {
        settings.bind_addr = bind.clone();
    }
    crate::webhook::serve(&settings).await
}

pub fn handle_report(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let crawl_id = *args
        .get_one::<i64>("crawl")
        .ok_or_else(|| anyhow!("--crawl is required"))?;
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::parse(f))
        .unwrap_or(ReportFormat::Text);
    let include_pages = args.get_flag("include-pages");

    let db = open_database(settings)?;
    let data = gather_report_data(&db, crawl_id, include_pages)?;
    let report = generate_report(&data, format)?;
    write_report(&report, args.get_one::<PathBuf>("output"))
}

fn write_report(report: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            save_report(report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

pub async fn handle_trend(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let client_id = *args
        .get_one::<i64>("client")
        .ok_or_else(|| anyhow!("--client is required"))?;
    let controller = controller(settings, false)?;
    let trend = controller.audit_trend(client_id).await?;
    print!("{}", format_trend(&trend));
    Ok(())
}

pub async fn handle_issue_list(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let audit_id = *args
        .get_one::<i64>("audit")
        .ok_or_else(|| anyhow!("--audit is required"))?;
    let controller = controller(settings, false)?;
    let issues = controller.issues(audit_id).await?;
    if issues.is_empty() {
        println!("Audit #{} has no issues.", audit_id);
        return Ok(());
    }

    for issue in issues {
        let priority = match issue.priority {
            Priority::High => issue.priority.as_str().red().bold(),
            Priority::Medium => issue.priority.as_str().yellow(),
            Priority::Low => issue.priority.as_str().bright_black(),
        };
        println!(
            "{:>6}  {:<6}  {:<11}  {:<36}  {}",
            issue.id.to_string().cyan(),
            priority,
            issue.status.as_str(),
            issue.issue.as_str(),
            issue.url
        );
    }
    Ok(())
}

pub async fn handle_issue_set_status(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let issue_id = *args
        .get_one::<i64>("id")
        .ok_or_else(|| anyhow!("--id is required"))?;
    let status = *args
        .get_one::<IssueStatus>("status")
        .ok_or_else(|| anyhow!("--status is required"))?;

    let controller = controller(settings, false)?;
    match controller.set_issue_status(issue_id, status).await? {
        Some(issue) => {
            println!(
                "{} Issue {} is now {}",
                "✓".green().bold(),
                issue.id.to_string().cyan(),
                issue.status.as_str().bright_white()
            );
            Ok(())
        }
        None => bail!("No issue with id {}", issue_id),
    }
}
