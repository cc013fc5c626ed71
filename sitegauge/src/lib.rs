pub mod handlers;
pub mod webhook;

pub use handlers::{extract_url_path, format_trend, parse_issue_status, summarize_run};

use colored::Colorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub fn print_banner() {
    println!(
        "{} {}",
        "sitegauge".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("{}", "crawl, audit, compare".bright_black());
    println!();
}

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Logs go to stderr so report output on stdout stays clean.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
