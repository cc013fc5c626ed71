// Report generation from stored crawls and audits

use crate::audit::IssueKind;
use crate::error::{CoreError, Result};
use crate::model::{AuditRecord, CrawlId, CrawlState, Priority};
use crate::repository::Repository;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub crawl_id: CrawlId,
    pub client_name: String,
    pub root_url: String,
    pub state: CrawlState,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub total_pages: usize,
    /// `None` while the crawl is running or after it was aborted.
    pub audit: Option<AuditRecord>,
    pub issues: Vec<IssueData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageRow>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueData {
    pub id: i64,
    pub issue: String,
    pub priority: String,
    pub status: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRow {
    pub url: String,
    pub status_code: u16,
    pub title: String,
}

pub fn gather_report_data<R: Repository + ?Sized>(
    repo: &R,
    crawl_id: CrawlId,
    include_pages: bool,
) -> Result<ReportData> {
    let crawl = repo
        .get_crawl(crawl_id)?
        .ok_or(CoreError::UnknownCrawl(crawl_id))?;
    let client_name = repo
        .get_client(crawl.client_id)?
        .map(|c| c.name)
        .unwrap_or_else(|| format!("client {}", crawl.client_id));

    let stored = repo.pages_for_crawl(crawl_id)?;
    let audit = repo.audit_for_crawl(crawl_id)?;

    let issues = match &audit {
        Some(audit) => repo
            .issues_for_audit(audit.id)?
            .into_iter()
            .map(|issue| IssueData {
                id: issue.id,
                issue: issue.issue.as_str().to_string(),
                priority: issue.priority.as_str().to_string(),
                status: issue.status.as_str().to_string(),
                url: issue.url,
            })
            .collect(),
        None => Vec::new(),
    };

    let pages = include_pages.then(|| {
        let mut rows: Vec<PageRow> = stored
            .iter()
            .map(|p| PageRow {
                url: p.page.url.clone(),
                status_code: p.page.status_code,
                title: p.page.title.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.url.cmp(&b.url));
        rows
    });

    Ok(ReportData {
        crawl_id,
        client_name,
        root_url: crawl.root_url,
        state: crawl.state,
        started_at: crawl.started_at,
        finished_at: crawl.finished_at,
        abort_reason: crawl.abort_reason,
        total_pages: stored.len(),
        audit,
        issues,
        pages,
    })
}

pub fn generate_report(data: &ReportData, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => Ok(generate_json_report(data)?),
        ReportFormat::Markdown => Ok(generate_markdown_report(data)),
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                          SITEGAUGE SEO AUDIT REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Client:       {}\n", data.client_name));
    report.push_str(&format!("Crawl ID:     {}\n", data.crawl_id));
    report.push_str(&format!("Site:         {}\n", data.root_url));
    report.push_str(&format!("Status:       {}\n", data.status_to_string()));
    report.push_str(&format!("Crawl Date:   {}\n", format_timestamp(data.started_at)));
    if let Some(end_time) = data.finished_at {
        report.push_str(&format!("Duration:     {} seconds\n", end_time - data.started_at));
    }
    report.push_str(&format!("Pages Stored: {}\n\n", data.total_pages));

    report.push_str(RULE);
    report.push_str("AUDIT SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');

    match &data.audit {
        None => {
            report.push_str(&format!("{}\n\n", data.missing_audit_message()));
        }
        Some(audit) => {
            report.push_str(&format!("Score:        {}/100\n", audit.score));
            report.push_str(&format!("Pages:        {}\n\n", audit.pages));

            for priority in [Priority::High, Priority::Medium, Priority::Low] {
                let counters = counters_for(audit, priority);
                if counters.is_empty() {
                    continue;
                }
                report.push_str(&format!("  [{}]\n", priority.as_str().to_uppercase()));
                for (kind, count) in counters {
                    report.push_str(&format!("    {:<34} {}\n", describe_issue(kind), count));
                }
            }
            report.push('\n');
        }
    }

    if !data.issues.is_empty() {
        report.push_str(RULE);
        report.push_str("ISSUES\n");
        report.push_str(RULE);
        report.push('\n');

        for issue in &data.issues {
            report.push_str(&format!(
                "[{}] {:<7} {:<12} {}  {}\n",
                issue.id,
                issue.priority.to_uppercase(),
                issue.status,
                issue.issue,
                issue.url
            ));
        }
        report.push('\n');
    }

    if let Some(ref pages) = data.pages {
        report.push_str(RULE);
        report.push_str("PAGES\n");
        report.push_str(RULE);
        report.push('\n');
        report.push_str(&generate_page_list(pages));
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str("                                End of Report\n");
    report.push_str(RULE);
    report
}

pub fn generate_json_report(data: &ReportData) -> std::result::Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "sitegauge",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "crawl": {
                "id": data.crawl_id,
                "client": data.client_name,
                "root_url": data.root_url,
                "state": data.state.as_str(),
                "start_time": format_iso8601_timestamp(data.started_at),
                "end_time": data.finished_at.map(format_iso8601_timestamp),
                "abort_reason": data.abort_reason,
                "pages_stored": data.total_pages
            },
            "audit": data.audit.as_ref().map(|audit| serde_json::json!({
                "id": audit.id,
                "pages": audit.pages,
                "score": audit.score,
                "counters": audit.counters
            })),
            "issues": data.issues,
            "pages": data.pages
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_markdown_report(data: &ReportData) -> String {
    let mut md = String::new();

    md.push_str(&format!("# SEO Audit: {}\n\n", data.root_url));
    md.push_str(&format!("- **Client:** {}\n", data.client_name));
    md.push_str(&format!("- **Crawl:** {}\n", data.crawl_id));
    md.push_str(&format!("- **Status:** {}\n", data.status_to_string()));
    md.push_str(&format!("- **Started:** {}\n", format_timestamp(data.started_at)));
    md.push_str(&format!("- **Pages stored:** {}\n\n", data.total_pages));

    md.push_str("## Summary\n\n");
    match &data.audit {
        None => md.push_str(&format!("_{}_\n\n", data.missing_audit_message())),
        Some(audit) => {
            md.push_str(&format!("**Score:** {}/100 over {} pages\n\n", audit.score, audit.pages));
            md.push_str("| Counter | Priority | Count |\n");
            md.push_str("|---|---|---|\n");
            for (kind, count) in audit.counters.iter() {
                let priority = kind.priority().map(|p| p.as_str()).unwrap_or("-");
                md.push_str(&format!("| {} | {} | {} |\n", kind.as_str(), priority, count));
            }
            md.push('\n');
        }
    }

    if !data.issues.is_empty() {
        md.push_str("## Issues\n\n");
        md.push_str("| ID | Issue | Priority | Status | URL |\n");
        md.push_str("|---|---|---|---|---|\n");
        for issue in &data.issues {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                issue.id, issue.issue, issue.priority, issue.status, issue.url
            ));
        }
        md.push('\n');
    }

    if let Some(ref pages) = data.pages {
        md.push_str("## Pages\n\n");
        for page in pages {
            md.push_str(&format!("- `{}` {} {}\n", page.status_code, page.url, page.title));
        }
        md.push('\n');
    }

    md
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

impl ReportData {
    fn status_to_string(&self) -> &str {
        match self.state {
            CrawlState::Started => "Running",
            CrawlState::Completed => "Completed",
            CrawlState::Aborted => "Aborted",
        }
    }

    /// An absent audit is never shown as a clean result.
    fn missing_audit_message(&self) -> String {
        match self.state {
            CrawlState::Started => "Audit pending: the crawl is still running.".to_string(),
            _ => match &self.abort_reason {
                Some(reason) => format!("Audit failed: {}", reason),
                None => "Audit failed: no audit was recorded for this crawl.".to_string(),
            },
        }
    }
}

fn counters_for(audit: &AuditRecord, priority: Priority) -> Vec<(IssueKind, u64)> {
    audit
        .counters
        .iter()
        .filter(|(kind, _)| kind.priority() == Some(priority))
        .collect()
}

fn describe_issue(kind: IssueKind) -> String {
    let name = kind.as_str();
    let name = name
        .strip_prefix("pages_")
        .or_else(|| name.strip_prefix("total_"))
        .unwrap_or(name);
    let mut words = name.replace('_', " ");
    if let Some(first) = words.get(0..1) {
        let upper = first.to_uppercase();
        words.replace_range(0..1, &upper);
    }
    words
}

fn generate_page_list(pages: &[PageRow]) -> String {
    if pages.is_empty() {
        return "  (empty)\n".to_string();
    }

    let mut result = String::new();
    for (i, page) in pages.iter().enumerate() {
        let prefix = if i == pages.len() - 1 { "└── " } else { "├── " };
        let status_indicator = match page.status_code {
            200..=299 => "✓",
            300..=399 => "→",
            400..=499 => "⚠",
            500..=599 => "✗",
            _ => "?",
        };
        result.push_str(&format!(
            "{}{}  [{} {}] {}\n",
            prefix, page.url, status_indicator, page.status_code, page.title
        ));
    }
    result
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}
