// Persistent entities: clients, crawls, page snapshots, audits, audit issues

use crate::aggregate::IssueCounts;
use crate::audit::IssueKind;
use serde::{Deserialize, Serialize};
use sitegauge_scanner::{Headings, PageSignals, RawPage};
use std::collections::BTreeMap;

pub type ClientId = i64;
pub type CrawlId = i64;
pub type UrlId = i64;
pub type AuditId = i64;
pub type IssueId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlState {
    Started,
    Completed,
    Aborted,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlState::Started => "STARTED",
            CrawlState::Completed => "COMPLETED",
            CrawlState::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(CrawlState::Started),
            "COMPLETED" => Some(CrawlState::Completed),
            "ABORTED" => Some(CrawlState::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Weight of one affected page in the audit score.
    pub fn weight(&self) -> u64 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Open,
    InProgress,
    Fixed,
    Ignored,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "OPEN",
            IssueStatus::InProgress => "IN_PROGRESS",
            IssueStatus::Fixed => "FIXED",
            IssueStatus::Ignored => "IGNORED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "OPEN" => Some(IssueStatus::Open),
            "IN_PROGRESS" => Some(IssueStatus::InProgress),
            "FIXED" => Some(IssueStatus::Fixed),
            "IGNORED" => Some(IssueStatus::Ignored),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crawl {
    pub id: CrawlId,
    pub client_id: ClientId,
    pub root_url: String,
    pub base_domain: String,
    pub state: CrawlState,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub abort_reason: Option<String>,
}

/// One persisted page of a crawl (a row of `urls`). Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub status_code: u16,
    pub original_status: Option<u16>,
    pub canonical: String,
    pub canonical_status: Option<u16>,
    pub self_canonical: bool,
    pub alternate_canonical: bool,
    pub title: String,
    pub description: String,
    pub headings: Headings,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    pub internal_link_status: BTreeMap<String, u16>,
    pub images_missing_alt: u32,
}

impl PageSnapshot {
    /// Build a snapshot from extracted signals. `canonical_status` is the
    /// status a probe resolved for a canonical pointing elsewhere; it stays
    /// `None` when nothing checked it. A self-referencing canonical never
    /// carries a status, the page's own status is already bucketed.
    pub fn from_signals(
        page: &RawPage,
        signals: PageSignals,
        canonical_status: Option<u16>,
        internal_link_status: BTreeMap<String, u16>,
    ) -> Self {
        let self_canonical = signals.is_self_canonical();
        let canonical_status = canonical_status.filter(|_| !self_canonical);

        Self {
            url: signals.url,
            status_code: page.status_code,
            original_status: page.original_status,
            canonical: signals.canonical,
            canonical_status,
            self_canonical,
            alternate_canonical: signals.canonical_declared && !self_canonical,
            title: signals.title,
            description: signals.description,
            headings: signals.headings,
            internal_links: signals.internal_links,
            external_links: signals.external_links,
            internal_link_status,
            images_missing_alt: signals.images_missing_alt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPage {
    pub id: UrlId,
    pub crawl_id: CrawlId,
    pub page: PageSnapshot,
}

/// The aggregate row of one completed crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub crawl_id: CrawlId,
    pub client_id: ClientId,
    pub pages: u64,
    pub counters: IssueCounts,
    pub score: u8,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditIssue {
    pub id: IssueId,
    pub audit_id: AuditId,
    pub url_id: UrlId,
    pub url: String,
    pub issue: IssueKind,
    pub status: IssueStatus,
    pub priority: Priority,
    pub updated_at: i64,
}
