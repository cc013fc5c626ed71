// Persistence seam between the ingestion controller and storage

use crate::aggregate::Reduction;
use crate::error::Result;
use crate::model::{
    AuditId, AuditIssue, AuditRecord, Client, ClientId, Crawl, CrawlId, CrawlState, IssueId,
    IssueStatus, PageSnapshot, StoredPage, UrlId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(UrlId),
    /// A row for this (crawl, url) already exists; nothing was written.
    Duplicate,
    /// The crawl is unknown or no longer `STARTED`.
    CrawlClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    Completed(AuditRecord),
    /// No pages were stored; the crawl was moved to `ABORTED` instead.
    Empty,
    NotOpen(CrawlState),
    UnknownCrawl,
}

/// Reduces every page of a crawl; called inside the finalization
/// transaction so no page can slip in between the read and the audit write.
pub type Reducer<'a> = &'a dyn Fn(&[StoredPage]) -> Option<Reduction>;

pub trait Repository: Send + Sync {
    fn create_client(&self, name: &str) -> Result<Client>;
    fn get_client(&self, client_id: ClientId) -> Result<Option<Client>>;
    fn list_clients(&self) -> Result<Vec<Client>>;

    fn create_crawl(&self, client_id: ClientId, root_url: &str, base_domain: &str) -> Result<Crawl>;
    fn get_crawl(&self, crawl_id: CrawlId) -> Result<Option<Crawl>>;
    fn crawls_for_client(&self, client_id: ClientId) -> Result<Vec<Crawl>>;

    /// Insert a page snapshot unless the crawl is closed or the URL is
    /// already stored for it.
    fn insert_page(&self, crawl_id: CrawlId, page: &PageSnapshot) -> Result<InsertOutcome>;
    fn pages_for_crawl(&self, crawl_id: CrawlId) -> Result<Vec<StoredPage>>;

    /// Atomically reduce the crawl's pages, write the audit and its issues,
    /// and move the crawl from `STARTED` to `COMPLETED`.
    fn finalize_crawl(&self, crawl_id: CrawlId, reduce: Reducer<'_>) -> Result<Finalization>;

    /// Returns true when the crawl moved from `STARTED` to `ABORTED`.
    fn abort_crawl(&self, crawl_id: CrawlId, reason: &str) -> Result<bool>;

    fn audit_for_crawl(&self, crawl_id: CrawlId) -> Result<Option<AuditRecord>>;
    /// Newest first.
    fn recent_audits(&self, client_id: ClientId, limit: usize) -> Result<Vec<AuditRecord>>;
    fn issues_for_audit(&self, audit_id: AuditId) -> Result<Vec<AuditIssue>>;
    fn set_issue_status(&self, issue_id: IssueId, status: IssueStatus) -> Result<Option<AuditIssue>>;
}
