pub mod aggregate;
pub mod audit;
pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod model;
pub mod report;
pub mod repository;

pub use aggregate::{AuditSummary, IssueCounts, Reduction, reduce};
pub use audit::{IssueKind, audit_page};
pub use config::{ConfigError, Settings};
pub use data::Database;
pub use error::{CoreError, Result};
pub use ingest::{
    AuditTrend, CrawlIngestionController, CrawlRun, FinalizeOutcome, IgnoreReason, IngestOutcome,
    IngestTally, IngestTarget,
};
pub use model::{
    AuditIssue, AuditRecord, Client, ClientId, Crawl, CrawlId, CrawlState, IssueStatus,
    PageSnapshot, Priority, StoredPage,
};
pub use repository::{Finalization, InsertOutcome, Repository};
