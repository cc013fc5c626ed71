// Crawl session orchestration: start, ingest pages, finalize, abort

use crate::aggregate::reduce;
use crate::error::{CoreError, Result};
use crate::model::{
    AuditId, AuditIssue, AuditRecord, ClientId, Crawl, CrawlId, CrawlState, IssueId, IssueStatus,
    PageSnapshot, UrlId,
};
use crate::repository::{Finalization, InsertOutcome, Repository};
use serde::Serialize;
use sitegauge_scanner::{
    CrawlSummary, Crawler, LinkClassifier, PageSignalExtractor, RawPage, StatusProbe, base_domain,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Where a page is addressed: the crawl it belongs to and the client that
/// owns that crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestTarget {
    pub crawl_id: CrawlId,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownCrawl,
    ClientMismatch,
    CrawlClosed,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnknownCrawl => write!(f, "unknown crawl"),
            IgnoreReason::ClientMismatch => write!(f, "crawl belongs to another client"),
            IgnoreReason::CrawlClosed => write!(f, "crawl is not accepting pages"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(UrlId),
    Duplicate,
    /// The page could not be parsed; nothing was stored.
    Skipped(String),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Completed(AuditRecord),
    /// Finalize was repeated; the audit written the first time.
    AlreadyCompleted(AuditRecord),
    Aborted(Option<String>),
}

impl FinalizeOutcome {
    pub fn audit(&self) -> Option<&AuditRecord> {
        match self {
            FinalizeOutcome::Completed(audit) | FinalizeOutcome::AlreadyCompleted(audit) => Some(audit),
            FinalizeOutcome::Aborted(_) => None,
        }
    }
}

/// Per-run tally of ingest outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestTally {
    pub stored: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub ignored: usize,
}

impl IngestTally {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Stored(_) => self.stored += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Skipped(_) => self.skipped += 1,
            IngestOutcome::Ignored(_) => self.ignored += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlRun {
    pub crawl: Crawl,
    pub tally: IngestTally,
    pub summary: Option<CrawlSummary>,
    pub outcome: FinalizeOutcome,
}

/// Latest and previous audit of a client. `latest` is `None` until a crawl
/// has completed; that is not the same as an audit with zero issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditTrend {
    pub client_id: ClientId,
    pub latest: Option<AuditRecord>,
    pub previous: Option<AuditRecord>,
    /// Counter deltas, latest minus previous, when both exist.
    pub deltas: Option<BTreeMap<String, i64>>,
    pub score_delta: Option<i16>,
}

impl AuditTrend {
    fn new(client_id: ClientId, latest: Option<AuditRecord>, previous: Option<AuditRecord>) -> Self {
        let (deltas, score_delta) = match (&latest, &previous) {
            (Some(latest), Some(previous)) => {
                let before = previous.counters.to_flat_map();
                let deltas = latest
                    .counters
                    .to_flat_map()
                    .into_iter()
                    .map(|(name, now)| {
                        let was = before.get(name).copied().unwrap_or(0);
                        (name.to_string(), now as i64 - was as i64)
                    })
                    .collect();
                (
                    Some(deltas),
                    Some(i16::from(latest.score) - i16::from(previous.score)),
                )
            }
            _ => (None, None),
        };

        Self {
            client_id,
            latest,
            previous,
            deltas,
            score_delta,
        }
    }
}

/// Turns raw pages into stored snapshots and, at the end of a crawl, into
/// one audit. Repository calls run on the blocking pool.
pub struct CrawlIngestionController<R> {
    repo: Arc<R>,
    probe: Option<StatusProbe>,
}

impl<R> Clone for CrawlIngestionController<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            probe: self.probe.clone(),
        }
    }
}

impl<R: Repository + 'static> CrawlIngestionController<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, probe: None }
    }

    /// Resolve canonical and internal link statuses before storing a page.
    pub fn with_status_probe(mut self, probe: StatusProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&R) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo)).await?
    }

    pub async fn start_crawl(&self, client_id: ClientId, root_url: &str) -> Result<Crawl> {
        let root = normalize_root(root_url)?;
        let domain =
            base_domain(root.as_str()).ok_or_else(|| CoreError::InvalidRoot(root_url.to_string()))?;

        let crawl = self
            .blocking(move |repo| {
                if repo.get_client(client_id)?.is_none() {
                    return Err(CoreError::UnknownClient(client_id));
                }
                repo.create_crawl(client_id, root.as_str(), &domain)
            })
            .await?;

        info!(crawl_id = crawl.id, client_id, root = %crawl.root_url, "crawl started");
        Ok(crawl)
    }

    pub async fn crawl(&self, crawl_id: CrawlId) -> Result<Option<Crawl>> {
        self.blocking(move |repo| repo.get_crawl(crawl_id)).await
    }

    pub async fn ingest_page(&self, target: IngestTarget, page: RawPage) -> Result<IngestOutcome> {
        let crawl_id = target.crawl_id;
        let crawl = self.blocking(move |repo| repo.get_crawl(crawl_id)).await?;

        let crawl = match crawl {
            None => return Ok(self.ignore(target, &page, IgnoreReason::UnknownCrawl)),
            Some(c) if c.client_id != target.client_id => {
                return Ok(self.ignore(target, &page, IgnoreReason::ClientMismatch));
            }
            Some(c) if c.state != CrawlState::Started => {
                return Ok(self.ignore(target, &page, IgnoreReason::CrawlClosed));
            }
            Some(c) => c,
        };

        let extractor = PageSignalExtractor::new(LinkClassifier::new(crawl.base_domain));
        let signals = match extractor.extract(&page) {
            Ok(signals) => signals,
            Err(e) => {
                warn!(crawl_id, url = %page.url, error = %e, "page skipped");
                return Ok(IngestOutcome::Skipped(e.to_string()));
            }
        };

        let (canonical_status, link_status) = match &self.probe {
            Some(probe) => {
                let canonical_status = if signals.is_self_canonical() {
                    None
                } else {
                    Some(probe.status_of(&signals.canonical).await)
                };
                let link_status = probe.resolve(signals.internal_links.iter().cloned()).await;
                (canonical_status, link_status)
            }
            None => (None, BTreeMap::new()),
        };

        let snapshot = PageSnapshot::from_signals(&page, signals, canonical_status, link_status);
        let url = snapshot.url.clone();
        let inserted = self
            .blocking(move |repo| repo.insert_page(crawl_id, &snapshot))
            .await?;

        Ok(match inserted {
            InsertOutcome::Inserted(url_id) => {
                debug!(crawl_id, url_id, url = %url, "page stored");
                IngestOutcome::Stored(url_id)
            }
            InsertOutcome::Duplicate => {
                debug!(crawl_id, url = %url, "duplicate page ignored");
                IngestOutcome::Duplicate
            }
            InsertOutcome::CrawlClosed => self.ignore(target, &page, IgnoreReason::CrawlClosed),
        })
    }

    fn ignore(&self, target: IngestTarget, page: &RawPage, reason: IgnoreReason) -> IngestOutcome {
        debug!(
            crawl_id = target.crawl_id,
            client_id = target.client_id,
            url = %page.url,
            %reason,
            "page ignored"
        );
        IngestOutcome::Ignored(reason)
    }

    /// Reduce the crawl's pages into its audit. Safe to call more than once
    /// and from several tasks: only the first call writes.
    pub async fn finalize(&self, crawl_id: CrawlId) -> Result<FinalizeOutcome> {
        self.blocking(move |repo| {
            match repo.finalize_crawl(crawl_id, &reduce)? {
                Finalization::Completed(audit) => Ok(FinalizeOutcome::Completed(audit)),
                Finalization::Empty => {
                    warn!(crawl_id, "crawl finished without pages, aborted");
                    Ok(FinalizeOutcome::Aborted(Some("no pages were stored".to_string())))
                }
                Finalization::NotOpen(CrawlState::Completed) => repo
                    .audit_for_crawl(crawl_id)?
                    .map(FinalizeOutcome::AlreadyCompleted)
                    .ok_or_else(|| CoreError::Corrupt(format!("completed crawl {crawl_id} has no audit"))),
                Finalization::NotOpen(_) => {
                    let reason = repo.get_crawl(crawl_id)?.and_then(|c| c.abort_reason);
                    Ok(FinalizeOutcome::Aborted(reason))
                }
                Finalization::UnknownCrawl => Err(CoreError::UnknownCrawl(crawl_id)),
            }
        })
        .await
    }

    /// Stop accepting pages. Returns false when the crawl was already closed.
    pub async fn abort(&self, crawl_id: CrawlId, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        let aborted = self
            .blocking(move |repo| {
                if repo.get_crawl(crawl_id)?.is_none() {
                    return Err(CoreError::UnknownCrawl(crawl_id));
                }
                repo.abort_crawl(crawl_id, &reason)
            })
            .await?;
        if aborted {
            warn!(crawl_id, "crawl aborted");
        }
        Ok(aborted)
    }

    /// Crawl `root_url` and ingest every page as it arrives, then finalize.
    pub async fn run_crawl(
        &self,
        client_id: ClientId,
        root_url: &str,
        crawler: &Crawler,
        workers: usize,
    ) -> Result<CrawlRun> {
        let crawl = self.start_crawl(client_id, root_url).await?;
        let target = IngestTarget {
            crawl_id: crawl.id,
            client_id,
        };

        let (tx, mut rx) = mpsc::channel::<RawPage>(workers.max(1) * 4);
        let consume = async {
            let mut tally = IngestTally::default();
            while let Some(page) = rx.recv().await {
                let outcome = self.ingest_page(target, page).await?;
                tally.record(&outcome);
            }
            Ok::<_, CoreError>(tally)
        };

        let (crawled, consumed) = tokio::join!(crawler.crawl(&crawl.root_url, workers, tx), consume);
        let tally = match consumed {
            Ok(tally) => tally,
            Err(e) => {
                self.abort(crawl.id, &format!("ingestion failed: {e}")).await?;
                return Err(e);
            }
        };

        let summary = match crawled {
            Ok(summary) => Some(summary),
            Err(e) if tally.stored == 0 && tally.duplicates == 0 => {
                warn!(crawl_id = crawl.id, error = %e, "crawl failed before any page");
                let reason = e.to_string();
                self.abort(crawl.id, &reason).await?;
                return Ok(CrawlRun {
                    crawl,
                    tally,
                    summary: None,
                    outcome: FinalizeOutcome::Aborted(Some(reason)),
                });
            }
            Err(e) => {
                warn!(crawl_id = crawl.id, error = %e, "crawl ended early, finalizing stored pages");
                None
            }
        };

        let outcome = self.finalize(crawl.id).await?;
        Ok(CrawlRun {
            crawl,
            tally,
            summary,
            outcome,
        })
    }

    pub async fn audit_trend(&self, client_id: ClientId) -> Result<AuditTrend> {
        let mut audits = self
            .blocking(move |repo| {
                if repo.get_client(client_id)?.is_none() {
                    return Err(CoreError::UnknownClient(client_id));
                }
                repo.recent_audits(client_id, 2)
            })
            .await?
            .into_iter();
        let latest = audits.next();
        let previous = audits.next();
        Ok(AuditTrend::new(client_id, latest, previous))
    }

    pub async fn issues(&self, audit_id: AuditId) -> Result<Vec<AuditIssue>> {
        self.blocking(move |repo| repo.issues_for_audit(audit_id)).await
    }

    /// Move an issue through its workflow. Audit counters are not touched.
    pub async fn set_issue_status(&self, issue_id: IssueId, status: IssueStatus) -> Result<Option<AuditIssue>> {
        let issue = self
            .blocking(move |repo| repo.set_issue_status(issue_id, status))
            .await?;
        if issue.is_some() {
            info!(issue_id, status = status.as_str(), "issue status updated");
        }
        Ok(issue)
    }
}

/// Accept a full URL or a bare host; bare hosts are crawled over https.
fn normalize_root(root_url: &str) -> Result<Url> {
    let trimmed = root_url.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|_| CoreError::InvalidRoot(root_url.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CoreError::InvalidRoot(root_url.to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root("example.com").unwrap().as_str(), "https://example.com/");
        assert_eq!(
            normalize_root(" http://example.com/shop ").unwrap().as_str(),
            "http://example.com/shop"
        );
        assert!(normalize_root("ftp://example.com").is_err());
        assert!(normalize_root("").is_err());
    }

    #[test]
    fn test_trend_deltas_need_two_audits() {
        let audit = |id, score, titles| {
            let mut counters = crate::aggregate::IssueCounts::new();
            counters.add(crate::audit::IssueKind::MissingTitle, titles);
            AuditRecord {
                id,
                crawl_id: id,
                client_id: 1,
                pages: 10,
                counters,
                score,
                created_at: id,
            }
        };

        let single = AuditTrend::new(1, Some(audit(1, 80, 2)), None);
        assert!(single.deltas.is_none());

        let trend = AuditTrend::new(1, Some(audit(2, 90, 1)), Some(audit(1, 80, 3)));
        let deltas = trend.deltas.unwrap();
        assert_eq!(deltas["pages_missing_title"], -2);
        assert_eq!(deltas["pages_long_title"], 0);
        assert_eq!(trend.score_delta, Some(10));
    }
}
