use crate::error::{CoreError, Result};
use crate::model::{
    AuditId, AuditIssue, AuditRecord, Client, ClientId, Crawl, CrawlId, CrawlState, IssueId,
    IssueStatus, PageSnapshot, Priority, StoredPage,
};
use crate::repository::{Finalization, InsertOutcome, Reducer, Repository};
use crate::audit::IssueKind;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed repository. One connection behind a mutex; the lock is
/// never held across an `.await`.
pub struct Database {
    conn: Mutex<Connection>,
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn corrupt(idx: usize, msg: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into().into())
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn state_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<CrawlState> {
    let raw: String = row.get(idx)?;
    CrawlState::parse(&raw).ok_or_else(|| corrupt(idx, format!("unknown crawl state {raw}")))
}

const CRAWL_COLUMNS: &str =
    "id, client_id, root_url, base_domain, state, started_at, finished_at, abort_reason";

fn crawl_from_row(row: &Row<'_>) -> rusqlite::Result<Crawl> {
    Ok(Crawl {
        id: row.get(0)?,
        client_id: row.get(1)?,
        root_url: row.get(2)?,
        base_domain: row.get(3)?,
        state: state_col(row, 4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        abort_reason: row.get(7)?,
    })
}

const PAGE_COLUMNS: &str = "id, crawl_id, url, status_code, original_status, canonical, \
     canonical_status, self_canonical, alternate_canonical, title, description, headings, \
     internal_links, external_links, internal_link_status, images_missing_alt";

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<StoredPage> {
    Ok(StoredPage {
        id: row.get(0)?,
        crawl_id: row.get(1)?,
        page: PageSnapshot {
            url: row.get(2)?,
            status_code: row.get(3)?,
            original_status: row.get(4)?,
            canonical: row.get(5)?,
            canonical_status: row.get(6)?,
            self_canonical: row.get(7)?,
            alternate_canonical: row.get(8)?,
            title: row.get(9)?,
            description: row.get(10)?,
            headings: json_col(row, 11)?,
            internal_links: json_col(row, 12)?,
            external_links: json_col(row, 13)?,
            internal_link_status: json_col(row, 14)?,
            images_missing_alt: row.get(15)?,
        },
    })
}

const AUDIT_COLUMNS: &str = "id, crawl_id, client_id, pages, counters, score, created_at";

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let pages: i64 = row.get(3)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        crawl_id: row.get(1)?,
        client_id: row.get(2)?,
        pages: pages as u64,
        counters: json_col(row, 4)?,
        score: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const ISSUE_COLUMNS: &str = "i.id, i.audit_id, i.url_id, u.url, i.issue, i.status, i.priority, i.updated_at";

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<AuditIssue> {
    let issue: String = row.get(4)?;
    let status: String = row.get(5)?;
    let priority: String = row.get(6)?;
    Ok(AuditIssue {
        id: row.get(0)?,
        audit_id: row.get(1)?,
        url_id: row.get(2)?,
        url: row.get(3)?,
        issue: IssueKind::parse(&issue).ok_or_else(|| corrupt(4, format!("unknown issue {issue}")))?,
        status: IssueStatus::parse(&status)
            .ok_or_else(|| corrupt(5, format!("unknown issue status {status}")))?,
        priority: Priority::parse(&priority)
            .ok_or_else(|| corrupt(6, format!("unknown priority {priority}")))?,
        updated_at: row.get(7)?,
    })
}

fn load_crawl(conn: &Connection, crawl_id: CrawlId) -> rusqlite::Result<Option<Crawl>> {
    conn.query_row(
        &format!("SELECT {CRAWL_COLUMNS} FROM crawls WHERE id = ?1"),
        params![crawl_id],
        crawl_from_row,
    )
    .optional()
}

fn load_pages(conn: &Connection, crawl_id: CrawlId) -> rusqlite::Result<Vec<StoredPage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAGE_COLUMNS} FROM urls WHERE crawl_id = ?1 ORDER BY id"
    ))?;
    let pages = stmt
        .query_map(params![crawl_id], page_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pages)
}

fn load_audit(conn: &Connection, crawl_id: CrawlId) -> rusqlite::Result<Option<AuditRecord>> {
    conn.query_row(
        &format!("SELECT {AUDIT_COLUMNS} FROM audits WHERE crawl_id = ?1"),
        params![crawl_id],
        audit_from_row,
    )
    .optional()
}

impl Database {
    pub fn drop(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Several processes (CLI crawl, webhook server) may share the file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CoreError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
-- Tenants
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Crawl sessions
CREATE TABLE IF NOT EXISTS crawls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    root_url TEXT NOT NULL,
    base_domain TEXT NOT NULL,
    state TEXT NOT NULL CHECK(state IN ('STARTED', 'COMPLETED', 'ABORTED')),
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    abort_reason TEXT,
    FOREIGN KEY(client_id) REFERENCES clients(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_crawls_client ON crawls(client_id);

-- Page snapshots, immutable once written
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    original_status INTEGER,
    canonical TEXT NOT NULL,
    canonical_status INTEGER,
    self_canonical BOOLEAN NOT NULL,
    alternate_canonical BOOLEAN NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    headings TEXT NOT NULL,              -- JSON array of six string arrays
    internal_links TEXT NOT NULL,        -- JSON array
    external_links TEXT NOT NULL,        -- JSON array
    internal_link_status TEXT NOT NULL,  -- JSON object url -> status
    images_missing_alt INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    FOREIGN KEY(crawl_id) REFERENCES crawls(id) ON DELETE CASCADE,
    UNIQUE(crawl_id, url)
);

CREATE INDEX IF NOT EXISTS idx_urls_crawl ON urls(crawl_id);

-- One aggregate per completed crawl
CREATE TABLE IF NOT EXISTS audits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER UNIQUE NOT NULL,
    client_id INTEGER NOT NULL,
    pages INTEGER NOT NULL,
    counters TEXT NOT NULL,              -- JSON object counter -> count
    score INTEGER NOT NULL CHECK(score BETWEEN 0 AND 100),
    created_at INTEGER NOT NULL,
    FOREIGN KEY(crawl_id) REFERENCES crawls(id) ON DELETE CASCADE,
    FOREIGN KEY(client_id) REFERENCES clients(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_audits_client ON audits(client_id, created_at);

-- Issue occurrences and their remediation workflow
CREATE TABLE IF NOT EXISTS audit_issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    audit_id INTEGER NOT NULL,
    url_id INTEGER NOT NULL,
    issue TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('OPEN', 'IN_PROGRESS', 'FIXED', 'IGNORED')),
    priority TEXT NOT NULL CHECK(priority IN ('high', 'medium', 'low')),
    updated_at INTEGER NOT NULL,
    FOREIGN KEY(audit_id) REFERENCES audits(id) ON DELETE CASCADE,
    FOREIGN KEY(url_id) REFERENCES urls(id) ON DELETE CASCADE,
    UNIQUE(audit_id, url_id, issue)
);

CREATE INDEX IF NOT EXISTS idx_audit_issues_audit ON audit_issues(audit_id);
CREATE INDEX IF NOT EXISTS idx_audit_issues_status ON audit_issues(status);
            ",
        )?;
        Ok(())
    }
}

impl Repository for Database {
    fn create_client(&self, name: &str) -> Result<Client> {
        let conn = self.lock()?;
        let created_at = current_timestamp();
        conn.execute(
            "INSERT INTO clients (name, created_at) VALUES (?1, ?2)",
            params![name, created_at],
        )?;
        Ok(Client {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    fn get_client(&self, client_id: ClientId) -> Result<Option<Client>> {
        let conn = self.lock()?;
        let client = conn
            .query_row(
                "SELECT id, name, created_at FROM clients WHERE id = ?1",
                params![client_id],
                |row| {
                    Ok(Client {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(client)
    }

    fn list_clients(&self) -> Result<Vec<Client>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM clients ORDER BY id")?;
        let clients = stmt
            .query_map([], |row| {
                Ok(Client {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clients)
    }

    fn create_crawl(&self, client_id: ClientId, root_url: &str, base_domain: &str) -> Result<Crawl> {
        let conn = self.lock()?;
        let started_at = current_timestamp();
        conn.execute(
            "INSERT INTO crawls (client_id, root_url, base_domain, state, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                client_id,
                root_url,
                base_domain,
                CrawlState::Started.as_str(),
                started_at
            ],
        )?;
        Ok(Crawl {
            id: conn.last_insert_rowid(),
            client_id,
            root_url: root_url.to_string(),
            base_domain: base_domain.to_string(),
            state: CrawlState::Started,
            started_at,
            finished_at: None,
            abort_reason: None,
        })
    }

    fn get_crawl(&self, crawl_id: CrawlId) -> Result<Option<Crawl>> {
        let conn = self.lock()?;
        Ok(load_crawl(&conn, crawl_id)?)
    }

    fn crawls_for_client(&self, client_id: ClientId) -> Result<Vec<Crawl>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CRAWL_COLUMNS} FROM crawls WHERE client_id = ?1 ORDER BY started_at DESC, id DESC"
        ))?;
        let crawls = stmt
            .query_map(params![client_id], crawl_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(crawls)
    }

    fn insert_page(&self, crawl_id: CrawlId, page: &PageSnapshot) -> Result<InsertOutcome> {
        let headings = serde_json::to_string(&page.headings)?;
        let internal_links = serde_json::to_string(&page.internal_links)?;
        let external_links = serde_json::to_string(&page.external_links)?;
        let link_status = serde_json::to_string(&page.internal_link_status)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let open = load_crawl(&tx, crawl_id)?.is_some_and(|c| c.state == CrawlState::Started);
        if !open {
            return Ok(InsertOutcome::CrawlClosed);
        }

        let changed = tx.execute(
            "INSERT INTO urls (
                crawl_id, url, status_code, original_status, canonical, canonical_status,
                self_canonical, alternate_canonical, title, description, headings,
                internal_links, external_links, internal_link_status, images_missing_alt,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(crawl_id, url) DO NOTHING",
            params![
                crawl_id,
                &page.url,
                page.status_code,
                page.original_status,
                &page.canonical,
                page.canonical_status,
                page.self_canonical,
                page.alternate_canonical,
                &page.title,
                &page.description,
                headings,
                internal_links,
                external_links,
                link_status,
                page.images_missing_alt,
                current_timestamp(),
            ],
        )?;

        let outcome = if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted(tx.last_insert_rowid())
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn pages_for_crawl(&self, crawl_id: CrawlId) -> Result<Vec<StoredPage>> {
        let conn = self.lock()?;
        Ok(load_pages(&conn, crawl_id)?)
    }

    fn finalize_crawl(&self, crawl_id: CrawlId, reduce: Reducer<'_>) -> Result<Finalization> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(crawl) = load_crawl(&tx, crawl_id)? else {
            return Ok(Finalization::UnknownCrawl);
        };
        if crawl.state != CrawlState::Started {
            return Ok(Finalization::NotOpen(crawl.state));
        }

        let pages = load_pages(&tx, crawl_id)?;
        let now = current_timestamp();

        let Some(reduction) = reduce(&pages) else {
            tx.execute(
                "UPDATE crawls SET state = ?1, finished_at = ?2, abort_reason = ?3 WHERE id = ?4",
                params![CrawlState::Aborted.as_str(), now, "no pages were stored", crawl_id],
            )?;
            tx.commit()?;
            return Ok(Finalization::Empty);
        };

        let summary = reduction.summary;
        tx.execute(
            "INSERT INTO audits (crawl_id, client_id, pages, counters, score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                crawl_id,
                crawl.client_id,
                summary.pages as i64,
                serde_json::to_string(&summary.counters)?,
                summary.score,
                now
            ],
        )?;
        let audit_id: AuditId = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO audit_issues (audit_id, url_id, issue, status, priority, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for issue in &reduction.issues {
                stmt.execute(params![
                    audit_id,
                    issue.url_id,
                    issue.kind.as_str(),
                    IssueStatus::Open.as_str(),
                    issue.priority.as_str(),
                    now
                ])?;
            }
        }

        tx.execute(
            "UPDATE crawls SET state = ?1, finished_at = ?2 WHERE id = ?3",
            params![CrawlState::Completed.as_str(), now, crawl_id],
        )?;
        tx.commit()?;

        info!(crawl_id, audit_id, pages = summary.pages, score = summary.score, "audit written");
        Ok(Finalization::Completed(AuditRecord {
            id: audit_id,
            crawl_id,
            client_id: crawl.client_id,
            pages: summary.pages,
            counters: summary.counters,
            score: summary.score,
            created_at: now,
        }))
    }

    fn abort_crawl(&self, crawl_id: CrawlId, reason: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE crawls SET state = ?1, finished_at = ?2, abort_reason = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                CrawlState::Aborted.as_str(),
                current_timestamp(),
                reason,
                crawl_id,
                CrawlState::Started.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    fn audit_for_crawl(&self, crawl_id: CrawlId) -> Result<Option<AuditRecord>> {
        let conn = self.lock()?;
        Ok(load_audit(&conn, crawl_id)?)
    }

    fn recent_audits(&self, client_id: ClientId, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audits WHERE client_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let audits = stmt
            .query_map(params![client_id, limit as i64], audit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(audits)
    }

    fn issues_for_audit(&self, audit_id: AuditId) -> Result<Vec<AuditIssue>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM audit_issues i JOIN urls u ON u.id = i.url_id
             WHERE i.audit_id = ?1
             ORDER BY CASE i.priority
                WHEN 'high' THEN 1
                WHEN 'medium' THEN 2
                WHEN 'low' THEN 3
             END, i.id"
        ))?;
        let issues = stmt
            .query_map(params![audit_id], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    fn set_issue_status(&self, issue_id: IssueId, status: IssueStatus) -> Result<Option<AuditIssue>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE audit_issues SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), current_timestamp(), issue_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let issue = conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM audit_issues i JOIN urls u ON u.id = i.url_id
                     WHERE i.id = ?1"
                ),
                params![issue_id],
                issue_from_row,
            )
            .optional()?;
        Ok(issue)
    }
}
