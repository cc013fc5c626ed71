// Tests for the SQLite repository

use sitegauge_core::aggregate::reduce;
use sitegauge_core::audit::IssueKind;
use sitegauge_core::data::Database;
use sitegauge_core::model::{CrawlState, IssueStatus, PageSnapshot, Priority};
use sitegauge_core::repository::{Finalization, InsertOutcome, Repository};
use sitegauge_scanner::{HeadingLevel, Headings};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn page(url: &str, status: u16, title: &str) -> PageSnapshot {
    let mut headings = Headings::default();
    headings.set(HeadingLevel::H1, vec!["Welcome".to_string()]);
    PageSnapshot {
        url: url.to_string(),
        status_code: status,
        original_status: None,
        canonical: url.to_string(),
        canonical_status: None,
        self_canonical: true,
        alternate_canonical: false,
        title: title.to_string(),
        description: String::new(),
        headings,
        internal_links: Vec::new(),
        external_links: Vec::new(),
        internal_link_status: BTreeMap::new(),
        images_missing_alt: 0,
    }
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));
    let db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));

    drop(db);
    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let client_id = {
        let db = Database::new(&db_path).unwrap();
        db.create_client("acme").unwrap().id
    };

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.get_client(client_id).unwrap().unwrap().name, "acme");
}

// ============================================================================
// Client and Crawl Tests
// ============================================================================

#[test]
fn test_create_and_list_clients() {
    let (_temp_dir, db) = create_test_db();

    let a = db.create_client("acme").unwrap();
    let b = db.create_client("globex").unwrap();
    assert_ne!(a.id, b.id);

    let clients = db.list_clients().unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0].name, "acme");
    assert!(db.get_client(9999).unwrap().is_none());
}

#[test]
fn test_create_crawl_starts_open() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();

    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();
    let loaded = db.get_crawl(crawl.id).unwrap().unwrap();

    assert_eq!(loaded, crawl);
    assert_eq!(loaded.state, CrawlState::Started);
    assert!(loaded.finished_at.is_none());
    assert_eq!(db.crawls_for_client(client.id).unwrap().len(), 1);
}

#[test]
fn test_abort_only_from_started() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();

    assert!(db.abort_crawl(crawl.id, "operator cancelled").unwrap());
    assert!(!db.abort_crawl(crawl.id, "again").unwrap());

    let loaded = db.get_crawl(crawl.id).unwrap().unwrap();
    assert_eq!(loaded.state, CrawlState::Aborted);
    assert_eq!(loaded.abort_reason.as_deref(), Some("operator cancelled"));
    assert_eq!(
        db.insert_page(crawl.id, &page("https://acme.test/", 200, "x")).unwrap(),
        InsertOutcome::CrawlClosed
    );
}

// ============================================================================
// Page Tests
// ============================================================================

#[test]
fn test_same_url_in_two_crawls() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let first = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();
    let second = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();

    let snapshot = page("https://acme.test/", 200, "Home");
    assert!(matches!(db.insert_page(first.id, &snapshot).unwrap(), InsertOutcome::Inserted(_)));
    assert!(matches!(db.insert_page(second.id, &snapshot).unwrap(), InsertOutcome::Inserted(_)));
    assert_eq!(db.insert_page(first.id, &snapshot).unwrap(), InsertOutcome::Duplicate);
}

// ============================================================================
// Finalization Tests
// ============================================================================

#[test]
fn test_finalize_writes_audit_and_issues() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();

    db.insert_page(crawl.id, &page("https://acme.test/", 200, "")).unwrap();
    db.insert_page(crawl.id, &page("https://acme.test/gone", 404, "")).unwrap();

    let audit = match db.finalize_crawl(crawl.id, &reduce).unwrap() {
        Finalization::Completed(audit) => audit,
        other => panic!("unexpected finalization {:?}", other),
    };
    assert_eq!(audit.pages, 2);
    assert_eq!(audit.client_id, client.id);
    assert_eq!(audit.counters.get(IssueKind::MissingTitle), 2);
    assert_eq!(audit.counters.get(IssueKind::Status4xx), 1);

    assert_eq!(db.audit_for_crawl(crawl.id).unwrap(), Some(audit.clone()));
    assert_eq!(db.get_crawl(crawl.id).unwrap().unwrap().state, CrawlState::Completed);

    let issues = db.issues_for_audit(audit.id).unwrap();
    assert!(issues.iter().all(|i| i.status == IssueStatus::Open));
    assert_eq!(issues[0].priority, Priority::High);
    assert_eq!(
        issues.iter().filter(|i| i.issue == IssueKind::MissingTitle).count(),
        2
    );
}

#[test]
fn test_second_finalize_reports_not_open() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();
    db.insert_page(crawl.id, &page("https://acme.test/", 200, "Home")).unwrap();

    assert!(matches!(db.finalize_crawl(crawl.id, &reduce).unwrap(), Finalization::Completed(_)));
    assert_eq!(
        db.finalize_crawl(crawl.id, &reduce).unwrap(),
        Finalization::NotOpen(CrawlState::Completed)
    );
    assert_eq!(db.finalize_crawl(777, &reduce).unwrap(), Finalization::UnknownCrawl);
}

#[test]
fn test_finalize_without_pages_aborts() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();

    assert_eq!(db.finalize_crawl(crawl.id, &reduce).unwrap(), Finalization::Empty);
    assert_eq!(db.get_crawl(crawl.id).unwrap().unwrap().state, CrawlState::Aborted);
    assert!(db.audit_for_crawl(crawl.id).unwrap().is_none());
}

#[test]
fn test_issue_status_does_not_touch_counters() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();
    let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();
    db.insert_page(crawl.id, &page("https://acme.test/", 200, "")).unwrap();

    let Finalization::Completed(audit) = db.finalize_crawl(crawl.id, &reduce).unwrap() else {
        panic!("crawl should complete");
    };
    let issue = db.issues_for_audit(audit.id).unwrap().remove(0);

    let updated = db
        .set_issue_status(issue.id, IssueStatus::InProgress)
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, IssueStatus::InProgress);
    assert_eq!(db.audit_for_crawl(crawl.id).unwrap().unwrap().counters, audit.counters);
    assert!(db.set_issue_status(424242, IssueStatus::Fixed).unwrap().is_none());
}

#[test]
fn test_recent_audits_newest_first() {
    let (_temp_dir, db) = create_test_db();
    let client = db.create_client("acme").unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let crawl = db.create_crawl(client.id, "https://acme.test/", "acme.test").unwrap();
        db.insert_page(crawl.id, &page("https://acme.test/", 200, "Home")).unwrap();
        db.finalize_crawl(crawl.id, &reduce).unwrap();
        ids.push(crawl.id);
    }

    let audits = db.recent_audits(client.id, 2).unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].crawl_id, ids[2]);
    assert_eq!(audits[1].crawl_id, ids[1]);
}
