use sitegauge::handlers::*;
use sitegauge_core::{
    AuditRecord, AuditTrend, Crawl, CrawlRun, CrawlState, FinalizeOutcome, IngestTally,
    IssueCounts, IssueKind, IssueStatus,
};
use std::collections::BTreeMap;

fn crawl(state: CrawlState) -> Crawl {
    Crawl {
        id: 7,
        client_id: 1,
        root_url: "https://acme.test/".to_string(),
        base_domain: "acme.test".to_string(),
        state,
        started_at: 1_700_000_000,
        finished_at: None,
        abort_reason: None,
    }
}

fn audit(id: i64, crawl_id: i64, score: u8, counters: IssueCounts) -> AuditRecord {
    AuditRecord {
        id,
        crawl_id,
        client_id: 1,
        pages: 4,
        counters,
        score,
        created_at: 1_700_000_100,
    }
}

fn tally(stored: usize) -> IngestTally {
    IngestTally {
        stored,
        ..IngestTally::default()
    }
}

#[test]
fn test_extract_url_path() {
    assert_eq!(extract_url_path("https://acme.test/pricing/plans"), "/pricing/plans");
    assert_eq!(extract_url_path("https://acme.test/"), "/");
    assert_eq!(extract_url_path("https://acme.test"), "/");
    assert_eq!(extract_url_path("not a url"), "not a url");
}

#[test]
fn test_parse_issue_status() {
    assert_eq!(parse_issue_status("open"), Ok(IssueStatus::Open));
    assert_eq!(parse_issue_status("in_progress"), Ok(IssueStatus::InProgress));
    assert_eq!(parse_issue_status("in-progress"), Ok(IssueStatus::InProgress));
    assert_eq!(parse_issue_status(" FIXED "), Ok(IssueStatus::Fixed));

    let err = parse_issue_status("done").unwrap_err();
    assert!(err.contains("unknown issue status"));
}

#[test]
fn test_summarize_completed_run() {
    let counters: IssueCounts = [
        IssueKind::MissingTitle,
        IssueKind::MissingTitle,
        IssueKind::Status4xx,
        IssueKind::ShortDescription,
    ]
    .into_iter()
    .collect();
    let run = CrawlRun {
        crawl: crawl(CrawlState::Completed),
        tally: tally(4),
        summary: None,
        outcome: FinalizeOutcome::Completed(audit(3, 7, 72, counters)),
    };

    let summary = summarize_run(&run);
    assert!(summary.contains("Crawl #7 of https://acme.test/"));
    assert!(summary.contains("Pages stored: 4"));
    assert!(summary.contains("Audit #3: 4 pages, score 72/100"));
    assert!(summary.contains("High priority findings: 3"));
    assert!(!summary.contains("Audit failed"));
}

#[test]
fn test_summarize_aborted_run_reports_failure() {
    let run = CrawlRun {
        crawl: crawl(CrawlState::Aborted),
        tally: tally(0),
        summary: None,
        outcome: FinalizeOutcome::Aborted(Some("connection refused".to_string())),
    };

    let summary = summarize_run(&run);
    assert!(summary.contains("Audit failed: connection refused"));
    assert!(!summary.contains("score"));
}

#[test]
fn test_format_trend_without_audits() {
    let trend = AuditTrend {
        client_id: 9,
        latest: None,
        previous: None,
        deltas: None,
        score_delta: None,
    };
    assert_eq!(format_trend(&trend), "No completed audit yet for client 9\n");
}

#[test]
fn test_format_trend_with_single_audit() {
    let trend = AuditTrend {
        client_id: 1,
        latest: Some(audit(2, 7, 80, IssueCounts::default())),
        previous: None,
        deltas: None,
        score_delta: None,
    };

    let text = format_trend(&trend);
    assert!(text.contains("Latest audit #2 (crawl #7)"));
    assert!(text.contains("No previous audit"));
}

#[test]
fn test_format_trend_lists_changed_counters() {
    let mut deltas = BTreeMap::new();
    deltas.insert("pages_missing_title".to_string(), -2);
    deltas.insert("pages_long_title".to_string(), 0);
    deltas.insert("pages_4xx_response".to_string(), 1);

    let trend = AuditTrend {
        client_id: 1,
        latest: Some(audit(2, 8, 85, IssueCounts::default())),
        previous: Some(audit(1, 7, 80, IssueCounts::default())),
        deltas: Some(deltas),
        score_delta: Some(5),
    };

    let text = format_trend(&trend);
    assert!(text.contains("Score change: +5"));
    assert!(text.contains("pages_missing_title: -2"));
    assert!(text.contains("pages_4xx_response: +1"));
    assert!(!text.contains("pages_long_title"));
}
