// Crawl-level reduction of per-page issue bags

use crate::audit::{IssueKind, audit_page};
use crate::model::{Priority, StoredPage, UrlId};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A bag of issue counters. Absent kinds read as zero; zero entries are never
/// stored, so two bags with the same non-zero counts compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueCounts(BTreeMap<IssueKind, u64>);

impl IssueCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: IssueKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn add(&mut self, kind: IssueKind, n: u64) {
        if n > 0 {
            *self.0.entry(kind).or_insert(0) += n;
        }
    }

    pub fn increment(&mut self, kind: IssueKind) {
        self.add(kind, 1);
    }

    /// Pointwise sum.
    pub fn merge(&mut self, other: &IssueCounts) {
        for (kind, n) in other.iter() {
            self.add(kind, n);
        }
    }

    pub fn combine(mut self, other: &IssueCounts) -> IssueCounts {
        self.merge(other);
        self
    }

    /// Non-zero counters in `IssueKind` order.
    pub fn iter(&self) -> impl Iterator<Item = (IssueKind, u64)> + '_ {
        self.0.iter().map(|(kind, n)| (*kind, *n))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every counter, including zeros, keyed by wire name.
    pub fn to_flat_map(&self) -> BTreeMap<&'static str, u64> {
        IssueKind::all()
            .into_iter()
            .map(|kind| (kind.as_str(), self.get(kind)))
            .collect()
    }
}

impl FromIterator<IssueKind> for IssueCounts {
    fn from_iter<T: IntoIterator<Item = IssueKind>>(iter: T) -> Self {
        let mut counts = IssueCounts::new();
        for kind in iter {
            counts.increment(kind);
        }
        counts
    }
}

impl Serialize for IssueCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kinds = IssueKind::all();
        let mut map = serializer.serialize_map(Some(kinds.len()))?;
        for kind in kinds {
            map.serialize_entry(kind.as_str(), &self.get(kind))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for IssueCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = IssueCounts;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of issue counter names to integers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut counts = IssueCounts::new();
                while let Some((name, n)) = access.next_entry::<String, u64>()? {
                    let kind = IssueKind::parse(&name)
                        .ok_or_else(|| de::Error::custom(format!("unknown counter {name}")))?;
                    counts.add(kind, n);
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

/// Crawl-level statistic written to the audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub pages: u64,
    pub counters: IssueCounts,
    pub score: u8,
}

/// One issue occurrence to be recorded against a page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingIssue {
    pub url_id: UrlId,
    pub kind: IssueKind,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub summary: AuditSummary,
    pub issues: Vec<PendingIssue>,
}

fn is_scored(kind: IssueKind) -> bool {
    kind.is_page_predicate()
        && !matches!(kind, IssueKind::Status2xx | IssueKind::Status3xx)
        && kind.priority().is_some()
}

/// Weighted share of affected pages, as a 0-100 score.
pub fn score(pages: u64, counters: &IssueCounts) -> u8 {
    if pages == 0 {
        return 0;
    }

    let scored: Vec<(IssueKind, u64)> = IssueKind::all()
        .into_iter()
        .filter(|kind| is_scored(*kind))
        .filter_map(|kind| kind.priority().map(|p| (kind, p.weight())))
        .collect();
    let total_weight: u64 = scored.iter().map(|(_, w)| w).sum();
    let penalty: u64 = scored.iter().map(|(kind, w)| w * counters.get(*kind)).sum();

    let ratio = penalty as f64 / (pages * total_weight) as f64;
    (100.0 * (1.0 - ratio)).round().clamp(0.0, 100.0) as u8
}

/// Reduce every persisted page of a crawl. Returns `None` for an empty
/// crawl; the result does not depend on page order.
pub fn reduce(pages: &[StoredPage]) -> Option<Reduction> {
    if pages.is_empty() {
        return None;
    }

    let mut counters = IssueCounts::new();
    let mut issues = Vec::new();

    for stored in pages {
        let bag = audit_page(&stored.page);
        for (kind, _) in bag.iter() {
            if let Some(priority) = kind.priority() {
                issues.push(PendingIssue {
                    url_id: stored.id,
                    kind,
                    priority,
                });
            }
        }
        counters.merge(&bag);
    }
    issues.sort();

    let pages = pages.len() as u64;
    Some(Reduction {
        summary: AuditSummary {
            pages,
            score: score(pages, &counters),
            counters,
        },
        issues,
    })
}
