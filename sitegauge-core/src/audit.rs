// SEO issue rules applied to one page snapshot

use crate::aggregate::IssueCounts;
use crate::model::{PageSnapshot, Priority};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use sitegauge_scanner::HeadingLevel;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const TITLE_MIN_LEN: usize = 35;
pub const TITLE_MAX_LEN: usize = 65;
pub const DESCRIPTION_MIN_LEN: usize = 70;
pub const DESCRIPTION_MAX_LEN: usize = 160;

const MISSING_HEADING: [&str; 6] = [
    "pages_missing_h1",
    "pages_missing_h2",
    "pages_missing_h3",
    "pages_missing_h4",
    "pages_missing_h5",
    "pages_missing_h6",
];
const MULTIPLE_HEADING: [&str; 6] = [
    "pages_multiple_h1",
    "pages_multiple_h2",
    "pages_multiple_h3",
    "pages_multiple_h4",
    "pages_multiple_h5",
    "pages_multiple_h6",
];
const DUPLICATE_HEADING: [&str; 6] = [
    "pages_duplicate_h1",
    "pages_duplicate_h2",
    "pages_duplicate_h3",
    "pages_duplicate_h4",
    "pages_duplicate_h5",
    "pages_duplicate_h6",
];

/// Every counter an audit carries. The wire names returned by
/// [`IssueKind::as_str`] are the keys stored in the audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IssueKind {
    MissingTitle,
    ShortTitle,
    LongTitle,
    MissingDescription,
    ShortDescription,
    LongDescription,
    MissingHeading(HeadingLevel),
    MultipleHeading(HeadingLevel),
    DuplicateHeading(HeadingLevel),
    Status2xx,
    Status3xx,
    Status4xx,
    Status5xx,
    AlternateCanonical,
    BrokenCanonical,
    BrokenInternalLinks,
    /// Sum of images without alt text, not a page count.
    ImagesMissingAlt,
}

impl IssueKind {
    pub fn all() -> Vec<IssueKind> {
        let mut kinds = vec![
            IssueKind::MissingTitle,
            IssueKind::ShortTitle,
            IssueKind::LongTitle,
            IssueKind::MissingDescription,
            IssueKind::ShortDescription,
            IssueKind::LongDescription,
        ];
        for level in HeadingLevel::ALL {
            kinds.push(IssueKind::MissingHeading(level));
            kinds.push(IssueKind::MultipleHeading(level));
            kinds.push(IssueKind::DuplicateHeading(level));
        }
        kinds.extend([
            IssueKind::Status2xx,
            IssueKind::Status3xx,
            IssueKind::Status4xx,
            IssueKind::Status5xx,
            IssueKind::AlternateCanonical,
            IssueKind::BrokenCanonical,
            IssueKind::BrokenInternalLinks,
            IssueKind::ImagesMissingAlt,
        ]);
        kinds
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingTitle => "pages_missing_title",
            IssueKind::ShortTitle => "pages_short_title",
            IssueKind::LongTitle => "pages_long_title",
            IssueKind::MissingDescription => "pages_missing_description",
            IssueKind::ShortDescription => "pages_short_description",
            IssueKind::LongDescription => "pages_long_description",
            IssueKind::MissingHeading(level) => MISSING_HEADING[level.index()],
            IssueKind::MultipleHeading(level) => MULTIPLE_HEADING[level.index()],
            IssueKind::DuplicateHeading(level) => DUPLICATE_HEADING[level.index()],
            IssueKind::Status2xx => "pages_2xx_response",
            IssueKind::Status3xx => "pages_3xx_response",
            IssueKind::Status4xx => "pages_4xx_response",
            IssueKind::Status5xx => "pages_5xx_response",
            IssueKind::AlternateCanonical => "pages_alternate_canonical",
            IssueKind::BrokenCanonical => "pages_broken_canonical",
            IssueKind::BrokenInternalLinks => "pages_broken_internal_links",
            IssueKind::ImagesMissingAlt => "total_images_missing_alt",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        IssueKind::all().into_iter().find(|kind| kind.as_str() == name)
    }

    /// Remediation priority; `None` for counters that are not problems.
    pub fn priority(&self) -> Option<Priority> {
        match self {
            IssueKind::Status2xx => None,
            IssueKind::MissingTitle
            | IssueKind::MissingDescription
            | IssueKind::MissingHeading(HeadingLevel::H1)
            | IssueKind::Status4xx
            | IssueKind::Status5xx
            | IssueKind::BrokenCanonical
            | IssueKind::BrokenInternalLinks => Some(Priority::High),
            IssueKind::ShortTitle
            | IssueKind::LongTitle
            | IssueKind::ShortDescription
            | IssueKind::LongDescription
            | IssueKind::MultipleHeading(HeadingLevel::H1)
            | IssueKind::DuplicateHeading(HeadingLevel::H1)
            | IssueKind::ImagesMissingAlt => Some(Priority::Medium),
            IssueKind::MissingHeading(_)
            | IssueKind::MultipleHeading(_)
            | IssueKind::DuplicateHeading(_)
            | IssueKind::Status3xx
            | IssueKind::AlternateCanonical => Some(Priority::Low),
        }
    }

    /// True when the counter counts pages satisfying a predicate.
    pub fn is_page_predicate(&self) -> bool {
        !matches!(self, IssueKind::ImagesMissingAlt)
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IssueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IssueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        IssueKind::parse(&name).ok_or_else(|| de::Error::custom(format!("unknown issue kind {name}")))
    }
}

fn text_len(text: &str) -> usize {
    text.trim().chars().count()
}

pub fn check_title(title: &str) -> Vec<IssueKind> {
    let len = text_len(title);
    if len == 0 {
        vec![IssueKind::MissingTitle]
    } else if len < TITLE_MIN_LEN {
        vec![IssueKind::ShortTitle]
    } else if len > TITLE_MAX_LEN {
        vec![IssueKind::LongTitle]
    } else {
        Vec::new()
    }
}

pub fn check_description(description: &str) -> Vec<IssueKind> {
    let len = text_len(description);
    if len == 0 {
        vec![IssueKind::MissingDescription]
    } else if len < DESCRIPTION_MIN_LEN {
        vec![IssueKind::ShortDescription]
    } else if len > DESCRIPTION_MAX_LEN {
        vec![IssueKind::LongDescription]
    } else {
        Vec::new()
    }
}

/// Missing, multiple and duplicate are independent: two identical H1s
/// report both "multiple" and "duplicate".
pub fn check_headings(level: HeadingLevel, texts: &[String]) -> Vec<IssueKind> {
    let mut issues = Vec::new();
    if texts.is_empty() {
        issues.push(IssueKind::MissingHeading(level));
    }
    if texts.len() > 1 {
        issues.push(IssueKind::MultipleHeading(level));
    }
    let distinct: HashSet<&String> = texts.iter().collect();
    if distinct.len() < texts.len() {
        issues.push(IssueKind::DuplicateHeading(level));
    }
    issues
}

/// Exactly one bucket for codes in [200, 600), none otherwise.
pub fn check_status(status_code: u16) -> Option<IssueKind> {
    match status_code {
        200..=299 => Some(IssueKind::Status2xx),
        300..=399 => Some(IssueKind::Status3xx),
        400..=499 => Some(IssueKind::Status4xx),
        500..=599 => Some(IssueKind::Status5xx),
        _ => None,
    }
}

fn is_broken(status: u16) -> bool {
    status == sitegauge_scanner::probe::UNREACHABLE || status >= 400
}

pub fn check_canonical(page: &PageSnapshot) -> Vec<IssueKind> {
    let mut issues = Vec::new();
    if page.alternate_canonical {
        issues.push(IssueKind::AlternateCanonical);
    }
    if page.canonical_status.is_some_and(is_broken) {
        issues.push(IssueKind::BrokenCanonical);
    }
    issues
}

pub fn check_internal_links(link_status: &BTreeMap<String, u16>) -> Option<IssueKind> {
    link_status
        .values()
        .any(|status| is_broken(*status))
        .then_some(IssueKind::BrokenInternalLinks)
}

/// Run every rule against one page. Pure: the same snapshot always yields
/// the same bag.
pub fn audit_page(page: &PageSnapshot) -> IssueCounts {
    let mut issues = Vec::new();
    issues.extend(check_title(&page.title));
    issues.extend(check_description(&page.description));
    for level in HeadingLevel::ALL {
        issues.extend(check_headings(level, page.headings.level(level)));
    }
    issues.extend(check_status(page.status_code));
    issues.extend(check_canonical(page));
    issues.extend(check_internal_links(&page.internal_link_status));

    let mut counts: IssueCounts = issues.into_iter().collect();
    counts.add(IssueKind::ImagesMissingAlt, u64::from(page.images_missing_alt));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_unique_and_parse_back() {
        let kinds = IssueKind::all();
        let names: HashSet<&str> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
        for kind in kinds {
            assert_eq!(IssueKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(IssueKind::parse("pages_missing_h7"), None);
    }

    #[test]
    fn test_heading_names_follow_level() {
        assert_eq!(IssueKind::MissingHeading(HeadingLevel::H1).as_str(), "pages_missing_h1");
        assert_eq!(IssueKind::DuplicateHeading(HeadingLevel::H4).as_str(), "pages_duplicate_h4");
        assert_eq!(IssueKind::MultipleHeading(HeadingLevel::H6).as_str(), "pages_multiple_h6");
    }

    #[test]
    fn test_title_length_boundaries() {
        assert_eq!(check_title(""), vec![IssueKind::MissingTitle]);
        assert_eq!(check_title("   "), vec![IssueKind::MissingTitle]);
        assert_eq!(check_title(&"a".repeat(34)), vec![IssueKind::ShortTitle]);
        assert!(check_title(&"a".repeat(35)).is_empty());
        assert!(check_title(&"a".repeat(65)).is_empty());
        assert_eq!(check_title(&"a".repeat(66)), vec![IssueKind::LongTitle]);
        // counted in characters, not bytes
        assert!(check_title(&"é".repeat(40)).is_empty());
    }

    #[test]
    fn test_description_length_boundaries() {
        assert_eq!(check_description(""), vec![IssueKind::MissingDescription]);
        assert_eq!(check_description(&"d".repeat(69)), vec![IssueKind::ShortDescription]);
        assert!(check_description(&"d".repeat(70)).is_empty());
        assert!(check_description(&"d".repeat(160)).is_empty());
        assert_eq!(check_description(&"d".repeat(161)), vec![IssueKind::LongDescription]);
    }

    #[test]
    fn test_status_buckets() {
        assert_eq!(check_status(199), None);
        assert_eq!(check_status(200), Some(IssueKind::Status2xx));
        assert_eq!(check_status(301), Some(IssueKind::Status3xx));
        assert_eq!(check_status(404), Some(IssueKind::Status4xx));
        assert_eq!(check_status(599), Some(IssueKind::Status5xx));
        assert_eq!(check_status(600), None);
        assert_eq!(check_status(0), None);
    }

    #[test]
    fn test_repeated_heading_is_multiple_and_duplicate() {
        let texts = vec!["Welcome".to_string(), "Welcome".to_string()];
        assert_eq!(
            check_headings(HeadingLevel::H1, &texts),
            vec![
                IssueKind::MultipleHeading(HeadingLevel::H1),
                IssueKind::DuplicateHeading(HeadingLevel::H1)
            ]
        );

        let distinct = vec!["Welcome".to_string(), "About".to_string()];
        assert_eq!(
            check_headings(HeadingLevel::H2, &distinct),
            vec![IssueKind::MultipleHeading(HeadingLevel::H2)]
        );
        assert_eq!(
            check_headings(HeadingLevel::H3, &[]),
            vec![IssueKind::MissingHeading(HeadingLevel::H3)]
        );
    }

    #[test]
    fn test_unreachable_link_counts_as_broken() {
        let mut links = BTreeMap::new();
        links.insert("https://a.test/ok".to_string(), 200);
        assert_eq!(check_internal_links(&links), None);
        links.insert("https://a.test/down".to_string(), 0);
        assert_eq!(check_internal_links(&links), Some(IssueKind::BrokenInternalLinks));
    }

    #[test]
    fn test_audit_page_is_a_bag_of_rule_results() {
        let mut headings = sitegauge_scanner::Headings::default();
        headings.set(HeadingLevel::H1, vec!["Welcome".into(), "Welcome".into()]);
        let page = PageSnapshot {
            url: "https://a.test/".into(),
            status_code: 200,
            original_status: None,
            canonical: "https://a.test/other".into(),
            canonical_status: Some(404),
            self_canonical: false,
            alternate_canonical: true,
            title: "Home".into(),
            description: String::new(),
            headings,
            internal_links: Vec::new(),
            external_links: Vec::new(),
            internal_link_status: BTreeMap::new(),
            images_missing_alt: 3,
        };

        let counts = audit_page(&page);
        assert_eq!(counts.get(IssueKind::ShortTitle), 1);
        assert_eq!(counts.get(IssueKind::MissingDescription), 1);
        assert_eq!(counts.get(IssueKind::MultipleHeading(HeadingLevel::H1)), 1);
        assert_eq!(counts.get(IssueKind::DuplicateHeading(HeadingLevel::H1)), 1);
        assert_eq!(counts.get(IssueKind::MissingHeading(HeadingLevel::H2)), 1);
        assert_eq!(counts.get(IssueKind::Status2xx), 1);
        assert_eq!(counts.get(IssueKind::AlternateCanonical), 1);
        assert_eq!(counts.get(IssueKind::BrokenCanonical), 1);
        assert_eq!(counts.get(IssueKind::ImagesMissingAlt), 3);
        assert_eq!(audit_page(&page), counts);
    }

    #[test]
    fn test_status_two_hundred_has_no_priority() {
        assert_eq!(IssueKind::Status2xx.priority(), None);
        assert_eq!(IssueKind::MissingTitle.priority(), Some(Priority::High));
        assert_eq!(
            IssueKind::MissingHeading(HeadingLevel::H3).priority(),
            Some(Priority::Low)
        );
    }
}
