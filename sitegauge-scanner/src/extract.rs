// Page signal extraction: title, description, canonical, headings, links

use crate::links::{LinkClassifier, LinkKind};
use crate::page::RawPage;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("page {0} has no markup")]
    EmptyMarkup(String),

    #[error("page URL {0} is not a valid absolute URL")]
    InvalidPageUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl HeadingLevel {
    pub const ALL: [HeadingLevel; 6] = [
        HeadingLevel::H1,
        HeadingLevel::H2,
        HeadingLevel::H3,
        HeadingLevel::H4,
        HeadingLevel::H5,
        HeadingLevel::H6,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn number(self) -> u8 {
        self as u8 + 1
    }
}

/// Heading texts per level, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headings([Vec<String>; 6]);

impl Headings {
    pub fn level(&self, level: HeadingLevel) -> &[String] {
        &self.0[level.index()]
    }

    pub fn set(&mut self, level: HeadingLevel, texts: Vec<String>) {
        self.0[level.index()] = texts;
    }

    pub fn push(&mut self, level: HeadingLevel, text: impl Into<String>) {
        self.0[level.index()].push(text.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignals {
    pub url: String,
    pub title: String,
    pub description: String,
    pub canonical: String,
    /// True when the canonical came from a `<link rel="canonical">` tag.
    pub canonical_declared: bool,
    pub headings: Headings,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    pub images_missing_alt: u32,
}

impl PageSignals {
    pub fn is_self_canonical(&self) -> bool {
        self.canonical == self.url
    }
}

struct Selectors {
    title: Selector,
    meta: Selector,
    link: Selector,
    anchor: Selector,
    image: Selector,
    headings: [Selector; 6],
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css}: {e}"))
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: selector("title"),
    meta: selector("meta[name]"),
    link: selector("link[rel][href]"),
    anchor: selector("a[href]"),
    image: selector("img"),
    headings: [
        selector("h1"),
        selector("h2"),
        selector("h3"),
        selector("h4"),
        selector("h5"),
        selector("h6"),
    ],
});

/// Turns a page's markup into the signal set the auditor works on.
#[derive(Debug, Clone)]
pub struct PageSignalExtractor {
    classifier: LinkClassifier,
}

impl PageSignalExtractor {
    pub fn new(classifier: LinkClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &LinkClassifier {
        &self.classifier
    }

    pub fn extract(&self, page: &RawPage) -> Result<PageSignals, ExtractError> {
        let markup = page
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ExtractError::EmptyMarkup(page.url.clone()))?;

        let mut page_url = Url::parse(&page.url)
            .ok()
            .filter(|u| u.host_str().is_some())
            .ok_or_else(|| ExtractError::InvalidPageUrl(page.url.clone()))?;
        page_url.set_fragment(None);
        let base_url = page
            .final_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .filter(|u| u.host_str().is_some())
            .unwrap_or_else(|| page_url.clone());

        let document = Html::parse_document(markup);
        let sel = &*SELECTORS;

        let title = document
            .select(&sel.title)
            .next()
            .map(collapsed_text)
            .filter(|t| !t.is_empty())
            .or_else(|| fallback(page.title.as_deref()))
            .unwrap_or_default();

        let description = document
            .select(&sel.meta)
            .find(|el| {
                el.value()
                    .attr("name")
                    .is_some_and(|n| n.trim().eq_ignore_ascii_case("description"))
            })
            .and_then(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .or_else(|| fallback(page.description.as_deref()))
            .unwrap_or_default();

        let declared_canonical = document
            .select(&sel.link)
            .find(|el| {
                el.value().attr("rel").is_some_and(|rel| {
                    rel.split_whitespace()
                        .any(|r| r.eq_ignore_ascii_case("canonical"))
                })
            })
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| base_url.join(href.trim()).ok())
            .map(|mut u| {
                u.set_fragment(None);
                u.to_string()
            });
        let canonical_declared = declared_canonical.is_some();
        let canonical = declared_canonical.unwrap_or_else(|| page_url.to_string());

        let mut headings = Headings::default();
        for level in HeadingLevel::ALL {
            let texts = document
                .select(&sel.headings[level.index()])
                .map(trimmed_text)
                .filter(|t| !t.is_empty())
                .collect();
            headings.set(level, texts);
        }

        let (internal_links, external_links) = self.classify_links(&document, &base_url);

        let images_missing_alt = document
            .select(&sel.image)
            .filter(|img| img.value().attr("alt").is_none_or(|alt| alt.trim().is_empty()))
            .count() as u32;

        debug!(
            url = %page_url,
            internal = internal_links.len(),
            external = external_links.len(),
            "Extracted page signals"
        );

        Ok(PageSignals {
            url: page_url.to_string(),
            title,
            description,
            canonical,
            canonical_declared,
            headings,
            internal_links,
            external_links,
            images_missing_alt,
        })
    }

    /// Same-site links of a body, resolved against `base`. Only anchors are
    /// looked at; the crawler uses this to grow its frontier.
    pub fn same_site_links(&self, markup: &str, base: &Url) -> Vec<String> {
        let document = Html::parse_document(markup);
        self.classify_links(&document, base).0
    }

    /// Internal and external links in first-seen order, deduplicated.
    fn classify_links(&self, document: &Html, base: &Url) -> (Vec<String>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut internal_links = Vec::new();
        let mut external_links = Vec::new();
        for href in document
            .select(&SELECTORS.anchor)
            .filter_map(|el| el.value().attr("href"))
        {
            let Some((resolved, kind)) = self.classifier.classify(base, href) else {
                continue;
            };
            let resolved = resolved.to_string();
            if !seen.insert(resolved.clone()) {
                continue;
            }
            match kind {
                LinkKind::Internal => internal_links.push(resolved),
                LinkKind::External => external_links.push(resolved),
            }
        }
        (internal_links, external_links)
    }
}

fn trimmed_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fallback(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}
