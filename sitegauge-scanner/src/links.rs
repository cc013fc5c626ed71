// Internal/external link classification against a crawl's base domain

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    Internal,
    External,
}

/// Derive the base domain from a crawl root: the host, lower-cased, with a
/// leading `www.` removed. Accepts a full URL or a bare host name.
pub fn base_domain(root: &str) -> Option<String> {
    let root = root.trim();
    if root.is_empty() {
        return None;
    }

    let parsed = Url::parse(root)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("http://{}", root)).ok())?;

    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() { None } else { Some(host) }
}

/// Resolve an href against the page it appeared on.
///
/// Returns `None` for hrefs that do not point at another document
/// (fragments, `javascript:`, `mailto:`, `tel:`, `data:`), for non-HTTP
/// schemes, and for anything the URL parser rejects.
pub fn resolve_href(page_url: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    let lowered = href.to_ascii_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    let mut resolved = page_url.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") || resolved.host_str().is_none() {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Classifies links for one crawl. Cheap to clone; holds only the base domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClassifier {
    base_domain: String,
}

impl LinkClassifier {
    pub fn new(base_domain: impl Into<String>) -> Self {
        let base_domain = base_domain.into().to_lowercase();
        let base_domain = base_domain
            .strip_prefix("www.")
            .map(str::to_string)
            .unwrap_or(base_domain);
        Self { base_domain }
    }

    /// Build a classifier from a crawl root URL or host.
    pub fn for_root(root: &str) -> Option<Self> {
        base_domain(root).map(|domain| Self { base_domain: domain })
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Classify an already resolved URL by its host.
    pub fn kind_of(&self, url: &Url) -> LinkKind {
        match url.host_str() {
            Some(host) if self.is_same_site(host) => LinkKind::Internal,
            _ => LinkKind::External,
        }
    }

    /// Resolve `href` against `page_url` and classify the result.
    /// Malformed hrefs are dropped rather than reported.
    pub fn classify(&self, page_url: &Url, href: &str) -> Option<(Url, LinkKind)> {
        let resolved = resolve_href(page_url, href)?;
        let kind = self.kind_of(&resolved);
        Some((resolved, kind))
    }

    fn is_same_site(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        host == self.base_domain
            || host
                .strip_suffix(self.base_domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}
