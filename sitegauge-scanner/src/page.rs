use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One fetched page as delivered by a crawl session or the ingestion webhook.
///
/// `content` is `None` when the response was not HTML or the body could not
/// be read; such pages are skipped by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage {
    /// The requested URL; identifies the page within its crawl.
    pub url: String,
    /// Where the request ended up after redirects, when that differs from
    /// `url`. Relative links in the body resolve against this.
    pub final_url: Option<String>,
    pub status_code: u16,
    /// Status of the first response when the request was redirected.
    pub original_status: Option<u16>,
    pub content_type: Option<String>,
    pub content: Option<String>,
    /// Crawler-supplied title, used when the markup has none.
    pub title: Option<String>,
    /// Crawler-supplied description, used when the markup has none.
    pub description: Option<String>,
    pub response_time: Duration,
}

impl RawPage {
    pub fn new(url: impl Into<String>, status_code: u16) -> Self {
        Self {
            url: url.into(),
            final_url: None,
            status_code,
            original_status: None,
            content_type: None,
            content: None,
            title: None,
            description: None,
            response_time: Duration::from_secs(0),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_final_url(mut self, final_url: impl Into<String>) -> Self {
        let final_url = final_url.into();
        self.final_url = (final_url != self.url).then_some(final_url);
        self
    }

    pub fn with_original_status(mut self, status: u16) -> Self {
        self.original_status = Some(status);
        self
    }

    pub fn with_fallbacks(mut self, title: Option<String>, description: Option<String>) -> Self {
        self.title = title;
        self.description = description;
        self
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true)
    }
}
