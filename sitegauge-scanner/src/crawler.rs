use crate::error::{Result, ScanError};
use crate::extract::PageSignalExtractor;
use crate::links::{LinkClassifier, resolve_href};
use crate::page::RawPage;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use url::Url;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

const MAX_REDIRECTS: usize = 5;

/// Totals reported when a crawl session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages_delivered: usize,
    pub fetch_errors: usize,
    /// True when the receiving side hung up before the frontier drained.
    pub cancelled: bool,
}

/// Shared crawl frontier. Popping an item and marking it in flight happen
/// under one lock so idle workers never exit while a peer may still enqueue.
struct Frontier {
    queue: VecDeque<(String, usize)>,
    visited: HashSet<String>,
    in_flight: usize,
    scheduled: usize,
    cancelled: bool,
}

enum Next {
    Fetch(String, usize),
    Wait,
    Done,
}

impl Frontier {
    fn next(&mut self) -> Next {
        if self.cancelled {
            return Next::Done;
        }
        match self.queue.pop_front() {
            Some((url, depth)) => {
                self.in_flight += 1;
                Next::Fetch(url, depth)
            }
            None if self.in_flight == 0 => Next::Done,
            None => Next::Wait,
        }
    }

    fn schedule(&mut self, url: String, depth: usize, max_pages: usize) -> bool {
        if self.scheduled >= max_pages || !self.visited.insert(url.clone()) {
            return false;
        }
        self.scheduled += 1;
        self.queue.push_back((url, depth));
        true
    }
}

/// Bounded-concurrency site crawler. Every fetched page is sent down the
/// channel handed to [`Crawler::crawl`]; the channel closing is the
/// completion signal for the receiver.
pub struct Crawler {
    client: Client,
    max_depth: usize,
    max_pages: usize,
    progress_callback: Option<ProgressCallback>,
}

impl Crawler {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10, "sitegauge/0.1")
    }

    pub fn with_timeout(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs((timeout_secs / 2).max(1)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            // Redirects are followed by hand so the first status survives.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_depth: 3,
            max_pages: 500,
            progress_callback: None,
        })
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Crawl `start_url` with at most `workers` requests in flight.
    ///
    /// Fails with [`ScanError::RootUnreachable`] when the root page cannot be
    /// fetched; per-page failures after that are logged and counted.
    pub async fn crawl(
        &self,
        start_url: &str,
        workers: usize,
        pages: mpsc::Sender<RawPage>,
    ) -> Result<CrawlSummary> {
        info!("Starting crawl of {} with {} workers", start_url, workers);

        let root = Url::parse(start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        let classifier = LinkClassifier::for_root(root.as_str())
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", start_url)))?;
        let extractor = PageSignalExtractor::new(classifier);
        let workers = workers.max(1);

        // The root is fetched up front: an unreachable site ends the session
        // before any worker starts.
        let (root_page, root_links) = Self::fetch_page(&self.client, root.as_str(), &extractor)
            .await
            .map_err(|e| ScanError::RootUnreachable {
                url: root.to_string(),
                reason: e.to_string(),
            })?;

        let mut frontier = Frontier {
            queue: VecDeque::new(),
            visited: HashSet::from([root.to_string()]),
            in_flight: 0,
            scheduled: 1,
            cancelled: false,
        };
        if self.max_depth > 1 {
            for link in root_links {
                frontier.schedule(link, 1, self.max_pages);
            }
        }

        let mut summary = CrawlSummary::default();
        if pages.send(root_page).await.is_err() {
            summary.cancelled = true;
            return Ok(summary);
        }
        summary.pages_delivered = 1;

        let frontier = Arc::new(Mutex::new(frontier));
        let totals = Arc::new(Mutex::new(summary));
        let mut worker_handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let client = self.client.clone();
            let extractor = extractor.clone();
            let progress_cb = self.progress_callback.clone();
            let max_depth = self.max_depth;
            let max_pages = self.max_pages;
            let frontier = frontier.clone();
            let totals = totals.clone();
            let pages = pages.clone();

            let handle = tokio::spawn(async move {
                debug!("Worker {} started", worker_id);

                loop {
                    let next = frontier.lock().await.next();
                    let (url, depth) = match next {
                        Next::Fetch(url, depth) => (url, depth),
                        Next::Wait => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            continue;
                        }
                        Next::Done => break,
                    };

                    if let Some(ref callback) = progress_cb {
                        callback(worker_id, url.clone());
                    }

                    let discovered = match Self::fetch_page(&client, &url, &extractor).await {
                        Ok((page, links)) => {
                            if pages.send(page).await.is_err() {
                                debug!("Worker {} lost its receiver, stopping", worker_id);
                                let mut frontier = frontier.lock().await;
                                frontier.cancelled = true;
                                frontier.in_flight -= 1;
                                totals.lock().await.cancelled = true;
                                break;
                            }
                            totals.lock().await.pages_delivered += 1;
                            links
                        }
                        Err(e) => {
                            warn!("Crawl error for {}: {}", url, e);
                            totals.lock().await.fetch_errors += 1;
                            Vec::new()
                        }
                    };

                    let mut frontier = frontier.lock().await;
                    frontier.in_flight -= 1;
                    if depth + 1 < max_depth {
                        for link in discovered {
                            frontier.schedule(link, depth + 1, max_pages);
                        }
                    }
                }

                debug!("Worker {} finished", worker_id);
            });

            worker_handles.push(handle);
        }
        drop(pages);

        for handle in worker_handles {
            handle.await?;
        }

        let summary = totals.lock().await.clone();
        info!(
            delivered = summary.pages_delivered,
            errors = summary.fetch_errors,
            "Crawl complete"
        );
        Ok(summary)
    }

    /// Fetch one URL, following up to [`MAX_REDIRECTS`] hops by hand, and
    /// return the page plus the same-site links worth queueing.
    async fn fetch_page(
        client: &Client,
        url: &str,
        extractor: &PageSignalExtractor,
    ) -> Result<(RawPage, Vec<String>)> {
        debug!("Fetching {}", url);

        let start = Instant::now();
        let mut current = Url::parse(url).map_err(|e| ScanError::InvalidUrl(e.to_string()))?;
        let mut original_status = None;
        let mut response = client.get(current.as_str()).send().await?;

        for _ in 0..MAX_REDIRECTS {
            if !response.status().is_redirection() {
                break;
            }
            let Some(target) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| resolve_href(&current, location))
            else {
                break;
            };
            original_status.get_or_insert(response.status().as_u16());
            current = target;
            response = client.get(current.as_str()).send().await?;
        }
        if response.status().is_redirection() && original_status.is_some() {
            return Err(ScanError::RedirectLoop(url.to_string()));
        }

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut page = RawPage::new(url, status_code).with_final_url(current.as_str());
        page.original_status = original_status;
        page.content_type = content_type;

        if page.is_html() {
            page.content = Some(response.text().await?);
        }
        page.response_time = start.elapsed();

        let links = match page.content.as_deref() {
            Some(body) => extractor.same_site_links(body, &current),
            None => Vec::new(),
        };

        Ok((page, links))
    }
}
