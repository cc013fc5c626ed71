// Resolves HTTP status codes for canonical and internal link targets

use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Status recorded for a target that could not be reached at all.
pub const UNREACHABLE: u16 = 0;

/// Issues HEAD requests (falling back to GET when HEAD is refused) with a
/// bounded number in flight.
#[derive(Debug, Clone)]
pub struct StatusProbe {
    client: Client,
    concurrency: usize,
}

impl StatusProbe {
    pub fn new(timeout_secs: u64, concurrency: usize, user_agent: &str) -> crate::error::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            concurrency: concurrency.max(1),
        })
    }

    pub async fn status_of(&self, url: &str) -> u16 {
        match self.client.head(url).send().await {
            Ok(response)
                if response.status() == StatusCode::METHOD_NOT_ALLOWED
                    || response.status() == StatusCode::NOT_IMPLEMENTED =>
            {
                match self.client.get(url).send().await {
                    Ok(response) => response.status().as_u16(),
                    Err(e) => {
                        debug!(url, error = %e, "GET probe failed");
                        UNREACHABLE
                    }
                }
            }
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                debug!(url, error = %e, "HEAD probe failed");
                UNREACHABLE
            }
        }
    }

    /// Resolve every URL once; duplicates in the input are probed once.
    pub async fn resolve<I>(&self, urls: I) -> BTreeMap<String, u16>
    where
        I: IntoIterator<Item = String>,
    {
        let mut unique: Vec<String> = urls.into_iter().collect();
        unique.sort();
        unique.dedup();

        stream::iter(unique)
            .map(|url| async move {
                let status = self.status_of(&url).await;
                (url, status)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
