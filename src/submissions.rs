//! Historical submission id retrieval.
//!
//! Reddit's own listings stop at 1000 items, so the full history comes from a
//! Pushshift-compatible search endpoint, or from a local id file when one is
//! already at hand.

use crate::config::PushshiftConfig;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmissionsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("submission search returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error(
        "more than {page_size} submissions share created_utc {created_utc}; \
         raise pushshift.page_size to page past them"
    )]
    PageExhausted { created_utc: i64, page_size: usize },
    #[error("failed to read submission id file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Every submission fullname in `subreddit` created after `after`
    /// (seconds since the epoch), deduplicated.
    async fn submission_fullnames(&self, subreddit: &str, after: i64) -> Result<Vec<String>, SubmissionsError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    created_utc: f64,
}

pub struct PushshiftClient {
    http: reqwest::Client,
    config: PushshiftConfig,
}

impl PushshiftClient {
    pub fn new(config: PushshiftConfig) -> Result<Self, SubmissionsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http, config })
    }

    async fn search_page(&self, subreddit: &str, after: i64) -> Result<Vec<SearchHit>, SubmissionsError> {
        let url = format!(
            "{}/reddit/search/submission",
            self.config.base_url.trim_end_matches('/')
        );
        let after = after.to_string();
        let size = self.config.page_size.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("subreddit", subreddit),
                ("after", after.as_str()),
                ("size", size.as_str()),
                ("sort", "asc"),
                ("sort_type", "created_utc"),
                ("fields", "id,created_utc"),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmissionsError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }
        let page: SearchResponse = resp.json().await?;
        Ok(page.data)
    }
}

#[async_trait]
impl SubmissionSource for PushshiftClient {
    async fn submission_fullnames(&self, subreddit: &str, after: i64) -> Result<Vec<String>, SubmissionsError> {
        let mut seen = HashSet::new();
        let mut fullnames = Vec::new();
        let mut cursor = after;

        loop {
            let page = self.search_page(subreddit, cursor).await?;
            let full = page.len() >= self.config.page_size;

            let mut added = 0usize;
            let mut newest = cursor;
            for hit in page {
                newest = newest.max(hit.created_utc as i64);
                if seen.insert(hit.id.clone()) {
                    fullnames.push(to_fullname(&hit.id));
                    added += 1;
                }
            }
            debug!("search page after={} added {} ids (total {})", cursor, added, fullnames.len());
            if fullnames.len() % 10_000 < added {
                info!("Retrieved {} submissions so far", fullnames.len());
            }
            // A short page holds everything left after the cursor.
            if !full {
                break;
            }
            // Step back one second so posts sharing the boundary timestamp are
            // not lost; the id set absorbs the overlap. A full page that cannot
            // move the cursor is one second with more posts than a page holds.
            let next = newest - 1;
            if next <= cursor {
                return Err(SubmissionsError::PageExhausted {
                    created_utc: newest,
                    page_size: self.config.page_size,
                });
            }
            cursor = next;
        }

        Ok(fullnames)
    }
}

/// Reads submission ids from a file, one per line. Blank lines and `#`
/// comments are ignored and bare ids get the `t3_` prefix.
pub async fn load_submission_ids(path: &Path) -> Result<Vec<String>, SubmissionsError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SubmissionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let mut seen = HashSet::new();
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(to_fullname)
        .filter(|name| seen.insert(name.clone()))
        .collect())
}

pub fn to_fullname(id: &str) -> String {
    if id.starts_with("t3_") {
        id.to_string()
    } else {
        format!("t3_{id}")
    }
}
