//! Spoiler source feeds.
//!
//! A source yields candidate images plus whatever metadata the feed
//! carries (page URL, set code). Sources are polled once per crawl cycle;
//! a transient fetch or parse failure means zero results for that source
//! this cycle, never an aborted cycle. Each source remembers what it has
//! already emitted so a candidate is only surfaced once.

mod api;
mod gallery;
mod newsfeed;

pub use api::PrimaryFeed;
pub use gallery::ForumFeed;
pub use newsfeed::ScrapeFeed;

use std::fmt;
use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Which feed a spoiler came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    PrimaryFeed,
    ScrapeFeed,
    ForumFeed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PrimaryFeed => "primary-feed",
            SourceKind::ScrapeFeed => "scrape-feed",
            SourceKind::ForumFeed => "forum-feed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary-feed" => Some(SourceKind::PrimaryFeed),
            "scrape-feed" => Some(SourceKind::ScrapeFeed),
            "forum-feed" => Some(SourceKind::ForumFeed),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source feed failed for this cycle. The crawler logs it and
/// continues with the other sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed feed payload: {0}")]
    Malformed(String),
}

/// Where a candidate's image data lives.
#[derive(Clone, Debug)]
pub enum ImageRef {
    Url(String),
    Bytes(Vec<u8>),
}

/// A candidate spoiler image emitted by a source.
#[derive(Clone, Debug)]
pub struct SpoilerCandidate {
    pub page_url: Option<String>,
    pub image: ImageRef,
    pub set_code: Option<String>,
    /// Cluttered photographs go through the card detector; direct card
    /// scans skip straight to dedup.
    pub cluttered: bool,
}

pub trait SpoilerSource {
    fn kind(&self) -> SourceKind;

    fn poll(&mut self) -> Result<Vec<SpoilerCandidate>, SourceError>;
}

pub(crate) fn feed_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .build()
}

pub(crate) fn fetch_string(agent: &ureq::Agent, url: &str) -> Result<String, SourceError> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| SourceError::Unavailable(format!("{url}: {e}")))?;
    response
        .into_string()
        .map_err(|e| SourceError::Unavailable(format!("{url}: {e}")))
}

pub(crate) fn fetch_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
) -> Result<T, SourceError> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| SourceError::Unavailable(format!("{url}: {e}")))?;
    let mut body = String::new();
    response
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|e| SourceError::Unavailable(format!("{url}: {e}")))?;
    serde_json::from_str(&body).map_err(|e| SourceError::Malformed(format!("{url}: {e}")))
}
