//! Forum gallery feed ("forum feed").
//!
//! Polls a JSON listing of forum submissions. A submission qualifies as a
//! potential spoiler when it links out of the forum and is either flagged
//! as a spoiler or carries an allowed flair; "News" posts must also name a
//! set code in square brackets at the start of the title. Submission
//! photos are cluttered: they may show several cards on a table, so they
//! go through the card detector downstream.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use super::{feed_agent, fetch_json, ImageRef, SourceError, SourceKind, SpoilerCandidate, SpoilerSource};

const ALLOWED_FLAIRS: [&str; 2] = ["Spoiler", "News"];
const SET_CODE_PATTERN: &str = r"^\[(.{3,4})\]";

pub struct ForumFeed {
    agent: ureq::Agent,
    url: String,
    seen: HashSet<String>,
    set_code: Regex,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Submission,
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    spoiler: bool,
    #[serde(default)]
    link_flair_text: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    is_gallery: bool,
    // BTreeMap keeps gallery order deterministic.
    #[serde(default)]
    media_metadata: Option<BTreeMap<String, MediaEntry>>,
    #[serde(default)]
    preview: Option<Preview>,
}

#[derive(Debug, Deserialize)]
struct MediaEntry {
    #[serde(default)]
    s: Option<MediaSource>,
}

#[derive(Debug, Deserialize)]
struct MediaSource {
    #[serde(default)]
    u: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Preview {
    #[serde(default)]
    images: Vec<PreviewImage>,
}

#[derive(Debug, Deserialize)]
struct PreviewImage {
    #[serde(default)]
    source: Option<PreviewSource>,
}

#[derive(Debug, Deserialize)]
struct PreviewSource {
    #[serde(default)]
    url: Option<String>,
}

impl ForumFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let set_code =
            Regex::new(SET_CODE_PATTERN).map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(Self {
            agent: feed_agent(timeout),
            url: url.into(),
            seen: HashSet::new(),
            set_code,
        })
    }

    /// Set code in square brackets at the start of a title, lowercased.
    fn detect_set(&self, title: &str) -> Option<String> {
        self.set_code
            .captures(title)
            .map(|capture| capture[1].to_lowercase())
    }

    /// Spoiler gate: text posts never qualify; flagged or flaired posts
    /// do, except "News" posts with no set code in the title.
    fn is_spoiler(&self, submission: &Submission) -> bool {
        if submission.domain.starts_with("self.") {
            return false;
        }
        let flair = submission.link_flair_text.as_deref();
        if submission.spoiler || flair.map(|f| ALLOWED_FLAIRS.contains(&f)).unwrap_or(false) {
            if flair == Some("News") && self.detect_set(&submission.title).is_none() {
                return false;
            }
            return true;
        }
        false
    }

    fn candidates(&self, submission: &Submission) -> Vec<SpoilerCandidate> {
        let page_url = submission
            .permalink
            .as_deref()
            .and_then(|permalink| self.absolutize(permalink));
        let set_code = self.detect_set(&submission.title);
        submission_images(submission)
            .into_iter()
            .map(|image_url| SpoilerCandidate {
                page_url: page_url.clone(),
                image: ImageRef::Url(image_url),
                set_code: set_code.clone(),
                cluttered: true,
            })
            .collect()
    }

    fn absolutize(&self, permalink: &str) -> Option<String> {
        if permalink.starts_with("http") {
            return Some(permalink.to_string());
        }
        let base = Url::parse(&self.url).ok()?;
        base.join(permalink).ok().map(|url| url.to_string())
    }
}

/// Gallery posts carry one URL per gallery entry; plain image posts carry
/// a single preview source.
fn submission_images(submission: &Submission) -> Vec<String> {
    if submission.is_gallery {
        if let Some(media) = &submission.media_metadata {
            return media
                .values()
                .filter_map(|entry| entry.s.as_ref().and_then(|s| s.u.clone()))
                .collect();
        }
    }
    submission
        .preview
        .iter()
        .flat_map(|preview| preview.images.first())
        .filter_map(|image| image.source.as_ref().and_then(|s| s.url.clone()))
        .collect()
}

impl SpoilerSource for ForumFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::ForumFeed
    }

    fn poll(&mut self) -> Result<Vec<SpoilerCandidate>, SourceError> {
        let listing: Listing = fetch_json(&self.agent, &self.url)?;
        let mut candidates = Vec::new();
        for child in &listing.data.children {
            let submission = &child.data;
            if self.seen.contains(&submission.id) || !self.is_spoiler(submission) {
                continue;
            }
            self.seen.insert(submission.id.clone());
            candidates.extend(self.candidates(submission));
        }
        Ok(candidates)
    }
}
