//! JSON card-API feed ("primary feed").
//!
//! Polls an upcoming-cards endpoint that returns paginated JSON:
//! `{ "data": [cards...], "has_more": bool, "next_page": url }`. Each card
//! carries up to two image URLs (double-faced cards have one per face).
//! Cards are tracked by id so each is emitted once.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use super::{feed_agent, fetch_json, ImageRef, SourceError, SourceKind, SpoilerCandidate, SpoilerSource};

/// Pagination runaway guard.
const MAX_PAGES: usize = 10;

pub struct PrimaryFeed {
    agent: ureq::Agent,
    url: String,
    seen: HashSet<String>,
}

#[derive(Debug, Deserialize)]
struct CardPage {
    #[serde(default)]
    data: Vec<CardEntry>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardEntry {
    id: String,
    #[serde(default)]
    set: Option<String>,
    #[serde(default)]
    scryfall_uri: Option<String>,
    #[serde(default)]
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Vec<CardFace>,
}

#[derive(Debug, Deserialize)]
struct CardFace {
    #[serde(default)]
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Deserialize)]
struct ImageUris {
    #[serde(default)]
    normal: Option<String>,
}

impl PrimaryFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: feed_agent(timeout),
            url: url.into(),
            seen: HashSet::new(),
        }
    }
}

impl SpoilerSource for PrimaryFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::PrimaryFeed
    }

    fn poll(&mut self) -> Result<Vec<SpoilerCandidate>, SourceError> {
        let mut candidates = Vec::new();
        let mut page_url = self.url.clone();
        for _ in 0..MAX_PAGES {
            let page: CardPage = fetch_json(&self.agent, &page_url)?;
            for card in &page.data {
                if !self.seen.insert(card.id.clone()) {
                    continue;
                }
                candidates.extend(card_candidates(card));
            }
            match (page.has_more, page.next_page) {
                (true, Some(next)) => page_url = next,
                _ => break,
            }
        }
        Ok(candidates)
    }
}

fn card_candidates(card: &CardEntry) -> Vec<SpoilerCandidate> {
    image_urls(card)
        .into_iter()
        .map(|url| SpoilerCandidate {
            page_url: card.scryfall_uri.clone(),
            image: ImageRef::Url(url),
            set_code: card.set.clone(),
            cluttered: false,
        })
        .collect()
}

/// One URL for single-faced cards, one per face otherwise.
fn image_urls(card: &CardEntry) -> Vec<String> {
    if let Some(url) = card.image_uris.as_ref().and_then(|uris| uris.normal.clone()) {
        return vec![url];
    }
    card.card_faces
        .iter()
        .filter_map(|face| face.image_uris.as_ref().and_then(|uris| uris.normal.clone()))
        .collect()
}
