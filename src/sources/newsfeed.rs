//! Scraped news-page feed ("scrape feed").
//!
//! Fetches a plain HTML news page and pulls card page links with their
//! thumbnail images out of anchor tags. The set code is the path segment
//! preceding `cards/` in the page URL. Seen image URLs are remembered so a
//! card is only surfaced on its first appearance.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use url::Url;

use super::{feed_agent, fetch_string, ImageRef, SourceError, SourceKind, SpoilerCandidate, SpoilerSource};

const NEWS_PAGE: &str = "newspoilers.html";

pub struct ScrapeFeed {
    agent: ureq::Agent,
    base_url: String,
    seen: HashSet<String>,
    card_anchor: Regex,
    set_segment: Regex,
}

impl ScrapeFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let card_anchor = Regex::new(
            r#"(?is)<a[^>]+href="([^"]+\.html)"[^>]*>\s*<img[^>]+src="([^"]+\.(?:jpg|png))""#,
        )
        .map_err(|e| SourceError::Malformed(e.to_string()))?;
        let set_segment = Regex::new(r"([a-z0-9]{3,4})/cards/")
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(Self {
            agent: feed_agent(timeout),
            base_url: base_url.into(),
            seen: HashSet::new(),
            card_anchor,
            set_segment,
        })
    }

    fn extract(&self, html: &str) -> Result<Vec<SpoilerCandidate>, SourceError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", self.base_url)))?;
        let mut cards = Vec::new();
        for capture in self.card_anchor.captures_iter(html) {
            let page = resolve(&base, capture[1].trim());
            let image = resolve(&base, capture[2].trim());
            let (Some(page), Some(image)) = (page, image) else {
                continue;
            };
            let set_code = self
                .set_segment
                .captures(page.as_str())
                .map(|c| c[1].to_lowercase());
            cards.push(SpoilerCandidate {
                page_url: Some(page.to_string()),
                image: ImageRef::Url(image.to_string()),
                set_code,
                cluttered: false,
            });
        }
        Ok(cards)
    }
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    base.join(&href.replace('\n', "")).ok()
}

impl SpoilerSource for ScrapeFeed {
    fn kind(&self) -> SourceKind {
        SourceKind::ScrapeFeed
    }

    fn poll(&mut self) -> Result<Vec<SpoilerCandidate>, SourceError> {
        let base = self.base_url.trim_end_matches('/');
        let html = fetch_string(&self.agent, &format!("{base}/{NEWS_PAGE}"))?;
        let mut fresh = Vec::new();
        for candidate in self.extract(&html)? {
            let ImageRef::Url(image_url) = &candidate.image else {
                continue;
            };
            if self.seen.insert(image_url.clone()) {
                fresh.push(candidate);
            }
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> ScrapeFeed {
        ScrapeFeed::new("https://spoilers.example", Duration::from_secs(5)).unwrap()
    }

    const NEWS_HTML: &str = r#"
        <html><body>
        <a href="neo/cards/dragon.html">
          <img src="neo/cards/dragon.jpg">
        </a>
        <a href="neo/cards/angel.html"><img src="neo/cards/angel.png"></a>
        <a href="about.html">About this site</a>
        <a href="neo/index.html"><img src="banner.gif"></a>
        </body></html>
    "#;

    #[test]
    fn extracts_card_anchor_image_pairs() {
        let cards = feed().extract(NEWS_HTML).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(
            cards[0].page_url.as_deref(),
            Some("https://spoilers.example/neo/cards/dragon.html")
        );
        assert!(matches!(
            &cards[0].image,
            ImageRef::Url(url) if url == "https://spoilers.example/neo/cards/dragon.jpg"
        ));
    }

    #[test]
    fn set_code_comes_from_the_page_path() {
        let cards = feed().extract(NEWS_HTML).unwrap();
        assert_eq!(cards[0].set_code.as_deref(), Some("neo"));
    }

    #[test]
    fn anchors_without_card_images_are_ignored() {
        let cards = feed().extract(NEWS_HTML).unwrap();
        assert!(cards
            .iter()
            .all(|card| !card.page_url.as_deref().unwrap_or("").contains("about")));
    }

    #[test]
    fn direct_scans_are_not_cluttered() {
        let cards = feed().extract(NEWS_HTML).unwrap();
        assert!(cards.iter().all(|card| !card.cluttered));
    }

    #[test]
    fn absolute_links_pass_through_unchanged() {
        let html = r#"<a href="https://cdn.example/war/cards/demon.html"><img src="https://cdn.example/war/cards/demon.jpg">"#;
        let cards = feed().extract(html).unwrap();
        assert_eq!(cards.len(), 1);
        assert!(matches!(
            &cards[0].image,
            ImageRef::Url(url) if url == "https://cdn.example/war/cards/demon.jpg"
        ));
        assert_eq!(cards[0].set_code.as_deref(), Some("war"));
    }
}
