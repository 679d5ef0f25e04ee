use crate::config::ExtractConfig;
use crate::extract::price::parse_price;
use crate::extract::{Extractor, ListingCandidate};
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector(selector.to_string()))
}

/// Resolves an href/src against the page URL, keeping only http(s) targets
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        _ => None,
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Listing extractor driven by CSS selectors
///
/// Every element matching the card selector is one listing; the other selectors
/// are evaluated inside the card. Cards without an id attribute are ignored.
#[derive(Debug)]
pub struct SelectorExtractor {
    card: Selector,
    id_attribute: String,
    title: Selector,
    price: Selector,
    location: Selector,
    seller: Selector,
    seller_id_attribute: String,
    link: Selector,
    image: Selector,
    next: Selector,
    default_country: Option<String>,
}

impl SelectorExtractor {
    pub fn from_config(config: &ExtractConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            card: parse_selector(&config.card_selector)?,
            id_attribute: config.id_attribute.clone(),
            title: parse_selector(&config.title_selector)?,
            price: parse_selector(&config.price_selector)?,
            location: parse_selector(&config.location_selector)?,
            seller: parse_selector(&config.seller_selector)?,
            seller_id_attribute: config.seller_id_attribute.clone(),
            link: parse_selector(&config.link_selector)?,
            image: parse_selector(&config.image_selector)?,
            next: parse_selector(&config.next_selector)?,
            default_country: config.default_country.clone(),
        })
    }

    fn first_text(&self, card: ElementRef<'_>, selector: &Selector) -> Option<String> {
        card.select(selector)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty())
    }

    fn parse_card(&self, card: ElementRef<'_>, base_url: &Url) -> Option<ListingCandidate> {
        let external_id = card.value().attr(&self.id_attribute)?.trim().to_string();
        if external_id.is_empty() {
            return None;
        }

        let title = self.first_text(card, &self.title).unwrap_or_default();

        let url = card
            .select(&self.link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| resolve_link(href, base_url));

        let (price_cents, currency) = match self
            .first_text(card, &self.price)
            .and_then(|text| parse_price(&text))
        {
            Some((cents, currency)) => (Some(cents), currency),
            None => (None, None),
        };

        let location_label = self.first_text(card, &self.location);

        let (seller_external_id, seller_name) = match card.select(&self.seller).next() {
            Some(seller) => {
                let id = seller
                    .value()
                    .attr(&self.seller_id_attribute)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let name = Some(element_text(seller)).filter(|s| !s.is_empty());
                (id, name)
            }
            None => (None, None),
        };

        let mut image_urls: Vec<String> = Vec::new();
        for image in card.select(&self.image) {
            let src = image
                .value()
                .attr("src")
                .or_else(|| image.value().attr("data-src"));
            if let Some(resolved) = src.and_then(|s| resolve_link(s, base_url)) {
                let resolved = resolved.to_string();
                if !image_urls.contains(&resolved) {
                    image_urls.push(resolved);
                }
            }
        }

        Some(ListingCandidate {
            external_id,
            title,
            url,
            price_cents,
            currency,
            location_label,
            country: self.default_country.clone(),
            seller_external_id,
            seller_name,
            image_urls,
        })
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Vec<ListingCandidate> {
        let document = Html::parse_document(html);
        let mut candidates: Vec<ListingCandidate> = Vec::new();

        for card in document.select(&self.card) {
            if let Some(candidate) = self.parse_card(card, base_url) {
                // Pages sometimes repeat a promoted listing
                if candidates
                    .iter()
                    .all(|c| c.external_id != candidate.external_id)
                {
                    candidates.push(candidate);
                }
            }
        }

        candidates
    }

    fn find_next_page(&self, html: &str, base_url: &Url) -> Option<Url> {
        let document = Html::parse_document(html);

        let next = document
            .select(&self.next)
            .filter_map(|e| e.value().attr("href"))
            .find_map(|href| resolve_link(href, base_url))
            .or_else(|| {
                let link = Selector::parse("link[rel='next'][href]").ok()?;
                document
                    .select(&link)
                    .filter_map(|e| e.value().attr("href"))
                    .find_map(|href| resolve_link(href, base_url))
            })?;

        if &next == base_url {
            None
        } else {
            Some(next)
        }
    }
}
