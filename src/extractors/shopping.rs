//! Shopping variants: product detail pages and search result pages.

use scraper::Html;
use serde_json::{json, Value};
use url::Url;
use tracing::debug;

use super::{first_text, selector, text_of, text_within};
use crate::dispatch::Extractor;
use crate::error::ExtractionError;
use crate::models::Evidence;

/// Resolves relative related-item links.
const STORE_BASE: &str = "https://www.amazon.com/";

/// Product id from a `/dp/<id>` path. Relative hrefs are accepted.
pub fn product_id(href: &str) -> Option<String> {
    let url = Url::parse(STORE_BASE).ok()?.join(href).ok()?;
    let segment = url.path_segments()?.skip_while(|s| *s != "dp").nth(1)?;
    let id: String = segment
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Product detail page: name plus the related-item carousels.
///
/// A page with a title but no carousels is still recorded, with an empty
/// `sections` list.
pub struct ProductPage;

impl Extractor for ProductPage {
    fn name(&self) -> &str {
        "shopping.product"
    }

    fn extract(&self, document: &Html, evidence: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let Some(product_name) = first_text(self.name(), document, "#productTitle")? else {
            return Ok(None);
        };

        let carousels = selector(self.name(), ".a-carousel-container")?;
        let heading = selector(self.name(), "h2")?;
        let cards = selector(self.name(), "li.a-carousel-card")?;
        let link = selector(self.name(), "a[href]")?;
        let image = selector(self.name(), "img[alt]")?;

        let mut sections = Vec::new();
        for carousel in document.select(&carousels) {
            let related: Vec<Value> = carousel
                .select(&cards)
                .filter_map(|card| {
                    let href = card.select(&link).next()?.value().attr("href")?;
                    let name = card
                        .select(&image)
                        .next()
                        .and_then(|img| img.value().attr("alt"))
                        .map(str::to_string)
                        .filter(|alt| !alt.trim().is_empty())
                        .unwrap_or_else(|| text_of(card));
                    Some(json!({
                        "name": name,
                        "href": href,
                        "productId": product_id(href),
                    }))
                })
                .collect();

            if related.is_empty() {
                continue;
            }
            sections.push(json!({
                "category": text_within(carousel, &heading).unwrap_or_default(),
                "related": related,
            }));
        }

        if sections.is_empty() {
            debug!(evidence = %evidence.id, "missing related content");
        }

        Ok(Some(json!({
            "productName": product_name,
            "productId": product_id(&evidence.href),
            "sections": sections,
        })))
    }
}

/// Search result page: ordered list of organic results.
pub struct SearchResults;

impl Extractor for SearchResults {
    fn name(&self) -> &str {
        "shopping.search"
    }

    fn extract(&self, document: &Html, evidence: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let results_sel = selector(self.name(), r#"[data-component-type="s-search-result"]"#)?;
        let title = selector(self.name(), "h2")?;
        let link = selector(self.name(), "h2 a[href], a[href]")?;

        let results: Vec<Value> = document
            .select(&results_sel)
            .enumerate()
            .map(|(i, result)| {
                json!({
                    "order": i + 1,
                    "asin": result.value().attr("data-asin"),
                    "name": text_within(result, &title),
                    "href": result.select(&link).next().and_then(|a| a.value().attr("href")),
                })
            })
            .collect();

        if results.is_empty() {
            debug!(evidence = %evidence.id, "missing search results");
        }

        Ok(Some(json!({ "results": results })))
    }
}
