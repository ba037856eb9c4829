//! Built-in extraction variants.
//!
//! | Selector | Shape | Variant |
//! |----------|-------|---------|
//! | `.ytp-title-channel` | video | [`video::TitleChannel`] |
//! | `.video-ads.ytp-ad-module` | video | [`video::VideoAd`] |
//! | `ytd-app` | video | [`video::FullPage`] |
//! | `.ytp-ad-player-overlay-instream-info` | video | [`video::InstreamOverlay`] |
//! | any | product | [`shopping::ProductPage`] |
//! | any | search | [`shopping::SearchResults`] |
//!
//! Each variant writes under its own top-level keys so that documents built
//! from several packets of one session merge without clobbering each other.

pub mod shopping;
pub mod video;

use scraper::{ElementRef, Html, Selector};

use crate::dispatch::{ExtractorRegistry, SelectorKey};
use crate::error::ExtractionError;
use crate::models::UrlShape;

pub fn register_builtins(registry: &mut ExtractorRegistry) {
    registry.register(
        SelectorKey::exact(video::TITLE_CHANNEL_SELECTOR),
        UrlShape::Video,
        Box::new(video::TitleChannel),
    );
    registry.register(
        SelectorKey::exact(video::VIDEO_AD_SELECTOR),
        UrlShape::Video,
        Box::new(video::VideoAd),
    );
    registry.register(
        SelectorKey::exact(video::FULL_PAGE_SELECTOR),
        UrlShape::Video,
        Box::new(video::FullPage),
    );
    registry.register(
        SelectorKey::exact(video::INSTREAM_OVERLAY_SELECTOR),
        UrlShape::Video,
        Box::new(video::InstreamOverlay),
    );
    registry.register(SelectorKey::Any, UrlShape::Product, Box::new(shopping::ProductPage));
    registry.register(SelectorKey::Any, UrlShape::Search, Box::new(shopping::SearchResults));
}

pub(crate) fn selector(extractor: &str, css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css)
        .map_err(|e| ExtractionError::fault(extractor, format!("bad selector '{}': {}", css, e)))
}

/// Element text with whitespace runs collapsed.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css`, if it has any.
pub(crate) fn first_text(
    extractor: &str,
    document: &Html,
    css: &str,
) -> Result<Option<String>, ExtractionError> {
    let sel = selector(extractor, css)?;
    Ok(document
        .select(&sel)
        .map(text_of)
        .find(|t| !t.is_empty()))
}

/// Text of the first match within `scope`.
pub(crate) fn text_within(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).map(text_of).find(|t| !t.is_empty())
}
