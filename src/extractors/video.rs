//! Video page variants: overlays, in-stream ads and the full watch page.

use scraper::Html;
use serde_json::{json, Value};
use url::Url;

use super::{first_text, selector, text_of, text_within};
use crate::dispatch::{query_value, Extractor};
use crate::error::ExtractionError;
use crate::models::Evidence;

pub const TITLE_CHANNEL_SELECTOR: &str = ".ytp-title-channel";
pub const VIDEO_AD_SELECTOR: &str = ".video-ads.ytp-ad-module";
pub const FULL_PAGE_SELECTOR: &str = "ytd-app";
pub const INSTREAM_OVERLAY_SELECTOR: &str = ".ytp-ad-player-overlay-instream-info";

/// Resolves relative links to related videos.
const SITE_BASE: &str = "https://www.youtube.com/";

/// Video id from a watch URL (`v=` parameter). Relative hrefs are accepted.
pub fn video_id(href: &str) -> Option<String> {
    let url = Url::parse(SITE_BASE).ok()?.join(href).ok()?;
    query_value(&url, "v").filter(|v| !v.is_empty())
}

/// Channel shown in the player title bar while an ad plays.
pub struct TitleChannel;

impl Extractor for TitleChannel {
    fn name(&self) -> &str {
        "video.title_channel"
    }

    fn extract(&self, document: &Html, _: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let links = selector(self.name(), "a[href]")?;
        let link = document.select(&links).next();
        let name = first_text(self.name(), document, ".ytp-title-expanded-title, a")?;

        if link.is_none() && name.is_none() {
            return Ok(None);
        }

        Ok(Some(json!({
            "titleChannel": {
                "name": name,
                "link": link.and_then(|a| a.value().attr("href")),
            }
        })))
    }
}

/// In-stream ad module: sponsor text, display url, remaining time.
pub struct VideoAd;

impl Extractor for VideoAd {
    fn name(&self) -> &str {
        "video.ad"
    }

    fn extract(&self, document: &Html, _: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let text = first_text(self.name(), document, ".ytp-ad-text, .ytp-ad-visit-advertiser-button")?;
        let display_url = first_text(self.name(), document, ".ytp-ad-button-text")?;
        let remaining = first_text(self.name(), document, ".ytp-ad-duration-remaining")?;

        if text.is_none() && display_url.is_none() && remaining.is_none() {
            return Ok(None);
        }

        Ok(Some(json!({
            "ads": [{
                "text": text,
                "displayUrl": display_url,
                "remaining": remaining,
            }]
        })))
    }
}

/// Full watch page: title, author and the related-video column.
pub struct FullPage;

impl Extractor for FullPage {
    fn name(&self) -> &str {
        "video.full_page"
    }

    fn extract(&self, document: &Html, evidence: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let Some(title) = first_text(self.name(), document, "h1.title, h1")? else {
            return Ok(None);
        };
        let author = first_text(self.name(), document, "ytd-channel-name a, #owner-name a")?;

        let cards = selector(self.name(), "ytd-compact-video-renderer")?;
        let card_title = selector(self.name(), "#video-title")?;
        let card_link = selector(self.name(), "a[href]")?;

        let related: Vec<Value> = document
            .select(&cards)
            .enumerate()
            .map(|(i, card)| {
                let href = card
                    .select(&card_link)
                    .next()
                    .and_then(|a| a.value().attr("href"));
                json!({
                    "index": i + 1,
                    "title": text_within(card, &card_title),
                    "videoId": href.and_then(video_id),
                })
            })
            .collect();

        Ok(Some(json!({
            "videoId": video_id(&evidence.href),
            "title": title,
            "authorName": author,
            "related": related,
        })))
    }
}

/// Ad badge overlay shown over the player during in-stream ads.
pub struct InstreamOverlay;

impl Extractor for InstreamOverlay {
    fn name(&self) -> &str {
        "video.instream_overlay"
    }

    fn extract(&self, document: &Html, _: &Evidence) -> Result<Option<Value>, ExtractionError> {
        let whole = text_of(document.root_element());
        if whole.is_empty() {
            return Ok(None);
        }
        let badge = first_text(self.name(), document, ".ytp-ad-simple-ad-badge")?;
        let remaining = first_text(self.name(), document, ".ytp-ad-duration-remaining")?;

        Ok(Some(json!({
            "overlays": [{
                "badge": badge,
                "remaining": remaining,
                "text": whole,
            }]
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::parse_document;
    use chrono::Utc;

    fn watch(selector: &str, html: &str) -> Evidence {
        Evidence {
            id: "e".to_string(),
            metadata_id: "m".to_string(),
            href: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            public_key: "K".to_string(),
            client_time: Utc::now(),
            saving_time: Utc::now(),
            html: html.to_string(),
            size: html.len(),
            selector: selector.to_string(),
            incremental: 0,
            packet: 0,
            is_product: false,
            tag: None,
            processed: None,
            url_shape: None,
        }
    }

    #[test]
    fn full_page_collects_related_videos() {
        let html = r#"
            <ytd-app>
              <h1 class="title">Never Gonna Give You Up</h1>
              <ytd-channel-name><a href="/c/rick">Rick Astley</a></ytd-channel-name>
              <ytd-compact-video-renderer>
                <a href="/watch?v=aaa"><span id="video-title">First</span></a>
              </ytd-compact-video-renderer>
              <ytd-compact-video-renderer>
                <a href="/watch?v=bbb"><span id="video-title">Second</span></a>
              </ytd-compact-video-renderer>
            </ytd-app>"#;
        let e = watch(FULL_PAGE_SELECTOR, html);
        let doc = parse_document(html).unwrap();
        let fields = FullPage.extract(&doc, &e).unwrap().unwrap();
        assert_eq!(fields["title"], "Never Gonna Give You Up");
        assert_eq!(fields["authorName"], "Rick Astley");
        assert_eq!(fields["videoId"], "dQw4w9WgXcQ");
        assert_eq!(fields["related"][1]["videoId"], "bbb");
        assert_eq!(fields["related"][0]["title"], "First");
    }

    #[test]
    fn full_page_without_title_is_skipped() {
        let html = "<ytd-app><div>loading</div></ytd-app>";
        let doc = parse_document(html).unwrap();
        assert!(FullPage.extract(&doc, &watch(FULL_PAGE_SELECTOR, html)).unwrap().is_none());
    }

    #[test]
    fn video_ad_reads_remaining_time() {
        let html = r#"<div class="video-ads ytp-ad-module">
            <span class="ytp-ad-duration-remaining">0:15</span>
            <span class="ytp-ad-button-text">shop.example</span></div>"#;
        let doc = parse_document(html).unwrap();
        let fields = VideoAd.extract(&doc, &watch(VIDEO_AD_SELECTOR, html)).unwrap().unwrap();
        assert_eq!(fields["ads"][0]["remaining"], "0:15");
        assert_eq!(fields["ads"][0]["displayUrl"], "shop.example");
    }

    #[test]
    fn video_id_requires_v_parameter() {
        assert_eq!(video_id("/watch?v=abc&t=1").as_deref(), Some("abc"));
        assert_eq!(video_id("/watch?list=x"), None);
        assert_eq!(video_id("/channel/x"), None);
        assert_eq!(
            video_id("https://www.youtube.com/watch?list=PL1&v=abc123").as_deref(),
            Some("abc123")
        );
    }
}
