use std::time::Duration;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base::PageFetcher;
use crate::utils::{clean_text, truncate_chars};

pub const TRUNCATION_MARKER: &str = "...";

static NOISE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "script, style, noscript, nav, footer, header, aside, iframe, \
         .advertisement, .ad, .ads, .cookie, .cookie-banner, .popup, #cookie-notice",
    )
    .expect("noise selector")
});

static MAIN_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "main",
        "[role=\"main\"]",
        ".main-content",
        ".content",
        ".event-content",
        ".event-details",
        ".event-info",
        "article",
        ".post-content",
        ".entry-content",
    ]
    .iter()
    .map(|css| Selector::parse(css).expect("main content selector"))
    .collect()
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body"));

/// Reduces an HTML document to whitespace-collapsed text of its main content region.
pub fn extract_text(html: &str, char_budget: usize) -> String {
    let document = Html::parse_document(html);

    let region_text = MAIN_SELECTORS.iter().find_map(|selector| {
        document
            .select(selector)
            .map(visible_text)
            .find(|text| !text.is_empty())
    });

    let text = region_text.unwrap_or_else(|| {
        document
            .select(&BODY_SELECTOR)
            .next()
            .map(visible_text)
            .unwrap_or_else(|| visible_text(document.root_element()))
    });

    truncate_chars(&text, char_budget, TRUNCATION_MARKER)
}

/// Text under `root`, skipping anything nested in scripts, navigation, ads or banners.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .take_while(|ancestor| ancestor.id() != root.id())
            .filter_map(ElementRef::wrap)
            .any(|element| NOISE_SELECTOR.matches(&element));
        if !hidden {
            parts.push(text);
        }
    }
    clean_text(&parts.join(" "))
}

/// Fetches `url` and returns its bounded text payload; `None` on any fetch failure.
pub async fn fetch_page_text(
    fetcher: &dyn PageFetcher,
    url: &str,
    timeout: Duration,
    char_budget: usize,
) -> Option<String> {
    match fetcher.get(url, timeout).await {
        Ok(html) => {
            let text = extract_text(&html, char_budget);
            if text.is_empty() {
                tracing::warn!(%url, "page has no readable text");
                None
            } else {
                Some(text)
            }
        }
        Err(err) => {
            tracing::warn!(%url, "page fetch failed: {err}");
            None
        }
    }
}
