// HTML → markdown via spider_transformations.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use digest_common::text::normalize_whitespace;

/// Convert a full HTML page into markdown, keeping only the main content.
pub(crate) fn html_to_markdown(html: &[u8], url: Option<&str>) -> String {
    transform(html, url, true)
}

/// Convert an HTML fragment (a feed entry body) into markdown without
/// Readability's main-content heuristics, which would discard short snippets.
pub(crate) fn fragment_to_text(html: &str) -> String {
    if !html.contains('<') {
        return normalize_whitespace(html);
    }
    transform(html.as_bytes(), None, false)
}

fn transform(html: &[u8], url: Option<&str>, readability: bool) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability,
        main_content: readability,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    normalize_whitespace(&transform_content_input(input, &config))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"))
}

fn published_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta[^>]+(?:property|name)\s*=\s*["'](?:article:published_time|og:published_time|date|pubdate)["'][^>]*content\s*=\s*["']([^"']+)["']"#,
        )
        .expect("valid published-time regex")
    })
}

/// The document `<title>`, whitespace-collapsed with common entities decoded.
pub(crate) fn extract_title(html: &str) -> Option<String> {
    let raw = title_re().captures(html)?.get(1)?.as_str();
    let title = decode_entities(&normalize_whitespace(raw));
    (!title.is_empty()).then_some(title)
}

/// Publication time from `article:published_time` style meta tags.
pub(crate) fn extract_published_at(html: &str) -> Option<DateTime<Utc>> {
    let raw = published_re().captures(html)?.get(1)?.as_str();
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
}
