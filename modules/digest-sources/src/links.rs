use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid href regex"))
}

/// Extract links from raw HTML whose resolved URL contains `pattern`.
/// Relative URLs are resolved against `base_url`; fragments are stripped;
/// results are deduplicated, in page order, capped at `limit`.
pub fn extract_links_by_pattern(
    html: &str,
    base_url: &str,
    pattern: &str,
    limit: usize,
) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in href_re().captures_iter(html) {
        let raw = &cap[1];
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            url::Url::parse(raw).ok()
        } else if let Some(ref b) = base {
            b.join(raw).ok()
        } else {
            None
        };
        let Some(mut resolved) = resolved else {
            continue;
        };
        resolved.set_fragment(None);
        let resolved = resolved.to_string();

        if resolved.contains(pattern) && seen.insert(resolved.clone()) {
            links.push(resolved);
            if links.len() >= limit {
                break;
            }
        }
    }

    links
}
