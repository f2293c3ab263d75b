// Tolerant decoder for the model's response. Each element of the
// `recommendations` array is decoded on its own, so one bad element (or a
// response cut off mid-array) costs only that element.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use ai_client::util::strip_code_blocks;
use digest_common::text::truncate_chars;
use digest_common::{Confidence, ExtractedCitation, ExtractedRecommendation, Impact};

use super::prompt::ArticleRef;

const MAX_EXCERPT_CHARS: usize = 500;

// =============================================================================
// Response schema
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResponsePayload {
    /// Recommendations, most important first
    pub recommendations: Vec<RawRecommendation>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RawRecommendation {
    /// Topic area, e.g. "operations", "marketing", "compliance", "training"
    pub category: Option<String>,
    /// Short imperative headline
    pub title: Option<String>,
    /// One or two sentences on what to do and why
    pub summary: Option<String>,
    /// Supporting detail; action items as lines starting with "- "
    pub details: Option<String>,
    /// "low", "medium" or "high"
    pub impact: Option<String>,
    /// "verified" or "estimated"
    pub confidence: Option<String>,
    pub citations: Option<Vec<RawCitation>>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RawCitation {
    /// Article label from the prompt, e.g. "A3"
    pub article: Option<String>,
    /// URL of the cited article
    pub source_url: Option<String>,
    /// Short supporting quote
    pub excerpt: Option<String>,
}

// =============================================================================
// Candidates
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Valid(ExtractedRecommendation),
    Invalid { index: usize, reason: String },
}

/// Decode every candidate recommendation in `raw`. Garbage yields an empty
/// list, never an error.
pub fn parse_response(raw: &str, articles: &[ArticleRef]) -> Vec<Candidate> {
    payload_elements(raw)
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            let validated = element.and_then(|value| {
                serde_json::from_value::<RawRecommendation>(value)
                    .map_err(|e| format!("unexpected shape: {e}"))
                    .and_then(|rec| validate(rec, articles))
            });
            match validated {
                Ok(rec) => Candidate::Valid(rec),
                Err(reason) => Candidate::Invalid { index, reason },
            }
        })
        .collect()
}

/// Locate the `recommendations` array and split it into elements. Decoding
/// stops at the first element that is not well-formed JSON.
fn payload_elements(raw: &str) -> Vec<Result<Value, String>> {
    let text = strip_code_blocks(raw);
    let Some(start) = array_start(text) else {
        return Vec::new();
    };

    let mut elements = Vec::new();
    let mut rest = &text[start + 1..];
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() || rest.starts_with(']') {
            break;
        }
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                elements.push(Ok(value));
                rest = &rest[consumed..];
            }
            Some(Err(e)) => {
                elements.push(Err(format!("malformed element: {e}")));
                break;
            }
            None => break,
        }
    }
    elements
}

/// Byte offset of the `[` opening the recommendations array.
fn array_start(text: &str) -> Option<usize> {
    if let Some(key) = text.find("\"recommendations\"") {
        let after_key = key + "\"recommendations\"".len();
        let colon = after_key + text[after_key..].find(':')?;
        let value = &text[colon + 1..];
        let skipped = value.len() - value.trim_start().len();
        return value
            .trim_start()
            .starts_with('[')
            .then_some(colon + 1 + skipped);
    }
    // A bare array of recommendations.
    let trimmed = text.trim_start();
    trimmed
        .starts_with('[')
        .then_some(text.len() - trimmed.len())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn resolve<'a>(citation: &RawCitation, articles: &'a [ArticleRef]) -> Option<(usize, &'a ArticleRef)> {
    if let Some(label) = citation.article.as_deref() {
        let label = label.trim().trim_matches(|c: char| c == '[' || c == ']');
        if let Some(found) = articles
            .iter()
            .enumerate()
            .find(|(_, a)| a.label.eq_ignore_ascii_case(label))
        {
            return Some(found);
        }
    }
    let url = citation.source_url.as_deref()?.trim();
    articles.iter().enumerate().find(|(_, a)| a.url == url)
}

fn validate(
    raw: RawRecommendation,
    articles: &[ArticleRef],
) -> Result<ExtractedRecommendation, String> {
    let title = non_empty(raw.title).ok_or("missing title")?;
    let summary = non_empty(raw.summary).ok_or("missing summary")?;

    let mut seen = HashSet::new();
    let citations: Vec<ExtractedCitation> = raw
        .citations
        .unwrap_or_default()
        .iter()
        .filter_map(|c| {
            let (idx, article) = resolve(c, articles)?;
            seen.insert(idx).then(|| ExtractedCitation {
                source_name: article.source_name.clone(),
                source_url: article.url.clone(),
                excerpt: truncate_chars(c.excerpt.as_deref().unwrap_or("").trim(), MAX_EXCERPT_CHARS)
                    .to_string(),
            })
        })
        .collect();

    let distinct_sources = citations
        .iter()
        .map(|c| c.source_name.as_str())
        .collect::<HashSet<_>>()
        .len();
    let corroborated = distinct_sources >= 2;

    let impact = raw
        .impact
        .as_deref()
        .and_then(|s| s.parse::<Impact>().ok())
        .unwrap_or(Impact::Medium);

    let confidence = match raw.confidence.as_deref().and_then(|s| s.parse::<Confidence>().ok()) {
        Some(Confidence::Verified) if !corroborated => Confidence::Estimated,
        Some(c) => c,
        None if corroborated => Confidence::Verified,
        None => Confidence::Estimated,
    };

    Ok(ExtractedRecommendation {
        category: non_empty(raw.category)
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| "general".to_string()),
        title,
        summary,
        details: non_empty(raw.details).unwrap_or_default(),
        impact,
        confidence,
        citations,
    })
}
