use std::cmp::Ordering;
use std::sync::OnceLock;

use serde::Serialize;

use digest_common::text::{estimate_tokens, truncate_chars, CHARS_PER_TOKEN};
use digest_common::{DigestError, DigestSettings, FetchResult, Result};

use super::parse::ResponsePayload;

/// Smallest slice of an article worth sending. Below this the article and
/// everything ranked after it are dropped.
pub const MIN_ARTICLE_TOKENS: usize = 150;

const TRUNCATION_MARKER: &str = "\n[... truncated]";

const INTRO: &str = "Analyze the articles below, collected from this period's sources. \
Cite articles by their label (A1, A2, ...).\n\n";

/// What an article label in the prompt points back to.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRef {
    pub label: String,
    pub url: String,
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub included: usize,
    pub truncated: usize,
    pub dropped: usize,
    pub estimated_tokens: usize,
    pub budget: usize,
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
    pub articles: Vec<ArticleRef>,
    pub report: BudgetReport,
}

/// Budget order: tier 1 first, then newest, undated last, then URL.
fn priority(a: &FetchResult, b: &FetchResult) -> Ordering {
    a.source_tier
        .cmp(&b.source_tier)
        .then_with(|| match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.url.cmp(&b.url))
}

fn response_schema() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::to_string_pretty(&schemars::schema_for!(ResponsePayload)).unwrap_or_default()
    })
}

pub fn system_prompt(focus: &str) -> String {
    let focus = if focus.trim().is_empty() {
        String::new()
    } else {
        format!("\nBusiness context: {}\n", focus.trim())
    };

    format!(
        r#"You are an analyst who turns industry reading into concrete, actionable recommendations for a small operations team.
{focus}
Rules:
- Only recommend what the articles support. Every recommendation must cite at least one article by label.
- Prefer specific actions over general observations. Put concrete action items in `details` as lines starting with "- ".
- impact is "low", "medium" or "high": how much acting on it would change the business.
- confidence is "verified" only when two or more independent sources agree, otherwise "estimated".
- Return at most 15 recommendations, most important first.

Respond with a single JSON object and nothing else, matching this JSON Schema:
{schema}"#,
        schema = response_schema(),
    )
}

fn coverage_note(included: usize, truncated: usize, dropped: usize) -> String {
    format!(
        "Coverage: {included} articles included ({truncated} truncated), {dropped} dropped to fit the length limit.\n"
    )
}

fn article_block(label: &str, result: &FetchResult, content: &str) -> String {
    let published = result
        .published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "### [{label}] {title}\nSource: {source} ({tier}) | Published: {published}\nURL: {url}\n\n{content}\n\n",
        title = result.title,
        source = result.source_name,
        tier = result.source_tier,
        url = result.url,
    )
}

/// Build the analysis prompt within `settings.token_budget`.
///
/// Deterministic for the same input set regardless of input order. Articles
/// are admitted in budget order; the first one that does not fit whole is
/// truncated if at least `MIN_ARTICLE_TOKENS` remain, and every article after
/// the first that cannot be admitted is dropped.
pub fn build_prompt(results: &[FetchResult], settings: &DigestSettings) -> Result<BuiltPrompt> {
    let budget = settings.token_budget;
    let system = system_prompt(&settings.focus);

    // The coverage note's counts are at most `results.len()`, so formatting it
    // with that value bounds its final size.
    let total = results.len();
    let fixed = estimate_tokens(&system)
        + estimate_tokens(INTRO)
        + estimate_tokens(&coverage_note(total, total, total));
    if fixed > budget {
        return Err(DigestError::Config(format!(
            "token budget {budget} cannot fit the prompt structure ({fixed} tokens)"
        )));
    }

    let mut ordered: Vec<&FetchResult> = results.iter().collect();
    ordered.sort_by(|a, b| priority(a, b));

    let mut remaining = budget - fixed;
    let mut blocks = String::new();
    let mut articles = Vec::new();
    let mut truncated = 0;
    let mut dropped = 0;

    for (i, result) in ordered.iter().enumerate() {
        let label = format!("A{}", articles.len() + 1);
        let content = truncate_chars(&result.content, settings.max_article_chars);
        let whole = article_block(&label, result, content);
        let whole_tokens = estimate_tokens(&whole);

        let block = if whole_tokens <= remaining {
            remaining -= whole_tokens;
            whole
        } else {
            let overhead = article_block(&label, result, "").chars().count()
                + TRUNCATION_MARKER.chars().count();
            let room_chars = (remaining * CHARS_PER_TOKEN).saturating_sub(overhead);
            if room_chars / CHARS_PER_TOKEN < MIN_ARTICLE_TOKENS {
                dropped = ordered.len() - i;
                break;
            }
            let cut = format!("{}{}", truncate_chars(content, room_chars), TRUNCATION_MARKER);
            let block = article_block(&label, result, &cut);
            remaining = remaining.saturating_sub(estimate_tokens(&block));
            truncated += 1;
            block
        };

        blocks.push_str(&block);
        articles.push(ArticleRef {
            label,
            url: result.url.clone(),
            source_name: result.source_name.clone(),
        });
    }

    let user = format!(
        "{INTRO}{blocks}{}",
        coverage_note(articles.len(), truncated, dropped)
    );
    let report = BudgetReport {
        included: articles.len(),
        truncated,
        dropped,
        estimated_tokens: estimate_tokens(&system) + estimate_tokens(&user),
        budget,
    };

    Ok(BuiltPrompt {
        system,
        user,
        articles,
        report,
    })
}
