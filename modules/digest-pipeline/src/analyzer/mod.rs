//! Budget-aware analysis: one model call per run over the joined article set.

pub mod parse;
pub mod prompt;

pub use parse::{parse_response, Candidate};
pub use prompt::{build_prompt, ArticleRef, BudgetReport, BuiltPrompt, MIN_ARTICLE_TOKENS};

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use ai_client::{CompletionModel, CompletionRequest, TokenUsage};
use digest_common::{DigestError, DigestSettings, ExtractedRecommendation, FetchResult, Result};

/// Upper bound on recommendations kept from one response.
pub const MAX_RECOMMENDATIONS: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub recommendations: Vec<ExtractedRecommendation>,
    /// Candidates discarded by the decoder.
    pub rejected: usize,
    pub report: BudgetReport,
    pub usage: Option<TokenUsage>,
}

pub struct Analyzer {
    model: Arc<dyn CompletionModel>,
    settings: DigestSettings,
}

impl Analyzer {
    pub fn new(model: Arc<dyn CompletionModel>, settings: DigestSettings) -> Self {
        Self { model, settings }
    }

    /// Build the prompt, call the model once, and decode what it returns.
    /// Model and budget failures are errors; a useless response is not.
    pub async fn analyze(&self, digest_id: Uuid, results: &[FetchResult]) -> Result<Analysis> {
        if results.is_empty() {
            info!(digest_id = %digest_id, "No articles to analyze, skipping model call");
            return Ok(Analysis::default());
        }

        let prompt = build_prompt(results, &self.settings)?;
        info!(
            digest_id = %digest_id,
            included = prompt.report.included,
            truncated = prompt.report.truncated,
            dropped = prompt.report.dropped,
            estimated_tokens = prompt.report.estimated_tokens,
            budget = prompt.report.budget,
            "Analysis prompt built"
        );

        let request = CompletionRequest::new(prompt.system, prompt.user)
            .max_tokens(self.settings.max_output_tokens);
        let completion = tokio::time::timeout(self.settings.model_timeout, self.model.complete(request))
            .await
            .map_err(|_| {
                DigestError::Model(format!(
                    "model call timed out after {}s",
                    self.settings.model_timeout.as_secs()
                ))
            })?
            .map_err(|e| DigestError::Model(format!("{e:#}")))?;

        if let Some(usage) = completion.usage {
            info!(
                digest_id = %digest_id,
                model = self.model.model_name(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Model usage"
            );
        }
        if completion.truncated() {
            warn!(digest_id = %digest_id, "Model response hit the output limit");
        }

        let mut recommendations = Vec::new();
        let mut rejected = 0;
        for candidate in parse_response(&completion.text, &prompt.articles) {
            match candidate {
                Candidate::Valid(rec) => recommendations.push(rec),
                Candidate::Invalid { index, reason } => {
                    rejected += 1;
                    warn!(digest_id = %digest_id, index, reason = reason.as_str(), "Recommendation rejected");
                }
            }
        }

        if recommendations.len() > MAX_RECOMMENDATIONS {
            warn!(
                digest_id = %digest_id,
                extracted = recommendations.len(),
                kept = MAX_RECOMMENDATIONS,
                "Too many recommendations, keeping the first"
            );
            recommendations.truncate(MAX_RECOMMENDATIONS);
        }

        Ok(Analysis {
            recommendations,
            rejected,
            report: prompt.report,
            usage: completion.usage,
        })
    }
}
