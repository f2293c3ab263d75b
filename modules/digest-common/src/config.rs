use std::env;
use std::time::Duration;

use tracing::info;
use typed_builder::TypedBuilder;

use crate::error::{DigestError, Result};
use crate::types::Impact;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Tunables for one digest run. Built from the environment by `Config`, or
/// directly in tests.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DigestSettings {
    #[builder(default = true)]
    pub enabled: bool,
    /// Unforced runs only start on this day of the month (UTC).
    #[builder(default = 1)]
    pub day_of_month: u32,
    /// Input-token budget for the whole analysis prompt.
    #[builder(default = 60_000)]
    pub token_budget: usize,
    #[builder(default = 8_192)]
    pub max_output_tokens: u32,
    /// Per-article content cap applied before budgeting.
    #[builder(default = 6_000)]
    pub max_article_chars: usize,
    /// Business context injected into the system prompt.
    #[builder(default, setter(into))]
    pub focus: String,
    #[builder(default = 4)]
    pub fetch_concurrency: usize,
    #[builder(default = Duration::from_secs(30))]
    pub fetch_timeout: Duration,
    #[builder(default = Duration::from_secs(180))]
    pub model_timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub delivery_timeout: Duration,
    /// Recommendations below this impact produce no drafts.
    #[builder(default = Impact::Medium)]
    pub min_impact: Impact,
    #[builder(default, setter(strip_option, into))]
    pub docs_folder_id: Option<String>,
    /// Relay channel for the summary message. Unset means no message.
    #[builder(default, setter(strip_option, into))]
    pub relay_channel_id: Option<String>,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    // Model provider
    pub anthropic_api_key: String,
    pub model: String,

    pub settings: DigestSettings,
    /// How often the binary re-checks whether a run is due.
    pub trigger_interval: Duration,

    // Collaborators
    pub docs_export_url: Option<String>,
    pub relay_webhook_url: Option<String>,
    pub tasks_api_url: Option<String>,
    pub templates_api_url: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&lookup);

        let day_of_month: u32 = vars.parsed("DIGEST_DAY_OF_MONTH", 1)?;
        if !(1..=28).contains(&day_of_month) {
            return Err(DigestError::Config(format!(
                "DIGEST_DAY_OF_MONTH must be between 1 and 28, got {day_of_month}"
            )));
        }

        let fetch_concurrency: usize = vars.parsed("DIGEST_FETCH_CONCURRENCY", 4)?;
        if fetch_concurrency == 0 {
            return Err(DigestError::Config(
                "DIGEST_FETCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let trigger_mins: u64 = vars.parsed("DIGEST_TRIGGER_INTERVAL_MINS", 60)?;
        let trigger_interval = match trigger_mins.checked_mul(60) {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(DigestError::Config(format!(
                    "DIGEST_TRIGGER_INTERVAL_MINS must be a positive number of minutes, got {trigger_mins}"
                )))
            }
        };

        let min_impact = match vars.optional("DIGEST_MIN_IMPACT") {
            Some(raw) => raw
                .parse::<Impact>()
                .map_err(|e| DigestError::Config(format!("DIGEST_MIN_IMPACT: {e}")))?,
            None => Impact::Medium,
        };

        let settings = DigestSettings {
            enabled: vars.parsed("DIGEST_ENABLED", true)?,
            day_of_month,
            token_budget: vars.parsed("DIGEST_TOKEN_BUDGET", 60_000)?,
            max_output_tokens: vars.parsed("DIGEST_MAX_OUTPUT_TOKENS", 8_192)?,
            max_article_chars: vars.parsed("DIGEST_MAX_ARTICLE_CHARS", 6_000)?,
            focus: vars.optional("DIGEST_FOCUS").unwrap_or_default(),
            fetch_concurrency,
            fetch_timeout: Duration::from_secs(vars.parsed("DIGEST_FETCH_TIMEOUT_SECS", 30)?),
            model_timeout: Duration::from_secs(vars.parsed("DIGEST_MODEL_TIMEOUT_SECS", 180)?),
            delivery_timeout: Duration::from_secs(
                vars.parsed("DIGEST_DELIVERY_TIMEOUT_SECS", 60)?,
            ),
            min_impact,
            docs_folder_id: vars.optional("DOCS_FOLDER_ID"),
            relay_channel_id: vars.optional("RELAY_CHANNEL_ID"),
        };

        Ok(Self {
            database_url: vars.required("DATABASE_URL")?,
            anthropic_api_key: vars.required("ANTHROPIC_API_KEY")?,
            model: vars
                .optional("DIGEST_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            settings,
            trigger_interval,
            docs_export_url: vars.optional("DOCS_EXPORT_URL"),
            relay_webhook_url: vars.optional("RELAY_WEBHOOK_URL"),
            tasks_api_url: vars.optional("TASKS_API_URL"),
            templates_api_url: vars.optional("TEMPLATES_API_URL"),
            api_host: vars
                .optional("API_HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: vars.parsed("API_PORT", 3000)?,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            database_url = %redact_url(&self.database_url),
            anthropic_api_key = %redact(&self.anthropic_api_key),
            model = %self.model,
            enabled = self.settings.enabled,
            day_of_month = self.settings.day_of_month,
            token_budget = self.settings.token_budget,
            fetch_concurrency = self.settings.fetch_concurrency,
            min_impact = %self.settings.min_impact,
            docs_export = self.docs_export_url.is_some(),
            relay = self.relay_webhook_url.is_some(),
            relay_channel = ?self.settings.relay_channel_id,
            tasks_api = self.tasks_api_url.is_some(),
            templates_api = self.templates_api_url.is_some(),
            "Digest configuration loaded"
        );
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| DigestError::Config(format!("{key} environment variable is required")))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| DigestError::Config(format!("{key} has an invalid value: {raw}"))),
            None => Ok(default),
        }
    }
}

fn redact(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "****".to_string(),
    }
}
