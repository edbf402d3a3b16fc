// =============================================================================
// Smart Filters — metadata acceptance checks for newly created tokens
// =============================================================================
//
// Each filter is individually gated by a feature flag in RuntimeConfig.
// Disabled filters are not part of the pipeline at all.
//
// Filters:
//   - Twitter:  metadata carries a twitter handle, or a website on twitter/x.com
//   - Website:  metadata carries a plausible website URL
//
// Every enabled filter runs; the verdict lists all that rejected the token.
// A token whose metadata could not be fetched is rejected as `NoMetadata`.
// =============================================================================

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime_config::RuntimeConfig;

/// Reported when metadata is missing entirely.
pub const NO_METADATA: &str = "NoMetadata";

/// Off-chain token metadata served from the token URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub show_name: bool,
    #[serde(default)]
    pub created_on: String,
    #[serde(default)]
    pub twitter: String,
    #[serde(default)]
    pub website: String,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

pub trait TokenFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `true` if the token is acceptable.
    fn passes(&self, metadata: &TokenMetadata) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TwitterFilter;

impl TokenFilter for TwitterFilter {
    fn name(&self) -> &'static str {
        "TwitterFilter"
    }

    fn passes(&self, metadata: &TokenMetadata) -> bool {
        if !metadata.twitter.trim().is_empty() {
            return true;
        }
        let website = metadata.website.to_lowercase();
        !website.is_empty() && (website.contains("twitter") || website.contains("x.com"))
    }
}

/// Substrings that mark a placeholder rather than a real site.
const INVALID_WEBSITE_PATTERNS: [&str; 8] = [
    "javascript:",
    "#",
    "about:blank",
    "mailto:",
    "tel:",
    "file:",
    "undefined",
    "null",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct WebsiteFilter;

impl TokenFilter for WebsiteFilter {
    fn name(&self) -> &'static str {
        "WebsiteFilter"
    }

    fn passes(&self, metadata: &TokenMetadata) -> bool {
        let website = metadata.website.trim().to_lowercase();
        if website.is_empty() {
            return false;
        }
        if INVALID_WEBSITE_PATTERNS.iter().any(|p| website.contains(p)) {
            return false;
        }
        website.contains('.')
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterVerdict {
    pub passed: bool,
    pub rejected_by: Vec<String>,
}

pub struct FilterPipeline {
    filters: Vec<Box<dyn TokenFilter>>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn TokenFilter>>) -> Self {
        Self { filters }
    }

    /// Pipeline with the filters enabled in `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut filters: Vec<Box<dyn TokenFilter>> = Vec::new();
        if config.enable_twitter_filter {
            filters.push(Box::new(TwitterFilter));
        }
        if config.enable_website_filter {
            filters.push(Box::new(WebsiteFilter));
        }
        Self::new(filters)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn evaluate(&self, metadata: Option<&TokenMetadata>) -> FilterVerdict {
        let Some(metadata) = metadata else {
            return FilterVerdict {
                passed: false,
                rejected_by: vec![NO_METADATA.to_string()],
            };
        };

        let rejected_by: Vec<String> = self
            .filters
            .iter()
            .filter(|f| {
                let ok = f.passes(metadata);
                debug!(filter = f.name(), passed = ok, "filter evaluated");
                !ok
            })
            .map(|f| f.name().to_string())
            .collect();

        FilterVerdict {
            passed: rejected_by.is_empty(),
            rejected_by,
        }
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Metadata source
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, uri: &str) -> anyhow::Result<TokenMetadata>;
}

/// Fetches metadata JSON over HTTP(S), typically from IPFS gateways.
#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build metadata client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, uri: &str) -> anyhow::Result<TokenMetadata> {
        let metadata = self
            .client
            .get(uri)
            .send()
            .await
            .with_context(|| format!("metadata request to {uri} failed"))?
            .error_for_status()?
            .json::<TokenMetadata>()
            .await
            .context("metadata is not valid JSON")?;
        Ok(metadata)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(twitter: &str, website: &str) -> TokenMetadata {
        TokenMetadata {
            name: "Bee".into(),
            symbol: "BEE".into(),
            twitter: twitter.into(),
            website: website.into(),
            ..Default::default()
        }
    }

    #[test]
    fn twitter_filter_accepts_handle_or_twitter_site() {
        assert!(TwitterFilter.passes(&meta("https://x.com/bee", "")));
        assert!(TwitterFilter.passes(&meta("", "https://twitter.com/bee")));
        assert!(TwitterFilter.passes(&meta("", "https://X.com/bee")));
        assert!(!TwitterFilter.passes(&meta("", "https://bee.io")));
        assert!(!TwitterFilter.passes(&meta("", "")));
    }

    #[test]
    fn website_filter_rejects_placeholders() {
        assert!(WebsiteFilter.passes(&meta("", "https://bee.io")));
        assert!(!WebsiteFilter.passes(&meta("", "")));
        assert!(!WebsiteFilter.passes(&meta("", "javascript:void(0)")));
        assert!(!WebsiteFilter.passes(&meta("", "https://bee.io/#home")));
        assert!(!WebsiteFilter.passes(&meta("", "undefined")));
        assert!(!WebsiteFilter.passes(&meta("", "localhost")));
    }

    #[test]
    fn pipeline_collects_every_rejection() {
        let pipeline = FilterPipeline::from_config(&RuntimeConfig::default());
        let verdict = pipeline.evaluate(Some(&meta("", "")));
        assert!(!verdict.passed);
        assert_eq!(verdict.rejected_by, vec!["TwitterFilter", "WebsiteFilter"]);

        let verdict = pipeline.evaluate(Some(&meta("@bee", "https://bee.io")));
        assert!(verdict.passed);
        assert!(verdict.rejected_by.is_empty());
    }

    #[test]
    fn missing_metadata_is_rejected() {
        let pipeline = FilterPipeline::new(Vec::new());
        let verdict = pipeline.evaluate(None);
        assert_eq!(verdict.rejected_by, vec![NO_METADATA.to_string()]);
    }

    #[test]
    fn disabled_filters_are_skipped() {
        let mut config = RuntimeConfig::default();
        config.enable_twitter_filter = false;
        let pipeline = FilterPipeline::from_config(&config);
        assert_eq!(pipeline.names(), vec!["WebsiteFilter"]);
        assert!(pipeline.evaluate(Some(&meta("", "https://bee.io"))).passed);
    }

    #[test]
    fn metadata_parses_pump_fun_json() {
        let json = r#"{"name":"Bee","symbol":"BEE","description":"buzz","image":"ipfs://x",
            "showName":true,"createdOn":"https://pump.fun","twitter":"https://x.com/bee"}"#;
        let m: TokenMetadata = serde_json::from_str(json).unwrap();
        assert!(m.show_name);
        assert_eq!(m.created_on, "https://pump.fun");
        assert!(m.website.is_empty());
    }
}
