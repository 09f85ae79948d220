// src/evaluate/openai.rs
//! OpenAI chat-completions adapter: listing scorer and query refiner.
//!
//! The model is asked for a JSON object; anything it wraps around that object
//! is ignored. Transport errors, non-2xx responses and unparsable output come
//! back as `ScorerError`, which the filter turns into a neutral score.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{EvaluationResult, MockScorer, Passthrough, QueryRefiner, Scorer};
use crate::config::ai::AiConfig;
use crate::crawl::types::Listing;
use crate::error::ScorerError;

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DESCRIPTION_CHARS: usize = 1000;

/// Factory: build a scorer according to config and environment variables.
///
/// * `AI_TEST_MODE=mock` → deterministic mock scorer (0.75 for everything).
/// * `enabled == false` → `DisabledScorer`.
/// * otherwise the OpenAI scorer.
pub fn build_scorer(config: &AiConfig) -> anyhow::Result<Arc<dyn Scorer>> {
    if mock_mode() {
        return Ok(Arc::new(MockScorer::new(0.75)));
    }
    if !config.enabled {
        return Ok(Arc::new(DisabledScorer));
    }
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiScorer::new(&config.api_key, &config.model)?)),
        other => anyhow::bail!("Unsupported provider in config: {other}"),
    }
}

/// Refinement is skipped (passthrough) in mock mode, when AI is disabled, or
/// when `refine_queries` is off.
pub fn build_refiner(config: &AiConfig) -> anyhow::Result<Arc<dyn QueryRefiner>> {
    if mock_mode() || !config.enabled || !config.refine_queries {
        return Ok(Arc::new(Passthrough));
    }
    Ok(Arc::new(OpenAiRefiner::new(&config.api_key, &config.model)?))
}

fn mock_mode() -> bool {
    std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
}

/// Every listing gets the neutral score; used when no model is configured.
pub struct DisabledScorer;

#[async_trait]
impl Scorer for DisabledScorer {
    async fn score(&self, _listing: &Listing, _criteria: &str) -> Result<EvaluationResult, ScorerError> {
        Ok(EvaluationResult::neutral("LLM evaluation unavailable"))
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Chat client
// ------------------------------------------------------------

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}
#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl ChatClient {
    fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("listing-sentinel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building OpenAI HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: CHAT_URL.to_string(),
        })
    }

    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String, ScorerError> {
        if self.api_key.is_empty() {
            return Err(ScorerError::Unavailable);
        }
        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ScorerError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScorerError::Transport(format!("status {status}")));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ScorerError::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ScorerError::Malformed("no choices".into()))
    }
}

// ------------------------------------------------------------
// Scorer
// ------------------------------------------------------------

pub struct OpenAiScorer {
    chat: ChatClient,
}

impl OpenAiScorer {
    pub fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        Ok(Self {
            chat: ChatClient::new(api_key, model)?,
        })
    }

    /// Point at a compatible endpoint instead of api.openai.com.
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.chat.endpoint = url.into();
        self
    }
}

#[async_trait]
impl Scorer for OpenAiScorer {
    async fn score(&self, listing: &Listing, criteria: &str) -> Result<EvaluationResult, ScorerError> {
        let prompt = evaluation_prompt(listing, criteria);
        let text = self.chat.complete(&prompt, 0.7, 300).await?;
        parse_evaluation(&text)
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

pub fn evaluation_prompt(listing: &Listing, criteria: &str) -> String {
    let description: String = listing.description.chars().take(DESCRIPTION_CHARS).collect();
    format!(
        r#"You are a professional item appraiser and expert buyer. Compare a classified ad against a buyer's requirements and assess the listing's quality.

LISTING TO EVALUATE:
Title: {title}
Price: {price}
Description: {description}

BUYER'S REQUIREMENTS:
{criteria}

SCORING:
- 0.9-1.0: exactly what the buyer wants
- 0.7-0.89: right product, minor differences (close sizes count as a good match)
- 0.5-0.69: related product, notable differences
- 0.0-0.49: barely related or not what the buyer wants
Use the full range. Consider size, brand/model, condition, missing specifications and price.

Return only this JSON object:
{{
  "match_score": <float 0.0-1.0>,
  "reasoning": "<1-2 sentences, max 50 words>",
  "feature_match": "<how well the features match>",
  "quality_assessment": "<listing quality and authenticity>"
}}"#,
        title = listing.title,
        price = listing.price,
    )
}

/// JSON between the first `{` and the last `}`. Missing text fields become
/// "Unknown"; the score is clamped to [0, 1] and may be a number or a string.
pub fn parse_evaluation(text: &str) -> Result<EvaluationResult, ScorerError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(ScorerError::Malformed("no JSON object in response".into()));
    };
    if end < start {
        return Err(ScorerError::Malformed("no JSON object in response".into()));
    }
    let v: Value =
        serde_json::from_str(&text[start..=end]).map_err(|e| ScorerError::Malformed(e.to_string()))?;

    let score = match v.get("match_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ScorerError::Malformed("missing match_score".into()))?;

    let field = |k: &str| {
        v.get(k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    };

    Ok(EvaluationResult {
        score: (score as f32).clamp(0.0, 1.0),
        reasoning: field("reasoning"),
        feature_assessment: field("feature_match"),
        quality_assessment: field("quality_assessment"),
    })
}

// ------------------------------------------------------------
// Refiner
// ------------------------------------------------------------

pub struct OpenAiRefiner {
    chat: ChatClient,
}

impl OpenAiRefiner {
    pub fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        Ok(Self {
            chat: ChatClient::new(api_key, model)?,
        })
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.chat.endpoint = url.into();
        self
    }
}

#[async_trait]
impl QueryRefiner for OpenAiRefiner {
    async fn refine(&self, query: &str) -> String {
        let prompt = format!(
            r#"You are a Craigslist search optimizer. Extract the 3-5 keywords that identify the specific product, brand and model in this request. Drop sizes, conditions, colors, locations and other qualifiers.

Request: "{query}"

Examples:
- "54cm frame road bike with components comparable to Shimano 105's" -> road bike shimano 105
- "macbook pro 13 inch 2020 model in excellent condition" -> macbook pro 13

Return only the keywords on one line."#
        );
        match self.chat.complete(&prompt, 0.1, 50).await {
            Ok(text) => {
                let keywords = sanitize_keywords(&text);
                if keywords.is_empty() {
                    query.to_string()
                } else {
                    tracing::debug!(target: "evaluate", %query, %keywords, "query refined");
                    keywords
                }
            }
            Err(e) => {
                tracing::warn!(target: "evaluate", error = %e, "query refinement failed, using original query");
                query.to_string()
            }
        }
    }
}

/// First line, quotes stripped, whitespace collapsed.
fn sanitize_keywords(s: &str) -> String {
    let line = s.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let text = "Sure! Here you go:\n```json\n{\"match_score\": 0.82, \"reasoning\": \"Close size.\", \"feature_match\": \"56cm vs 54cm\", \"quality_assessment\": \"Looks legit\"}\n```";
        let e = parse_evaluation(text).unwrap();
        assert!((e.score - 0.82).abs() < 1e-6);
        assert_eq!(e.reasoning, "Close size.");
        assert_eq!(e.feature_assessment, "56cm vs 54cm");
    }

    #[test]
    fn missing_fields_become_unknown_and_score_is_clamped() {
        let e = parse_evaluation(r#"{"match_score": "1.7"}"#).unwrap();
        assert_eq!(e.score, 1.0);
        assert_eq!(e.reasoning, "Unknown");
        assert_eq!(e.quality_assessment, "Unknown");
    }

    #[test]
    fn unparsable_output_is_malformed() {
        assert!(matches!(parse_evaluation("I think it's great"), Err(ScorerError::Malformed(_))));
        assert!(matches!(parse_evaluation("} oops {"), Err(ScorerError::Malformed(_))));
        assert!(matches!(
            parse_evaluation(r#"{"reasoning": "no score"}"#),
            Err(ScorerError::Malformed(_))
        ));
    }

    #[test]
    fn prompt_truncates_description() {
        let listing = Listing {
            identity: "cl:1".into(),
            url: "u".into(),
            title: "Road bike".into(),
            description: "x".repeat(5000),
            price: "$300".into(),
            location_zip: None,
        };
        let p = evaluation_prompt(&listing, "54cm road bike");
        assert!(p.contains(&"x".repeat(DESCRIPTION_CHARS)));
        assert!(!p.contains(&"x".repeat(DESCRIPTION_CHARS + 1)));
        assert!(p.contains("54cm road bike"));
    }

    #[test]
    fn keywords_are_cleaned() {
        assert_eq!(sanitize_keywords("\"road  bike shimano 105\"\nextra"), "road bike shimano 105");
        assert_eq!(sanitize_keywords("   "), "");
    }

    #[tokio::test]
    async fn empty_key_means_unavailable() {
        let s = OpenAiScorer::new("", "gpt-4o-mini").unwrap();
        let l = Listing {
            identity: "cl:1".into(),
            url: "u".into(),
            title: "t".into(),
            description: "d".into(),
            price: "$1".into(),
            location_zip: None,
        };
        assert!(matches!(s.score(&l, "c").await, Err(ScorerError::Unavailable)));
    }

    #[test]
    #[serial]
    fn factory_respects_mock_and_disabled() {
        std::env::remove_var("AI_TEST_MODE");
        let off = build_scorer(&AiConfig::default()).unwrap();
        assert_eq!(off.name(), "disabled");

        std::env::set_var("AI_TEST_MODE", "mock");
        let mock = build_scorer(&AiConfig::default()).unwrap();
        std::env::remove_var("AI_TEST_MODE");
        assert_eq!(mock.name(), "mock");
    }
}
