// src/evaluate/mod.rs
//! Evaluation Filter: score each new listing once against the user's
//! criteria, keep those with `score >= cutoff`, in input order.
//!
//! Scorer failures never abort a run; the filter substitutes a neutral 0.5
//! and counts the fallback.

pub mod openai;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::crawl::types::Listing;
use crate::error::{ConfigError, ScorerError};

pub const NEUTRAL_SCORE: f32 = 0.5;
/// Scorer calls in flight per run unless configured otherwise.
pub const DEFAULT_SCORER_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f32,
    pub reasoning: String,
    pub feature_assessment: String,
    pub quality_assessment: String,
}

impl EvaluationResult {
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self {
            score: NEUTRAL_SCORE,
            reasoning: reasoning.into(),
            feature_assessment: "Unknown".into(),
            quality_assessment: "Unknown".into(),
        }
    }
}

/// A listing that cleared the threshold, with its evaluation attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub listing: Listing,
    pub evaluation: EvaluationResult,
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, listing: &Listing, criteria: &str) -> Result<EvaluationResult, ScorerError>;
    fn name(&self) -> &'static str;
}

/// Turns a natural-language request into search keywords. Must fall back to
/// the input on failure; it never fails a run.
#[async_trait]
pub trait QueryRefiner: Send + Sync {
    async fn refine(&self, query: &str) -> String;
}

/// Uses the query as typed.
pub struct Passthrough;

#[async_trait]
impl QueryRefiner for Passthrough {
    async fn refine(&self, query: &str) -> String {
        query.to_string()
    }
}

// ---------------- thresholds ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLevel {
    LessStrict,
    #[default]
    Strict,
    VeryStrict,
}

impl ThresholdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdLevel::LessStrict => "less_strict",
            ThresholdLevel::Strict => "strict",
            ThresholdLevel::VeryStrict => "very_strict",
        }
    }
}

impl FromStr for ThresholdLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "less_strict" | "lenient" => Ok(ThresholdLevel::LessStrict),
            "strict" | "standard" => Ok(ThresholdLevel::Strict),
            "very_strict" => Ok(ThresholdLevel::VeryStrict),
            other => Err(ConfigError::UnknownThreshold(other.to_string())),
        }
    }
}

/// Named level → numeric cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTable {
    pub less_strict: f32,
    pub strict: f32,
    pub very_strict: f32,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            less_strict: 0.50,
            strict: 0.70,
            very_strict: 0.85,
        }
    }
}

impl ThresholdTable {
    pub fn cutoff(&self, level: ThresholdLevel) -> f32 {
        match level {
            ThresholdLevel::LessStrict => self.less_strict,
            ThresholdLevel::Strict => self.strict,
            ThresholdLevel::VeryStrict => self.very_strict,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (level, value) in [
            (ThresholdLevel::LessStrict, self.less_strict),
            (ThresholdLevel::Strict, self.strict),
            (ThresholdLevel::VeryStrict, self.very_strict),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange {
                    name: level.as_str().to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

// ---------------- filter ----------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// Listings with `score >= cutoff`, input order.
    pub matches: Vec<Match>,
    /// Listings the scorer was invoked for.
    pub evaluated: usize,
    /// Evaluations replaced by the neutral fallback.
    pub fallbacks: usize,
    pub cancelled: bool,
}

pub struct EvaluationFilter {
    scorer: Arc<dyn Scorer>,
    max_concurrency: usize,
}

impl EvaluationFilter {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            scorer,
            max_concurrency: DEFAULT_SCORER_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// At most `max_concurrency` scores run at once; the result is put back in
    /// input order. On cancellation, whatever finished before the signal is kept.
    pub async fn filter(
        &self,
        listings: &[Listing],
        criteria: &str,
        cutoff: f32,
        cancel: &CancellationToken,
    ) -> FilterOutcome {
        let mut out = FilterOutcome::default();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for (idx, listing) in listings.iter().cloned().enumerate() {
            let scorer = self.scorer.clone();
            let criteria = criteria.to_string();
            let permits = permits.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let r = scorer.score(&listing, &criteria).await;
                (idx, listing, r)
            });
        }

        let mut scored: Vec<(usize, Match)> = Vec::with_capacity(listings.len());
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    out.cancelled = true;
                    tasks.abort_all();
                    break;
                }
                next = tasks.join_next() => next,
            };
            let (idx, listing, result) = match next {
                None => break,
                Some(Ok(done)) => done,
                Some(Err(join_err)) => {
                    tracing::warn!(target: "evaluate", error = %join_err, "scorer task failed");
                    continue;
                }
            };
            out.evaluated += 1;
            let evaluation = match result {
                Ok(mut e) => {
                    e.score = e.score.clamp(0.0, 1.0);
                    e
                }
                Err(err) => {
                    tracing::warn!(
                        target: "evaluate",
                        scorer = self.scorer.name(),
                        id = %listing.identity,
                        error = %err,
                        "scorer failed, using neutral score"
                    );
                    counter!("evaluate_scorer_fallbacks_total").increment(1);
                    out.fallbacks += 1;
                    EvaluationResult::neutral(format!("Evaluation error: {err}"))
                }
            };
            tracing::debug!(target: "evaluate", id = %listing.identity, score = evaluation.score, "scored");
            if evaluation.score >= cutoff {
                scored.push((idx, Match { listing, evaluation }));
            }
        }

        scored.sort_by_key(|(idx, _)| *idx);
        out.matches = scored.into_iter().map(|(_, m)| m).collect();
        counter!("evaluate_matches_total").increment(out.matches.len() as u64);
        out
    }
}

/// Explicit best-first ordering for callers that want it.
pub fn rank_by_score(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        b.evaluation
            .score
            .partial_cmp(&a.evaluation.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ---------------- test double ----------------

/// Scripted scorer: fixed score per identity, `default` otherwise. Identities
/// listed in `failing` return a transport error.
#[derive(Debug, Default)]
pub struct MockScorer {
    scores: std::collections::HashMap<String, f32>,
    failing: std::collections::HashSet<String>,
    default: f32,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockScorer {
    pub fn new(default: f32) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn with_score(mut self, identity: impl Into<String>, score: f32) -> Self {
        self.scores.insert(identity.into(), score);
        self
    }

    pub fn failing_for(mut self, identity: impl Into<String>) -> Self {
        self.failing.insert(identity.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn score(&self, listing: &Listing, _criteria: &str) -> Result<EvaluationResult, ScorerError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.failing.contains(&listing.identity) {
            return Err(ScorerError::Transport("mock failure".into()));
        }
        let score = self.scores.get(&listing.identity).copied().unwrap_or(self.default);
        Ok(EvaluationResult {
            score,
            reasoning: format!("mock score {score:.2}"),
            feature_assessment: "mock".into(),
            quality_assessment: "mock".into(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
