// src/notify/mod.rs
//! Outbound delivery of matches. Delivery never gates seen-set persistence;
//! the pipeline only records the result in the report.

pub mod discord;

use async_trait::async_trait;
use std::sync::Mutex;

use crate::evaluate::Match;

pub use discord::DiscordNotifier;

#[derive(Debug, Clone)]
pub struct MatchAlert {
    pub label: String,
    /// The user's original request text.
    pub query: String,
    pub matches: Vec<Match>,
    pub timestamp_iso: String, // UTC ISO 8601
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &MatchAlert) -> anyhow::Result<()>;

    /// `false` means nothing is ever delivered; reported as skipped.
    fn enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, alert: &MatchAlert) -> anyhow::Result<()> {
        tracing::debug!(
            target: "notify",
            label = %alert.label,
            matches = alert.matches.len(),
            "notifications disabled (no DISCORD_WEBHOOK_URL)"
        );
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Keeps every alert in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<MatchAlert>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<MatchAlert> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &MatchAlert) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("webhook unreachable");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Webhook configured → Discord, otherwise no-op.
pub fn notifier_from_webhook(webhook: Option<&str>) -> std::sync::Arc<dyn Notifier> {
    match webhook.map(str::trim).filter(|w| !w.is_empty()) {
        Some(url) => std::sync::Arc::new(DiscordNotifier::new(url.to_string())),
        None => std::sync::Arc::new(NoopNotifier),
    }
}
