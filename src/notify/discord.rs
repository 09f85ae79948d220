use super::{MatchAlert, Notifier};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const MAX_FIELDS: usize = 10;
const TITLE_CHARS: usize = 50;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "notify", attempt, error = %err, "retrying Discord webhook");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, alert: &MatchAlert) -> Result<()> {
        if alert.matches.is_empty() {
            return Ok(());
        }
        let payload = DiscordWebhookPayload::for_alert(alert);
        self.post(&payload).await?;
        tracing::info!(
            target: "notify",
            label = %alert.label,
            matches = alert.matches.len(),
            "Discord notification sent"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct DiscordFooter {
    text: String,
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
    footer: DiscordFooter,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn for_alert(alert: &MatchAlert) -> Self {
        let mut fields: Vec<DiscordField> = alert
            .matches
            .iter()
            .take(MAX_FIELDS)
            .enumerate()
            .map(|(i, m)| DiscordField {
                name: format!("{}. {}", i + 1, truncate(&m.listing.title, TITLE_CHARS)),
                value: format!(
                    "**Price:** {}\n**Match Score:** {:.0}%\n**Reasoning:** {}\n**URL:** {}",
                    m.listing.price,
                    m.evaluation.score * 100.0,
                    m.evaluation.reasoning,
                    m.listing.url
                ),
                inline: false,
            })
            .collect();

        if alert.matches.len() > MAX_FIELDS {
            fields.push(DiscordField {
                name: "Additional Matches".to_string(),
                value: format!("+ {} more listings found", alert.matches.len() - MAX_FIELDS),
                inline: false,
            });
        }

        Self {
            content: Some(format!("New listing alerts for '{}'", alert.query)),
            embeds: vec![DiscordEmbed {
                title: "New Craigslist Matches Found!".to_string(),
                description: format!(
                    "**Query:** {}\n**Matches:** {} listings",
                    alert.query,
                    alert.matches.len()
                ),
                color: 0x00ff00,
                fields,
                footer: DiscordFooter {
                    text: "listing-sentinel • Automated Listing Monitor".to_string(),
                },
                timestamp: alert.timestamp_iso.clone(),
            }],
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::types::Listing;
    use crate::evaluate::{EvaluationResult, Match};

    fn alert(n: usize) -> MatchAlert {
        let matches = (0..n)
            .map(|i| Match {
                listing: Listing {
                    identity: format!("cl:{i}"),
                    url: format!("https://sfbay.craigslist.org/bik/{i}.html"),
                    title: if i == 0 { "x".repeat(80) } else { format!("Bike {i}") },
                    description: String::new(),
                    price: "$300".into(),
                    location_zip: None,
                },
                evaluation: EvaluationResult {
                    score: 0.874,
                    reasoning: "Close match.".into(),
                    feature_assessment: String::new(),
                    quality_assessment: String::new(),
                },
            })
            .collect();
        MatchAlert {
            label: "bike".into(),
            query: "54cm road bike".into(),
            matches,
            timestamp_iso: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn embed_has_one_field_per_match_and_truncates_titles() {
        let p = DiscordWebhookPayload::for_alert(&alert(2));
        let v = serde_json::to_value(&p).unwrap();
        let fields = v["embeds"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0]["name"], format!("1. {}...", "x".repeat(50)));
        assert!(fields[1]["value"].as_str().unwrap().contains("87%"));
        assert!(v["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .contains("**Matches:** 2 listings"));
        assert_eq!(v["embeds"][0]["timestamp"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn more_than_ten_matches_adds_overflow_field() {
        let p = DiscordWebhookPayload::for_alert(&alert(13));
        let v = serde_json::to_value(&p).unwrap();
        let fields = v["embeds"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[10]["name"], "Additional Matches");
        assert_eq!(fields[10]["value"], "+ 3 more listings found");
    }

    #[tokio::test]
    async fn unreachable_webhook_fails_after_retries() {
        let n = DiscordNotifier::new("http://127.0.0.1:9/webhook".into())
            .with_timeout(1)
            .with_retries(1);
        assert!(n.send(&alert(1)).await.is_err());
    }

    #[tokio::test]
    async fn nothing_to_send_is_ok() {
        let n = DiscordNotifier::new("http://127.0.0.1:9/webhook".into());
        assert!(n.send(&alert(0)).await.is_ok());
    }
}
