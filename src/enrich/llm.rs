//! Remote LLM capability. Every endpoint returns an error on timeout or
//! unusable output; the pipeline converts those to deterministic fallbacks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::LlmConfig;
use crate::models::event::{Category, EntityBag, Sentiment};

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    /// Process-wide cap on concurrent calls; protects the provider budget.
    semaphore: Arc<Semaphore>,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig, concurrency: usize, timeout_secs: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let _permit = self.semaphore.acquire().await?;
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let resp = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("empty completion");
        }
        Ok(content)
    }

    pub async fn extract_entities(&self, text: &str) -> anyhow::Result<EntityBag> {
        let content = self
            .complete(
                "Extract entities from the news text. Respond with only a JSON object with \
                 string-array fields: locations, organizations, groups, topics, keywords.",
                text,
            )
            .await?;
        let bag: EntityBag = serde_json::from_str(strip_fences(&content))?;
        Ok(bag)
    }

    pub async fn summarize(&self, title: &str, text: &str) -> anyhow::Result<String> {
        let content = self
            .complete(
                "Summarize the news item in one or two neutral sentences, at most 320 \
                 characters. Respond with the summary only.",
                &format!("{title}\n\n{text}"),
            )
            .await?;
        let summary: String = content.chars().take(320).collect();
        Ok(summary.trim().to_string())
    }

    pub async fn sentiment(&self, text: &str) -> anyhow::Result<Sentiment> {
        let content = self
            .complete(
                "Classify the sentiment of the news text. Respond with exactly one word: \
                 positive, neutral, or negative.",
                text,
            )
            .await?;
        Sentiment::parse(content.trim().to_lowercase().as_str())
            .ok_or_else(|| anyhow::anyhow!("unrecognized sentiment: {content}"))
    }

    pub async fn categorize(&self, title: &str, text: &str) -> anyhow::Result<Category> {
        let content = self
            .complete(
                "Classify the news item. Respond with exactly one of: protest, crime, \
                 religious_freedom, cultural_tension, political, infrastructure, health, \
                 migration, economic, weather, community_event, other.",
                &format!("{title}\n\n{text}"),
            )
            .await?;
        Category::parse(content.trim().to_lowercase().as_str())
            .ok_or_else(|| anyhow::anyhow!("unrecognized category: {content}"))
    }
}

/// Models wrap JSON in markdown fences often enough to be worth stripping.
fn strip_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
