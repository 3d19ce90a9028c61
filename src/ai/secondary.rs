//! Secondary AI assistant: an HTTP chat-completions API.
//!
//! Only consulted when the primary yields zero fixes or is unavailable.
//! The API key comes from the environment; its absence degrades to "no
//! AI fix available", never a crash.

use anyhow::{Context as _, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::parse::{self, AiResponse};

pub struct SecondaryAssistant {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl SecondaryAssistant {
    /// Build the assistant, reading the API key from `key_env`.
    pub fn new(url: &str, model: &str, key_env: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let api_key = std::env::var(key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!("No {key_env} set; secondary assistant disabled");
        }
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Whether the assistant can be called at all.
    #[must_use]
    pub fn available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask the API for fixes. `None` means disabled, a failed call, or
    /// undecodable output.
    pub async fn complete(&self, prompt: &str) -> Result<Option<AiResponse>> {
        let Some(key) = &self.api_key else {
            return Ok(None);
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = match self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Secondary assistant call failed: {e}");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Secondary assistant returned {status}: {text}");
            return Ok(None);
        }

        let chat: ChatResponse = match response.json().await {
            Ok(chat) => chat,
            Err(e) => {
                warn!("Secondary assistant response not JSON: {e}");
                return Ok(None);
            }
        };

        let Some(choice) = chat.choices.first() else {
            return Ok(None);
        };

        match parse::decode(&choice.message.content) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                debug!("Secondary assistant content undecodable: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_disables_assistant() {
        let assistant = SecondaryAssistant::new(
            "https://api.example.com/v1/chat/completions",
            "test-model",
            "MEND_TEST_KEY_THAT_IS_NOT_SET",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!assistant.available());
    }

    #[tokio::test]
    async fn test_disabled_assistant_returns_none() {
        let assistant = SecondaryAssistant::new(
            "https://api.example.com/v1/chat/completions",
            "test-model",
            "MEND_TEST_KEY_THAT_IS_NOT_SET",
            Duration::from_secs(5),
        )
        .unwrap();
        let response = assistant.complete("prompt").await.unwrap();
        assert!(response.is_none());
    }

    #[test]
    fn test_chat_response_shape() {
        let raw = r#"{"choices": [{"message": {"content": "{\"fixes\": [], \"explanation\": \"none\"}"}}]}"#;
        let chat: ChatResponse = serde_json::from_str(raw).unwrap();
        let decoded = parse::decode(&chat.choices[0].message.content).unwrap();
        assert_eq!(decoded.explanation, "none");
    }
}
