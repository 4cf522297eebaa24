//! OpenAI-compatible completion provider over reqwest.
//!
//! Talks the standard `POST {base}/chat/completions` shape, so any
//! OpenAI-compatible endpoint works by pointing the base URL at it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::LlmError;
use crate::extract::CompletionProvider;

/// Completion provider for OpenAI-compatible chat APIs.
pub struct OpenAiProvider {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });

        let resp = self
            .client
            .post(self.chat_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("API error {status}: {text}"),
            });
        }

        let payload: serde_json::Value =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: "openai".to_string(),
                reason: e.to_string(),
            })?;

        payload["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "openai".to_string(),
                reason: "no choices[0].message.content in response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            SecretString::from("sk-test"),
            "gpt-4.1".to_string(),
            "https://api.openai.com/v1".to_string(),
        )
    }

    #[test]
    fn chat_url_is_joined() {
        assert_eq!(
            provider().chat_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn trailing_slash_in_base_url_is_stripped() {
        let p = OpenAiProvider::new(
            SecretString::from("sk-test"),
            "gpt-4.1".to_string(),
            "http://localhost:8000/v1/".to_string(),
        );
        assert_eq!(p.chat_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn model_name_exposed() {
        assert_eq!(provider().model_name(), "gpt-4.1");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_failed() {
        // Nothing listens on the discard port; connection is refused.
        let p = OpenAiProvider::new(
            SecretString::from("sk-test"),
            "gpt-4.1".to_string(),
            "http://127.0.0.1:9".to_string(),
        );
        let err = p.complete("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
