//! Generation providers
//!
//! The external generation capability behind the pipeline. One deterministic
//! simulated implementation for tests and two networked implementations
//! (Ollama, OpenAI-compatible) selected by a model-identifier string.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::manifold::{CorrectionDelta, ProjectionSpec};

/// Transport-level fault. Distinct from COLLAPSE/RUIN: a provider fault never
/// consumes a ZeroBack retry and aborts the run immediately.
#[derive(Debug, Error)]
pub enum ProviderFault {
    #[error("generation timed out after {0} ms")]
    Timeout(u64),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("unknown model selector '{0}'")]
    UnknownSelector(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce one candidate for the projection, honoring the correction
    /// delta from the previous failed attempt.
    async fn generate(
        &self,
        model: &str,
        spec: &ProjectionSpec,
        delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault>;
}

/// Deterministic scripted provider for tests and offline runs. Responses are
/// replayed in order; the final entry repeats once the script is exhausted.
pub struct SimulatedProvider {
    script: Vec<String>,
    cursor: Mutex<usize>,
}

impl SimulatedProvider {
    pub fn new(script: Vec<&str>) -> Self {
        Self {
            script: script.into_iter().map(String::from).collect(),
            cursor: Mutex::new(0),
        }
    }

    /// The word-game default: hallucinate once, then comply.
    pub fn word_game() -> Self {
        Self::new(vec!["JINGLES", "JINGALL"])
    }

    /// Number of generate calls served so far.
    pub fn calls(&self) -> usize {
        *self.cursor.lock().expect("cursor lock")
    }
}

#[async_trait]
impl GenerationProvider for SimulatedProvider {
    async fn generate(
        &self,
        _model: &str,
        _spec: &ProjectionSpec,
        _delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault> {
        let mut cursor = self.cursor.lock().expect("cursor lock");
        let index = (*cursor).min(self.script.len().saturating_sub(1));
        *cursor += 1;
        self.script
            .get(index)
            .cloned()
            .ok_or_else(|| ProviderFault::Malformed("empty simulation script".to_string()))
    }
}

pub struct OllamaProvider {
    client: ollama_rs::Ollama,
}

impl OllamaProvider {
    pub fn new(client: ollama_rs::Ollama) -> Self {
        Self { client }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(ollama_rs::Ollama::default())
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    async fn generate(
        &self,
        model: &str,
        spec: &ProjectionSpec,
        delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault> {
        use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};

        let messages = vec![
            ChatMessage::system(spec.system_instruction.clone()),
            ChatMessage::user(spec.render_user_prompt(delta)),
        ];

        let res = self
            .client
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await
            .map_err(|e| ProviderFault::Transport(e.to_string()))?;

        Ok(res.message.content)
    }
}

pub struct OpenAICompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "http://localhost:8000/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        Self::new(base_url, api_key)
    }
}

#[async_trait]
impl GenerationProvider for OpenAICompatProvider {
    async fn generate(
        &self,
        model: &str,
        spec: &ProjectionSpec,
        delta: Option<&CorrectionDelta>,
    ) -> Result<String, ProviderFault> {
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": spec.system_instruction },
                { "role": "user", "content": spec.render_user_prompt(delta) },
            ],
            "temperature": 0.7,
        });

        let mut request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request
            .send()
            .await
            .map_err(|e| ProviderFault::Transport(e.to_string()))?;

        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderFault::Unauthorized(
                "provider rejected credentials".to_string(),
            ));
        }
        let res = res
            .error_for_status()
            .map_err(|e| ProviderFault::Transport(e.to_string()))?;

        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| ProviderFault::Malformed(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ProviderFault::Malformed("no content in response".to_string()))
    }
}

/// A parsed model selector: the provider plus the model name forwarded on
/// every call.
pub struct SelectedProvider {
    pub provider: std::sync::Arc<dyn GenerationProvider>,
    pub model: String,
}

/// Resolve a model-identifier string:
/// `sim` | `ollama:<model>` | `openai:<model>`.
pub fn provider_for_selector(selector: &str) -> Result<SelectedProvider, ProviderFault> {
    if selector == "sim" {
        return Ok(SelectedProvider {
            provider: std::sync::Arc::new(SimulatedProvider::word_game()),
            model: "sim".to_string(),
        });
    }
    if let Some(model) = selector.strip_prefix("ollama:") {
        return Ok(SelectedProvider {
            provider: std::sync::Arc::new(OllamaProvider::default()),
            model: model.to_string(),
        });
    }
    if let Some(model) = selector.strip_prefix("openai:") {
        return Ok(SelectedProvider {
            provider: std::sync::Arc::new(OpenAICompatProvider::from_env()),
            model: model.to_string(),
        });
    }
    Err(ProviderFault::UnknownSelector(selector.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProjectionSpec {
        ProjectionSpec {
            system_instruction: "sys".into(),
            user_prompt: "prompt".into(),
            invariants: vec![],
        }
    }

    #[test]
    fn test_simulated_provider_replays_script() {
        let provider = SimulatedProvider::new(vec!["first", "second"]);
        let first = tokio_test::block_on(provider.generate("sim", &spec(), None)).unwrap();
        let second = tokio_test::block_on(provider.generate("sim", &spec(), None)).unwrap();
        let third = tokio_test::block_on(provider.generate("sim", &spec(), None)).unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
        assert_eq!(third, "second");
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_selector_parsing() {
        assert!(provider_for_selector("sim").is_ok());
        let ollama = provider_for_selector("ollama:llama3.2:3b").unwrap();
        assert_eq!(ollama.model, "llama3.2:3b");
        let openai = provider_for_selector("openai:gpt-4o-mini").unwrap();
        assert_eq!(openai.model, "gpt-4o-mini");
        assert!(matches!(
            provider_for_selector("mystery"),
            Err(ProviderFault::UnknownSelector(_))
        ));
    }
}
