//! Race backend HTTP client.
//!
//! Thin, stateless calls over the backend's request/response contract.
//! Every non-2xx response has its body read for diagnostic text before
//! being surfaced as a typed error.

use crate::config::BackendConfig;
use async_trait::async_trait;
use linkrally_core::{RallyError, Result, Step};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

/// The backend calls the engine consumes.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Liveness probe.
    async fn health(&self) -> Result<()>;
    /// Full article title list for selection UIs.
    async fn all_articles(&self) -> Result<Vec<String>>;
    /// Resolves a title to the backend-canonical form.
    async fn canonical_title(&self, title: &str) -> Result<String>;
    /// Outgoing link titles of an article.
    async fn article_links(&self, title: &str) -> Result<Vec<String>>;
    /// One language-model completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
    /// Server-side validation of a human move.
    async fn validate_move(&self, request: MoveValidationRequest) -> Result<MoveValidation>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Token accounting reported by the model endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Accumulates another usage record (attempts within a turn are summed).
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveValidationRequest {
    pub current_article: String,
    pub to_article: String,
    pub destination_article: String,
    pub current_hops: u32,
    pub max_hops: u32,
}

/// Server verdict on a candidate move.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MoveValidation {
    /// `{ "noop": true }` - the move changes nothing
    Noop {
        #[serde(deserialize_with = "noop_flag")]
        noop: bool,
    },
    /// `{ "step": { ... } }` - record this step verbatim
    Step { step: Step },
}

/// The contract only ever sends `noop: true`; anything else is a
/// malformed payload, not a silent acceptance.
fn noop_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = bool::deserialize(deserializer)?;
    if !value {
        return Err(serde::de::Error::custom("noop must be true"));
    }
    Ok(value)
}

#[derive(Deserialize)]
struct CanonicalTitleResponse {
    title: String,
}

#[derive(Deserialize)]
struct ArticleLinksResponse {
    links: Vec<String>,
}

/// reqwest-backed implementation of [`BackendApi`].
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RallyError::internal(format!("invalid backend base URL: {e}")))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RallyError::from)?;
        Ok(Self { client, base_url })
    }

    /// Builds a URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RallyError::internal("backend base URL cannot be a base"))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.client.get(url).send().await?;
        Self::parse_json(response).await
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read backend error body".to_string());
            return Err(map_http_error(status, body));
        }
        let value = response.json::<T>().await.map_err(|e| {
            RallyError::Serialization {
                format: "JSON".to_string(),
                message: format!("unexpected backend payload: {e}"),
            }
        })?;
        Ok(value)
    }
}

fn map_http_error(status: StatusCode, body: String) -> RallyError {
    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );
    RallyError::Backend {
        status: status.as_u16(),
        message: body,
        retryable,
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["health"])?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, body));
        }
        Ok(())
    }

    async fn all_articles(&self) -> Result<Vec<String>> {
        self.get_json(self.endpoint(&["get_all_articles"])?).await
    }

    async fn canonical_title(&self, title: &str) -> Result<String> {
        let response: CanonicalTitleResponse = self
            .get_json(self.endpoint(&["canonical_title", title])?)
            .await?;
        if response.title.trim().is_empty() {
            return Err(RallyError::Serialization {
                format: "JSON".to_string(),
                message: "canonical_title returned an empty title".to_string(),
            });
        }
        Ok(response.title)
    }

    async fn article_links(&self, title: &str) -> Result<Vec<String>> {
        let response: ArticleLinksResponse = self
            .get_json(self.endpoint(&["get_article_with_links", title])?)
            .await?;
        Ok(response.links)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint(&["llm", "chat"])?;
        let response = self.client.post(url).json(&request).send().await?;
        Self::parse_json(response).await
    }

    async fn validate_move(&self, request: MoveValidationRequest) -> Result<MoveValidation> {
        let url = self.endpoint(&["local", "validate_move"])?;
        let response = self.client.post(url).json(&request).send().await?;
        Self::parse_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkrally_core::StepKind;

    #[test]
    fn move_validation_deserializes_noop() {
        let verdict: MoveValidation = serde_json::from_str(r#"{ "noop": true }"#).unwrap();
        assert!(matches!(verdict, MoveValidation::Noop { noop: true }));
    }

    #[test]
    fn move_validation_rejects_noop_false() {
        // out of contract; must surface as malformed, not as a no-op
        assert!(serde_json::from_str::<MoveValidation>(r#"{ "noop": false }"#).is_err());
    }

    #[test]
    fn move_validation_deserializes_step() {
        let verdict: MoveValidation = serde_json::from_str(
            r#"{ "step": { "type": "move", "article": "Rodent", "at": "2026-01-01T00:00:00Z" } }"#,
        )
        .unwrap();
        match verdict {
            MoveValidation::Step { step } => {
                assert_eq!(step.kind, StepKind::Move);
                assert_eq!(step.article, "Rodent");
            }
            MoveValidation::Noop { .. } => panic!("expected step verdict"),
        }
    }

    #[test]
    fn chat_response_usage_is_optional() {
        let response: ChatResponse =
            serde_json::from_str(r#"{ "content": "<answer>1</answer>" }"#).unwrap();
        assert!(response.usage.is_none());

        let response: ChatResponse = serde_json::from_str(
            r#"{ "content": "ok", "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 } }"#,
        )
        .unwrap();
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn token_usage_sums_across_attempts() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
        });
        total.add(&TokenUsage {
            prompt_tokens: 7,
            completion_tokens: 2,
            total_tokens: 9,
        });
        assert_eq!(total.prompt_tokens, 12);
        assert_eq!(total.total_tokens, 15);
    }

    #[test]
    fn endpoint_encodes_path_segments() {
        let backend = HttpBackend::new(&BackendConfig::new("http://localhost:8000")).unwrap();
        let url = backend
            .endpoint(&["canonical_title", "AC/DC"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/canonical_title/AC%2FDC"
        );
    }
}
