use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_common::{ChunkStream, FailureKind, MurmurError, Result};

use crate::client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamFrame {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

/// The embeddings endpoint accepts a single string or an array of strings.
#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [&'a str]),
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiClient {
    base_url: String,
    chat_model: String,
    embedding_model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<String>,
        chat_model: String,
        embedding_model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model,
            embedding_model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for ChatMessage { role, content } in &request.messages {
            messages.push(OpenAiMessage {
                role: Self::role_to_string(role).to_string(),
                content: content.clone(),
            });
        }
        messages
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.chat_model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn classify_status(status: reqwest::StatusCode) -> FailureKind {
        if status.as_u16() == 429 || status.is_server_error() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }

    async fn post_chat(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut http_req = self.http_client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| MurmurError::llm_transient(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let kind = Self::classify_status(status);
            let body_text = response.text().await.unwrap_or_default();
            return Err(MurmurError::Llm {
                kind,
                message: format!("chat API error {status}: {body_text}"),
            });
        }
        Ok(response)
    }

    fn embedding_err(
        &self,
        kind: FailureKind,
        text_len: usize,
        message: String,
    ) -> MurmurError {
        MurmurError::Embedding {
            kind,
            model: self.embedding_model.clone(),
            text_len,
            message,
        }
    }

    async fn request_embeddings(
        &self,
        input: EmbeddingInput<'_>,
        text_len: usize,
    ) -> Result<EmbeddingResponse> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input,
        };

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req.send().await.map_err(|e| {
            self.embedding_err(
                FailureKind::Transient,
                text_len,
                format!("embedding request failed: {e}"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let kind = Self::classify_status(status);
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.embedding_err(
                kind,
                text_len,
                format!("embedding API error {status}: {body_text}"),
            ));
        }

        response.json().await.map_err(|e| {
            self.embedding_err(
                FailureKind::Permanent,
                text_len,
                format!("malformed embedding response: {e}"),
            )
        })
    }

    /// Extract content deltas from one SSE frame payload.
    fn parse_stream_data(data: &str) -> Option<String> {
        let frame: StreamFrame = serde_json::from_str(data).ok()?;
        frame
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(&request, false);
        let response = self.post_chat(&body).await?;

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| MurmurError::llm_permanent(format!("malformed chat response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MurmurError::llm_permanent("chat response had no choices"))?;

        Ok(LlmResponse {
            content: choice.message.content,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let body = self.build_body(&request, true);
        let response = self.post_chat(&body).await?;

        let (mut tx, rx) = futures::channel::mpsc::unbounded::<Result<String>>();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            'read: while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(MurmurError::llm_transient(format!(
                                "stream interrupted: {e}"
                            ))))
                            .await;
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'read;
                    }
                    if let Some(content) = Self::parse_stream_data(data) {
                        // A closed receiver means the consumer cancelled.
                        if tx.send(Ok(content)).await.is_err() {
                            debug!("Chunk consumer dropped, closing stream");
                            break 'read;
                        }
                    }
                }
            }
        });

        Ok(rx.boxed())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let parsed = self
            .request_embeddings(EmbeddingInput::Single(text), text.len())
            .await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| {
                self.embedding_err(
                    FailureKind::Permanent,
                    text.len(),
                    "embedding response had no data".into(),
                )
            })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let total_len = texts.iter().map(|text| text.len()).sum();
        let parsed = self
            .request_embeddings(EmbeddingInput::Batch(texts), total_len)
            .await?;
        if parsed.data.len() != texts.len() {
            return Err(self.embedding_err(
                FailureKind::Permanent,
                total_len,
                format!(
                    "embedding response had {} entries for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            ));
        }

        let mut data = parsed.data;
        data.sort_by_key(|datum| datum.index);
        Ok(data.into_iter().map(|datum| datum.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new(
            None,
            "gpt-4o".to_string(),
            "text-embedding-3-small".to_string(),
            Some("sk-test".to_string()),
        )
    }

    #[test]
    fn request_body_matches_provider_format() {
        let request = LlmRequest {
            system_prompt: Some("Be helpful.".to_string()),
            messages: vec![ChatMessage::user("Hello")],
            temperature: Some(0.5),
            max_tokens: Some(512),
        };

        let body = client().build_body(&request, false);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["max_tokens"], 512);
        // Non-streaming bodies omit the stream flag entirely.
        assert!(json.get("stream").is_none());

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn streaming_body_sets_stream_flag() {
        let body = client().build_body(&LlmRequest::default(), true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert_eq!(
            OpenAiClient::classify_status(StatusCode::TOO_MANY_REQUESTS),
            FailureKind::Transient
        );
        assert_eq!(
            OpenAiClient::classify_status(StatusCode::BAD_GATEWAY),
            FailureKind::Transient
        );
        assert_eq!(
            OpenAiClient::classify_status(StatusCode::UNAUTHORIZED),
            FailureKind::Permanent
        );
    }

    #[test]
    fn embedding_input_serializes_single_and_batch() {
        let single = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: EmbeddingInput::Single("hello"),
        };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["input"], "hello");

        let batch = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: EmbeddingInput::Batch(&["a", "b"]),
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn batch_embeddings_reorder_by_index() {
        let payload = r#"{"data":[
            {"index":1,"embedding":[2.0]},
            {"index":0,"embedding":[1.0]}
        ]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(payload).unwrap();
        parsed.data.sort_by_key(|datum| datum.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
        assert_eq!(parsed.data[1].embedding, vec![2.0]);
    }

    #[test]
    fn stream_frame_parsing_extracts_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(OpenAiClient::parse_stream_data(data).as_deref(), Some("Hel"));

        let empty = r#"{"choices":[{"delta":{}}]}"#;
        assert!(OpenAiClient::parse_stream_data(empty).is_none());

        assert!(OpenAiClient::parse_stream_data("not json").is_none());
    }
}
