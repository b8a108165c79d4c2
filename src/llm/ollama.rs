//! Client for a local Ollama server (`/api/chat`).
//!
//! Unlike the OpenAI-compatible client, every call goes through a
//! [`RetryPolicy`] so that a server that is still loading a model or
//! briefly refusing connections does not sink a whole batch.

use super::ChatModel;
use super::client::Message;
use super::retry::RetryPolicy;
use crate::config::ModelBlock;
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default local server address.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

/// Non-streaming reply; older servers answer with `response` instead of `message`.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Ollama chat client bound to one model block.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    options: Options,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(block: &ModelBlock) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EvalError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: block
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model: block.model.clone(),
            options: Options {
                temperature: block.temperature(),
                num_predict: block.max_tokens(),
            },
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy (tests use millisecond delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    /// One POST without retries. Error statuses become [`EvalError::HttpStatus`].
    async fn post_once(&self, request: &ChatRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        Ok(match parsed.message {
            Some(message) => message.content,
            None => parsed.response.unwrap_or_default(),
        })
    }

    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: self.options,
        };

        self.retry.run(|| self.post_once(&request)).await
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![Message::system(system), Message::user(user)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(base_url: String) -> OllamaClient {
        let block = ModelBlock::new("ollama", "llama3.1").with_base_url(base_url);
        OllamaClient::new(&block)
            .unwrap()
            .with_retry(RetryPolicy::with_unit(Duration::from_millis(1)))
    }

    /// Drops the first `failures` connections, then answers with a chat reply.
    async fn flaky_server(failures: u32) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    drop(socket);
                    continue;
                }

                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let read = socket.read(&mut chunk).await.unwrap_or(0);
                    if read == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..read]);
                    if request_complete(&buf) {
                        break;
                    }
                }

                let body = r#"{"message":{"role":"assistant","content":"recovered"},"done":true}"#;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), accepted)
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn test_request_shape_and_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.1",
                "stream": false,
                "options": {"temperature": 0.6, "num_predict": 512}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "hi there"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(server.uri());
        assert_eq!(client.generate("sys", "user").await.unwrap(), "hi there");
    }

    #[tokio::test]
    async fn test_falls_back_to_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "legacy", "done": true})),
            )
            .mount(&server)
            .await;

        let client = fast_client(server.uri());
        assert_eq!(client.generate("s", "u").await.unwrap(), "legacy");
    }

    #[tokio::test]
    async fn test_http_error_status_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(server.uri());
        let err = client.generate("s", "u").await.unwrap_err();
        assert!(matches!(err, EvalError::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_recovers_after_two_dropped_connections() {
        let (url, accepted) = flaky_server(2).await;
        let client = fast_client(url);

        let text = client.generate("s", "u").await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_after_fourth_dropped_connection() {
        let (url, accepted) = flaky_server(u32::MAX).await;
        let client = fast_client(url);

        let err = client.generate("s", "u").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
    }
}
