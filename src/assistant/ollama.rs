use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::ChatBackend;

/// Minimal client for a local Ollama server's chat endpoint.
pub struct OllamaClient {
    http: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Checks that a server answers at the endpoint.
    pub async fn probe(&self) -> Result<()> {
        self.http
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .with_context(|| format!("no Ollama server at {}", self.endpoint))?
            .error_for_status()
            .context("Ollama server rejected the probe")?;
        Ok(())
    }

    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        let response: ChatResponse = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .context("Ollama chat request failed")?
            .error_for_status()
            .context("Ollama chat returned an error status")?
            .json()
            .await
            .context("Ollama chat response was not understood")?;

        Ok(response.message.content.trim().to_string())
    }
}

impl ChatBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat<'a>(&'a self, system: &'a str, user: &'a str) -> BoxFuture<'a, Result<String>> {
        OllamaClient::chat(self, system, user).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_chat_api() {
        let body = ChatRequest {
            model: "tinyllama",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "tinyllama");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn response_body_parses() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"model":"tinyllama","message":{"role":"assistant","content":" Keep going! "},"done":true}"#,
        )
        .unwrap();
        assert_eq!(parsed.message.content, " Keep going! ");
    }

    #[tokio::test]
    async fn unreachable_server_fails_probe() {
        let client = OllamaClient::new("http://127.0.0.1:9/", "tinyllama", Duration::from_secs(2))
            .unwrap();
        assert!(client.probe().await.is_err());
        assert_eq!(client.endpoint, "http://127.0.0.1:9");
    }
}
