use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use quill_core::errors::CompletionError;
use quill_core::messages::Turn;
use quill_core::provider::{CompletionClient, CompletionOptions, FragmentStream};
use quill_core::stream::StreamFragment;

use crate::decoder::decode_stream;
use crate::lines::byte_lines;
use crate::wire::{chat_completions_url, ChatRequest, ChatResponse};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Connection details for an OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub model: String,
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two streamed chunks.
    pub idle_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, idle: Duration) -> Self {
        self.connect_timeout = connect;
        self.idle_timeout = idle;
        self
    }
}

/// [`CompletionClient`] over HTTP chat completions.
///
/// An unconfigured client can be built; every call on it then fails with
/// [`CompletionError::Configuration`].
pub struct ChatCompletionsClient {
    http: Client,
    config: ClientConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: ClientConfig) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CompletionError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn is_configured(&self) -> bool {
        self.check_configured().is_ok()
    }

    fn check_configured(&self) -> Result<(), CompletionError> {
        if self.config.endpoint.trim().is_empty() {
            return Err(CompletionError::Configuration("endpoint is empty".into()));
        }
        if self.config.api_key.expose_secret().trim().is_empty() {
            return Err(CompletionError::Configuration("API key is empty".into()));
        }
        Ok(())
    }

    /// Send the request and return the response once its status is 2xx.
    async fn send(
        &self,
        turns: &[Turn],
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        self.check_configured()?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: turns,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };
        let url = chat_completions_url(&self.config.endpoint);
        debug!(%url, turns = turns.len(), stream, "sending completion request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header("accept", if stream { "text/event-stream" } else { "application/json" })
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "completion endpoint returned an error");
            return Err(CompletionError::Upstream { status, body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        turns: &[Turn],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let resp = self.send(turns, options, false).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::ResponseShape(format!("invalid JSON body: {e}")))?;
        parsed
            .into_content()
            .ok_or_else(|| CompletionError::ResponseShape("missing choices[0].message.content".into()))
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn stream_complete(&self, turns: &[Turn], options: &CompletionOptions) -> FragmentStream {
        match self.send(turns, options, true).await {
            Ok(resp) => {
                let lines = byte_lines(Box::pin(resp.bytes_stream()), Some(self.config.idle_timeout));
                Box::pin(decode_stream(Box::pin(lines)))
            }
            Err(error) => {
                warn!(kind = error.error_kind(), error = %error, "stream request failed");
                Box::pin(futures::stream::iter([StreamFragment::Error(error)]))
            }
        }
    }
}
