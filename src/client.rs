use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::prompt::SYSTEM_PROMPT;

/// OpenAI-compatible chat completion endpoint.
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatModel {
    QwenMax,
    QwenPlus,
    QwenTurbo,
}

impl ChatModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatModel::QwenMax => "qwen-max",
            ChatModel::QwenPlus => "qwen-plus",
            ChatModel::QwenTurbo => "qwen-turbo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "qwen-max" => Some(ChatModel::QwenMax),
            "qwen-plus" => Some(ChatModel::QwenPlus),
            "qwen-turbo" => Some(ChatModel::QwenTurbo),
            _ => None,
        }
    }

    pub fn all() -> Vec<ChatModel> {
        vec![ChatModel::QwenMax, ChatModel::QwenPlus, ChatModel::QwenTurbo]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ChatModel::QwenMax => "Qwen Max (strongest)",
            ChatModel::QwenPlus => "Qwen Plus (balanced)",
            ChatModel::QwenTurbo => "Qwen Turbo (fastest)",
        }
    }
}

impl Default for ChatModel {
    fn default() -> Self {
        ChatModel::QwenTurbo
    }
}

#[derive(Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<RequestMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamPayload {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// One decoded event from the server-sent stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// An incremental content fragment.
    Delta(String),
    /// The stream signalled completion; stop reading further lines.
    Done,
}

/// Incremental decoder for the event-line stream. Bytes arrive in arbitrary
/// chunks; only complete lines are parsed, the rest stays buffered.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of response bytes, returning every item decodable from
    /// the complete lines seen so far.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamItem> {
        self.buffer.push_str(chunk);

        let mut items = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(item) = parse_stream_line(line.trim()) {
                items.push(item);
            }
        }
        items
    }
}

/// Parse one line of the response. Only `data:` lines carry payloads; blank
/// keep-alives and any other event lines are ignored. Malformed JSON is
/// skipped rather than treated as fatal.
fn parse_stream_line(line: &str) -> Option<StreamItem> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(StreamItem::Done);
    }

    let payload: StreamPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(err) => {
            debug!("skipping malformed stream payload: {}", err);
            return None;
        }
    };

    let choice = payload.choices.into_iter().next()?;
    if choice.finish_reason.is_some() {
        return Some(StreamItem::Done);
    }
    match choice.delta.content {
        Some(content) if !content.is_empty() => Some(StreamItem::Delta(content)),
        _ => None,
    }
}

/// Client for the hosted chat completion endpoint. Constructed only once a
/// credential is available; without one the generation path stays disabled.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Send a streaming completion request and return the incremental content
    /// fragments. The sequence is finite and not restartable. Any transport
    /// failure (connect timeout, reset, non-2xx status) is delivered as a
    /// single final `Error: ...` fragment so that partial output already
    /// shown to the user survives; the caller must not retry.
    pub fn stream_completion(
        &self,
        model: ChatModel,
        prompt: &str,
        temperature: f32,
    ) -> mpsc::Receiver<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: model.as_str().to_string(),
            messages: vec![
                RequestMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                RequestMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature,
            stream: true,
        };

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let response = match client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!("chat request failed: {}", err);
                    let _ = tx.send(format!("Error: {}", err)).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("chat request rejected: {} {}", status, body);
                let _ = tx
                    .send(format!("Error: request failed with status {}: {}", status, body))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!("chat stream interrupted: {}", err);
                        let _ = tx.send(format!("Error: {}", err)).await;
                        return;
                    }
                };

                for item in decoder.feed(&String::from_utf8_lossy(&bytes)) {
                    match item {
                        StreamItem::Delta(content) => {
                            if tx.send(content).await.is_err() {
                                return;
                            }
                        }
                        // Termination payload: the remainder of the stream is
                        // not read.
                        StreamItem::Done => return,
                    }
                }
            }
        });

        rx
    }
}
