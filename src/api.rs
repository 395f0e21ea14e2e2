use std::collections::VecDeque;
use std::io::Write;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Settings;
use crate::error::AppError;
use crate::messages::Message;

// One `chat.completion.chunk` object from the event stream
#[derive(Debug, Deserialize)]
struct Chunk {
    // Empty or absent on the final usage-only chunk some providers send
    #[serde(default)]
    choices: Vec<StreamingChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamingChoice {
    #[serde(default)]
    delta: Delta,

    // Some OpenAI compatible routers report upstream failures per choice
    error: Option<ErrorResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,

    // A string for OpenAI, an integer for some other providers
    code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseContainer {
    error: ErrorResponse,
}

impl ErrorResponse {
    fn into_app_error(self) -> AppError {
        match self.code {
            Some(code) => AppError::StreamReceive(format!(
                "API request failed with code {}: {}",
                code, self.message
            )),
            None => AppError::StreamReceive(format!("API request failed: {}", self.message)),
        }
    }
}

/// `ApiClient` sends one streaming chat-completion request to an OpenAI
/// compatible endpoint and writes the answer out as it arrives.
pub struct ApiClient<'a> {
    settings: &'a Settings,
    client: Client,
}

impl<'a> ApiClient<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        ApiClient {
            settings,
            client: Client::new(),
        }
    }

    /// Streams the completion for `messages` into `out`.
    ///
    /// Every fragment is written and flushed as soon as it is received, with
    /// nothing added between fragments or after the last one. A failure to
    /// open the stream writes nothing; a failure mid-stream leaves what was
    /// already written in place and stops reading.
    pub async fn stream_completion<W: Write>(
        &self,
        messages: &[Message],
        max_tokens: u32,
        out: &mut W,
    ) -> Result<(), AppError> {
        let mut stream = self.open_stream(messages, max_tokens).await?;

        while let Some(fragment) = stream.next_fragment().await? {
            out.write_all(fragment.as_bytes())
                .and_then(|()| out.flush())
                .map_err(|e| AppError::StreamReceive(format!("unable to write the answer: {e}")))?;
        }

        Ok(())
    }

    /// Posts the request and hands back the response body as a stream of
    /// fragments. Non-success statuses are turned into an error here, with
    /// whatever the server said in the body.
    pub async fn open_stream(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<FragmentStream, AppError> {
        let url = format!("{}/v1/chat/completions", self.settings.api_base);
        let body = self.build_request_body(messages, max_tokens);

        debug!(
            %url,
            model = %self.settings.model_id,
            max_tokens,
            messages = messages.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(AppError::Connection(format!(
                "API request failed with status {status}: {text}"
            )));
        }

        Ok(FragmentStream::new(response))
    }

    fn build_request_body(&self, messages: &[Message], max_tokens: u32) -> serde_json::Value {
        json!({
            "model": self.settings.model_id,
            "max_tokens": max_tokens,
            "messages": messages,
            "stream": true,
        })
    }
}

/// The answer text of a streaming response, one fragment at a time.
///
/// The stream owns the response body, so the connection is released whenever
/// the stream is dropped, whether it ran to the end or not. Once the end of
/// the stream has been seen, `next_fragment` keeps returning `Ok(None)`.
pub struct FragmentStream {
    response: reqwest::Response,
    decoder: SseDecoder,

    // Event payloads already split out of the body but not yet handed out
    pending: VecDeque<String>,
    done: bool,
}

impl FragmentStream {
    fn new(response: reqwest::Response) -> Self {
        FragmentStream {
            response,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Waits for the next piece of answer text.
    ///
    /// Returns `Ok(None)` on `data: [DONE]` or when the body ends, and an
    /// error for transport failures and for error payloads sent inside the
    /// stream.
    pub async fn next_fragment(&mut self) -> Result<Option<String>, AppError> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                if data == "[DONE]" {
                    self.finish();
                    return Ok(None);
                }
                match decode_fragment(&data)? {
                    Some(text) => return Ok(Some(text)),
                    None => continue,
                }
            }

            if self.done {
                return Ok(None);
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.pending.extend(self.decoder.push(&bytes)),
                Ok(None) => {
                    self.pending.extend(self.decoder.finish());
                    self.done = true;
                }
                Err(e) => {
                    self.finish();
                    return Err(AppError::StreamReceive(e.to_string()));
                }
            }
        }
    }

    fn finish(&mut self) {
        self.pending.clear();
        self.done = true;
    }
}

/// Splits a server-sent event body into its `data:` payloads.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across two network chunks is decoded intact. Other SSE
/// fields (`event:`, `id:`) and comment lines are dropped.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    // The body may end without a trailing newline
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?;
    Some(data.trim().to_string())
}

fn decode_fragment(data: &str) -> Result<Option<String>, AppError> {
    if let Ok(container) = serde_json::from_str::<ErrorResponseContainer>(data) {
        return Err(container.error.into_app_error());
    }

    let chunk = serde_json::from_str::<Chunk>(data).map_err(|e| {
        AppError::StreamReceive(format!("Failed to parse JSON: {e}\nRaw JSON: {data}"))
    })?;

    let mut text = String::new();
    for choice in chunk.choices {
        if let Some(error) = choice.error {
            return Err(error.into_app_error());
        }
        if let Some(content) = choice.delta.content {
            text.push_str(&content);
        }
    }

    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}
