use std::io::Read;
use std::time::Duration;

use anyhow::Context;
use imagine_contracts::models::{AspectRatio, EditMode};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::DispatchError;
use crate::reference::ReferenceImage;

pub const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
pub const IMAGE_EDIT_PATH: &str = "v1/images/edit";

pub type ByteStream = Box<dyn Read + Send>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of the streaming text-to-image request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub aspect_ratio: AspectRatio,
    pub n: u32,
}

impl StreamRequest {
    pub fn new(model: &str, prompt: &str, aspect_ratio: AspectRatio, n: u32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
            aspect_ratio,
            n,
        }
    }
}

/// Fields of the multipart image-edit request.
#[derive(Debug, Clone, PartialEq)]
pub struct EditUpload {
    pub prompt: String,
    pub image: ReferenceImage,
    pub mode: EditMode,
    pub strength: f32,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EditResponse {
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub data: Option<Vec<EditResult>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EditResult {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EditResponse {
    /// Result URLs in response order; descriptors without a URL are skipped.
    pub fn urls(&self) -> Vec<String> {
        self.data
            .iter()
            .flatten()
            .filter_map(|row| row.url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// The upstream generation service, one method per request shape.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Sends the streaming request and returns the response body once a 2xx
    /// status arrived.
    fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, DispatchError>;

    fn submit_edit(&self, upload: &EditUpload) -> Result<EditResponse, DispatchError>;
}

/// Blocking `reqwest` transport. Requests carry no timeout.
pub struct HttpTransport {
    config: ClientConfig,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &HttpClient {
        &self.http
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, DispatchError> {
        let endpoint = self.config.endpoint(CHAT_COMPLETIONS_PATH);
        let mut builder = self
            .http
            .post(&endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(api_key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }
        tracing::debug!(%endpoint, n = request.n, aspect_ratio = %request.aspect_ratio, "opening generation stream");
        let response = builder
            .send()
            .map_err(|err| DispatchError::transport(None, format!("request failed ({endpoint}): {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let reason = status.canonical_reason().unwrap_or("");
            return Err(DispatchError::transport(
                Some(code),
                format!("HTTP {code}: {reason}").trim_end().to_string(),
            ));
        }
        Ok(Box::new(response))
    }

    fn submit_edit(&self, upload: &EditUpload) -> Result<EditResponse, DispatchError> {
        let endpoint = self.config.endpoint(IMAGE_EDIT_PATH);
        let part = MultipartPart::bytes(upload.image.bytes.clone())
            .file_name(upload.image.file_name.clone())
            .mime_str(&upload.image.mime)
            .map_err(|err| {
                DispatchError::Validation(format!(
                    "invalid mime '{}' for reference image: {err}",
                    upload.image.mime
                ))
            })?;
        let form = MultipartForm::new()
            .text("prompt", upload.prompt.clone())
            .part("image", part)
            .text("mode", upload.mode.as_str())
            .text("strength", upload.strength.to_string())
            .text("aspect_ratio", upload.aspect_ratio.as_str());

        let mut builder = self.http.post(&endpoint).multipart(form);
        if let Some(api_key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }
        tracing::debug!(%endpoint, mode = %upload.mode, bytes = upload.image.bytes.len(), "submitting image edit");
        let response = builder
            .send()
            .map_err(|err| DispatchError::transport(None, format!("request failed ({endpoint}): {err}")))?;
        edit_response_or_error(response)
    }
}

fn edit_response_or_error(response: HttpResponse) -> Result<EditResponse, DispatchError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| DispatchError::transport(Some(code), format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(DispatchError::transport(Some(code), error_detail(code, &body)));
    }
    serde_json::from_str(&body).map_err(|err| {
        DispatchError::transport(Some(code), format!("invalid JSON response: {err}"))
    })
}

/// `detail` from an error body when present, else `HTTP <code>`.
pub fn error_detail(code: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| parsed.get("detail").cloned());
    match detail {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(Value::Null) | None => format!("HTTP {code}"),
        Some(Value::String(_)) => format!("HTTP {code}"),
        Some(other) => other.to_string(),
    }
}
