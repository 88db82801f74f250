use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use snafu::Snafu;
use wreq::{Client, header::AUTHORIZATION};

use crate::{
    config::{AZURE_API_VERSION, AZURE_PROBE_MODEL, PROBE_MODEL},
    error::GatewayError,
    types::{Channel, ChannelType},
};

/// Structured error an upstream returned, in the OpenAI error shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub code: String,
}

/// Provider independent result of a probe that got an HTTP response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResponse {
    pub status: u16,
    pub completion_tokens: u64,
    pub error: Option<UpstreamError>,
}

/// Probe failures that happened before a usable response existed
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ProbeError {
    #[snafu(display("probe timed out"))]
    Timeout,
    #[snafu(display("connection failed: {msg}"))]
    Connect { msg: String },
    #[snafu(display("request failed: {msg}"))]
    Request { msg: String },
    #[snafu(display("malformed response: {msg}"))]
    Malformed { msg: String },
    #[snafu(display("channel misconfigured: {msg}"))]
    Misconfigured { msg: &'static str },
    #[snafu(display("probing {channel_type} channels is not supported"))]
    Unsupported { channel_type: ChannelType },
}

/// Sends the synthetic health request to a channel
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    async fn probe(&self, channel: &Channel) -> Result<ProbeResponse, ProbeError>;
}

/// Body of the synthetic chat completion request
pub fn probe_body(model: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "hi" }],
    })
}

/// Endpoint and model name the probe uses for a channel
pub fn probe_target(channel: &Channel) -> Result<(String, String), ProbeError> {
    let base = channel.api_base();
    if base.is_empty() {
        return Err(ProbeError::Misconfigured {
            msg: "missing base url",
        });
    }
    Ok(match channel.channel_type {
        ChannelType::Azure => {
            let model = channel.map_model(AZURE_PROBE_MODEL).to_string();
            (
                format!(
                    "{base}/openai/deployments/{model}/chat/completions?api-version={AZURE_API_VERSION}"
                ),
                model,
            )
        }
        _ => (
            format!("{base}/v1/chat/completions"),
            channel.map_model(PROBE_MODEL).to_string(),
        ),
    })
}

#[derive(Deserialize)]
struct RawUsage {
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    code: Value,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    error: Option<RawError>,
}

/// Normalizes a chat completion response body
pub fn parse_probe_response(status: u16, body: &str) -> Result<ProbeResponse, ProbeError> {
    let raw = match serde_json::from_str::<RawResponse>(body) {
        Ok(raw) => raw,
        Err(_) if status >= 400 => {
            return Ok(ProbeResponse {
                status,
                completion_tokens: 0,
                error: Some(UpstreamError {
                    message: body.chars().take(200).collect(),
                    ..Default::default()
                }),
            });
        }
        Err(e) => return Err(ProbeError::Malformed { msg: e.to_string() }),
    };
    let error = raw.error.map(|e| UpstreamError {
        message: e.message,
        kind: e.kind,
        code: match e.code {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        },
    });
    Ok(ProbeResponse {
        status,
        completion_tokens: raw.usage.map_or(0, |u| u.completion_tokens),
        error,
    })
}

/// Probes channels over HTTP
pub struct HttpProbeTransport {
    client: Client,
}

impl HttpProbeTransport {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn send_error(e: wreq::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else if e.is_connect() {
        ProbeError::Connect { msg: e.to_string() }
    } else {
        ProbeError::Request { msg: e.to_string() }
    }
}

#[async_trait]
impl ProbeTransport for HttpProbeTransport {
    async fn probe(&self, channel: &Channel) -> Result<ProbeResponse, ProbeError> {
        if !channel.channel_type.is_probe_supported() {
            return Err(ProbeError::Unsupported {
                channel_type: channel.channel_type,
            });
        }
        let (url, model) = probe_target(channel)?;
        let request = self.client.post(url).json(&probe_body(&model));
        let request = match channel.channel_type {
            ChannelType::Azure => request.header("api-key", channel.key.as_str()),
            _ => request.header(AUTHORIZATION, format!("Bearer {}", channel.key)),
        };
        let response = request.send().await.map_err(send_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(send_error)?;
        parse_probe_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_target_uses_deployment_path() {
        let channel = Channel {
            channel_type: ChannelType::Azure,
            base_url: Some("https://res.openai.azure.com/".into()),
            ..Default::default()
        };
        let (url, model) = probe_target(&channel).unwrap();
        assert_eq!(
            url,
            "https://res.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2023-03-15-preview"
        );
        assert_eq!(model, "gpt-35-turbo");
    }

    #[test]
    fn azure_without_base_url_is_misconfigured() {
        let channel = Channel {
            channel_type: ChannelType::Azure,
            ..Default::default()
        };
        assert!(matches!(
            probe_target(&channel),
            Err(ProbeError::Misconfigured { .. })
        ));
    }

    #[test]
    fn openai_target_respects_mapping() {
        let mut channel = Channel::default();
        channel
            .model_mapping
            .insert("gpt-3.5-turbo".into(), "gpt-4o-mini".into());
        let (url, model) = probe_target(&channel).unwrap();
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(model, "gpt-4o-mini");
    }

    #[test]
    fn parses_usage_and_errors() {
        let ok = parse_probe_response(200, r#"{"usage":{"completion_tokens":1}}"#).unwrap();
        assert_eq!(ok.completion_tokens, 1);
        assert!(ok.error.is_none());

        let err = parse_probe_response(
            401,
            r#"{"error":{"message":"bad key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        )
        .unwrap();
        assert_eq!(err.error.unwrap().code, "invalid_api_key");

        let html = parse_probe_response(502, "<html>bad gateway</html>").unwrap();
        assert_eq!(html.status, 502);
        assert!(html.error.is_some());

        assert!(matches!(
            parse_probe_response(200, "not json"),
            Err(ProbeError::Malformed { .. })
        ));
    }
}
