use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::core::config::Settings;
use crate::services::transport::{Transport, TransportError};

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

#[derive(Debug, Deserialize)]
struct TgSendResponse {
    ok: bool,
    result: Option<TgSentMessage>,
    description: Option<String>,
    parameters: Option<TgResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct TgSentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgResponseParameters {
    retry_after: Option<u64>,
}

/// Bot API client that posts notification bodies as MarkdownV2 messages.
#[derive(Clone)]
pub(crate) struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramTransport {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let telegram = settings.telegram();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(telegram.connect_timeout_seconds))
            .timeout(Duration::from_secs(telegram.timeout_seconds))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self { client, api_base: telegram.api_base.clone(), token: telegram.token.clone() })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": chat_id,
                "text": to_markdown_v2(text),
                "parse_mode": "MarkdownV2",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_request_error)?;
        let payload = serde_json::from_str::<TgSendResponse>(&body).ok();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = payload
                .as_ref()
                .and_then(|payload| payload.parameters.as_ref())
                .and_then(|parameters| parameters.retry_after)
                .map(Duration::from_secs);
            return Err(TransportError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(TransportError::Server { status: status.as_u16() });
        }

        let Some(payload) = payload else {
            return Err(TransportError::InvalidResponse(format!(
                "undecodable sendMessage payload with HTTP {}",
                status.as_u16()
            )));
        };

        if !status.is_success() || !payload.ok {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                description: payload.description.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        payload
            .result
            .map(|message| message.message_id.to_string())
            .ok_or_else(|| {
                TransportError::InvalidResponse("sendMessage result is missing".to_string())
            })
    }
}

fn classify_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::InvalidResponse(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

pub(crate) fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Inside the `(...)` part of a link only `)` and `\` are special.
fn escape_link_url(url: &str) -> String {
    let mut escaped = String::with_capacity(url.len());
    for ch in url.chars() {
        if matches!(ch, ')' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Converts the light `*bold*` and `[text](url)` markup of notification
/// bodies into Telegram MarkdownV2, escaping everything else.
pub(crate) fn to_markdown_v2(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '[' => {
                if let Some((label, url, next)) = parse_link(&chars, i) {
                    let label: String = label.chars().filter(|ch| *ch != '*').collect();
                    out.push('[');
                    out.push_str(&escape_markdown_v2(&label));
                    out.push_str("](");
                    out.push_str(&escape_link_url(&url));
                    out.push(')');
                    i = next;
                    continue;
                }
            }
            '*' => {
                if let Some(end) = chars[i + 1..].iter().position(|ch| *ch == '*') {
                    if end > 0 {
                        let inner: String = chars[i + 1..i + 1 + end].iter().collect();
                        out.push('*');
                        out.push_str(&escape_markdown_v2(&inner));
                        out.push('*');
                        i += end + 2;
                        continue;
                    }
                }
            }
            _ => {}
        }

        let ch = chars[i];
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
        i += 1;
    }

    out
}

/// Matches `[label](url)` at `start`; returns the parts and the index after it.
/// Balanced parentheses inside the url belong to it.
fn parse_link(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let close = start + 1 + chars[start + 1..].iter().position(|ch| *ch == ']')?;
    if close == start + 1 || chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let url_start = close + 2;
    let mut depth = 0usize;
    let mut url_end = None;
    for (offset, ch) in chars[url_start..].iter().enumerate() {
        match ch {
            '(' => depth += 1,
            ')' if depth == 0 => {
                url_end = Some(url_start + offset);
                break;
            }
            ')' => depth -= 1,
            _ => {}
        }
    }
    let url_end = url_end?;
    if url_end == url_start {
        return None;
    }

    Some((
        chars[start + 1..close].iter().collect(),
        chars[url_start..url_end].iter().collect(),
        url_end + 1,
    ))
}
