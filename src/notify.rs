//! Digest rendering and delivery to a WeCom group-robot webhook.
//!
//! The webhook accepts markdown messages of at most 4096 bytes. Digests over
//! [`MAX_MESSAGE_BYTES`] are split into groups of [`CHUNK_SIZE`] items and
//! sent as separate, numbered messages.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{RadarError, Result};
use crate::item::DisplayItem;
use crate::text::truncate_utf8;

/// Byte budget for one rendered message.
pub const MAX_MESSAGE_BYTES: usize = 4000;

/// Items per message once a digest has to be split.
pub const CHUNK_SIZE: usize = 5;

/// Pause between consecutive chunk sends.
pub const CHUNK_PAUSE: Duration = Duration::from_secs(1);

const SEND_TIMEOUT_SECS: u64 = 10;
const SIGNATURE: &str = "*Sent automatically by AI News Radar*";

/// Body of a markdown webhook message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MarkdownMessage {
    pub msgtype: &'static str,
    pub markdown: MarkdownContent,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MarkdownContent {
    pub content: String,
}

impl MarkdownMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            msgtype: "markdown",
            markdown: MarkdownContent {
                content: content.into(),
            },
        }
    }
}

/// Acknowledgement returned by the webhook.
#[derive(Debug, Deserialize)]
struct WebhookResponse {
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: String,
}

/// Delivers one message; `Ok` only on an explicit acknowledgement.
pub trait Transport {
    fn deliver(&self, message: &MarkdownMessage) -> Result<()>;
}

/// POSTs JSON to the webhook URL.
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Transport for WebhookTransport {
    fn deliver(&self, message: &MarkdownMessage) -> Result<()> {
        let resp = self.client.post(&self.url).json(message).send()?;
        let body = resp.text()?;
        check_ack(&body)
    }
}

/// Interpret a webhook response body.
fn check_ack(body: &str) -> Result<()> {
    let ack: WebhookResponse = serde_json::from_str(body)
        .map_err(|e| RadarError::MalformedResponse(format!("{}: {}", e, truncate_utf8(body, 200))))?;

    match ack.errcode {
        Some(0) => Ok(()),
        Some(code) => Err(RadarError::Rejected {
            code,
            message: ack.errmsg,
        }),
        None => Err(RadarError::MalformedResponse(format!(
            "no errcode in {}",
            truncate_utf8(body, 200)
        ))),
    }
}

/// Renders digests and hands them to a [`Transport`].
pub struct Notifier<T> {
    transport: T,
    chunk_pause: Duration,
}

impl<T: Transport> Notifier<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            chunk_pause: CHUNK_PAUSE,
        }
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `items` as one digest, or as numbered parts when the single
    /// message would be too large. True only if every message was accepted.
    pub fn send_digest(&self, items: &[DisplayItem], title: &str) -> bool {
        if items.is_empty() {
            info!("no items to send");
            return true;
        }

        let content = render_digest(items, title);
        if content.len() <= MAX_MESSAGE_BYTES {
            return self.send_markdown(&content);
        }

        info!(
            "digest is {} bytes, sending {} items in parts of {}",
            content.len(),
            items.len(),
            CHUNK_SIZE
        );

        let total = items.len().div_ceil(CHUNK_SIZE);
        let mut all_sent = true;
        for (idx, chunk) in items.chunks(CHUNK_SIZE).enumerate() {
            if idx > 0 {
                thread::sleep(self.chunk_pause);
            }
            let chunk_title = format!("{} (part {}/{})", title, idx + 1, total);
            let content = render_bounded(chunk, &chunk_title);
            all_sent &= self.send_markdown(&content);
        }
        all_sent
    }

    /// Report a failed run.
    pub fn send_error(&self, message: &str) -> bool {
        let content = format!("## ⚠️ AI News Radar run failed\n\n{}", message);
        self.send_markdown(truncate_utf8(&content, MAX_MESSAGE_BYTES))
    }

    fn send_markdown(&self, content: &str) -> bool {
        match self.transport.deliver(&MarkdownMessage::new(content)) {
            Ok(()) => {
                info!("message delivered ({} bytes)", content.len());
                true
            }
            Err(err) => {
                error!("message delivery failed: {}", err);
                false
            }
        }
    }
}

/// Render a digest as WeCom markdown.
pub fn render_digest(items: &[DisplayItem], title: &str) -> String {
    render(items, title, true)
}

fn render(items: &[DisplayItem], title: &str, with_summaries: bool) -> String {
    let mut parts = vec![
        format!("## 🤖 {}\n", title),
        format!("> Found **{}** new AI updates\n", items.len()),
    ];

    for (i, item) in items.iter().enumerate() {
        parts.push(format!("### {}. {}", i + 1, item.title));
        parts.push(format!(
            "**Source:** {} | **Time:** {}",
            item.source, item.time
        ));
        if with_summaries && !item.summary.is_empty() {
            parts.push(format!("> {}", item.summary));
        }
        parts.push(format!("[Read more]({})\n", item.link));
    }

    parts.push("---".to_string());
    parts.push(SIGNATURE.to_string());
    parts.join("\n")
}

/// Render a chunk so it fits in one message: drop summaries first, then cut.
fn render_bounded(items: &[DisplayItem], title: &str) -> String {
    let content = render(items, title, true);
    if content.len() <= MAX_MESSAGE_BYTES {
        return content;
    }

    warn!("'{}' is still over {} bytes, dropping summaries", title, MAX_MESSAGE_BYTES);
    let content = render(items, title, false);
    if content.len() <= MAX_MESSAGE_BYTES {
        return content;
    }

    warn!("'{}' is still over {} bytes, truncating", title, MAX_MESSAGE_BYTES);
    truncate_utf8(&content, MAX_MESSAGE_BYTES).to_string()
}
