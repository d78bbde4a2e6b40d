use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

/// Best-effort operator notification. Implementations swallow their own failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &str, severity: Severity);
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(%severity, "alert: {message}"),
            Severity::Warning => warn!(%severity, "alert: {message}"),
            Severity::Error | Severity::Critical => error!(%severity, "alert: {message}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Posts alerts to a Telegram chat through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramAlertSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramAlertSink {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            base_url: TELEGRAM_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.base_url.trim_end_matches('/'),
            self.bot_token
        )
    }
}

/// Escapes the characters legacy Telegram Markdown treats as entity delimiters.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    async fn send(&self, message: &str, severity: Severity) {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: format!("*{severity}*\n{}", escape_markdown(message)),
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let result = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(err) = result {
            // the bot token is part of the url, keep it out of the log
            warn!(%severity, error = %err.without_url(), "failed to deliver telegram alert");
        }
    }
}
