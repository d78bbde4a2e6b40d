//! Account pipeline and fleet runner: configuration, alerting and the poll loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use revreply_adapters::{AdapterSettings, OzonSettings, WildberriesSettings};
use revreply_responder::CompletionSettings;
use revreply_storage::{CookieStore, HttpClientConfig};

mod accounts;
mod alerts;
mod fleet;
mod pipeline;

pub use accounts::{AccountRow, AccountSource, ConfigError, YamlAccountSource};
pub use alerts::{AlertSink, LogAlertSink, Severity, TelegramAlertSink};
pub use fleet::{CycleSummary, FleetRunner};
pub use pipeline::{
    AccountError, AccountOutcome, AccountPipeline, AccountReport, ClientFactory,
    DefaultClientFactory,
};

pub const CRATE_NAME: &str = "revreply-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub accounts_file: PathBuf,
    pub cookies_file: PathBuf,
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub ai_base_url: String,
    pub ai_model: String,
    pub ai_timeout_secs: u64,
    pub wb_base_url: String,
    pub ozon_base_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value lookup; unset or unparsable values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let completion = CompletionSettings::default();

        Self {
            accounts_file: lookup("REVREPLY_ACCOUNTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./accounts.yaml")),
            cookies_file: lookup("REVREPLY_COOKIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./ozon_cookies.json")),
            poll_interval_secs: secs("REVREPLY_POLL_INTERVAL_SECS", 60),
            http_timeout_secs: secs("REVREPLY_HTTP_TIMEOUT_SECS", 15),
            user_agent: lookup("REVREPLY_USER_AGENT")
                .unwrap_or_else(|| "revreply/0.1".to_string()),
            ai_base_url: lookup("REVREPLY_AI_BASE_URL").unwrap_or(completion.base_url),
            ai_model: lookup("REVREPLY_AI_MODEL").unwrap_or(completion.model),
            ai_timeout_secs: secs("REVREPLY_AI_TIMEOUT_SECS", completion.timeout.as_secs()),
            wb_base_url: lookup("REVREPLY_WB_BASE_URL")
                .unwrap_or_else(|| WildberriesSettings::default().base_url),
            ozon_base_url: lookup("REVREPLY_OZON_BASE_URL")
                .unwrap_or_else(|| OzonSettings::default().base_url),
            telegram_bot_token: non_empty("REVREPLY_TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty("REVREPLY_TELEGRAM_CHAT_ID"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            http: HttpClientConfig {
                timeout: Duration::from_secs(self.http_timeout_secs),
                user_agent: Some(self.user_agent.clone()),
                ..Default::default()
            },
            wildberries: WildberriesSettings {
                base_url: self.wb_base_url.clone(),
                ..Default::default()
            },
            ozon: OzonSettings {
                base_url: self.ozon_base_url.clone(),
                ..Default::default()
            },
        }
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            base_url: self.ai_base_url.clone(),
            model: self.ai_model.clone(),
            timeout: Duration::from_secs(self.ai_timeout_secs),
        }
    }

    /// Telegram when both bot token and chat id are set, otherwise log-only alerts.
    pub fn alert_sink(&self) -> Result<Arc<dyn AlertSink>> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Ok(Arc::new(TelegramAlertSink::new(token, chat_id)?)),
            _ => Ok(Arc::new(LogAlertSink)),
        }
    }

    /// Wires the production account source, client factory and alert sink.
    pub fn build_runner(&self) -> Result<FleetRunner> {
        let source = Arc::new(YamlAccountSource::new(self.accounts_file.clone()));
        let factory = Arc::new(DefaultClientFactory {
            adapters: self.adapter_settings(),
            completion: self.completion_settings(),
            cookies: Arc::new(CookieStore::new(self.cookies_file.clone())),
        });
        let alerts = self.alert_sink()?;
        Ok(FleetRunner::new(source, factory, alerts).with_pause(self.poll_interval()))
    }
}
