use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use revreply_core::{AccountConfig, Marketplace};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("account configuration {path} is unreachable: {source}")]
    Unreachable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("account configuration {path} is malformed: {detail}")]
    Malformed { path: String, detail: String },
}

/// One configured row after marketplace resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountRow {
    Known(AccountConfig),
    UnknownMarketplace { account: String, marketplace: String },
}

/// Yields the ordered account list, re-read every cycle.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn load(&self) -> Result<Vec<AccountRow>, ConfigError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountsDocument {
    #[serde(default)]
    prompts: BTreeMap<String, String>,
    accounts: Vec<AccountEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountEntry {
    account: String,
    marketplace: String,
    ai_enabled: bool,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    ai_key: Option<String>,
    rating_threshold: f64,
    #[serde(default)]
    prompt_template: String,
}

/// Reads accounts and shared prompt texts from a YAML file.
#[derive(Debug, Clone)]
pub struct YamlAccountSource {
    path: PathBuf,
}

impl YamlAccountSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(&self, text: &str) -> Result<Vec<AccountRow>, ConfigError> {
        let malformed = |detail: String| ConfigError::Malformed {
            path: self.path.display().to_string(),
            detail,
        };
        let document: AccountsDocument =
            serde_yaml::from_str(text).map_err(|e| malformed(e.to_string()))?;
        if document.accounts.is_empty() {
            return Err(malformed("no accounts configured".to_string()));
        }
        Ok(resolve_accounts(document))
    }
}

#[async_trait]
impl AccountSource for YamlAccountSource {
    async fn load(&self) -> Result<Vec<AccountRow>, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Unreachable {
                path: self.path.display().to_string(),
                source,
            })?;
        self.parse(&text)
    }
}

/// Resolves marketplace names and drops repeated `(account, marketplace)` rows.
fn resolve_accounts(document: AccountsDocument) -> Vec<AccountRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(document.accounts.len());

    for entry in document.accounts {
        let account = entry.account.trim().to_string();
        let key = (
            account.clone(),
            entry.marketplace.trim().to_ascii_lowercase(),
        );
        let row = match Marketplace::parse(&entry.marketplace) {
            Some(marketplace) => {
                if !seen.insert((account.clone(), marketplace.as_str().to_string())) {
                    warn!(%account, %marketplace, "duplicate account row ignored");
                    continue;
                }
                AccountRow::Known(AccountConfig {
                    account,
                    marketplace,
                    ai_enabled: entry.ai_enabled,
                    api_key: entry.api_key.map(|k| k.trim().to_string()),
                    ai_key: entry.ai_key.map(|k| k.trim().to_string()),
                    rating_threshold: entry.rating_threshold,
                    prompt_template_key: entry.prompt_template.trim().to_string(),
                    prompt_options: document.prompts.clone(),
                })
            }
            None => {
                if !seen.insert(key) {
                    warn!(%account, marketplace = %entry.marketplace, "duplicate account row ignored");
                    continue;
                }
                AccountRow::UnknownMarketplace {
                    account,
                    marketplace: entry.marketplace,
                }
            }
        };
        rows.push(row);
    }
    rows
}
