//! Marketplace adapter contract and the Wildberries/Ozon implementations.

use std::sync::Arc;

use async_trait::async_trait;
use revreply_core::{AccountConfig, Marketplace, RawReview};
use revreply_storage::{CookieStore, HttpClientConfig, RequestError};
use thiserror::Error;

mod ozon;
mod wildberries;

pub use ozon::{OzonAdapter, OzonSettings};
pub use wildberries::{WildberriesAdapter, WildberriesSettings};

pub const CRATE_NAME: &str = "revreply-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{marketplace} credentials for account {account} are missing or rejected: {detail}")]
    Credentials {
        marketplace: Marketplace,
        account: String,
        detail: String,
    },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("unexpected {marketplace} payload: {detail}")]
    Payload {
        marketplace: Marketplace,
        detail: String,
    },
    #[error("{marketplace} did not accept the reply to review {review_id} (status {}): {detail}", status_label(.status))]
    Submission {
        marketplace: Marketplace,
        review_id: String,
        status: Option<u16>,
        detail: String,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub sent_chars: usize,
    pub truncated: bool,
}

#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn marketplace(&self) -> Marketplace;
    fn account(&self) -> &str;

    /// Published reviews rated strictly above `rating_threshold` that carry no answer yet.
    async fn fetch_qualifying_reviews(
        &self,
        rating_threshold: f64,
    ) -> Result<Vec<RawReview>, AdapterError>;

    /// Posts `text`, truncated to the marketplace limit. Any non-2xx outcome is a
    /// `AdapterError::Submission` carrying the status and response detail.
    async fn submit_response(&self, review_id: &str, text: &str)
        -> Result<SubmitReceipt, AdapterError>;
}

/// Transport and per-marketplace settings shared by every adapter built in a cycle.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub http: HttpClientConfig,
    pub wildberries: WildberriesSettings,
    pub ozon: OzonSettings,
}

/// Builds the adapter for `account`. Each call owns a fresh HTTP client and rate limiter.
pub fn build_adapter(
    account: &AccountConfig,
    settings: &AdapterSettings,
    cookies: Arc<CookieStore>,
) -> Result<Box<dyn MarketplaceAdapter>, AdapterError> {
    match account.marketplace {
        Marketplace::Wildberries => {
            let api_key = account
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or_else(|| AdapterError::Credentials {
                    marketplace: Marketplace::Wildberries,
                    account: account.account.clone(),
                    detail: "api key is not configured".to_string(),
                })?;
            Ok(Box::new(WildberriesAdapter::new(
                &account.account,
                api_key,
                settings.http.clone(),
                settings.wildberries.clone(),
            )?))
        }
        Marketplace::Ozon => Ok(Box::new(OzonAdapter::new(
            &account.account,
            cookies,
            settings.http.clone(),
            settings.ozon.clone(),
        )?)),
    }
}

/// Cuts `text` to at most `max_chars` characters, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

fn credentials_or_request(
    err: RequestError,
    marketplace: Marketplace,
    account: &str,
) -> AdapterError {
    match err.status() {
        Some(401) | Some(403) => AdapterError::Credentials {
            marketplace,
            account: account.to_string(),
            detail: err.to_string(),
        },
        _ => AdapterError::Request(err),
    }
}

fn submission_error(err: RequestError, marketplace: Marketplace, review_id: &str) -> AdapterError {
    let detail = match &err {
        RequestError::HttpStatus { body, .. } if !body.is_empty() => body.clone(),
        other => other.to_string(),
    };
    AdapterError::Submission {
        marketplace,
        review_id: review_id.to_string(),
        status: err.status(),
        detail,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn account(marketplace: Marketplace, api_key: Option<&str>) -> AccountConfig {
        AccountConfig {
            account: "111".into(),
            marketplace,
            ai_enabled: true,
            api_key: api_key.map(ToString::to_string),
            ai_key: Some("ai".into()),
            rating_threshold: 3.0,
            prompt_template_key: String::new(),
            prompt_options: BTreeMap::new(),
        }
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "я".repeat(10);
        let (cut, truncated) = truncate_chars(&text, 4);
        assert_eq!(cut.chars().count(), 4);
        assert!(truncated);

        let (same, truncated) = truncate_chars("short", 10);
        assert_eq!(same, "short");
        assert!(!truncated);
    }

    #[test]
    fn build_adapter_dispatches_on_marketplace() {
        let store = Arc::new(CookieStore::new("unused-cookies.json"));
        let settings = AdapterSettings::default();

        let wb = build_adapter(&account(Marketplace::Wildberries, Some("key")), &settings, store.clone())
            .unwrap();
        assert_eq!(wb.marketplace(), Marketplace::Wildberries);
        assert_eq!(wb.account(), "111");

        let ozon = build_adapter(&account(Marketplace::Ozon, None), &settings, store.clone()).unwrap();
        assert_eq!(ozon.marketplace(), Marketplace::Ozon);

        let err = build_adapter(&account(Marketplace::Wildberries, None), &settings, store)
            .err()
            .expect("missing key must fail");
        assert!(matches!(err, AdapterError::Credentials { .. }));
    }

    #[test]
    fn submission_errors_carry_status_and_body() {
        let err = submission_error(
            RequestError::HttpStatus {
                status: 422,
                url: "http://x".into(),
                body: "text too long".into(),
            },
            Marketplace::Ozon,
            "o-1",
        );
        let message = err.to_string();
        assert!(message.contains("422"), "got: {message}");
        assert!(message.contains("text too long"), "got: {message}");
    }
}
