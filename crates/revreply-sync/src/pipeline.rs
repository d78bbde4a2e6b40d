use std::sync::Arc;

use revreply_adapters::{build_adapter, AdapterError, AdapterSettings, MarketplaceAdapter};
use revreply_core::{AccountConfig, GeneratedResponse, Marketplace, SkipReason};
use revreply_responder::{
    build_prompt, validate, ChatCompletionClient, CompletionClient, CompletionSettings,
    GenerationError, ResponseGenerator, Verdict,
};
use revreply_storage::CookieStore;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::alerts::{AlertSink, Severity};

/// An error that ends one account's run for this cycle.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("AI client could not be created: {0}")]
    Generator(#[from] GenerationError),
}

/// Builds the per-account clients for a cycle.
pub trait ClientFactory: Send + Sync {
    fn adapter(&self, account: &AccountConfig) -> Result<Box<dyn MarketplaceAdapter>, AdapterError>;

    fn completion(
        &self,
        account: &AccountConfig,
    ) -> Result<Box<dyn CompletionClient>, GenerationError>;
}

/// Real marketplace adapters and an OpenAI-compatible completion client keyed by the
/// account's AI key.
pub struct DefaultClientFactory {
    pub adapters: AdapterSettings,
    pub completion: CompletionSettings,
    pub cookies: Arc<CookieStore>,
}

impl ClientFactory for DefaultClientFactory {
    fn adapter(&self, account: &AccountConfig) -> Result<Box<dyn MarketplaceAdapter>, AdapterError> {
        build_adapter(account, &self.adapters, self.cookies.clone())
    }

    fn completion(
        &self,
        account: &AccountConfig,
    ) -> Result<Box<dyn CompletionClient>, GenerationError> {
        let key = account.ai_key.as_deref().unwrap_or_default();
        Ok(Box::new(ChatCompletionClient::new(key, &self.completion)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountOutcome {
    Skipped { reason: SkipReason },
    Done,
    Failed { error: String },
}

/// What happened to one account during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub marketplace: Marketplace,
    pub outcome: AccountOutcome,
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub responses: Vec<GeneratedResponse>,
}

impl AccountReport {
    fn new(account: &AccountConfig, outcome: AccountOutcome) -> Self {
        Self {
            account: account.account.clone(),
            marketplace: account.marketplace,
            outcome,
            fetched: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            responses: Vec::new(),
        }
    }
}

/// Runs fetch, generate, validate and submit for one account.
#[derive(Clone)]
pub struct AccountPipeline {
    factory: Arc<dyn ClientFactory>,
    alerts: Arc<dyn AlertSink>,
}

impl AccountPipeline {
    pub fn new(factory: Arc<dyn ClientFactory>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { factory, alerts }
    }

    /// Never fails: account-level errors are logged, alerted and reported as `Failed`.
    pub async fn run(&self, account: &AccountConfig) -> AccountReport {
        let span = info_span!(
            "account",
            account = %account.account,
            marketplace = %account.marketplace
        );
        self.run_inner(account).instrument(span).await
    }

    async fn run_inner(&self, account: &AccountConfig) -> AccountReport {
        if let Some(reason) = account.skip_reason() {
            info!(%reason, "account skipped");
            return AccountReport::new(account, AccountOutcome::Skipped { reason });
        }

        let mut report = AccountReport::new(account, AccountOutcome::Done);
        if let Err(err) = self.process(account, &mut report).await {
            error!(error = ?err, "account run failed");
            self.alerts
                .send(
                    &format!(
                        "Error when processing [{}] [{}]: {err}. The loop continues with the next account.",
                        account.account, account.marketplace
                    ),
                    Severity::Error,
                )
                .await;
            report.outcome = AccountOutcome::Failed {
                error: err.to_string(),
            };
        }

        info!(
            fetched = report.fetched,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "account run finished"
        );
        report
    }

    async fn process(
        &self,
        account: &AccountConfig,
        report: &mut AccountReport,
    ) -> Result<(), AccountError> {
        let adapter = self.factory.adapter(account)?;
        let generator = ResponseGenerator::new(self.factory.completion(account)?);

        let reviews = adapter
            .fetch_qualifying_reviews(account.rating_threshold)
            .await?;
        report.fetched = reviews.len();
        info!(count = reviews.len(), "unanswered reviews fetched");

        let mandatory = account.mandatory_prompt().unwrap_or_default();
        let template = account.template_prompt();

        for raw in &reviews {
            let review = match raw.normalize() {
                Ok(review) => review,
                Err(err) => {
                    warn!(error = %err, "malformed review skipped");
                    report.skipped += 1;
                    continue;
                }
            };
            let review_id = review.id();
            if !account.qualifies(review.rating()) {
                debug!(review_id, rating = review.rating(), "review below threshold skipped");
                report.skipped += 1;
                continue;
            }

            let prompt = build_prompt(mandatory, template, &review);
            let text = match generator.generate(&prompt).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(review_id, error = %err, "reply generation failed");
                    report.failed += 1;
                    continue;
                }
            };
            if let Verdict::Reject(reason) = validate(&text) {
                warn!(review_id, %reason, "generated reply rejected by quality gate");
                report.skipped += 1;
                continue;
            }

            let mut response = GeneratedResponse::pending(review_id, text);
            match adapter.submit_response(review_id, &response.text).await {
                Ok(receipt) => {
                    response.mark_sent();
                    report.sent += 1;
                    info!(
                        review_id,
                        chars = receipt.sent_chars,
                        truncated = receipt.truncated,
                        "reply sent"
                    );
                }
                Err(err) => {
                    error!(review_id, error = %err, "reply submission failed");
                    response.mark_failed(err.to_string());
                    report.failed += 1;
                }
            }
            report.responses.push(response);
        }
        Ok(())
    }
}
