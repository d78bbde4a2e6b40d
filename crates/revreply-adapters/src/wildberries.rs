use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use revreply_core::{json_at, json_f64, json_str, Marketplace, RawReview};
use revreply_storage::{HttpClient, HttpClientConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{
    credentials_or_request, submission_error, truncate_chars, AdapterError, MarketplaceAdapter,
    SubmitReceipt,
};

#[derive(Debug, Clone)]
pub struct WildberriesSettings {
    pub base_url: String,
    /// Records requested per page; the feedbacks API caps `take` at 5000.
    pub page_size: usize,
    pub max_pages: usize,
    /// Moderation states that count as published.
    pub published_states: Vec<String>,
    pub min_request_interval: Duration,
}

impl Default for WildberriesSettings {
    fn default() -> Self {
        Self {
            base_url: "https://feedbacks-api.wildberries.ru".to_string(),
            page_size: 5000,
            max_pages: 1,
            published_states: vec!["wbRu".to_string()],
            min_request_interval: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedbacksEnvelope {
    #[serde(default)]
    data: Option<FeedbacksData>,
    #[serde(default)]
    error: bool,
    #[serde(default, rename = "errorText")]
    error_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedbacksData {
    #[serde(default)]
    feedbacks: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    id: &'a str,
    text: &'a str,
}

pub struct WildberriesAdapter {
    account: String,
    api_key: String,
    http: HttpClient,
    settings: WildberriesSettings,
}

impl WildberriesAdapter {
    pub fn new(
        account: &str,
        api_key: &str,
        http: HttpClientConfig,
        settings: WildberriesSettings,
    ) -> Result<Self, AdapterError> {
        let http = HttpClient::new(HttpClientConfig {
            min_request_interval: settings.min_request_interval,
            ..http
        })?;
        Ok(Self {
            account: account.to_string(),
            api_key: api_key.to_string(),
            http,
            settings,
        })
    }

    async fn fetch_view(&self, is_answered: bool) -> Result<Vec<JsonValue>, AdapterError> {
        let url = format!(
            "{}/api/v1/feedbacks",
            self.settings.base_url.trim_end_matches('/')
        );
        let take = self.settings.page_size.clamp(1, 5000);
        let mut out = Vec::new();

        for page in 0..self.settings.max_pages.max(1) {
            let skip = page * take;
            let query = [
                ("isAnswered", is_answered.to_string()),
                ("take", take.to_string()),
                ("skip", skip.to_string()),
                ("order", "dateDesc".to_string()),
            ];
            let resp = self
                .http
                .send("wb_list_feedbacks", |c| {
                    c.get(&url)
                        .header("Authorization", &self.api_key)
                        .query(&query)
                })
                .await
                .map_err(|e| credentials_or_request(e, Marketplace::Wildberries, &self.account))?;

            let envelope: FeedbacksEnvelope = resp.json()?;
            if envelope.error {
                return Err(AdapterError::Payload {
                    marketplace: Marketplace::Wildberries,
                    detail: envelope
                        .error_text
                        .unwrap_or_else(|| "error flag set without text".to_string()),
                });
            }
            let feedbacks = envelope.data.map(|d| d.feedbacks).unwrap_or_default();
            let page_len = feedbacks.len();
            debug!(account = %self.account, is_answered, skip, page_len, "wildberries page");
            out.extend(feedbacks);
            if page_len < take {
                break;
            }
        }
        Ok(out)
    }

    fn qualifies(&self, feedback: &JsonValue, rating_threshold: f64) -> bool {
        let published = json_str(feedback, &["state"])
            .map(|state| self.settings.published_states.iter().any(|s| s == state))
            .unwrap_or(false);
        // unreadable ratings pass through so normalization can report them
        let above_threshold = json_f64(feedback, &["productValuation"])
            .map(|rating| rating > rating_threshold)
            .unwrap_or(true);
        published && above_threshold && !has_answer(feedback)
    }
}

/// An answer counts only when it actually carries text.
fn has_answer(feedback: &JsonValue) -> bool {
    match json_at(feedback, &["answer"]) {
        None | Some(JsonValue::Null) => false,
        Some(answer) => json_str(answer, &["text"])
            .map(|t| !t.trim().is_empty())
            .unwrap_or(true),
    }
}

#[async_trait]
impl MarketplaceAdapter for WildberriesAdapter {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Wildberries
    }

    fn account(&self) -> &str {
        &self.account
    }

    /// Queries the unanswered view and the answered view (which also returns feedbacks
    /// flagged answered without an answer), then filters and de-duplicates by id.
    async fn fetch_qualifying_reviews(
        &self,
        rating_threshold: f64,
    ) -> Result<Vec<RawReview>, AdapterError> {
        let mut all = self.fetch_view(false).await?;
        all.extend(self.fetch_view(true).await?);
        let received = all.len();

        let mut seen = HashSet::new();
        let reviews: Vec<RawReview> = all
            .into_iter()
            .filter(|feedback| self.qualifies(feedback, rating_threshold))
            .map(|feedback| RawReview::new(Marketplace::Wildberries, feedback))
            .filter(|raw| match raw.id_hint() {
                Some(id) => seen.insert(id),
                None => true,
            })
            .collect();

        info!(
            account = %self.account,
            marketplace = "wildberries",
            received,
            qualifying = reviews.len(),
            "fetched reviews"
        );
        Ok(reviews)
    }

    async fn submit_response(
        &self,
        review_id: &str,
        text: &str,
    ) -> Result<SubmitReceipt, AdapterError> {
        let (text, truncated) = truncate_chars(text, Marketplace::Wildberries.max_response_chars());
        let url = format!(
            "{}/api/v1/feedbacks/answer",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = AnswerRequest {
            id: review_id,
            text,
        };

        self.http
            .send("wb_post_answer", |c| {
                c.post(&url)
                    .header("Authorization", &self.api_key)
                    .json(&body)
            })
            .await
            .map_err(|e| submission_error(e, Marketplace::Wildberries, review_id))?;

        Ok(SubmitReceipt {
            sent_chars: text.chars().count(),
            truncated,
        })
    }
}
