use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use revreply_core::{json_f64, json_str, Marketplace, RawReview};
use revreply_storage::{
    parse_set_cookie_headers, render_cookie_header, CookieJar, CookieStore, HeaderMap,
    HttpClient, HttpClientConfig, HttpResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::{
    credentials_or_request, submission_error, truncate_chars, AdapterError, MarketplaceAdapter,
    SubmitReceipt,
};

const UNVIEWED: &str = "NOT_VIEWED";

#[derive(Debug, Clone)]
pub struct OzonSettings {
    pub base_url: String,
    pub max_pages: usize,
    pub min_request_interval: Duration,
    /// The seller endpoints only answer browser-shaped requests.
    pub user_agent: String,
}

impl Default for OzonSettings {
    fn default() -> Self {
        Self {
            base_url: "https://seller.ozon.ru".to_string(),
            max_pages: 10,
            min_request_interval: Duration::from_secs(2),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewListPage {
    #[serde(default)]
    result: Vec<JsonValue>,
    #[serde(default)]
    pagination_last_timestamp: JsonValue,
    #[serde(default)]
    pagination_last_uuid: JsonValue,
    #[serde(default)]
    has_next: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CommentCreateRequest<'a> {
    text: &'a str,
    review_uuid: &'a str,
    company_type: &'a str,
    company_id: &'a str,
}

/// Ozon seller-UI review API. Authenticates with the account's cookie jar from the
/// shared store. Cookies rotated by any response, including failed attempts, are used
/// by the next attempt and written back to the store.
pub struct OzonAdapter {
    company_id: String,
    store: Arc<CookieStore>,
    session: Mutex<Option<CookieJar>>,
    http: HttpClient,
    settings: OzonSettings,
}

impl OzonAdapter {
    pub fn new(
        company_id: &str,
        store: Arc<CookieStore>,
        http: HttpClientConfig,
        settings: OzonSettings,
    ) -> Result<Self, AdapterError> {
        let http = HttpClient::new(HttpClientConfig {
            min_request_interval: settings.min_request_interval,
            user_agent: Some(settings.user_agent.clone()),
            ..http
        })?;
        Ok(Self {
            company_id: company_id.to_string(),
            store,
            session: Mutex::new(None),
            http,
            settings,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), endpoint)
    }

    fn session(&self) -> MutexGuard<'_, Option<CookieJar>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loads the account's jar from the store on first use.
    async fn ensure_session(&self) -> Result<(), AdapterError> {
        if self.session().is_some() {
            return Ok(());
        }
        let jar = self
            .store
            .get(&self.company_id)
            .await?
            .filter(|jar| !jar.is_empty())
            .ok_or_else(|| AdapterError::Credentials {
                marketplace: Marketplace::Ozon,
                account: self.company_id.clone(),
                detail: format!("no cookies stored in {}", self.store.path().display()),
            })?;
        *self.session() = Some(jar);
        Ok(())
    }

    fn cookie_header(&self) -> String {
        self.session()
            .as_ref()
            .map(render_cookie_header)
            .unwrap_or_default()
    }

    /// Applies rotated cookies to the session, then persists them. A failed store write
    /// is logged; the in-memory session keeps the request flow authenticated.
    async fn absorb_cookies(&self, headers: HeaderMap) {
        let renewed = parse_set_cookie_headers(&headers);
        if renewed.is_empty() {
            return;
        }
        self.session()
            .get_or_insert_with(CookieJar::new)
            .extend(renewed.iter().map(|(k, v)| (k.clone(), v.clone())));
        debug!(account = %self.company_id, renewed = renewed.len(), "ozon cookies rotated");

        if let Err(err) = self.store.merge(&self.company_id, &renewed).await {
            warn!(account = %self.company_id, error = ?err, "failed to persist rotated ozon cookies");
        }
    }

    /// Sends an authenticated seller-UI request and absorbs rotated cookies.
    async fn send_authenticated(
        &self,
        operation: &str,
        endpoint: &str,
        body: &JsonValue,
    ) -> Result<HttpResponse, AdapterError> {
        self.ensure_session().await?;
        let url = self.url(endpoint);
        let origin = self.settings.base_url.trim_end_matches('/').to_string();
        let referer = format!("{origin}/app/reviews");

        let resp = self
            .http
            .send_observed(
                operation,
                |c| {
                    c.post(&url)
                        .header("accept", "application/json, text/plain, */*")
                        .header("accept-language", "ru")
                        .header("cookie", self.cookie_header())
                        .header("origin", &origin)
                        .header("referer", &referer)
                        .header("x-o3-app-name", "seller-ui")
                        .header("x-o3-company-id", &self.company_id)
                        .header("x-o3-language", "ru")
                        .header("x-o3-page-type", "review")
                        .json(body)
                },
                |headers| self.absorb_cookies(headers),
            )
            .await?;
        Ok(resp)
    }

    fn qualifies(review: &JsonValue, rating_threshold: f64) -> bool {
        let unviewed = json_str(review, &["interaction_status"])
            .map(|status| status == UNVIEWED)
            .unwrap_or(true);
        let above_threshold = json_f64(review, &["rating"])
            .map(|rating| rating > rating_threshold)
            .unwrap_or(true);
        unviewed && above_threshold
    }
}

/// Ratings the server-side filter asks for: whole stars strictly above the threshold.
fn rating_filter(rating_threshold: f64) -> Vec<u8> {
    (1..=5u8)
        .filter(|r| f64::from(*r) > rating_threshold)
        .collect()
}

#[async_trait]
impl MarketplaceAdapter for OzonAdapter {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Ozon
    }

    fn account(&self) -> &str {
        &self.company_id
    }

    async fn fetch_qualifying_reviews(
        &self,
        rating_threshold: f64,
    ) -> Result<Vec<RawReview>, AdapterError> {
        let ratings = rating_filter(rating_threshold);
        if ratings.is_empty() {
            return Ok(Vec::new());
        }

        let mut cursor = (JsonValue::Null, JsonValue::Null);
        let mut collected = Vec::new();

        for page_no in 0..self.settings.max_pages.max(1) {
            let body = json!({
                "with_counters": false,
                "sort": {"sort_by": "PUBLISHED_AT", "sort_direction": "DESC"},
                "company_type": "seller",
                "filter": {"rating": ratings, "interaction_status": [UNVIEWED]},
                "company_id": self.company_id,
                "pagination_last_timestamp": cursor.0,
                "pagination_last_uuid": cursor.1,
            });
            let resp = self
                .send_authenticated("ozon_list_reviews", "/api/v3/review/list", &body)
                .await
                .map_err(|e| match e {
                    AdapterError::Request(err) => {
                        credentials_or_request(err, Marketplace::Ozon, &self.company_id)
                    }
                    other => other,
                })?;

            let page: ReviewListPage = resp.json()?;
            let page_len = page.result.len();
            debug!(account = %self.company_id, page_no, page_len, "ozon page");
            collected.extend(page.result);

            let next = (page.pagination_last_timestamp, page.pagination_last_uuid);
            let exhausted = page_len == 0
                || page.has_next == Some(false)
                || next.1.is_null()
                || next == cursor;
            if exhausted {
                break;
            }
            cursor = next;
        }

        let received = collected.len();
        let reviews: Vec<RawReview> = collected
            .into_iter()
            .filter(|review| Self::qualifies(review, rating_threshold))
            .map(|review| RawReview::new(Marketplace::Ozon, review))
            .collect();

        info!(
            account = %self.company_id,
            marketplace = "ozon",
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
        let (text, truncated) = truncate_chars(text, Marketplace::Ozon.max_response_chars());
        let body = serde_json::to_value(CommentCreateRequest {
            text,
            review_uuid: review_id,
            company_type: "seller",
            company_id: &self.company_id,
        })
        .map_err(|e| AdapterError::Payload {
            marketplace: Marketplace::Ozon,
            detail: e.to_string(),
        })?;

        self.send_authenticated("ozon_create_comment", "/api/review/comment/create", &body)
            .await
            .map_err(|e| match e {
                AdapterError::Request(err) => submission_error(err, Marketplace::Ozon, review_id),
                other => other,
            })?;

        Ok(SubmitReceipt {
            sent_chars: text.chars().count(),
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_http, fixture_json};
    use tempfile::TempDir;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn store_with_accounts(dir: &TempDir) -> Arc<CookieStore> {
        let path = dir.path().join("ozon_cookies.json");
        std::fs::write(
            &path,
            r#"{
                "111": {"__Secure-access-token": "initial", "abt_data": "keep"},
                "222": {"__Secure-access-token": "other-account"}
            }"#,
        )
        .unwrap();
        Arc::new(CookieStore::new(path))
    }

    fn adapter(server: &MockServer, store: Arc<CookieStore>, company_id: &str) -> OzonAdapter {
        OzonAdapter::new(
            company_id,
            store,
            fast_http(),
            OzonSettings {
                base_url: server.uri(),
                min_request_interval: Duration::ZERO,
                ..OzonSettings::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn server_side_rating_filter_is_strict() {
        assert_eq!(rating_filter(3.0), vec![4, 5]);
        assert_eq!(rating_filter(2.99), vec![3, 4, 5]);
        assert!(rating_filter(5.0).is_empty());
    }

    #[tokio::test]
    async fn fetch_follows_cursor_and_rotates_cookies_for_its_account_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/review/list"))
            .and(body_partial_json(serde_json::json!({
                "company_id": "111",
                "pagination_last_uuid": null,
                "filter": {"rating": [4, 5], "interaction_status": ["NOT_VIEWED"]}
            })))
            .and(header("cookie", "__Secure-access-token=initial; abt_data=keep"))
            .and(header("x-o3-company-id", "111"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "__Secure-access-token=rotated; Path=/; HttpOnly")
                    .set_body_json(fixture_json("ozon/review_list_page1.json")),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v3/review/list"))
            .and(body_partial_json(serde_json::json!({"pagination_last_uuid": "o-2"})))
            .and(header("cookie", "__Secure-access-token=rotated; abt_data=keep"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(fixture_json("ozon/review_list_page2.json")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with_accounts(&dir);
        let reviews = adapter(&server, store.clone(), "111")
            .fetch_qualifying_reviews(3.0)
            .await
            .unwrap();

        let ids: Vec<_> = reviews.iter().filter_map(RawReview::id_hint).collect();
        // o-2 is at the threshold, o-4 was already processed
        assert_eq!(ids, vec!["o-1", "o-3"]);

        let own = store.get("111").await.unwrap().unwrap();
        assert_eq!(own.get("__Secure-access-token").map(String::as_str), Some("rotated"));
        assert_eq!(own.get("abt_data").map(String::as_str), Some("keep"));
        let other = store.get("222").await.unwrap().unwrap();
        assert_eq!(
            other.get("__Secure-access-token").map(String::as_str),
            Some("other-account")
        );
    }

    #[tokio::test]
    async fn cookies_rotated_by_a_failed_attempt_are_used_by_the_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/review/list"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("set-cookie", "__Secure-access-token=rotated; Path=/; HttpOnly"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v3/review/list"))
            .and(header("cookie", "__Secure-access-token=rotated; abt_data=keep"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(fixture_json("ozon/review_list_page2.json")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with_accounts(&dir);
        adapter(&server, store.clone(), "111")
            .fetch_qualifying_reviews(3.0)
            .await
            .unwrap();

        let own = store.get("111").await.unwrap().unwrap();
        assert_eq!(own.get("__Secure-access-token").map(String::as_str), Some("rotated"));
    }

    /// Accepts the comment but leaves the cookie file unreadable before the rotation lands.
    struct CorruptStoreThenAccept(PathBuf);

    impl Respond for CorruptStoreThenAccept {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            std::fs::write(&self.0, "not json").unwrap();
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "__Secure-access-token=rotated; Path=/")
                .set_body_json(serde_json::json!({"result": true}))
        }
    }

    #[tokio::test]
    async fn published_comment_survives_a_cookie_store_write_failure() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_accounts(&dir);
        Mock::given(method("POST"))
            .and(path("/api/review/comment/create"))
            .respond_with(CorruptStoreThenAccept(store.path().to_path_buf()))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = adapter(&server, store.clone(), "111")
            .submit_response("o-1", "Спасибо за отзыв!")
            .await
            .unwrap();
        assert!(!receipt.truncated);
        assert!(store.get("111").await.is_err());
    }

    #[tokio::test]
    async fn missing_cookie_entry_is_a_credentials_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_accounts(&dir);

        let err = adapter(&server, store, "999")
            .fetch_qualifying_reviews(3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Credentials { .. }), "got: {err}");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_session_is_a_credentials_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/review/list"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = adapter(&server, store_with_accounts(&dir), "111")
            .fetch_qualifying_reviews(3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Credentials { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn submit_truncates_to_two_thousand_characters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/review/comment/create"))
            .and(body_partial_json(serde_json::json!({
                "review_uuid": "o-1",
                "company_id": "111",
                "company_type": "seller"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let receipt = adapter(&server, store_with_accounts(&dir), "111")
            .submit_response("o-1", &"x".repeat(2500))
            .await
            .unwrap();
        assert_eq!(receipt.sent_chars, 2000);
        assert!(receipt.truncated);

        let requests = server.received_requests().await.unwrap();
        let body: JsonValue = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["text"].as_str().unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn rejected_comment_is_a_typed_submission_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/review/comment/create"))
            .respond_with(ResponseTemplate::new(409).set_body_string("comment exists"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = adapter(&server, store_with_accounts(&dir), "111")
            .submit_response("o-1", "Спасибо за отзыв!")
            .await
            .unwrap_err();
        assert!(
            matches!(err, AdapterError::Submission { status: Some(409), .. }),
            "got: {err}"
        );
    }
}
