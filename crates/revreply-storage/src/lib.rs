//! HTTP transport with retry/backoff/rate limiting, plus the shared Ozon cookie store.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
pub use reqwest::header::HeaderMap;
use reqwest::header::SET_COOKIE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "revreply-storage";

/// Longest slice of an error body carried in a `RequestError`.
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded exponential backoff: `max_attempts` tries in total, never sleeping more
/// than `max_total_wait` across all retries of one request.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            max_total_wait: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry_index` (0 = first retry).
    pub fn delay_for_attempt(&self, retry_index: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Delay before the next try, or `None` once attempts or the wait budget are spent.
    pub fn next_delay(&self, attempts_made: u32, waited: Duration) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for_attempt(attempts_made.saturating_sub(1));
        let remaining = self.max_total_wait.saturating_sub(waited);
        if remaining.is_zero() {
            return None;
        }
        Some(delay.min(remaining))
    }
}

/// Minimum spacing between consecutive requests issued through one limiter.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Sleeps for whatever is left of the minimum interval, then stamps the request time.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub min_request_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            min_request_interval: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|source| RequestError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading response body from {url} failed after {attempts} attempt(s): {source}")]
    Body {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// Network failures, 5xx and 429 are transient; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                classify_reqwest_error(source) == RetryDisposition::Retryable
            }
            // the connection dropped mid-body
            Self::Body { .. } => true,
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
            Self::Decode { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One HTTP client per adapter instance: its rate limiter state is never shared.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(config.min_request_interval),
            backoff: config.backoff,
        })
    }

    /// Sends the request built by `build`, rate limited and retried on transient failures.
    /// `build` is called once per attempt.
    pub async fn send<F>(&self, operation: &str, build: F) -> Result<HttpResponse, RequestError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_observed(operation, build, |_: HeaderMap| async {}).await
    }

    /// Like [`HttpClient::send`], but `observe` receives the headers of every response,
    /// successful or not, and is awaited before the body is read or the next attempt is built.
    pub async fn send_observed<F, O, Fut>(
        &self,
        operation: &str,
        build: F,
        observe: O,
    ) -> Result<HttpResponse, RequestError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
        O: Fn(HeaderMap) -> Fut,
        Fut: Future<Output = ()>,
    {
        let span = info_span!("http_request", operation);
        self.send_with_retry(build, observe).instrument(span).await
    }

    async fn send_with_retry<F, O, Fut>(
        &self,
        build: F,
        observe: O,
    ) -> Result<HttpResponse, RequestError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
        O: Fn(HeaderMap) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            self.limiter.wait().await;
            attempts += 1;

            let error = match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    let headers = resp.headers().clone();
                    debug!(status = %status, attempt = attempts, %url, "response received");
                    observe(headers.clone()).await;

                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(body) => {
                                return Ok(HttpResponse {
                                    status,
                                    url,
                                    headers,
                                    body: body.to_vec(),
                                })
                            }
                            Err(source) => RequestError::Body {
                                url,
                                attempts,
                                source,
                            },
                        }
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        RequestError::HttpStatus {
                            status: status.as_u16(),
                            url,
                            body: body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
                        }
                    }
                }
                Err(source) => RequestError::Transport {
                    url: source
                        .url()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "<unknown>".to_string()),
                    attempts,
                    source,
                },
            };

            if !error.is_transient() {
                return Err(error);
            }
            let Some(delay) = self.backoff.next_delay(attempts, waited) else {
                return Err(error);
            };
            warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %error, "transient failure, retrying");
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}

pub type CookieJar = BTreeMap<String, String>;

/// Collects `name=value` pairs from every `Set-Cookie` header, ignoring attributes.
pub fn parse_set_cookie_headers(headers: &HeaderMap) -> CookieJar {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| {
            let pair = value.split(';').next()?.trim();
            let (name, val) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), val.trim().to_string()))
            }
        })
        .collect()
}

pub fn render_cookie_header(jar: &CookieJar) -> String {
    jar.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// JSON file of cookie jars keyed by account. Each read-modify-write touches one key
/// under that key's lock and rewrites the file atomically from its current contents,
/// so a rotation for one account never overwrites another account's entry.
#[derive(Debug)]
pub struct CookieStore {
    path: PathBuf,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    file_lock: Mutex<()>,
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_locks: Mutex::new(HashMap::new()),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.key_locks.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<CookieJar>> {
        let lock = self.key_lock(key).await;
        let _key_guard = lock.lock().await;
        let _file_guard = self.file_lock.lock().await;
        let mut all = self.read_all().await?;
        Ok(all.remove(key))
    }

    /// Merges `updates` into the jar stored under `key` and returns the merged jar.
    pub async fn merge(&self, key: &str, updates: &CookieJar) -> anyhow::Result<CookieJar> {
        let lock = self.key_lock(key).await;
        let _key_guard = lock.lock().await;
        let _file_guard = self.file_lock.lock().await;

        let mut all = self.read_all().await?;
        let jar = all.entry(key.to_string()).or_default();
        jar.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        let merged = jar.clone();
        self.write_all(&all).await?;
        Ok(merged)
    }

    async fn read_all(&self) -> anyhow::Result<BTreeMap<String, CookieJar>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking cookie store {}", self.path.display()))?
        {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading cookie store {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text)
            .with_context(|| format!("parsing cookie store {}", self.path.display()))
    }

    async fn write_all(&self, all: &BTreeMap<String, CookieJar>) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(all).context("serializing cookie store")?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating cookie store directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.cookies.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp cookie file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp cookie file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp cookie file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client() -> HttpClient {
        HttpClient::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("revreply-test".into()),
            min_request_interval: Duration::ZERO,
            backoff: BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                max_total_wait: Duration::from_millis(100),
            },
        })
        .unwrap()
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_total_wait: Duration::from_secs(30),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn backoff_stops_at_attempt_limit_and_wait_budget() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next_delay(1, Duration::ZERO), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2, Duration::from_secs(2)), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3, Duration::from_secs(6)), None);

        let tight = BackoffPolicy {
            max_total_wait: Duration::from_secs(3),
            ..BackoffPolicy::default()
        };
        assert_eq!(tight.next_delay(2, Duration::from_secs(2)), Some(Duration::from_secs(1)));
        assert_eq!(tight.next_delay(2, Duration::from_secs(3)), None);
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), RetryDisposition::NonRetryable);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_consecutive_requests() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn transient_statuses_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let client = fast_client();
        let url = format!("{}/flaky", server.uri());
        let resp = client.send("flaky", |c| c.get(&url)).await.unwrap();
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    /// Serves raw HTTP: the first `broken` connections promise 100 bytes and send 3.
    async fn truncating_server(broken: usize) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/page", listener.local_addr().unwrap());
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let response: &[u8] = if n < broken {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"o"
                } else {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}"
                };
                socket.write_all(response).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (url, served)
    }

    #[tokio::test]
    async fn truncated_bodies_are_retried() {
        let (url, served) = truncating_server(2).await;

        let resp = fast_client().send("page", |c| c.get(&url)).await.unwrap();
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(served.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn truncated_bodies_give_up_with_a_body_error() {
        let (url, served) = truncating_server(usize::MAX).await;

        let err = fast_client().send("page", |c| c.get(&url)).await.unwrap_err();
        assert!(matches!(err, RequestError::Body { attempts: 3, .. }), "got: {err}");
        assert!(err.is_transient());
        assert_eq!(served.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn observer_sees_headers_of_failed_attempts_before_the_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rotating"))
            .respond_with(ResponseTemplate::new(503).insert_header("set-cookie", "token=second"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rotating"))
            .and(wiremock::matchers::header("cookie", "token=second"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let jar = std::sync::Mutex::new(CookieJar::from([("token".to_string(), "first".to_string())]));
        let url = format!("{}/rotating", server.uri());
        let resp = fast_client()
            .send_observed(
                "rotating",
                |c| {
                    let cookie = render_cookie_header(&jar.lock().unwrap());
                    c.get(&url).header("cookie", cookie)
                },
                |headers| {
                    jar.lock().unwrap().extend(parse_set_cookie_headers(&headers));
                    async {}
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_transient_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client();
        let url = format!("{}/auth", server.uri());
        let err = client.send("auth", |c| c.get(&url)).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad token"), "got: {err}");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client();
        let url = format!("{}/down", server.uri());
        let err = client.send("down", |c| c.get(&url)).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn set_cookie_headers_are_reduced_to_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("__Secure-access-token=abc; Path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("abt_data=xyz; Max-Age=3600"));
        let jar = parse_set_cookie_headers(&headers);
        assert_eq!(jar.get("__Secure-access-token").map(String::as_str), Some("abc"));
        assert_eq!(jar.get("abt_data").map(String::as_str), Some("xyz"));
        assert_eq!(render_cookie_header(&jar), "__Secure-access-token=abc; abt_data=xyz");
    }

    #[tokio::test]
    async fn cookie_merge_touches_only_its_own_key() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cookies.json");
        std::fs::write(
            &path,
            r#"{"111": {"session": "old", "keep": "1"}, "222": {"session": "other"}}"#,
        )
        .unwrap();

        let store = CookieStore::new(&path);
        let merged = store
            .merge("111", &CookieJar::from([("session".to_string(), "new".to_string())]))
            .await
            .unwrap();
        assert_eq!(merged.get("session").map(String::as_str), Some("new"));
        assert_eq!(merged.get("keep").map(String::as_str), Some("1"));

        let other = store.get("222").await.unwrap().unwrap();
        assert_eq!(other.get("session").map(String::as_str), Some("other"));
        assert!(store.get("333").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_merges_for_different_keys_are_not_lost() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(CookieStore::new(dir.path().join("cookies.json")));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let jar = CookieJar::from([("token".to_string(), format!("t{i}"))]);
                store.merge(&format!("acct-{i}"), &jar).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            let jar = store.get(&format!("acct-{i}")).await.unwrap().unwrap();
            assert_eq!(jar.get("token"), Some(&format!("t{i}")));
        }
    }
}
