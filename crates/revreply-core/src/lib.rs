//! Canonical review model and account settings shared by every revreply layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "revreply-core";

/// Reserved prompt key whose text is prepended to every assembled prompt.
pub const MANDATORY_PROMPT_KEY: &str = "mandatory";

/// Placeholder Ozon shows instead of the author when the customer hides their name.
pub const OZON_HIDDEN_AUTHOR: &str = "Пользователь предпочёл скрыть свои данные";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Wildberries,
    Ozon,
}

impl Marketplace {
    /// Resolves a configuration-sheet marketplace name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "wb" | "wildberries" => Some(Self::Wildberries),
            "ozon" => Some(Self::Ozon),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wildberries => "wildberries",
            Self::Ozon => "ozon",
        }
    }

    /// Longest reply the marketplace accepts; longer replies are truncated, not rejected.
    pub fn max_response_chars(&self) -> usize {
        match self {
            Self::Wildberries => 5000,
            Self::Ozon => 2000,
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("malformed {marketplace} review{}: field `{field}` {problem}", review_id_suffix(.review_id))]
    Malformed {
        marketplace: Marketplace,
        review_id: Option<String>,
        field: &'static str,
        problem: String,
    },
}

fn review_id_suffix(review_id: &Option<String>) -> String {
    match review_id {
        Some(id) => format!(" {id}"),
        None => String::new(),
    }
}

impl ReviewError {
    fn missing(marketplace: Marketplace, review_id: Option<&str>, field: &'static str) -> Self {
        Self::Malformed {
            marketplace,
            review_id: review_id.map(ToString::to_string),
            field,
            problem: "is missing".to_string(),
        }
    }

    fn invalid(
        marketplace: Marketplace,
        review_id: Option<&str>,
        field: &'static str,
        problem: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            marketplace,
            review_id: review_id.map(ToString::to_string),
            field,
            problem: problem.into(),
        }
    }
}

/// Marketplace record exactly as the adapter received it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReview {
    pub marketplace: Marketplace,
    pub payload: JsonValue,
}

impl RawReview {
    pub fn new(marketplace: Marketplace, payload: JsonValue) -> Self {
        Self {
            marketplace,
            payload,
        }
    }

    /// Best-effort identifier used for logging before normalization succeeds.
    pub fn id_hint(&self) -> Option<String> {
        let key = match self.marketplace {
            Marketplace::Wildberries => "id",
            Marketplace::Ozon => "uuid",
        };
        json_id(&self.payload, &[key])
    }

    pub fn normalize(&self) -> Result<Review, ReviewError> {
        Review::from_raw(self)
    }
}

/// Canonical review. Immutable once constructed; only the identifying fields are mandatory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    id: String,
    marketplace: Marketplace,
    text: String,
    rating: f64,
    created_at: DateTime<Utc>,
    author_name: Option<String>,
    product_name: Option<String>,
    pros: Option<String>,
    cons: Option<String>,
    raw_payload: JsonValue,
}

impl Review {
    pub fn from_raw(raw: &RawReview) -> Result<Self, ReviewError> {
        match raw.marketplace {
            Marketplace::Wildberries => Self::from_wildberries(&raw.payload),
            Marketplace::Ozon => Self::from_ozon(&raw.payload),
        }
    }

    /// Normalizes a record of the Wildberries feedbacks API.
    pub fn from_wildberries(payload: &JsonValue) -> Result<Self, ReviewError> {
        let mp = Marketplace::Wildberries;
        let id = json_id(payload, &["id"]).ok_or_else(|| ReviewError::missing(mp, None, "id"))?;
        let rating = required_rating(payload, mp, &id, "productValuation")?;
        let created_at = required_timestamp(payload, mp, &id, "createdDate")?;

        Ok(Self {
            marketplace: mp,
            text: json_text(payload, &["text"]).unwrap_or_default(),
            rating,
            created_at,
            author_name: json_text(payload, &["userName"]),
            product_name: json_text(payload, &["productDetails", "productName"]),
            pros: json_text(payload, &["pros"]),
            cons: json_text(payload, &["cons"]),
            raw_payload: payload.clone(),
            id,
        })
    }

    /// Normalizes a record of the Ozon seller review list.
    pub fn from_ozon(payload: &JsonValue) -> Result<Self, ReviewError> {
        let mp = Marketplace::Ozon;
        let id = json_id(payload, &["uuid"]).ok_or_else(|| ReviewError::missing(mp, None, "uuid"))?;
        let rating = required_rating(payload, mp, &id, "rating")?;
        let created_at = required_timestamp(payload, mp, &id, "published_at")?;
        let author_name =
            json_text(payload, &["author_name"]).filter(|name| name != OZON_HIDDEN_AUTHOR);

        Ok(Self {
            marketplace: mp,
            text: json_text(payload, &["text", "comment"]).unwrap_or_default(),
            rating,
            created_at,
            author_name,
            product_name: json_text(payload, &["product", "title"]),
            pros: json_text(payload, &["text", "positive"]),
            cons: json_text(payload, &["text", "negative"]),
            raw_payload: payload.clone(),
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rating(&self) -> f64 {
        self.rating
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author_name.as_deref()
    }

    pub fn product_name(&self) -> Option<&str> {
        self.product_name.as_deref()
    }

    pub fn pros(&self) -> Option<&str> {
        self.pros.as_deref()
    }

    pub fn cons(&self) -> Option<&str> {
        self.cons.as_deref()
    }

    /// Full original API record, kept for diagnostics and marketplace-specific consumers.
    pub fn raw_payload(&self) -> &JsonValue {
        &self.raw_payload
    }
}

fn required_rating(
    payload: &JsonValue,
    mp: Marketplace,
    id: &str,
    field: &'static str,
) -> Result<f64, ReviewError> {
    match json_at(payload, &[field]) {
        None | Some(JsonValue::Null) => Err(ReviewError::missing(mp, Some(id), field)),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ReviewError::invalid(mp, Some(id), field, format!("is not a number: {value}"))),
    }
}

fn required_timestamp(
    payload: &JsonValue,
    mp: Marketplace,
    id: &str,
    field: &'static str,
) -> Result<DateTime<Utc>, ReviewError> {
    let raw = json_str(payload, &[field]).ok_or_else(|| ReviewError::missing(mp, Some(id), field))?;
    parse_timestamp(raw).ok_or_else(|| {
        ReviewError::invalid(mp, Some(id), field, format!("is not a timestamp: {raw}"))
    })
}

/// Accepts RFC 3339 and zone-less ISO timestamps (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

pub fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    json_at(value, path)?.as_f64()
}

/// Trimmed, non-empty text at `path`.
pub fn json_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    let trimmed = json_str(value, path)?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Identifier at `path`; numeric ids are rendered as strings.
pub fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Why an account is not run this cycle. Configuration problems, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Disabled,
    MissingApiKey,
    MissingAiKey,
    MissingMandatoryPrompt,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disabled => "AI replies are disabled",
            Self::MissingApiKey => "marketplace API key is not configured",
            Self::MissingAiKey => "AI key is not configured",
            Self::MissingMandatoryPrompt => "mandatory prompt is not configured",
        };
        f.write_str(text)
    }
}

/// One seller account's settings, re-read from the configuration source every cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountConfig {
    /// Account identifier; Ozon also uses it as the company id.
    pub account: String,
    pub marketplace: Marketplace,
    pub ai_enabled: bool,
    pub api_key: Option<String>,
    pub ai_key: Option<String>,
    pub rating_threshold: f64,
    pub prompt_template_key: String,
    pub prompt_options: BTreeMap<String, String>,
}

impl AccountConfig {
    /// Only reviews rated strictly above the threshold qualify.
    pub fn qualifies(&self, rating: f64) -> bool {
        rating > self.rating_threshold
    }

    pub fn mandatory_prompt(&self) -> Option<&str> {
        self.prompt_options
            .get(MANDATORY_PROMPT_KEY)
            .map(String::as_str)
    }

    /// Text of the selected template; an unknown key resolves to an empty template.
    pub fn template_prompt(&self) -> &str {
        self.prompt_options
            .get(&self.prompt_template_key)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// `Some` when the account must be skipped this cycle.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        if !self.ai_enabled {
            return Some(SkipReason::Disabled);
        }
        if self.marketplace == Marketplace::Wildberries && is_blank(self.api_key.as_deref()) {
            return Some(SkipReason::MissingApiKey);
        }
        if is_blank(self.ai_key.as_deref()) {
            return Some(SkipReason::MissingAiKey);
        }
        if self.mandatory_prompt().is_none() {
            return Some(SkipReason::MissingMandatoryPrompt);
        }
        None
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Sent,
    Failed,
}

/// A reply produced for one review during one cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedResponse {
    pub review_id: String,
    pub text: String,
    pub status: ResponseStatus,
    pub attempts: u32,
    pub error_detail: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl GeneratedResponse {
    /// Created once the text has passed post-validation.
    pub fn pending(review_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            review_id: review_id.into(),
            text: text.into(),
            status: ResponseStatus::Pending,
            attempts: 0,
            error_detail: None,
            generated_at: Utc::now(),
            sent_at: None,
        }
    }

    /// Pending -> Sent. Returns false when the response already reached a terminal state.
    pub fn mark_sent(&mut self) -> bool {
        if self.status != ResponseStatus::Pending {
            return false;
        }
        self.status = ResponseStatus::Sent;
        self.attempts += 1;
        self.sent_at = Some(Utc::now());
        true
    }

    /// Pending -> Failed, recording the submission error.
    pub fn mark_failed(&mut self, detail: impl Into<String>) -> bool {
        if self.status != ResponseStatus::Pending {
            return false;
        }
        self.status = ResponseStatus::Failed;
        self.attempts += 1;
        self.error_detail = Some(detail.into());
        true
    }
}
