//! Prompt assembly, AI completion and the post-generation quality gate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use revreply_core::Review;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "revreply-responder";

/// Role framing sent as the system message of every completion.
pub const SYSTEM_PROMPT: &str =
    "Ты опытный специалист службы поддержки. Сгенерируй ответ на отзыв покупателя о товаре.";

/// Used in place of an empty mandatory block.
pub const DEFAULT_LENGTH_INSTRUCTION: &str = "Ответ должен быть не длиннее 1000 символов.";

pub const GENERATION_TEMPERATURE: f32 = 0.7;

/// Replies at or above this many characters are rejected.
pub const MAX_RESPONSE_CHARS: usize = 5000;

/// Replies need more than this many words.
pub const MIN_WORDS_EXCLUSIVE: usize = 4;

/// Assembles the user prompt for one review.
///
/// Blocks appear in a fixed order: mandatory instructions, template instructions,
/// review text, the optional context blocks present on the review (customer name,
/// product, pros, cons), then the rating. Absent context blocks leave no trace.
pub fn build_prompt(mandatory: &str, template: &str, review: &Review) -> String {
    let mandatory = match mandatory.trim() {
        "" => DEFAULT_LENGTH_INSTRUCTION,
        text => text,
    };
    let review_text = match review.text().trim() {
        "" => "(покупатель не оставил текста, только оценку)",
        text => text,
    };

    let mut blocks = vec![
        format!("Обязательные требования к ответу:\n{mandatory}"),
        format!("Инструкции по ответу:\n{}", template.trim()),
        format!("Текст отзыва:\n{review_text}"),
    ];
    if let Some(name) = review.author_name() {
        blocks.push(format!(
            "Имя покупателя: {name}\nОбратись к покупателю по имени, если это уместно."
        ));
    }
    if let Some(product) = review.product_name() {
        blocks.push(format!(
            "Товар: {product}\nУпомяни товар, но не повторяй название дословно больше одного раза."
        ));
    }
    if let Some(pros) = review.pros() {
        blocks.push(format!(
            "Достоинства по мнению покупателя: {pros}\nПоблагодари за отмеченные достоинства."
        ));
    }
    if let Some(cons) = review.cons() {
        blocks.push(format!(
            "Недостатки по мнению покупателя: {cons}\nКорректно ответь на замечания, не споря с покупателем."
        ));
    }
    blocks.push(format!("Оценка: {}/5", review.rating()));

    blocks.join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    TooFewWords { words: usize },
    TooLong { chars: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty reply"),
            Self::TooFewWords { words } => write!(f, "only {words} words"),
            Self::TooLong { chars } => write!(f, "{chars} characters"),
        }
    }
}

/// Quality gate applied to generated text before it may be submitted.
pub fn validate(text: &str) -> Verdict {
    if text.trim().is_empty() {
        return Verdict::Reject(RejectReason::Empty);
    }
    let words = text.split_whitespace().count();
    if words <= MIN_WORDS_EXCLUSIVE {
        return Verdict::Reject(RejectReason::TooFewWords { words });
    }
    let chars = text.chars().count();
    if chars >= MAX_RESPONSE_CHARS {
        return Verdict::Reject(RejectReason::TooLong { chars });
    }
    Verdict::Accept
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("AI request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AI endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI response could not be decoded: {0}")]
    Decode(String),
    #[error("AI response carried no completion")]
    EmptyCompletion,
    #[error("invalid AI client configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

/// Black-box text completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint. No retries.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl ChatCompletionClient {
    pub fn new(api_key: &str, settings: &CompletionSettings) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|e| GenerationError::Config(format!("invalid AI key header value: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        debug!(status = %status, model = %self.model, "completion response received");

        let text = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyCompletion)
    }
}

/// Produces reply text for an assembled prompt.
pub struct ResponseGenerator {
    client: Box<dyn CompletionClient>,
}

impl ResponseGenerator {
    pub fn new(client: Box<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: prompt.to_string(),
            temperature: GENERATION_TEMPERATURE,
        };
        let text = self.client.complete(&request).await?;
        Ok(text.trim().to_string())
    }
}
