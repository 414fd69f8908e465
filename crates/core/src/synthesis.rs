use crate::config::ServiceConfig;
use crate::error::{chat_status_error, ChatError, IngestError};
use crate::models::{AnswerResult, RetrievalContext};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

pub const FALLBACK_ANSWER: &str = "Sorry, I am unable to generate an answer at this time.";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

const CHUNKS_PLACEHOLDER: &str = "{retrieved_chunks}";
const RECORDS_PLACEHOLDER: &str = "{structured_records}";
const QUERY_PLACEHOLDER: &str = "{query}";

const DEFAULT_PROMPT: &str = "You are a helpful assistant answering questions about the \
documents and product records below. Use only this context. If the context does not \
contain the answer, say that you do not know.

Retrieved passages:
{retrieved_chunks}
Structured records:
{structured_records}

Question: {query}
Answer:";

/// One completion call with a single user message.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ChatError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Result<Self, IngestError> {
        let text = text.into();
        if !text.contains(QUERY_PLACEHOLDER) {
            return Err(IngestError::InvalidConfiguration(format!(
                "prompt template has no {QUERY_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { text })
    }

    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        Self::new(std::fs::read_to_string(path)?)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn render(&self, query: &str, context: &RetrievalContext) -> String {
        let chunks = context.chunks_text();
        let records = serde_json::to_string(&context.records).unwrap_or_else(|_| "[]".to_string());

        let mut rendered = String::with_capacity(self.text.len() + chunks.len() + records.len());
        let mut rest = self.text.as_str();
        while let Some(start) = rest.find(|c: char| c == '{' || c == '}') {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start..];
            if tail.starts_with("{{") || tail.starts_with("}}") {
                rendered.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }

            let slot = [
                (CHUNKS_PLACEHOLDER, chunks.as_str()),
                (RECORDS_PLACEHOLDER, records.as_str()),
                (QUERY_PLACEHOLDER, query),
            ]
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder));

            match slot {
                Some((placeholder, value)) => {
                    rendered.push_str(value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    rendered.push_str(&tail[..1]);
                    rest = &tail[1..];
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

pub struct AnswerSynthesizer<C>
where
    C: ChatCompletion,
{
    chat: C,
    template: PromptTemplate,
    temperature: f32,
    max_tokens: u32,
}

impl<C> AnswerSynthesizer<C>
where
    C: ChatCompletion,
{
    pub fn new(chat: C, template: PromptTemplate) -> Self {
        Self {
            chat,
            template,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn chat(&self) -> &C {
        &self.chat
    }

    pub async fn synthesize(&self, query: &str, context: &RetrievalContext) -> AnswerResult {
        let prompt = self.template.render(query, context);

        let answer = match self
            .chat
            .complete(&prompt, self.temperature, self.max_tokens)
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => {
                warn!(model = self.chat.model(), "chat returned an empty answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(error) => {
                warn!(model = self.chat.model(), %error, "answer generation failed");
                FALLBACK_ANSWER.to_string()
            }
        };

        AnswerResult {
            answer,
            sources: context.sources(),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_key.clone(),
            model: config.chat_model.clone(),
            retry: config.retry,
        })
    }

    async fn send_request(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ChatError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ApiMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), model = %self.model, "chat request failed");
            return Err(chat_status_error(status.as_u16(), text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ChatError> {
        with_retry("chat", &self.retry, || {
            self.send_request(prompt, temperature, max_tokens)
        })
        .await
    }
}
