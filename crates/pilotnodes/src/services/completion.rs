use async_trait::async_trait;
use pilotcore::services::{CompletionRequest, CompletionResponse, CompletionService};
use pilotcore::CollaboratorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Price in dollars per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Per-model prices used to attribute a cost to each completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable(BTreeMap<String, ModelPrice>);

impl PricingTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.0.insert(model.into(), price);
        self
    }

    /// Look up a model by exact name, then without its `provider/` prefix
    pub fn price(&self, model: &str) -> Option<ModelPrice> {
        self.0.get(model).copied().or_else(|| {
            self.0
                .iter()
                .find(|(name, _)| name.rsplit('/').next() == Some(model))
                .map(|(_, price)| *price)
        })
    }

    /// Unknown models are free
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        match self.price(model) {
            Some(price) => {
                let cost = prompt_tokens as f64 / 1_000_000.0 * price.input
                    + completion_tokens as f64 / 1_000_000.0 * price.output;
                (cost * 1_000_000.0).round() / 1_000_000.0
            }
            None => 0.0,
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let price = |input, output| ModelPrice { input, output };
        Self::empty()
            .with_price("openai/gpt-3.5-turbo", price(0.5, 1.5))
            .with_price("openai/gpt-4", price(30.0, 60.0))
            .with_price("openai/gpt-4-turbo", price(10.0, 30.0))
            .with_price("anthropic/claude-3-sonnet-20240229", price(3.0, 15.0))
            .with_price("anthropic/claude-3-haiku-20240307", price(0.25, 1.25))
            .with_price("google/gemini-pro", price(0.5, 1.5))
    }
}

/// Completion service for any OpenAI-compatible chat completions endpoint
pub struct OpenAiCompletionService {
    base_url: String,
    api_key: Option<String>,
    pricing: PricingTable,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

impl OpenAiCompletionService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: None,
            pricing: PricingTable::default(),
            client,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    fn chat_completion_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CollaboratorError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatCompletionRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut http = self.client.post(self.chat_completion_url()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        tracing::debug!(model = %request.model, "Sending completion request");
        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout
            } else {
                CollaboratorError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::InvalidResponse("no completion choices".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        let tokens_used = usage
            .total_tokens
            .unwrap_or(usage.prompt_tokens + usage.completion_tokens);
        let cost = self
            .pricing
            .cost(&request.model, usage.prompt_tokens, usage.completion_tokens);

        Ok(CompletionResponse {
            text: content,
            tokens_used,
            cost,
            model: parsed.model.or(Some(request.model)),
        })
    }
}

/// Offline completion service that answers with the prompt itself
///
/// Token usage is one token per whitespace-separated word of the prompt;
/// cost is always zero.
#[derive(Debug, Default, Clone)]
pub struct EchoCompletionService {
    prefix: String,
}

impl EchoCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl CompletionService for EchoCompletionService {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CollaboratorError> {
        let tokens_used = request.prompt.split_whitespace().count() as u64;
        Ok(CompletionResponse {
            text: format!("{}{}", self.prefix, request.prompt),
            tokens_used,
            cost: 0.0,
            model: Some(request.model),
        })
    }
}
