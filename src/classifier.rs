use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::settings::ClassifierSettings;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

const SYSTEM_PROMPT: &str = r#"You are an expert query classification system. Analyze the user's query and provide:
1. Category: One of [Complaint, Feature Request, Technical Issue, General Inquiry, Billing]
2. Priority: One of [High, Medium, Low]
3. Sentiment: One of [Positive, Neutral, Negative]
4. Key Phrases: Extract 1-3 most relevant keywords or phrases

Rules for classification:
- Complaint: User is expressing dissatisfaction or reporting a problem
- Feature Request: User is requesting new functionality
- Technical Issue: User is experiencing bugs, errors, or technical problems
- General Inquiry: Questions about usage, features, or general information
- Billing: Anything related to payments, subscriptions, or invoicing

- High Priority: Urgent issues, system outages, security concerns, billing problems
- Medium Priority: Feature requests, non-urgent bugs, general complaints
- Low Priority: General inquiries, feature suggestions, positive feedback

- Positive: User is satisfied, praising, or expressing gratitude
- Neutral: Factual inquiries or neutral tone
- Negative: User is dissatisfied, frustrated, or complaining

Return ONLY a JSON object with this exact structure:
{
  "category": "...",
  "priority": "...",
  "sentiment": "...",
  "keyPhrases": ["phrase1", "phrase2", "phrase3"]
}"#;

/// The four-axis classification assigned to a query.
///
/// Field values are whatever the model answered; they are not checked
/// against the enumerations listed in the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Classification {
    pub(crate) category: String,
    pub(crate) priority: String,
    pub(crate) sentiment: String,
    pub(crate) key_phrases: Vec<String>,
}

/// Terminal failures of the classification pipeline, one per branch.
///
/// The `Display` text of each variant is the client-facing error message.
#[derive(Debug, Error)]
pub(crate) enum ClassifyError {
    #[error("Query text is required")]
    InvalidInput,
    #[error("AI service not configured")]
    ServiceMisconfigured,
    #[error("{0}")]
    UpstreamUnavailable(#[from] reqwest::Error),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("AI service payment required. Please add credits.")]
    PaymentRequired,
    #[error("AI classification failed")]
    ClassificationFailed,
    #[error("Invalid AI response")]
    InvalidUpstreamResponse,
    #[error("Failed to parse classification result")]
    MalformedClassification,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    /// The first choice's message content, if any non-empty content came back.
    fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
    }
}

/// Stateless client for the upstream chat-completion gateway.
pub(crate) struct Classifier {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f64,
    api_key: Option<String>,
}

impl Classifier {
    /// The API key is injected here once at startup; a missing key makes
    /// every [`classify`](Self::classify) call fail without touching the
    /// network.
    pub(crate) fn new(settings: &ClassifierSettings, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
        })
    }

    /// Classify one query text via the upstream model.
    ///
    /// One request, no retry. The caller decides what to do with the result;
    /// nothing is persisted here.
    pub(crate) async fn classify(&self, query_text: &str) -> Result<Classification, ClassifyError> {
        let Some(api_key) = &self.api_key else {
            return Err(ClassifyError::ServiceMisconfigured);
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Analyze this query: \"{query_text}\"").into(),
                },
            ],
            temperature: self.temperature,
        };

        debug!("requesting classification from {}", self.endpoint);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("upstream returned {status}: {body}");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ClassifyError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => ClassifyError::PaymentRequired,
                _ => ClassifyError::ClassificationFailed,
            });
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|_| ClassifyError::InvalidUpstreamResponse)?;
        let content = completion
            .into_content()
            .ok_or(ClassifyError::InvalidUpstreamResponse)?;

        parse_classification(&content)
    }
}

fn parse_classification(content: &str) -> Result<Classification, ClassifyError> {
    let cleaned = strip_code_fences(content);
    serde_json::from_str(&cleaned).map_err(|e| {
        error!("model reply is not a classification object: {e}");
        ClassifyError::MalformedClassification
    })
}

/// Models often wrap the JSON object in a Markdown code fence; drop any
/// fence markers (with or without the json language tag) before parsing.
fn strip_code_fences(content: &str) -> String {
    content
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}
