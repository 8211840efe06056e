//! Text-generation capability and providers.
//!
//! The orchestrator assembles a [`Prompt`] and hands it to a [`Completer`].
//! Providers:
//! - **[`DisabledCompleter`]**: always fails.
//! - **[`ExtractiveCompleter`]**: offline; answers with the context sentence
//!   that best overlaps the question.
//! - **[`OpenAICompleter`]**: `POST /v1/chat/completions`.
//! - **[`OllamaCompleter`]**: `POST /api/chat` on a local Ollama instance.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CompletionConfig;
use crate::embedding::{http_client, post_json_with_retry, tokenize};

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant answering questions based on the provided documents.";

const OPENAI_API_BASE: &str = "https://api.openai.com";
const OLLAMA_API_BASE: &str = "http://localhost:11434";

/// Answer returned by the extractive provider when nothing in the context matches.
pub const UNKNOWN_ANSWER: &str = "I don't know based on the provided documents.";

/// A fully assembled generation request.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    /// Retrieved passages, in ranked order.
    pub context: String,
    /// Rendered recent conversation, if any.
    pub history: Option<String>,
    pub question: String,
}

impl Prompt {
    pub fn new(context: String, history: Option<String>, question: &str) -> Self {
        Self {
            system: SYSTEM_INSTRUCTION.to_string(),
            context,
            history: history.filter(|h| !h.trim().is_empty()),
            question: question.to_string(),
        }
    }

    /// The user-turn body: instructions, context, history, question.
    pub fn render_user(&self) -> String {
        let mut out = String::from(
            "Use the following pieces of context to answer the question at the end.\n\
             If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n",
        );
        out.push_str("Context: ");
        out.push_str(&self.context);
        out.push_str("\n\n");
        if let Some(history) = &self.history {
            out.push_str("Recent conversation:\n");
            out.push_str(history);
            out.push_str("\n\n");
        }
        out.push_str("Question: ");
        out.push_str(&self.question);
        out.push_str("\n\nAnswer:");
        out
    }

    /// System instruction and user body as one string, for single-prompt backends.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system, self.render_user())
    }
}

#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

// ============ Extractive ============

/// Picks the context sentence sharing the most distinct words with the
/// question (words of three or more characters). Earliest sentence wins ties.
pub struct ExtractiveCompleter;

impl ExtractiveCompleter {
    pub fn answer(context: &str, question: &str) -> String {
        let wanted: HashSet<String> = tokenize(question).filter(|w| w.chars().count() > 2).collect();

        let mut best: Option<(&str, usize)> = None;
        for sentence in split_sentences(context) {
            let words: HashSet<String> = tokenize(sentence).collect();
            let score = wanted.iter().filter(|w| words.contains(*w)).count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((sentence, score));
            }
        }

        match best {
            Some((sentence, _)) => sentence.to_string(),
            None => UNKNOWN_ANSWER.to_string(),
        }
    }
}

#[async_trait]
impl Completer for ExtractiveCompleter {
    fn model_name(&self) -> &str {
        "extractive"
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        Ok(Self::answer(&prompt.context, &prompt.question))
    }
}

/// Sentences of `text`, trimmed, split after `.`, `!`, `?` followed by
/// whitespace and at line breaks.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next_is_space = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        let boundary = c == '\n' || (matches!(c, '.' | '!' | '?') && next_is_space);
        if boundary {
            let end = i + c.len_utf8();
            let s = text[start..end].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

// ============ OpenAI ============

pub struct OpenAICompleter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Completer for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.render_user()},
            ],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

// ============ Ollama ============

pub struct OllamaCompleter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for Ollama provider"))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_API_BASE.to_string()),
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.render_user()},
            ],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.base_url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
    }
}

/// Create the [`Completer`] named by `config.provider`.
pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "extractive" => Ok(Arc::new(ExtractiveCompleter)),
        "openai" => Ok(Arc::new(OpenAICompleter::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaCompleter::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
