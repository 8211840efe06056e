//! Chat and upload pipelines.
//!
//! [`QueryOrchestrator`] owns every piece of shared state the server needs
//! (vector index, rate limiter, metrics, session histories) together with the
//! embedding and completion providers. A chat request moves through
//! admission, validation, indexing, retrieval and answering; every path past
//! admission records exactly one metrics [`Outcome`].

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::chunk::Chunker;
use crate::completion::{create_completer, Completer, Prompt};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{DocentError, Result};
use crate::extract::{self, ExtractError};
use crate::history::SessionStore;
use crate::index::{RebuildStats, VectorIndex};
use crate::metrics::{MetricsAggregator, MetricsSnapshot, Outcome};
use crate::models::{Document, ScoredChunk};
use crate::rate_limit::SlidingWindowLimiter;

// ============ Wire types ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// When present and non-empty, replaces the index before retrieval.
    #[serde(default)]
    pub documents: Option<Vec<RequestDocument>>,
    /// Pre-rendered conversation context; takes precedence over the session's.
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDocument {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl RequestDocument {
    fn source_name(&self, position: usize) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("fileName").or_else(|| m.get("source")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("document-{}", position + 1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Chunk text, truncated for display.
    pub content: String,
    pub metadata: SourceMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub file_name: String,
    pub document_id: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub score: f32,
}

/// A file received by the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub documents: Vec<UploadedChunk>,
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunk {
    pub page_content: String,
    pub metadata: UploadedChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunkMetadata {
    pub file_name: String,
    pub file_type: String,
    pub document_id: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    pub file_size: usize,
    pub file_type: String,
    pub chunk_count: usize,
    pub document_id: String,
}

/// A pipeline result plus what the metrics outcome needs to know about it.
struct Traced<T> {
    value: T,
    document_id: Option<String>,
    tokens: u64,
    embedding_calls: u64,
}

/// Proof that a request passed the rate limiter, carrying its start time.
#[must_use = "an admitted request must be finished so its outcome is recorded"]
#[derive(Debug)]
pub struct Admission {
    endpoint: &'static str,
    started: Instant,
}

// ============ Orchestrator ============

pub struct QueryOrchestrator {
    config: Arc<Config>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    chunker: Chunker,
    limiter: SlidingWindowLimiter,
    metrics: MetricsAggregator,
    sessions: SessionStore,
}

impl QueryOrchestrator {
    /// Build an orchestrator with the providers named in `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let completer = create_completer(&config.completion)?;
        Ok(Self::with_providers(config, embedder, completer))
    }

    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        Self {
            chunker: Chunker::from_config(&config.chunking),
            limiter: SlidingWindowLimiter::from_config(&config.rate_limit),
            sessions: SessionStore::new(
                config.history.max_turns,
                config.history.max_sessions,
            ),
            metrics: MetricsAggregator::new(),
            index: Arc::new(VectorIndex::new()),
            config: Arc::new(config),
            embedder,
            completer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn completer(&self) -> &dyn Completer {
        self.completer.as_ref()
    }

    /// Answer a question over the indexed documents.
    pub async fn chat(&self, client_key: &str, request: ChatRequest) -> Result<ChatResponse> {
        let admission = self.admit(client_key, "chat")?;
        self.chat_admitted(admission, Ok(request)).await
    }

    /// Finish an admitted chat. `request` is `Err` when the body could not
    /// be decoded; that still counts as a completed request.
    pub async fn chat_admitted(
        &self,
        admission: Admission,
        request: Result<ChatRequest>,
    ) -> Result<ChatResponse> {
        let result = match request {
            Ok(request) => self.run_chat(request).await,
            Err(err) => Err(err),
        };
        self.finish(admission, result)
    }

    /// Parse an uploaded file and, unless disabled, make it the indexed set.
    pub async fn upload(&self, client_key: &str, file: UploadFile) -> Result<UploadResponse> {
        let admission = self.admit(client_key, "upload")?;
        self.upload_admitted(admission, Ok(file)).await
    }

    /// Finish an admitted upload. `file` is `Err` when the multipart body
    /// was malformed or carried no file.
    pub async fn upload_admitted(
        &self,
        admission: Admission,
        file: Result<UploadFile>,
    ) -> Result<UploadResponse> {
        let result = match file {
            Ok(file) => self.run_upload(file).await,
            Err(err) => Err(err),
        };
        self.finish(admission, result)
    }

    /// Consult the rate limiter for `client_key`. A denial is final and is
    /// not recorded in metrics; an admission must be passed to one of the
    /// `*_admitted` methods, which record its outcome.
    pub fn admit(&self, client_key: &str, endpoint: &'static str) -> Result<Admission> {
        if self.limiter.admit(client_key) {
            Ok(Admission {
                endpoint,
                started: Instant::now(),
            })
        } else {
            tracing::warn!(client = client_key, endpoint, "rate limit exceeded");
            Err(DocentError::RateLimited)
        }
    }

    /// Replace the index with `documents`, outside any request pipeline.
    pub async fn index_documents(&self, documents: &[Document]) -> Result<RebuildStats> {
        self.index
            .rebuild(
                documents,
                &self.chunker,
                self.embedder.as_ref(),
                self.config.embedding.batch_size,
            )
            .await
            .map_err(DocentError::embedding)
    }

    /// Drop the index and every session history. Metrics are kept.
    pub fn clear(&self) {
        self.index.clear();
        self.sessions.clear_all();
        tracing::info!("index and session histories cleared");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn finish<T>(&self, admission: Admission, result: Result<Traced<T>>) -> Result<T> {
        let Admission { endpoint, started } = admission;
        let duration = started.elapsed();
        match result {
            Ok(traced) => {
                self.metrics.record(
                    &Outcome::success(endpoint, duration)
                        .with_document(traced.document_id)
                        .with_embedding(traced.tokens, traced.embedding_calls),
                );
                Ok(traced.value)
            }
            Err(err) if err.is_server_error() => {
                tracing::error!(endpoint, error = %err, "request pipeline failed");
                self.metrics
                    .record(&Outcome::failure(endpoint, duration, err.to_string()));
                Err(err)
            }
            Err(err) => {
                self.metrics
                    .record(&Outcome::rejected(endpoint, duration, err.to_string()));
                Err(err)
            }
        }
    }

    async fn run_chat(&self, request: ChatRequest) -> Result<Traced<ChatResponse>> {
        let question = request.message.trim();
        if question.is_empty() {
            return Err(DocentError::Validation("message is required".to_string()));
        }

        let mut tokens = 0;
        let mut embedding_calls = 0;
        match request.documents.as_deref() {
            Some(docs) if !docs.is_empty() => {
                let documents: Vec<Document> = docs
                    .iter()
                    .enumerate()
                    .map(|(i, d)| Document::from_text(&d.source_name(i), &d.page_content))
                    .collect();
                let stats = self.index_documents(&documents).await?;
                tokens += stats.estimated_tokens;
                embedding_calls += stats.embedding_calls;
            }
            _ => {
                self.index.ensure_exists();
            }
        }
        if self.index.is_empty() {
            return Err(DocentError::NotFound);
        }

        let hits = self
            .index
            .query(question, self.config.retrieval.top_k, self.embedder.as_ref())
            .await
            .map_err(DocentError::embedding)?;
        tokens += estimate_tokens(question);
        embedding_calls += 1;

        let context = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let history = request.history.clone().or_else(|| {
            request.session_id.as_deref().and_then(|id| {
                self.sessions
                    .context(id, self.config.history.context_turns)
            })
        });

        let prompt = Prompt::new(context, history, question);
        let answer = self
            .completer
            .complete(&prompt)
            .await
            .map_err(DocentError::completion)?;

        if let Some(id) = request.session_id.as_deref() {
            self.sessions.record_exchange(id, question, &answer);
        }

        let document_id = hits.first().map(|h| h.chunk.document_id.clone());
        let sources = hits
            .iter()
            .map(|h| self.source(h))
            .collect();

        Ok(Traced {
            value: ChatResponse { answer, sources },
            document_id,
            tokens,
            embedding_calls,
        })
    }

    async fn run_upload(&self, file: UploadFile) -> Result<Traced<UploadResponse>> {
        let limits = &self.config.upload;
        if file.bytes.is_empty() {
            return Err(DocentError::Validation("uploaded file is empty".to_string()));
        }
        if file.bytes.len() > limits.max_file_bytes {
            return Err(DocentError::Validation(format!(
                "file size exceeds {}MB limit",
                limits.max_file_bytes / (1024 * 1024)
            )));
        }

        let mime = extract::resolve_mime(file.content_type.as_deref(), &file.file_name);
        if !extract::is_supported(&mime) {
            return Err(DocentError::UnsupportedFormat(mime));
        }

        let file_size = file.bytes.len();
        let parse_mime = mime.clone();
        let bytes = file.bytes;
        let segments =
            tokio::task::spawn_blocking(move || extract::parse_document(&bytes, &parse_mime))
                .await
                .map_err(|e| DocentError::Internal(e.to_string()))?
                .map_err(|e| match e {
                    ExtractError::UnsupportedContentType(m) => DocentError::UnsupportedFormat(m),
                    other => DocentError::parse(other),
                })?;

        let document = Document::new(&file.file_name, &mime, segments);
        let candidates = self.chunker.split_document(&document);
        tracing::info!(
            file = %file.file_name,
            mime = %mime,
            bytes = file_size,
            chunks = candidates.len(),
            "document parsed"
        );

        let stats = if limits.index_on_upload {
            self.index_documents(std::slice::from_ref(&document)).await?
        } else {
            RebuildStats::default()
        };

        let documents = candidates
            .into_iter()
            .map(|c| UploadedChunk {
                page_content: c.text,
                metadata: UploadedChunkMetadata {
                    file_name: document.source_name.clone(),
                    file_type: mime.clone(),
                    document_id: document.id.clone(),
                    chunk_index: c.chunk_index,
                    page: c.page,
                },
            })
            .collect::<Vec<_>>();

        let metadata = UploadMetadata {
            file_name: document.source_name.clone(),
            file_size,
            file_type: mime,
            chunk_count: documents.len(),
            document_id: document.id.clone(),
        };

        Ok(Traced {
            value: UploadResponse {
                documents,
                metadata,
            },
            document_id: Some(document.id),
            tokens: stats.estimated_tokens,
            embedding_calls: stats.embedding_calls,
        })
    }

    fn source(&self, hit: &ScoredChunk) -> Source {
        Source {
            content: preview(&hit.chunk.text, self.config.retrieval.preview_chars),
            metadata: SourceMetadata {
                file_name: hit.chunk.source_name.clone(),
                document_id: hit.chunk.document_id.clone(),
                chunk_index: hit.chunk.chunk_index,
                page: hit.chunk.page,
                score: hit.score,
            },
        }
    }
}

/// First `max_chars` characters of `text`, with `…` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &text[..byte_idx]),
        None => text.to_string(),
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ExtractiveCompleter;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;

    const GUIDE: &str = "The warehouse opens at seven in the morning on weekdays. \
        Forklift operators must complete safety training before their first shift. \
        Returned goods are inspected within two business days of arrival at the dock.";

    struct BrokenCompleter;

    #[async_trait]
    impl Completer for BrokenCompleter {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn complete(&self, _prompt: &Prompt) -> anyhow::Result<String> {
            anyhow::bail!("upstream returned 503 with api key sk-secret")
        }
    }

    fn orchestrator_with(config: Config) -> QueryOrchestrator {
        QueryOrchestrator::with_providers(
            config,
            Arc::new(HashEmbedder::new(256)),
            Arc::new(ExtractiveCompleter),
        )
    }

    fn orchestrator() -> QueryOrchestrator {
        orchestrator_with(Config::minimal())
    }

    fn text_file(name: &str, body: &str) -> UploadFile {
        UploadFile {
            file_name: name.to_string(),
            content_type: Some("text/plain".to_string()),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("short", 150), "short");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("ééééé", 2), "éé…");
        assert_eq!(preview("exact", 5), "exact");
    }

    #[tokio::test]
    async fn test_upload_then_chat_end_to_end() {
        let orch = orchestrator();

        let uploaded = orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();
        assert_eq!(uploaded.metadata.chunk_count, 1);
        assert_eq!(uploaded.metadata.file_type, "text/plain");
        assert_eq!(uploaded.documents[0].page_content, GUIDE);

        let resp = orch
            .chat("c", ChatRequest::new("When does the warehouse open?"))
            .await
            .unwrap();
        assert_eq!(resp.sources.len(), 1);
        let source = &resp.sources[0];
        assert_eq!(source.content, preview(GUIDE, 150));
        assert!(source.content.ends_with('…'));
        assert_eq!(source.content.chars().count(), 151);
        assert_eq!(source.metadata.file_name, "guide.txt");
        assert_eq!(source.metadata.chunk_index, 0);
        assert_eq!(
            resp.answer,
            "The warehouse opens at seven in the morning on weekdays."
        );

        let m = orch.metrics();
        assert_eq!(m.total_requests, 2);
        assert_eq!(m.failed_requests, 0);
        assert_eq!(
            m.document_access.get(&uploaded.metadata.document_id),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_blank_message_is_counted_but_not_failed() {
        let orch = orchestrator();
        let err = orch.chat("c", ChatRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, DocentError::Validation(_)));

        let m = orch.metrics();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.failed_requests, 0);
        assert!(m.last_error.is_none());
    }

    #[tokio::test]
    async fn test_client_errors_keep_success_rate() {
        let orch = orchestrator();
        orch.chat("c", ChatRequest::new("")).await.unwrap_err();
        orch.chat("c", ChatRequest::new("anything?")).await.unwrap_err();

        let m = orch.metrics();
        assert_eq!(m.total_requests, 2);
        assert_eq!(m.failed_requests, 0);
        assert_eq!(m.success_rate, Some(1.0));
    }

    #[tokio::test]
    async fn test_undecodable_body_after_admission() {
        let mut config = Config::minimal();
        config.rate_limit.max_requests = 1;
        let orch = orchestrator_with(config);

        let admission = orch.admit("c", "chat").unwrap();
        let err = orch
            .chat_admitted(
                admission,
                Err(DocentError::Validation("invalid JSON body".into())),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);

        // The malformed request consumed the client's only slot.
        let err = orch.admit("c", "chat").unwrap_err();
        assert!(matches!(err, DocentError::RateLimited));

        let m = orch.metrics();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_embedding_calls_are_counted() {
        let mut config = Config::minimal();
        config.embedding.batch_size = 2;
        config.chunking.chunk_size = 60;
        config.chunking.chunk_overlap = 0;
        let orch = orchestrator_with(config);

        let uploaded = orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();
        let batches = uploaded.metadata.chunk_count.div_ceil(2) as u64;
        assert!(batches >= 2);
        assert_eq!(orch.metrics().embedding.total_calls, batches);

        // One more call for the query embedding.
        orch.chat("c", ChatRequest::new("forklift?")).await.unwrap();
        assert_eq!(orch.metrics().embedding.total_calls, batches + 1);
    }

    #[tokio::test]
    async fn test_no_documents_is_not_found() {
        let orch = orchestrator();
        let err = orch.chat("c", ChatRequest::new("anything?")).await.unwrap_err();
        assert!(matches!(err, DocentError::NotFound));
        assert_eq!(err.to_string(), "no documents available to search through");
    }

    #[tokio::test]
    async fn test_request_documents_replace_index() {
        let orch = orchestrator();
        orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();

        let request = ChatRequest {
            message: "What colour is the sky?".into(),
            documents: Some(vec![RequestDocument {
                page_content: "The sky is blue on clear days.".into(),
                metadata: Some(serde_json::json!({"fileName": "sky.txt"})),
            }]),
            ..Default::default()
        };
        let resp = orch.chat("c", request).await.unwrap();
        assert_eq!(resp.sources.len(), 1);
        assert_eq!(resp.sources[0].metadata.file_name, "sky.txt");
        assert_eq!(orch.index().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_is_not_recorded() {
        let mut config = Config::minimal();
        config.rate_limit.max_requests = 2;
        let orch = orchestrator_with(config);
        orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();

        orch.chat("c", ChatRequest::new("forklift training?")).await.unwrap();
        let err = orch
            .chat("c", ChatRequest::new("forklift training?"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::RateLimited));
        assert!(orch.chat("other", ChatRequest::new("forklift?")).await.is_ok());

        assert_eq!(orch.metrics().total_requests, 3);
    }

    #[tokio::test]
    async fn test_session_history_is_recorded() {
        let orch = orchestrator();
        orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();

        let mut request = ChatRequest::new("Who needs safety training?");
        request.session_id = Some("s1".into());
        orch.chat("c", request).await.unwrap();

        let ctx = orch.sessions.context("s1", 3).unwrap();
        assert!(ctx.starts_with("user: Who needs safety training?\nassistant: "));

        orch.clear();
        assert!(orch.sessions.is_empty());
        assert!(orch.index().snapshot().is_none());
        assert_eq!(orch.metrics().total_requests, 2);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let mut config = Config::minimal();
        config.upload.max_file_bytes = 16;
        let orch = orchestrator_with(config);

        let err = orch
            .upload("c", text_file("big.txt", &"x".repeat(17)))
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::Validation(_)));

        let png = UploadFile {
            file_name: "image.png".into(),
            content_type: None,
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        };
        let err = orch.upload("c", png).await.unwrap_err();
        assert!(matches!(err, DocentError::UnsupportedFormat(_)));
        assert_eq!(err.status(), 400);

        let bad_pdf = UploadFile {
            file_name: "broken.pdf".into(),
            content_type: Some("application/pdf".into()),
            bytes: b"not a pdf".to_vec(),
        };
        let err = orch.upload("c", bad_pdf).await.unwrap_err();
        assert_eq!(err.code(), "capability_error");

        // Only the parse failure is a server-side failure.
        let m = orch.metrics();
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_completion_failure_is_generic_but_recorded() {
        let orch = QueryOrchestrator::with_providers(
            Config::minimal(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(BrokenCompleter),
        );
        orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();

        let err = orch.chat("c", ChatRequest::new("hours?")).await.unwrap_err();
        assert_eq!(err.public_message(), "error processing request");
        assert_eq!(err.status(), 500);

        let m = orch.metrics();
        assert_eq!(m.failed_requests, 1);
        assert!(m.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_upload_without_indexing() {
        let mut config = Config::minimal();
        config.upload.index_on_upload = false;
        let orch = orchestrator_with(config);
        let resp = orch.upload("c", text_file("guide.txt", GUIDE)).await.unwrap();
        assert_eq!(resp.metadata.chunk_count, 1);
        assert!(orch.index().is_empty());
    }
}
