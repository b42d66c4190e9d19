//! # Answer Composer
//!
//! Runs one question through the pipeline and always returns a well-formed
//! [`AnswerResult`]:
//!
//! - **empty**: nothing retrieved, fixed "no information" answer
//! - **generated**: the backend produced a usable completion, returned verbatim
//! - **degraded**: the backend failed or answered with too little text; an apology
//!   followed by the extractive rendering of the top passages
//! - **extractive**: the composer was built without a model; extractive rendering only
//!
//! Retrieval (embedding and index search) is CPU-bound and runs on the blocking
//! pool. Generation is a single awaited HTTP call; there are no retries.

use crate::rag::error::GenerationError;
use crate::rag::generation::{GenerationMode, GenerationParams};
use crate::rag::passage::Passage;
use crate::rag::prompt::PromptBuilder;
use crate::rag::retriever::{KnowledgeBase, Retriever};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Answer returned when retrieval finds nothing.
pub const EMPTY_ANSWER: &str = "لا توجد معلومات";

/// First sentence of every degraded answer.
pub const APOLOGY: &str = "عذرًا، تعذر توليد إجابة مُبرهنة حاليًا.";

/// Completions shorter than this (after trimming) are treated as failures.
pub const MIN_COMPLETION_CHARS: usize = 20;

/// Most passages reported as sources and rendered in extractive answers.
pub const MAX_SOURCES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Empty,
    Generated,
    Degraded,
    Extractive,
}

impl AnswerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerOutcome::Empty => "empty",
            AnswerOutcome::Generated => "generated",
            AnswerOutcome::Degraded => "degraded",
            AnswerOutcome::Extractive => "extractive",
        }
    }
}

/// Result of one question.
///
/// `sources` is a prefix (at most three long) of the retrieved passages, in the
/// order they were cited. `retrieved` counts passages before that cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<Passage>,
    pub backend: String,
    pub retrieved: usize,
    pub outcome: AnswerOutcome,
}

pub struct AnswerComposer {
    retriever: Retriever,
    prompt_builder: PromptBuilder,
    mode: GenerationMode,
    params: GenerationParams,
}

impl AnswerComposer {
    pub fn new(knowledge: Arc<KnowledgeBase>, mode: GenerationMode, params: GenerationParams) -> Self {
        Self {
            retriever: Retriever::new(knowledge),
            prompt_builder: PromptBuilder::default(),
            mode,
            params,
        }
    }

    pub fn backend_tag(&self) -> &str {
        self.mode.tag()
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        self.retriever.knowledge()
    }

    /// Answer `query` from the `k_retrieve` nearest passages, citing at most
    /// `max_ctx_chars` characters of passage text in the prompt.
    pub async fn answer(&self, query: &str, k_retrieve: usize, max_ctx_chars: usize) -> AnswerResult {
        let start_time = Instant::now();

        let retrieved = match self.retrieve(query, k_retrieve).await {
            Some(passages) => passages,
            None => return self.result(APOLOGY.to_string(), &[], AnswerOutcome::Degraded),
        };

        let result = if retrieved.is_empty() {
            self.result(EMPTY_ANSWER.to_string(), &retrieved, AnswerOutcome::Empty)
        } else {
            match &self.mode {
                GenerationMode::Extractive => {
                    self.result(extractive_answer(&retrieved), &retrieved, AnswerOutcome::Extractive)
                }
                GenerationMode::Remote(backend) => {
                    let prompt = self.prompt_builder.build(query, &retrieved, max_ctx_chars);
                    debug!(
                        retrieved = retrieved.len(),
                        cited = prompt.sources.len(),
                        prompt_chars = prompt.text.chars().count(),
                        "Prompt built"
                    );

                    match backend.generate(&prompt.text, &self.params).await {
                        Ok(text) if text.trim().chars().count() >= MIN_COMPLETION_CHARS => {
                            self.result(text, &retrieved, AnswerOutcome::Generated)
                        }
                        Ok(text) => {
                            warn!(chars = text.trim().chars().count(), "Completion too short, using extractive fallback");
                            self.result(degraded_answer(&retrieved), &retrieved, AnswerOutcome::Degraded)
                        }
                        Err(err) => {
                            log_generation_error(&err);
                            self.result(degraded_answer(&retrieved), &retrieved, AnswerOutcome::Degraded)
                        }
                    }
                }
            }
        };

        info!(
            outcome = result.outcome.as_str(),
            backend = %result.backend,
            retrieved = result.retrieved,
            sources = result.sources.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Answer composed"
        );
        result
    }

    /// Run retrieval on the blocking pool. `None` means the embedder failed.
    async fn retrieve(&self, query: &str, k_retrieve: usize) -> Option<Vec<Passage>> {
        let retriever = self.retriever.clone();
        let query = query.to_string();

        match tokio::task::spawn_blocking(move || retriever.search(&query, k_retrieve)).await {
            Ok(Ok(passages)) => Some(passages),
            Ok(Err(err)) => {
                error!(error = %err, "Retrieval failed");
                None
            }
            Err(err) => {
                error!(error = %err, "Retrieval task panicked or was cancelled");
                None
            }
        }
    }

    fn result(&self, answer: String, retrieved: &[Passage], outcome: AnswerOutcome) -> AnswerResult {
        AnswerResult {
            answer,
            sources: retrieved.iter().take(MAX_SOURCES).cloned().collect(),
            backend: self.backend_tag().to_string(),
            retrieved: retrieved.len(),
            outcome,
        }
    }
}

fn log_generation_error(err: &GenerationError) {
    match err {
        GenerationError::Unreachable(_) => warn!(error = %err, "Generation backend unreachable, using extractive fallback"),
        _ => warn!(error = %err, "Generation failed, using extractive fallback"),
    }
}

/// Plain rendering of the top passages: `"{article} ({law}):\n{text}"`, or
/// `"({law}):\n{text}"` without an article title, separated by blank lines.
/// Passages with empty text are skipped.
pub fn extractive_answer(passages: &[Passage]) -> String {
    passages
        .iter()
        .take(MAX_SOURCES)
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| match &p.article_title {
            Some(article) => format!("{} ({}):\n{}", article, p.law_title, p.text),
            None => format!("({}):\n{}", p.law_title, p.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn degraded_answer(passages: &[Passage]) -> String {
    let extract = extractive_answer(passages);
    if extract.is_empty() {
        APOLOGY.to_string()
    } else {
        format!("{}\n\n{}", APOLOGY, extract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::generation::{GenerationBackend, LLAMA_TAG};
    use crate::rag::index::VectorIndex;
    use crate::rag::passage::PassageStore;
    use crate::rag::retriever::test_support::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PARAMS: GenerationParams = GenerationParams {
        temperature: 0.2,
        top_p: 0.9,
        max_tokens: 128,
    };

    /// Replies with a fixed completion, or as an unreachable server when `reply` is `None`.
    struct ScriptedBackend {
        reply: Option<&'static str>,
        calls: AtomicUsize,
        last_prompt: Mutex<String>,
    }

    impl ScriptedBackend {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn tag(&self) -> &str {
            LLAMA_TAG
        }

        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = prompt.to_string();
            match self.reply {
                Some(text) => Ok(text.to_string()),
                None => Err(GenerationError::Unreachable("connection refused".to_string())),
            }
        }
    }

    const LONG_COMPLETION: &str = "يحق للعامل مكافأة نهاية الخدمة وفق المادة [1].";

    fn composer(backend: Arc<ScriptedBackend>, passages: usize) -> AnswerComposer {
        AnswerComposer::new(line_knowledge(passages), GenerationMode::Remote(backend), PARAMS)
    }

    #[tokio::test]
    async fn test_empty_retrieval() {
        let store = PassageStore::from_parts(Vec::new(), VectorIndex::from_rows(Vec::new()).unwrap());
        let embedder = TableEmbedder { dim: 2, table: Vec::new() };
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(embedder)).unwrap());
        let backend = ScriptedBackend::new(Some(LONG_COMPLETION));
        let composer = AnswerComposer::new(knowledge, GenerationMode::Remote(backend.clone()), PARAMS);

        let result = composer.answer("سؤال", 6, 7000).await;
        assert_eq!(result.answer, EMPTY_ANSWER);
        assert!(result.sources.is_empty());
        assert_eq!(result.retrieved, 0);
        assert_eq!(result.outcome, AnswerOutcome::Empty);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generated_answer_is_verbatim() {
        let backend = ScriptedBackend::new(Some(LONG_COMPLETION));
        let composer = composer(backend.clone(), 10);

        let result = composer.answer("first", 6, 7000).await;
        assert_eq!(result.answer, LONG_COMPLETION);
        assert_eq!(result.outcome, AnswerOutcome::Generated);
        assert_eq!(result.backend, LLAMA_TAG);
        assert_eq!(result.retrieved, 6);
        assert_eq!(result.sources, vec![passage(0), passage(1), passage(2)]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let prompt = backend.last_prompt.lock().unwrap().clone();
        assert!(prompt.contains("[1] المادة 0 — نظام رقم 0"));
        assert!(prompt.contains("[6] المادة 5 — نظام رقم 5"));

        let result = composer.answer("first", 2, 7000).await;
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_short_completion_degrades() {
        let backend = ScriptedBackend::new(Some("ok"));
        let composer = composer(backend, 10);

        let result = composer.answer("first", 6, 7000).await;
        assert_eq!(result.outcome, AnswerOutcome::Degraded);
        assert_eq!(
            result.answer,
            format!("{}\n\n{}", APOLOGY, extractive_answer(&result.sources))
        );
        assert_eq!(result.sources.len(), 3);
        assert_eq!(result.retrieved, 6);
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_once() {
        let backend = ScriptedBackend::new(None);
        let composer = composer(backend.clone(), 10);

        let result = composer.answer("first", 6, 7000).await;
        assert_eq!(result.backend, LLAMA_TAG);
        assert!(result.answer.starts_with(APOLOGY));
        assert!(!result.sources.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_answer_is_idempotent() {
        let composer = composer(ScriptedBackend::new(Some(LONG_COMPLETION)), 10);
        let first = composer.answer("middle", 4, 7000).await;
        let second = composer.answer("middle", 4, 7000).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_extractive_mode_skips_backend() {
        let composer = AnswerComposer::new(line_knowledge(5), GenerationMode::Extractive, PARAMS);
        let result = composer.answer("first", 6, 7000).await;
        assert_eq!(result.outcome, AnswerOutcome::Extractive);
        assert_eq!(result.backend, "extractive");
        assert_eq!(result.retrieved, 5);
        assert_eq!(result.answer, extractive_answer(&result.sources));
        assert!(!result.answer.starts_with(APOLOGY));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let store = PassageStore::from_parts(vec![passage(0)], VectorIndex::from_rows(vec![vec![0.0]]).unwrap());
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(FailingEmbedder)).unwrap());
        let backend = ScriptedBackend::new(Some(LONG_COMPLETION));
        let composer = AnswerComposer::new(knowledge, GenerationMode::Remote(backend.clone()), PARAMS);

        let result = composer.answer("سؤال", 6, 7000).await;
        assert_eq!(result.answer, APOLOGY);
        assert!(result.sources.is_empty());
        assert_eq!(result.retrieved, 0);
        assert_eq!(result.outcome, AnswerOutcome::Degraded);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_degraded_without_passage_text_is_apology_only() {
        let blank = Passage::new("نظام العمل", Some("المادة 1"), "  ", None);
        let store = PassageStore::from_parts(
            vec![blank.clone(), blank.clone()],
            VectorIndex::from_rows(vec![vec![0.0, 0.0], vec![1.0, 0.0]]).unwrap(),
        );
        let embedder = TableEmbedder { dim: 2, table: Vec::new() };
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(embedder)).unwrap());
        let composer = AnswerComposer::new(knowledge, GenerationMode::Remote(ScriptedBackend::new(None)), PARAMS);

        let result = composer.answer("سؤال", 6, 7000).await;
        assert_eq!(result.answer, APOLOGY);
        assert_eq!(result.outcome, AnswerOutcome::Degraded);
        assert_eq!(result.sources, vec![blank.clone(), blank]);
        assert_eq!(result.retrieved, 2);
    }

    #[test]
    fn test_extractive_answer_format() {
        let passages = vec![
            Passage::new("نظام العمل", Some("المادة 77"), "نص المادة", None),
            Passage::new("نظام المرور", None, "نص ثان", None),
            Passage::new("نظام فارغ", None, "   ", None),
            Passage::new("نظام رابع", None, "لا يظهر", None),
        ];
        assert_eq!(
            extractive_answer(&passages),
            "المادة 77 (نظام العمل):\nنص المادة\n\n(نظام المرور):\nنص ثان"
        );
    }
}
