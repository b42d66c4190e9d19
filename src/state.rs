//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: many handlers and actors share ownership of the same objects
//! - **Read-only parts**: the answer composer and the speech recognizer are built
//!   once at startup and never change, so a plain `Arc` is enough
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Mutable parts**: configuration snapshot and metrics are updated while the
//!   server runs, so they sit behind a reader-writer lock
//! - **Short critical sections**: readers clone what they need and release the lock

use crate::audio::session::SessionManager;
use crate::config::AppConfig;
use crate::rag::{AnswerComposer, AnswerOutcome};
use crate::speech::SpeechRecognizer;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The application state shared across all handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and answer metrics, updated by the middleware and the answer paths
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The question-answering pipeline
    pub composer: Arc<AnswerComposer>,

    /// Recognizer used by every voice session
    pub recognizer: Arc<dyn SpeechRecognizer>,

    /// Active voice sessions
    pub sessions: Arc<SessionManager>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all requests and answers.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// Answers produced, by outcome
    pub answers: AnswerMetrics,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Counters over every composed answer, from HTTP and voice alike.
#[derive(Debug, Default, Clone)]
pub struct AnswerMetrics {
    pub total: u64,
    pub empty: u64,
    pub generated: u64,
    pub degraded: u64,
    pub extractive: u64,
    pub total_duration_ms: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        composer: Arc<AnswerComposer>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.performance.max_concurrent_sessions,
            config.performance.pcm_queue_frames,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            composer,
            recognizer,
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first request to an endpoint creates its entry with `or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one composed answer.
    pub fn record_answer(&self, outcome: AnswerOutcome, duration_ms: u64) {
        let mut metrics = self.metrics.write().unwrap();
        let answers = &mut metrics.answers;
        answers.total += 1;
        answers.total_duration_ms += duration_ms;
        match outcome {
            AnswerOutcome::Empty => answers.empty += 1,
            AnswerOutcome::Generated => answers.generated += 1,
            AnswerOutcome::Degraded => answers.degraded += 1,
            AnswerOutcome::Extractive => answers.extractive += 1,
        }
    }

    /// Snapshot of the current metrics, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AnswerMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        if self.total > 0 {
            self.total_duration_ms as f64 / self.total as f64
        } else {
            0.0
        }
    }

    /// Share of answers that fell back to the apology and extracts.
    pub fn degraded_rate(&self) -> f64 {
        if self.total > 0 {
            self.degraded as f64 / self.total as f64
        } else {
            0.0
        }
    }
}
