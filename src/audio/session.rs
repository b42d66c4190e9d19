//! # Voice Session Management
//!
//! Tracks the lifecycle of voice sessions, one per WebSocket connection, and
//! enforces the concurrent session limit. Each session owns the PCM frame queue
//! feeding its recognition worker and remembers the last recognised line, which
//! is what an `ask_answer` without text asks about.
//!
//! ## Session Lifecycle:
//! 1. **Connected**: socket open, no audio received yet
//! 2. **Listening**: at least one audio frame received
//! 3. **Closed**: socket closing, queue closed, waiting for removal

use crate::audio::queue::PcmQueue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Current status of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Listening,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connected => "connected",
            SessionStatus::Listening => "listening",
            SessionStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Default)]
struct SessionActivity {
    audio_bytes: usize,
    utterances: u32,
    questions: u32,
}

/// One connected voice client.
///
/// ## Thread Safety:
/// The actor and the recognition worker hold the same `Arc<VoiceSession>`; every
/// mutable field sits behind its own lock so neither side blocks the other for long.
#[derive(Debug)]
pub struct VoiceSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    queue: Arc<PcmQueue>,
    status: RwLock<SessionStatus>,
    last_line: RwLock<Option<String>>,
    activity: RwLock<SessionActivity>,
}

impl VoiceSession {
    pub fn new(session_id: String, queue_frames: usize) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            queue: Arc::new(PcmQueue::new(queue_frames)),
            status: RwLock::new(SessionStatus::Connected),
            last_line: RwLock::new(None),
            activity: RwLock::new(SessionActivity::default()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap()
    }

    pub fn queue(&self) -> Arc<PcmQueue> {
        self.queue.clone()
    }

    /// Queue a binary audio frame. Returns `true` if an older frame was dropped.
    pub fn push_audio(&self, frame: Vec<u8>) -> bool {
        {
            let mut status = self.status.write().unwrap();
            if *status == SessionStatus::Closed {
                return false;
            }
            *status = SessionStatus::Listening;
        }
        self.activity.write().unwrap().audio_bytes += frame.len();
        self.queue.push(frame)
    }

    /// Remember a recognised line as the session's most recent one.
    pub fn record_transcript(&self, text: &str) {
        *self.last_line.write().unwrap() = Some(text.to_string());
        self.activity.write().unwrap().utterances += 1;
    }

    pub fn last_line(&self) -> Option<String> {
        self.last_line.read().unwrap().clone()
    }

    pub fn record_question(&self) {
        self.activity.write().unwrap().questions += 1;
    }

    /// Close the frame queue; the recognition worker drains it and flushes.
    pub fn close(&self) {
        *self.status.write().unwrap() = SessionStatus::Closed;
        self.queue.close();
    }

    pub fn duration_seconds(&self) -> f64 {
        Utc::now().signed_duration_since(self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn summary(&self) -> SessionSummary {
        let activity = self.activity.read().unwrap();
        SessionSummary {
            audio_bytes: activity.audio_bytes,
            utterances: activity.utterances,
            questions: activity.questions,
            dropped_frames: self.queue.dropped_frames(),
            queued_frames: self.queue.len(),
            duration_seconds: self.duration_seconds(),
        }
    }
}

/// Activity counters of one session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub audio_bytes: usize,
    pub utterances: u32,
    pub questions: u32,
    pub dropped_frames: u64,
    /// Frames waiting for the recognition worker
    pub queued_frames: usize,
    pub duration_seconds: f64,
}

/// Manages the concurrent voice sessions.
///
/// ## Resource Management:
/// - Enforces the maximum number of concurrent sessions
/// - Sizes every session's frame queue from one setting
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<VoiceSession>>>,
    max_concurrent_sessions: usize,
    queue_frames: usize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize, queue_frames: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            queue_frames,
        }
    }

    /// Register a new session with a fresh UUID.
    ///
    /// ## Returns:
    /// - **Ok(session)**: session registered
    /// - **Err(message)**: the concurrent session limit is reached
    pub fn create_session(&self) -> Result<Arc<VoiceSession>, String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = Arc::new(VoiceSession::new(session_id.clone(), self.queue_frames));
        sessions.insert(session_id, session.clone());
        Ok(session)
    }

    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// Aggregate view of all sessions, for the health and metrics endpoints.
    pub fn get_sessions_summary(&self) -> SessionManagerSummary {
        let sessions = self.sessions.read().unwrap();

        let mut status_counts = HashMap::new();
        let mut total_audio_bytes = 0;
        let mut dropped_frames = 0;
        let mut queued_frames = 0;
        let mut questions = 0;

        for session in sessions.values() {
            *status_counts.entry(session.status().as_str().to_string()).or_insert(0) += 1;
            let summary = session.summary();
            total_audio_bytes += summary.audio_bytes;
            dropped_frames += summary.dropped_frames;
            queued_frames += summary.queued_frames;
            questions += summary.questions as u64;
        }

        SessionManagerSummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            status_counts,
            total_audio_bytes,
            dropped_frames,
            queued_frames,
            questions,
        }
    }
}

#[derive(Debug)]
pub struct SessionManagerSummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub status_counts: HashMap<String, usize>,
    pub total_audio_bytes: usize,
    pub dropped_frames: u64,
    pub queued_frames: usize,
    pub questions: u64,
}
