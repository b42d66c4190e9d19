//! # Recognition Worker
//!
//! One task per voice session: pops PCM frames off the session queue, segments
//! them into utterances and sends each utterance to the speech recognizer.
//! Recognised lines become the session's last line and are handed to `on_line`
//! (the socket actor forwards them to the client as transcript lines).
//!
//! Recognition errors are logged and the stream keeps going. When the queue is
//! closed the worker drains it, flushes the utterance in progress and exits.

use crate::audio::segmenter::UtteranceSegmenter;
use crate::audio::session::VoiceSession;
use crate::speech::SpeechRecognizer;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn run_recognition<F>(
    session: Arc<VoiceSession>,
    mut segmenter: UtteranceSegmenter,
    recognizer: Arc<dyn SpeechRecognizer>,
    on_line: F,
) where
    F: Fn(String),
{
    let queue = session.queue();

    while let Some(frame) = queue.pop().await {
        for utterance in segmenter.push(&frame) {
            recognize_utterance(&session, recognizer.as_ref(), &utterance, &on_line).await;
        }
    }

    if let Some(utterance) = segmenter.flush() {
        recognize_utterance(&session, recognizer.as_ref(), &utterance, &on_line).await;
    }

    info!(session_id = %session.session_id, "Recognition worker finished");
}

async fn recognize_utterance<F>(session: &VoiceSession, recognizer: &dyn SpeechRecognizer, utterance: &[i16], on_line: &F)
where
    F: Fn(String),
{
    debug!(session_id = %session.session_id, samples = utterance.len(), "Recognizing utterance");

    match recognizer.recognize(utterance).await {
        Ok(Some(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return;
            }
            session.record_transcript(text);
            on_line(text.to_string());
        }
        Ok(None) => debug!(session_id = %session.session_id, "No speech recognised"),
        Err(err) => warn!(session_id = %session.session_id, error = %err, "Recognition failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::segmenter::SegmenterConfig;
    use crate::speech::SpeechError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies from a script, one entry per utterance.
    struct ScriptedRecognizer {
        replies: Mutex<Vec<Result<Option<String>, SpeechError>>>,
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(&self, _samples: &[i16]) -> Result<Option<String>, SpeechError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(None)
            } else {
                replies.remove(0)
            }
        }
    }

    fn segmenter() -> UtteranceSegmenter {
        UtteranceSegmenter::new(SegmenterConfig {
            energy_threshold: 500.0,
            min_speech_ms: 60,
            trailing_silence_ms: 60,
            max_utterance_ms: 3000,
        })
    }

    fn utterance_bytes() -> Vec<u8> {
        let mut samples: Vec<i16> = (0..480 * 4).map(|i| if i % 2 == 0 { 3000 } else { -3000 }).collect();
        samples.extend(std::iter::repeat(0).take(480 * 2));
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    async fn run(replies: Vec<Result<Option<String>, SpeechError>>, frames: Vec<Vec<u8>>) -> (Arc<VoiceSession>, Vec<String>) {
        let session = Arc::new(VoiceSession::new("s1".to_string(), 16));
        for frame in frames {
            session.push_audio(frame);
        }
        session.close();

        let recognizer = Arc::new(ScriptedRecognizer { replies: Mutex::new(replies) });
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        run_recognition(session.clone(), segmenter(), recognizer, move |line| sink.lock().unwrap().push(line)).await;

        let lines = lines.lock().unwrap().clone();
        (session, lines)
    }

    #[tokio::test]
    async fn test_recognised_lines_are_forwarded() {
        let (session, lines) = run(
            vec![Ok(Some("ما هي مدة التجربة؟".to_string())), Ok(Some("  مكافأة نهاية الخدمة  ".to_string()))],
            vec![utterance_bytes(), utterance_bytes()],
        )
        .await;

        assert_eq!(lines, vec!["ما هي مدة التجربة؟", "مكافأة نهاية الخدمة"]);
        assert_eq!(session.last_line().as_deref(), Some("مكافأة نهاية الخدمة"));
    }

    #[tokio::test]
    async fn test_errors_and_silence_do_not_stop_the_stream() {
        let (session, lines) = run(
            vec![
                Err(SpeechError::Request("timeout".to_string())),
                Ok(None),
                Ok(Some("   ".to_string())),
                Ok(Some("سؤال أخير".to_string())),
            ],
            vec![utterance_bytes(), utterance_bytes(), utterance_bytes(), utterance_bytes()],
        )
        .await;

        assert_eq!(lines, vec!["سؤال أخير"]);
        assert_eq!(session.last_line().as_deref(), Some("سؤال أخير"));
    }

    #[tokio::test]
    async fn test_close_flushes_pending_utterance() {
        // speech without trailing silence only completes on flush
        let speech: Vec<u8> = (0..480 * 4)
            .map(|i| if i % 2 == 0 { 3000i16 } else { -3000 })
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let (_, lines) = run(vec![Ok(Some("آخر جملة".to_string()))], vec![speech]).await;
        assert_eq!(lines, vec!["آخر جملة"]);
    }
}
