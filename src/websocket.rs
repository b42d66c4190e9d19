//! # WebSocket Voice Session Handler
//!
//! Clients connect to `/ws/audio`, stream microphone audio as binary frames and
//! ask for answers with small JSON control messages. The server replies with
//! plain text lines, prefixed by who is speaking.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the session is registered (or refused when the server is full)
//!    and two greeting lines are sent
//! 2. **Audio Streaming**: binary messages carry 16 kHz mono 16-bit LE PCM; they are
//!    queued for the recognition worker, which sends back transcript lines
//! 3. **Control**: text messages starting with `{` are JSON with a `type`:
//!    `ask_answer`, `ping` or `end_session`; anything else is ignored
//! 4. **Answers**: the answer text plus a numbered list of its sources
//!
//! ## Message Format:
//! - **Client → Server**: binary PCM, or JSON control messages
//! - **Server → Client**: `🤖 عدالة: ...` and `📄 المتحدث: ...` text lines, and a
//!   JSON `pong` reply

use crate::audio::recognition::run_recognition;
use crate::audio::segmenter::{SegmenterConfig, UtteranceSegmenter};
use crate::audio::session::{SessionStatus, VoiceSession};
use crate::rag::AnswerResult;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub const ASSISTANT_PREFIX: &str = "🤖 عدالة: ";
pub const SPEAKER_PREFIX: &str = "📄 المتحدث: ";

const WELCOME: &str = "🤖 عدالة: مرحبا بك! النظام جاهز.";
const WAITING_FOR_AUDIO: &str = "📄 المتحدث: تم الاتصال بالخادم — بانتظار الصوت...";
const AUDIO_PERMISSION_HINT: &str = "📄 المتحدث: إذا لم يظهر نص، تأكد من إذن الصوت في المتصفح.";
const SERVER_BUSY: &str = "🤖 عدالة: الخادم مشغول حاليًا، حاول لاحقًا.";
const NO_RECENT_TEXT: &str = "🤖 عدالة: لا يوجد نص حديث للاستخدام.";
const NO_ANSWER: &str = "🤖 عدالة: لا توجد إجابة.";
const SOURCES_HEADING: &str = "المراجع:";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const AUDIO_HINT_DELAY: Duration = Duration::from_secs(3);

/// JSON control messages sent by the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    EndSession,
    Ping,
    AskAnswer {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Parse a text frame. Frames that don't start with `{` or aren't valid JSON yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }
}

/// Render an answer for the client: the answer line, then one line per source.
pub fn format_answer(result: &AnswerResult) -> String {
    if result.answer.trim().is_empty() {
        return NO_ANSWER.to_string();
    }

    let mut text = format!("{}{}", ASSISTANT_PREFIX, result.answer.trim());
    if !result.sources.is_empty() {
        text.push_str("\n\n");
        text.push_str(SOURCES_HEADING);
        text.push('\n');
        let lines: Vec<String> = result
            .sources
            .iter()
            .enumerate()
            .map(|(i, source)| match &source.url {
                Some(url) => format!("[{}] {}\n{}", i + 1, source.display_title(), url),
                None => format!("[{}] {}", i + 1, source.display_title()),
            })
            .collect();
        text.push_str(&lines.join("\n"));
    }
    text
}

pub fn transcript_line(text: &str) -> String {
    format!("{}{}", SPEAKER_PREFIX, text)
}

/// The question an `ask_answer` refers to: its own text, else the last recognised line.
pub fn pick_query(text: Option<&str>, last_line: Option<String>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| last_line.filter(|line| !line.trim().is_empty()))
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// WebSocket actor for one voice session.
///
/// ## Actor Model:
/// Each connection is an independent actor. Long work (recognition, answering)
/// runs in spawned tasks that report back with `SendText` messages.
pub struct AnswerSocket {
    state: web::Data<AppState>,

    /// Registered when the actor starts; stays `None` if the session limit refused it
    session: Option<Arc<VoiceSession>>,

    last_heartbeat: Instant,
}

impl AnswerSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_recognition(&self, session: Arc<VoiceSession>, ctx: &mut ws::WebsocketContext<Self>) {
        let config = self.state.get_config();
        let segmenter = UtteranceSegmenter::new(SegmenterConfig::from(&config.speech));
        let recognizer = self.state.recognizer.clone();
        let addr = ctx.address();

        actix::spawn(run_recognition(session, segmenter, recognizer, move |line| {
            addr.do_send(SendText(transcript_line(&line)));
        }));
    }

    fn handle_control(&mut self, message: ControlMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ControlMessage::EndSession => {
                info!("Client ended the session");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Normal,
                    description: Some("user_stop".to_string()),
                }));
                ctx.stop();
            }
            ControlMessage::Ping => {
                ctx.text(json!({ "type": "pong", "ts": unix_seconds() }).to_string());
            }
            ControlMessage::AskAnswer { text } => self.handle_ask(text, ctx),
            ControlMessage::Unknown => debug!("Ignoring unknown control message"),
        }
    }

    fn handle_ask(&mut self, text: Option<String>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.clone() else {
            return;
        };

        let query = match pick_query(text.as_deref(), session.last_line()) {
            Some(query) => query,
            None => {
                ctx.text(NO_RECENT_TEXT);
                return;
            }
        };
        session.record_question();

        let state = self.state.clone();
        let config = state.get_config();
        let addr = ctx.address();

        actix::spawn(async move {
            let start_time = Instant::now();
            let result = state
                .composer
                .answer(&query, config.rag.top_k_default, config.rag.max_ctx_chars)
                .await;
            state.record_answer(result.outcome, start_time.elapsed().as_millis() as u64);
            addr.do_send(SendText(format_answer(&result)));
        });
    }

    fn refuse(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(SERVER_BUSY);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Again,
            description: Some("server_busy".to_string()),
        }));
        ctx.stop();
    }
}

/// Message for sending a text line to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

impl Actor for AnswerSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let session = match self.state.sessions.create_session() {
            Ok(session) => session,
            Err(err) => {
                warn!("Refusing WebSocket connection: {}", err);
                self.refuse(ctx);
                return;
            }
        };
        self.session = Some(session.clone());

        info!(session_id = %session.session_id, "Voice session started");
        ctx.text(WELCOME);
        ctx.text(WAITING_FOR_AUDIO);

        self.start_recognition(session, ctx);

        ctx.run_later(AUDIO_HINT_DELAY, |act, ctx| {
            if let Some(session) = &act.session {
                if session.status() == SessionStatus::Connected {
                    ctx.text(AUDIO_PERMISSION_HINT);
                }
            }
        });

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = self.session.take() {
            session.close();
            self.state.sessions.remove_session(&session.session_id);

            let summary = session.summary();
            info!(
                session_id = %session.session_id,
                audio_bytes = summary.audio_bytes,
                utterances = summary.utterances,
                questions = summary.questions,
                dropped_frames = summary.dropped_frames,
                duration_seconds = summary.duration_seconds,
                "Voice session stopped"
            );
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AnswerSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
                return;
            }
        };
        self.last_heartbeat = Instant::now();

        match msg {
            ws::Message::Binary(data) => {
                if let Some(session) = &self.session {
                    if session.push_audio(data.to_vec()) {
                        debug!(session_id = %session.session_id, "Audio queue full, dropped oldest frame");
                    }
                }
            }
            ws::Message::Text(text) => {
                if let Some(message) = ControlMessage::parse(&text) {
                    self.handle_control(message, ctx);
                }
            }
            ws::Message::Ping(data) => ctx.pong(&data),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => warn!("Received unexpected continuation frame"),
            ws::Message::Nop => {}
        }
    }
}

impl Handler<SendText> for AnswerSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// WebSocket endpoint handler.
///
/// The session is registered only once the upgrade succeeded and the actor
/// started; a refused connection still upgrades and receives the busy line.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(AnswerSocket::new(state), &req, stream)
}
