//! One WebSocket session: `Idle → Listening → Alive → Terminated`.
//!
//! A session serves exactly one peer. Inbound frames are handled strictly in
//! order, one command at a time. Unsolicited pushes from other tasks go
//! through a bounded queue that the session loop drains, so the loop is the
//! only writer on the connection.

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as Json;
use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tether_protocol::{Reply, START_MARKER, STOP_MARKER, marker_line};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Alive,
    /// Terminal
    Terminated,
}

/// Entries of the session journal.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Listening(SocketAddr),
    Connected(SocketAddr),
    HandshakeFailed { peer: SocketAddr, error: String },
    Received(Json),
    DecodeFailed { frame: String, error: String },
    /// Envelope failed the command schema, nothing was sent back
    Dropped(Json),
    Closed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("failed to accept a connection: {0}")]
    Accept(std::io::Error),
    #[error("session is {0:?}")]
    InvalidState(SessionState),
    #[error("push queue is full")]
    QueueFull,
    #[error("session is closed")]
    Closed,
}

/// Receives the start and stop marker lines.
pub trait LifecycleSink: Send {
    fn emit(&mut self, line: &str);
}

/// Writes markers to stdout, one per line, flushed immediately.
pub struct StdoutSink;

impl LifecycleSink for StdoutSink {
    fn emit(&mut self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
            log::warn!("failed to write lifecycle marker: {err}");
        }
    }
}

impl<F: FnMut(&str) + Send> LifecycleSink for F {
    fn emit(&mut self, line: &str) {
        self(line)
    }
}

struct Shared {
    state: watch::Sender<SessionState>,
    journal: Mutex<VecDeque<SessionEvent>>,
    journal_capacity: usize,
    stop: Notify,
}

impl Shared {
    fn record(&self, event: SessionEvent) {
        if self.journal_capacity == 0 {
            return;
        }
        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        while journal.len() >= self.journal_capacity {
            journal.pop_front();
        }
        journal.push_back(event);
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        log::debug!("session {previous:?} -> {state:?}");
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Cloneable access to a running session from other tasks.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    outbox: mpsc::Sender<Json>,
}

impl SessionHandle {
    /// Queue an unsolicited message for the peer, waiting for queue space.
    pub async fn push(&self, message: Json) -> Result<(), SessionError> {
        if self.state() == SessionState::Terminated {
            return Err(SessionError::Closed);
        }
        self.outbox.send(message).await.map_err(|_| SessionError::Closed)
    }

    pub fn try_push(&self, message: Json) -> Result<(), SessionError> {
        if self.state() == SessionState::Terminated {
            return Err(SessionError::Closed);
        }
        self.outbox.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Ask the session to terminate. Works while listening or alive.
    pub fn stop(&self) {
        self.shared.stop.notify_one();
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session reaches `target`, or terminates first.
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut states = self.subscribe();
        match states
            .wait_for(|state| *state == target || *state == SessionState::Terminated)
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Terminated,
        }
    }

    /// Snapshot of the journal, oldest first.
    pub fn events(&self) -> Vec<SessionEvent> {
        let journal = self.shared.journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal.iter().cloned().collect()
    }
}

pub struct Session {
    config: SessionConfig,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<Shared>,
    outbox: mpsc::Sender<Json>,
    inbox: mpsc::Receiver<Json>,
    sink: Box<dyn LifecycleSink>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
}

impl Session {
    pub fn new(config: SessionConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (outbox, inbox) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Idle);
        let shared = Arc::new(Shared {
            state,
            journal: Mutex::new(VecDeque::new()),
            journal_capacity: config.journal_capacity,
            stop: Notify::new(),
        });
        Self {
            config,
            dispatcher,
            shared,
            outbox,
            inbox,
            sink: Box::new(StdoutSink),
            listener: None,
            local_addr: None,
        }
    }

    /// New session, already listening, markers on stdout.
    pub async fn bind(config: SessionConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, SessionError> {
        let mut session = Self::new(config, dispatcher);
        session.listen().await?;
        Ok(session)
    }

    pub fn with_sink(mut self, sink: impl LifecycleSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
            outbox: self.outbox.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `Idle → Listening`: bind and emit the start marker.
    pub async fn listen(&mut self) -> Result<SocketAddr, SessionError> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(SessionError::InvalidState(state));
        }

        let address = self.config.address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => return Err(SessionError::Bind { address, source }),
        };
        let local_addr = listener.local_addr().map_err(SessionError::Accept)?;

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        self.shared.record(SessionEvent::Listening(local_addr));
        self.shared.set_state(SessionState::Listening);
        log::info!("listening on ws://{local_addr}");
        self.emit_marker(START_MARKER);
        Ok(local_addr)
    }

    /// Serve one peer until the connection closes or [`SessionHandle::stop`]
    /// is called. Always ends `Terminated` with the stop marker emitted.
    pub async fn serve(mut self) -> Result<(), SessionError> {
        if self.state() == SessionState::Idle {
            self.listen().await?;
        }
        let Some(listener) = self.listener.take() else {
            return Err(SessionError::InvalidState(self.state()));
        };

        let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        let outcome = match accept(&listener, &self.shared, handshake_timeout).await {
            Ok(Some((websocket, peer))) => {
                drop(listener);
                log::info!("peer connected from {peer}");
                self.shared.record(SessionEvent::Connected(peer));
                self.shared.set_state(SessionState::Alive);
                Ok(converse(websocket, &self.dispatcher, &self.shared, &mut self.inbox).await)
            }
            Ok(None) => Ok("stopped while listening".to_string()),
            Err(err) => Err(err),
        };

        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(err) => err.to_string(),
        };
        self.terminate(reason);
        outcome.map(|_| ())
    }

    fn terminate(&mut self, reason: String) {
        self.inbox.close();
        log::info!("session terminated: {reason}");
        self.shared.record(SessionEvent::Closed(reason));
        self.shared.set_state(SessionState::Terminated);
        self.emit_marker(STOP_MARKER);
    }

    fn emit_marker(&mut self, marker: &str) {
        let port = self.local_addr.map_or(self.config.port, |addr| addr.port());
        let line = marker_line(marker, &self.config.host, port);
        self.sink.emit(&line);
    }
}

/// Wait for a peer that completes the WebSocket handshake. `None` when
/// stopped first, including while a handshake is in progress.
async fn accept(
    listener: &TcpListener,
    shared: &Shared,
    handshake_timeout: Duration,
) -> Result<Option<(WebSocketStream<TcpStream>, SocketAddr)>, SessionError> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shared.stop.notified() => return Ok(None),
            accepted = listener.accept() => accepted.map_err(SessionError::Accept)?,
        };
        let handshake = tokio::time::timeout(handshake_timeout, tokio_tungstenite::accept_async(stream));
        let error = tokio::select! {
            _ = shared.stop.notified() => return Ok(None),
            outcome = handshake => match outcome {
                Ok(Ok(websocket)) => return Ok(Some((websocket, peer))),
                Ok(Err(err)) => err.to_string(),
                Err(_elapsed) => format!("no upgrade request within {}ms", handshake_timeout.as_millis()),
            },
        };
        log::warn!("handshake with {peer} failed: {error}");
        shared.record(SessionEvent::HandshakeFailed { peer, error });
    }
}

enum Turn {
    Stop,
    Push(Json),
    Frame(Option<Result<Message, tungstenite::Error>>),
}

/// The `Alive` loop. Returns why it ended.
async fn converse(
    mut websocket: WebSocketStream<TcpStream>,
    dispatcher: &Dispatcher,
    shared: &Shared,
    inbox: &mut mpsc::Receiver<Json>,
) -> String {
    loop {
        let turn = tokio::select! {
            _ = shared.stop.notified() => Turn::Stop,
            Some(message) = inbox.recv() => Turn::Push(message),
            frame = websocket.next() => Turn::Frame(frame),
        };

        let text = match turn {
            Turn::Stop => {
                if let Err(err) = websocket.close(None).await {
                    log::debug!("close handshake failed: {err}");
                }
                return "stopped".to_string();
            }
            Turn::Push(message) => {
                if let Err(err) = websocket.send(Message::Text(message.to_string())).await {
                    return format!("send failed: {err}");
                }
                continue;
            }
            Turn::Frame(None) => return "connection closed".to_string(),
            // RFC 6455 fails the connection on invalid UTF-8 in a text frame,
            // and an oversized frame leaves its payload unread on the stream.
            Turn::Frame(Some(Err(err @ (tungstenite::Error::Utf8 | tungstenite::Error::Capacity(_))))) => {
                log::warn!("undecodable frame, closing: {err}");
                shared.record(SessionEvent::DecodeFailed {
                    frame: String::new(),
                    error: err.to_string(),
                });
                return format!("undecodable frame: {err}");
            }
            Turn::Frame(Some(Err(err))) => return format!("transport error: {err}"),
            Turn::Frame(Some(Ok(Message::Close(frame)))) => {
                return match frame {
                    Some(frame) => format!("closed by peer ({}): {}", frame.code, frame.reason),
                    None => "closed by peer".to_string(),
                };
            }
            Turn::Frame(Some(Ok(Message::Text(text)))) => text,
            Turn::Frame(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    log::warn!("binary frame is not UTF-8: {err}");
                    shared.record(SessionEvent::DecodeFailed {
                        frame: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                        error: err.to_string(),
                    });
                    continue;
                }
            },
            Turn::Frame(Some(Ok(_))) => continue,
        };

        let Some(reply) = handle_frame(&text, dispatcher, shared) else {
            continue;
        };
        let encoded = match serde_json::to_string(&reply) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::error!("failed to encode reply: {err}");
                continue;
            }
        };
        if let Err(err) = websocket.send(Message::Text(encoded)).await {
            return format!("send failed: {err}");
        }
    }
}

fn handle_frame(text: &str, dispatcher: &Dispatcher, shared: &Shared) -> Option<Reply> {
    let envelope: Json = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            log::warn!("undecodable frame: {err}");
            shared.record(SessionEvent::DecodeFailed {
                frame: text.to_string(),
                error: err.to_string(),
            });
            return None;
        }
    };
    shared.record(SessionEvent::Received(envelope.clone()));

    let reply = dispatcher.respond(&envelope);
    if reply.is_none() {
        shared.record(SessionEvent::Dropped(envelope));
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::engine::Engine;
    use serde_json::json;

    fn session(journal_capacity: usize) -> Session {
        let config = SessionConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            journal_capacity,
            ..SessionConfig::default()
        };
        let dispatcher = Dispatcher::new(Engine::new(builtins::catalog()));
        Session::new(config, Arc::new(dispatcher)).with_sink(|_: &str| {})
    }

    #[test]
    fn new_sessions_are_idle() {
        let session = session(4);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.handle().state(), SessionState::Idle);
        assert!(session.local_addr().is_none());
    }

    #[test]
    fn journal_keeps_the_newest_events() {
        let session = session(2);
        for n in 0..3 {
            session.shared.record(SessionEvent::Received(json!(n)));
        }
        assert_eq!(
            session.handle().events(),
            vec![SessionEvent::Received(json!(1)), SessionEvent::Received(json!(2))]
        );
    }

    #[test]
    fn zero_capacity_journal_records_nothing() {
        let session = session(0);
        session.shared.record(SessionEvent::Received(json!(1)));
        assert!(session.handle().events().is_empty());
    }

    #[test]
    fn frames_are_journaled_by_outcome() {
        let session = session(8);
        let dispatcher = Arc::clone(&session.dispatcher);

        assert!(handle_frame("{not json", &dispatcher, &session.shared).is_none());
        assert!(handle_frame(r#"{"foo":"bar"}"#, &dispatcher, &session.shared).is_none());
        let reply = handle_frame(r#"{"command":"ping"}"#, &dispatcher, &session.shared).unwrap();
        assert!(!reply.is_error());

        let events = session.handle().events();
        assert!(matches!(events[0], SessionEvent::DecodeFailed { .. }));
        assert_eq!(events[1], SessionEvent::Received(json!({"foo": "bar"})));
        assert_eq!(events[2], SessionEvent::Dropped(json!({"foo": "bar"})));
        assert_eq!(events[3], SessionEvent::Received(json!({"command": "ping"})));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn try_push_reports_a_full_queue() {
        let mut session = session(4);
        let (outbox, inbox) = mpsc::channel(1);
        session.outbox = outbox;
        session.inbox = inbox;

        let handle = session.handle();
        handle.try_push(json!(1)).unwrap();
        assert!(matches!(handle.try_push(json!(2)), Err(SessionError::QueueFull)));
    }

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let mut session = session(4);
        session.listen().await.unwrap();
        assert_eq!(session.state(), SessionState::Listening);
        assert!(matches!(
            session.listen().await,
            Err(SessionError::InvalidState(SessionState::Listening))
        ));
    }
}
