//! The WebSocket engine: upgrade handshake, frame codec, fragmentation,
//! control frames, ping/pong keepalive, close handshake (`spec.md` §4.6).

pub mod frame;
pub mod handshake;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::connect::Connector;
use crate::error::{Error, Result, TimeoutPhase};
use crate::header::HeaderStore;
use crate::stream::BoxStream;
use crate::timeout::Timeouts;
use frame::{Frame, Opcode};

/// Whether a delivered [`Message`] carries text or binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A decoded application message delivered to the consumer (`spec.md`
/// §4.6 "`Message{type, data, raw, opcode}`").
///
/// `raw` is the payload as received off the wire; `data` is `raw` unless a
/// [`ProtocolHandler`] transforms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub data: Vec<u8>,
    pub raw: Vec<u8>,
}

impl Message {
    fn raw(kind: MessageKind, payload: Vec<u8>) -> Self {
        Message {
            kind,
            data: payload.clone(),
            raw: payload,
        }
    }
}

/// A capability plugged in at handshake time to negotiate and codec a
/// custom WebSocket subprotocol (`spec.md` §4.6 "Custom protocols").
pub trait ProtocolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, msg: &Message) -> Vec<u8>;
    fn decode(&self, kind: MessageKind, bytes: &[u8]) -> Message;
}

/// Tunable session behavior (`spec.md` §4.6, §6 `WSOptions`).
#[derive(Clone, Default)]
pub struct WsOptions {
    /// Interval between automatic keepalive pings. Requires `pong_timeout`
    /// to also be set; otherwise no keepalive task is started.
    pub ping_interval: Option<Duration>,
    /// How long to wait for a PONG before closing with code 1011.
    pub pong_timeout: Option<Duration>,
    /// An optional custom subprotocol, offered via `Sec-WebSocket-Protocol`.
    pub protocol_handler: Option<Arc<dyn ProtocolHandler>>,
}

enum SessionState {
    Open,
    Closed,
}

struct PendingPing {
    responder: oneshot::Sender<Vec<u8>>,
}

struct Shared {
    write: Mutex<WriteHalf<BoxStream>>,
    state: Mutex<SessionState>,
    pending_pings: Mutex<HashMap<Vec<u8>, PendingPing>>,
}

/// An open WebSocket session: a handshake-upgraded, pool-detached
/// connection driven by the fragmentation/control-frame state machine.
///
/// Writes are serialized through an internal lock; reads are driven by a
/// single consumer at a time — a second concurrent call to
/// [`WsSession::next_message`] fails with `ConcurrentReadError` (`spec.md`
/// §5).
pub struct WsSession {
    shared: Arc<Shared>,
    read: Mutex<Option<ReadHalf<BoxStream>>>,
    fragment: Mutex<Option<(MessageKind, Vec<u8>)>>,
    reading: AtomicBool,
    protocol_handler: Option<Arc<dyn ProtocolHandler>>,
    negotiated_protocol: Option<String>,
    keepalive: Option<JoinHandle<()>>,
}

/// Performs the Upgrade handshake and returns an open session.
pub async fn connect(
    connector: &Connector,
    url: Url,
    options: &WsOptions,
    extra_headers: &HeaderStore,
    timeouts: &Timeouts,
    user_agent: &str,
) -> Result<WsSession> {
    let protocol_name = options.protocol_handler.as_ref().map(|h| h.name().to_owned());
    let (connection, negotiated_protocol) = handshake::perform(
        connector,
        url,
        protocol_name.as_deref(),
        extra_headers,
        timeouts,
        user_agent,
    )
    .await?;

    let (read_half, write_half) = tokio::io::split(connection.into_stream());
    let shared = Arc::new(Shared {
        write: Mutex::new(write_half),
        state: Mutex::new(SessionState::Open),
        pending_pings: Mutex::new(HashMap::new()),
    });

    let mut session = WsSession {
        shared: shared.clone(),
        read: Mutex::new(Some(read_half)),
        fragment: Mutex::new(None),
        reading: AtomicBool::new(false),
        protocol_handler: options.protocol_handler.clone(),
        negotiated_protocol,
        keepalive: None,
    };

    if let (Some(interval), Some(pong_timeout)) = (options.ping_interval, options.pong_timeout) {
        session.keepalive = Some(spawn_keepalive(shared, interval, pong_timeout));
    }

    Ok(session)
}

impl WsSession {
    /// The subprotocol the server accepted, if any.
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.negotiated_protocol.as_deref()
    }

    /// Sends a TEXT frame.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(Opcode::Text, text.as_bytes()).await
    }

    /// Sends a BINARY frame.
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_frame(Opcode::Binary, data).await
    }

    async fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let payload = match &self.protocol_handler {
            Some(handler) => {
                let kind = if opcode == Opcode::Text { MessageKind::Text } else { MessageKind::Binary };
                handler.encode(&Message::raw(kind, payload.to_vec()))
            }
            None => payload.to_vec(),
        };
        let mut w = self.shared.write.lock().await;
        frame::write_frame(&mut *w, true, opcode, &payload).await
    }

    /// Sends a PING and returns a receiver that resolves with the matching
    /// PONG payload (`spec.md` §4.6 "records an awaitable").
    pub async fn ping(&self, payload: Option<Vec<u8>>) -> Result<oneshot::Receiver<Vec<u8>>> {
        let payload = payload.unwrap_or_else(random_ping_payload);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending_pings
            .lock()
            .await
            .insert(payload.clone(), PendingPing { responder: tx });
        let mut w = self.shared.write.lock().await;
        frame::write_frame(&mut *w, true, Opcode::Ping, &payload).await?;
        Ok(rx)
    }

    /// Sends a CLOSE frame with `code` (defaulting to 1000) and `reason`,
    /// moving the session to the closing state. 1006 is reserved and is
    /// never sent on the wire (`spec.md` §4.6).
    pub async fn close(&self, code: Option<u16>, reason: &str) -> Result<()> {
        let code = code.unwrap_or(1000);
        if code == 1006 {
            return Err(Error::builder("close code 1006 must never be sent on the wire"));
        }
        {
            let mut state = self.shared.state.lock().await;
            *state = SessionState::Closed;
        }
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let mut w = self.shared.write.lock().await;
        frame::write_frame(&mut *w, true, Opcode::Close, &payload).await
    }

    /// Waits for the next text message, failing if a binary message arrives
    /// first or `timeout` elapses (`spec.md` §4.6 "single frame, times out").
    pub async fn receive_text(&self, timeout: Option<Duration>) -> Result<String> {
        match self.receive_message(timeout).await? {
            Some(msg) if msg.kind == MessageKind::Text => {
                Ok(String::from_utf8_lossy(&msg.data).into_owned())
            }
            Some(_) => Err(Error::ws_protocol("expected a text message, got binary")),
            None => Err(Error::ws_closed(1000, "session closed before a message arrived")),
        }
    }

    /// Waits for the next message of either kind, returning its raw bytes.
    pub async fn receive_bytes(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        match self.receive_message(timeout).await? {
            Some(msg) => Ok(msg.data),
            None => Err(Error::ws_closed(1000, "session closed before a message arrived")),
        }
    }

    async fn receive_message(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        match timeout {
            Some(d) => match tokio::time::timeout(d, self.next_message()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(TimeoutPhase::Read, d)),
            },
            None => self.next_message().await,
        }
    }

    /// Reads and returns the next application message, transparently
    /// answering PINGs and matching PONGs along the way. Returns `Ok(None)`
    /// once the close handshake completes.
    ///
    /// Only one caller may be awaiting this at a time; a second concurrent
    /// call fails immediately with `ConcurrentReadError`.
    pub async fn next_message(&self) -> Result<Option<Message>> {
        if self.reading.swap(true, Ordering::SeqCst) {
            return Err(Error::concurrent_read());
        }
        let result = self.next_message_inner().await;
        self.reading.store(false, Ordering::SeqCst);
        result
    }

    async fn next_message_inner(&self) -> Result<Option<Message>> {
        let mut read_guard = self.read.lock().await;
        let r = read_guard.as_mut().expect("websocket read half missing");
        loop {
            let frame = frame::read_frame(r).await?;
            let outcome = {
                let mut fragment = self.fragment.lock().await;
                reduce_frame(&mut fragment, frame)?
            };
            match outcome {
                FrameOutcome::Continue => continue,
                FrameOutcome::Deliver(msg) => return Ok(Some(self.apply_protocol(msg))),
                FrameOutcome::SendPong(payload) => {
                    let mut w = self.shared.write.lock().await;
                    frame::write_frame(&mut *w, true, Opcode::Pong, &payload).await?;
                }
                FrameOutcome::GotPong(payload) => {
                    if let Some(pending) = self.shared.pending_pings.lock().await.remove(&payload) {
                        let _ = pending.responder.send(payload);
                    }
                }
                FrameOutcome::PeerClosed(code, reason) => {
                    let should_echo = {
                        let mut state = self.shared.state.lock().await;
                        let open = matches!(*state, SessionState::Open);
                        *state = SessionState::Closed;
                        open
                    };
                    if should_echo {
                        let mut payload = code.to_be_bytes().to_vec();
                        payload.extend_from_slice(reason.as_bytes());
                        let mut w = self.shared.write.lock().await;
                        let _ = frame::write_frame(&mut *w, true, Opcode::Close, &payload).await;
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn apply_protocol(&self, msg: Message) -> Message {
        match &self.protocol_handler {
            Some(handler) => handler.decode(msg.kind, &msg.raw),
            None => msg,
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.take() {
            handle.abort();
        }
    }
}

fn spawn_keepalive(shared: Arc<Shared>, interval: Duration, pong_timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            {
                let state = shared.state.lock().await;
                if !matches!(*state, SessionState::Open) {
                    break;
                }
            }

            let payload = random_ping_payload();
            let (tx, rx) = oneshot::channel();
            shared
                .pending_pings
                .lock()
                .await
                .insert(payload.clone(), PendingPing { responder: tx });

            let write_ok = {
                let mut w = shared.write.lock().await;
                frame::write_frame(&mut *w, true, Opcode::Ping, &payload).await.is_ok()
            };
            if !write_ok {
                break;
            }

            if tokio::time::timeout(pong_timeout, rx).await.is_err() {
                log::debug!("websocket keepalive timed out waiting for a pong, closing with 1011");
                let mut state = shared.state.lock().await;
                *state = SessionState::Closed;
                drop(state);
                let mut payload = 1011u16.to_be_bytes().to_vec();
                payload.extend_from_slice(b"keepalive timeout");
                let mut w = shared.write.lock().await;
                let _ = frame::write_frame(&mut *w, true, Opcode::Close, &payload).await;
                break;
            }
        }
    })
}

fn random_ping_payload() -> Vec<u8> {
    use rand::RngCore;
    let mut buf = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.to_vec()
}

fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    } else {
        (1005, String::new())
    }
}

/// The outcome of folding one newly-read [`Frame`] into the fragmentation
/// state machine (`spec.md` §4.6).
enum FrameOutcome {
    Continue,
    Deliver(Message),
    SendPong(Vec<u8>),
    GotPong(Vec<u8>),
    PeerClosed(u16, String),
}

/// Applies the fragmentation and control-frame rules to one frame, kept
/// free of I/O so the interleaving/continuation invariants are directly
/// testable.
fn reduce_frame(fragment: &mut Option<(MessageKind, Vec<u8>)>, frame: Frame) -> Result<FrameOutcome> {
    match frame.opcode {
        Opcode::Ping => Ok(FrameOutcome::SendPong(frame.payload)),
        Opcode::Pong => Ok(FrameOutcome::GotPong(frame.payload)),
        Opcode::Close => {
            let (code, reason) = parse_close_payload(&frame.payload);
            Ok(FrameOutcome::PeerClosed(code, reason))
        }
        Opcode::Text | Opcode::Binary => {
            if fragment.is_some() {
                return Err(Error::ws_protocol(
                    "a new data frame arrived while a fragmented message was open",
                ));
            }
            let kind = if frame.opcode == Opcode::Text {
                MessageKind::Text
            } else {
                MessageKind::Binary
            };
            if frame.fin {
                Ok(FrameOutcome::Deliver(Message::raw(kind, frame.payload)))
            } else {
                *fragment = Some((kind, frame.payload));
                Ok(FrameOutcome::Continue)
            }
        }
        Opcode::Continuation => {
            let Some((kind, mut buf)) = fragment.take() else {
                return Err(Error::ws_protocol("continuation frame without an open fragmented message"));
            };
            buf.extend_from_slice(&frame.payload);
            if frame.fin {
                Ok(FrameOutcome::Deliver(Message::raw(kind, buf)))
            } else {
                *fragment = Some((kind, buf));
                Ok(FrameOutcome::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Frame {
        Frame { fin, opcode, payload: payload.to_vec() }
    }

    #[test]
    fn single_frame_text_message_delivers_immediately() {
        let mut fragment = None;
        let outcome = reduce_frame(&mut fragment, frame(true, Opcode::Text, b"hi")).unwrap();
        match outcome {
            FrameOutcome::Deliver(msg) => {
                assert_eq!(msg.kind, MessageKind::Text);
                assert_eq!(msg.data, b"hi");
            }
            _ => panic!("expected Deliver"),
        }
        assert!(fragment.is_none());
    }

    #[test]
    fn fragmented_message_reassembles_across_continuations() {
        let mut fragment = None;
        assert!(matches!(
            reduce_frame(&mut fragment, frame(false, Opcode::Binary, b"ab")).unwrap(),
            FrameOutcome::Continue
        ));
        assert!(matches!(
            reduce_frame(&mut fragment, frame(false, Opcode::Continuation, b"cd")).unwrap(),
            FrameOutcome::Continue
        ));
        let outcome = reduce_frame(&mut fragment, frame(true, Opcode::Continuation, b"ef")).unwrap();
        match outcome {
            FrameOutcome::Deliver(msg) => {
                assert_eq!(msg.kind, MessageKind::Binary);
                assert_eq!(msg.data, b"abcdef");
            }
            _ => panic!("expected Deliver"),
        }
    }

    #[test]
    fn interleaved_data_frame_is_a_protocol_error() {
        let mut fragment = None;
        reduce_frame(&mut fragment, frame(false, Opcode::Text, b"a")).unwrap();
        let err = reduce_frame(&mut fragment, frame(true, Opcode::Binary, b"b")).unwrap_err();
        assert!(err.is_websocket());
    }

    #[test]
    fn continuation_without_open_fragment_is_a_protocol_error() {
        let mut fragment = None;
        let err = reduce_frame(&mut fragment, frame(true, Opcode::Continuation, b"x")).unwrap_err();
        assert!(err.is_websocket());
    }

    #[test]
    fn control_frames_pass_through_between_fragments() {
        let mut fragment = None;
        reduce_frame(&mut fragment, frame(false, Opcode::Text, b"a")).unwrap();
        let outcome = reduce_frame(&mut fragment, frame(true, Opcode::Ping, b"p")).unwrap();
        assert!(matches!(outcome, FrameOutcome::SendPong(p) if p == b"p"));
        // the fragment is still open afterward
        assert!(fragment.is_some());
    }

    #[test]
    fn close_frame_parses_code_and_reason() {
        let mut fragment = None;
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let outcome = reduce_frame(&mut fragment, frame(true, Opcode::Close, &payload)).unwrap();
        match outcome {
            FrameOutcome::PeerClosed(code, reason) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "bye");
            }
            _ => panic!("expected PeerClosed"),
        }
    }

    #[test]
    fn close_frame_without_payload_defaults_to_1005() {
        assert_eq!(parse_close_payload(&[]), (1005, String::new()));
    }
}
