//! Multiplexed tunnel session over a single WebSocket
//!
//! The session owns two background tasks: a writer draining the outgoing
//! frame queue into the WebSocket sink, and a reader dispatching incoming
//! frames to per-stream channels. Every open stream gets a pump task moving
//! bytes between its [`TunnelStream`] and the frame queue.
//!
//! Each direction of a stream is credit based: a sender may have at most
//! [`STREAM_WINDOW`] unacknowledged bytes in flight, and the receiver hands
//! credit back with `WINDOW_UPDATE` once bytes reach the local stream. The
//! reader never waits on a single stream, so a stream nobody reads cannot
//! hold up its siblings.
//!
//! The relay allocates stream IDs and sends `DIAL`; the gateway answers with
//! `DIAL_OK` (via [`TunnelSession::accept`]) or `DIAL_ERR` (via
//! [`TunnelSession::reject`]).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portexporter_proto::{
    DialRequest, Frame, FrameType, StreamId, MAX_DATA_PAYLOAD, STREAM_WINDOW,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dialer::{Dialer, TunnelStream};
use crate::error::DialError;

/// How long the relay waits for the gateway to answer a dial
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

const STREAM_BUFFER: usize = 64 * 1024;
const FRAME_QUEUE: usize = 256;
const DIAL_QUEUE: usize = 64;

enum StreamEvent {
    Data(Bytes),
    Fin,
}

struct StreamSlot {
    tx: mpsc::UnboundedSender<StreamEvent>,
    reset: CancellationToken,
    /// Credit for sending on this stream, topped up by the peer's window updates
    send_window: Arc<Semaphore>,
    /// Bytes received but not yet written into the local stream
    buffered: Arc<AtomicUsize>,
}

/// The pump's side of a registered stream
struct StreamEnds {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    reset: CancellationToken,
    send_window: Arc<Semaphore>,
    buffered: Arc<AtomicUsize>,
}

type StreamMap = Arc<Mutex<HashMap<StreamId, StreamSlot>>>;
type PendingMap = Mutex<HashMap<StreamId, oneshot::Sender<Result<(), String>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dial request received from the peer, to be answered with
/// [`TunnelSession::accept`] or [`TunnelSession::reject`]
#[derive(Debug, Clone)]
pub struct IncomingDial {
    pub stream_id: StreamId,
    pub request: DialRequest,
}

/// One live tunnel connection
pub struct TunnelSession {
    id: String,
    frame_tx: mpsc::Sender<Frame>,
    streams: StreamMap,
    pending: PendingMap,
    next_stream_id: AtomicU32,
    closed: CancellationToken,
    connected_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl TunnelSession {
    /// Start multiplexing over an established WebSocket.
    ///
    /// The session ends when the WebSocket closes, [`Self::close`] is called,
    /// or `shutdown` is cancelled. Dial requests from the peer are delivered
    /// on the returned receiver; dropping it makes the session refuse them.
    pub fn spawn<S>(
        ws: WebSocketStream<S>,
        shutdown: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<IncomingDial>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE);

        let session = Arc::new(Self {
            id: format!("ws-{}", uuid::Uuid::new_v4()),
            frame_tx,
            streams: Arc::new(Mutex::new(HashMap::new())),
            pending: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(1),
            closed: shutdown.child_token(),
            connected_at: chrono::Utc::now(),
        });

        debug!(session_id = %session.id, "Tunnel session started");

        tokio::spawn(writer_task(
            sink,
            frame_rx,
            session.closed.clone(),
            session.id.clone(),
        ));
        tokio::spawn(session.clone().reader_task(source, dial_tx));

        (session, dial_rx)
    }

    pub fn connected_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Number of streams currently open or being dialed
    pub fn active_streams(&self) -> usize {
        lock(&self.streams).len()
    }

    /// Confirm a dial from the peer and open the stream
    pub async fn accept(&self, stream_id: StreamId) -> Result<TunnelStream, DialError> {
        let ends = self.register(stream_id);

        if !self.send_frame(Frame::dial_ok(stream_id)).await {
            self.forget(stream_id);
            return Err(DialError::SessionClosed);
        }

        Ok(self.open_stream(stream_id, ends))
    }

    /// Refuse a dial from the peer
    pub async fn reject(&self, stream_id: StreamId, reason: &str) {
        self.send_frame(Frame::dial_err(stream_id, reason)).await;
    }

    async fn send_frame(&self, frame: Frame) -> bool {
        self.frame_tx.send(frame).await.is_ok()
    }

    /// Route frames for `stream_id` to a new slot with a full send window
    fn register(&self, stream_id: StreamId) -> StreamEnds {
        let (tx, events) = mpsc::unbounded_channel();
        let reset = self.closed.child_token();
        let send_window = Arc::new(Semaphore::new(STREAM_WINDOW as usize));
        let buffered = Arc::new(AtomicUsize::new(0));

        lock(&self.streams).insert(
            stream_id,
            StreamSlot {
                tx,
                reset: reset.clone(),
                send_window: send_window.clone(),
                buffered: buffered.clone(),
            },
        );

        StreamEnds {
            events,
            reset,
            send_window,
            buffered,
        }
    }

    /// Abort a stream locally and tell the peer, without waiting on the frame queue
    fn reset_stream(&self, stream_id: StreamId) {
        if let Some(slot) = lock(&self.streams).remove(&stream_id) {
            slot.reset.cancel();
        }
        if self.frame_tx.try_send(Frame::reset(stream_id)).is_err() {
            debug!(session_id = %self.id, stream_id, "Frame queue full, reset not sent");
        }
    }

    fn forget(&self, stream_id: StreamId) {
        lock(&self.streams).remove(&stream_id);
        lock(&self.pending).remove(&stream_id);
    }

    fn open_stream(&self, stream_id: StreamId, ends: StreamEnds) -> TunnelStream {
        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        tokio::spawn(pump(
            stream_id,
            remote,
            ends,
            self.frame_tx.clone(),
            self.streams.clone(),
        ));
        local
    }

    async fn reader_task<S>(
        self: Arc<Self>,
        mut source: SplitStream<WebSocketStream<S>>,
        dial_tx: mpsc::Sender<IncomingDial>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                message = source.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => match Frame::decode(&data) {
                    Ok(frame) => self.dispatch(frame, &dial_tx).await,
                    Err(e) => warn!(session_id = %self.id, "Dropping malformed frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %self.id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }

        self.closed.cancel();
        lock(&self.streams).clear();
        lock(&self.pending).clear();
        debug!(session_id = %self.id, "Tunnel session ended");
    }

    async fn dispatch(&self, frame: Frame, dial_tx: &mpsc::Sender<IncomingDial>) {
        let stream_id = frame.stream_id;
        trace!(
            session_id = %self.id,
            stream_id,
            frame_type = ?frame.frame_type,
            len = frame.payload.len(),
            "Received frame"
        );

        match frame.frame_type {
            FrameType::Data => {
                let slot = lock(&self.streams)
                    .get(&stream_id)
                    .map(|slot| (slot.tx.clone(), slot.buffered.clone()));
                let Some((tx, buffered)) = slot else {
                    self.send_frame(Frame::reset(stream_id)).await;
                    return;
                };

                let len = frame.payload.len();
                let queued = buffered.fetch_add(len, Ordering::AcqRel) + len;
                if queued > STREAM_WINDOW as usize {
                    warn!(session_id = %self.id, stream_id, queued, "Peer overran the stream window");
                    self.reset_stream(stream_id);
                    return;
                }

                if tx.send(StreamEvent::Data(frame.payload)).is_err() {
                    trace!(session_id = %self.id, stream_id, "Stream receiver dropped");
                }
            }
            FrameType::Fin => {
                let tx = lock(&self.streams).get(&stream_id).map(|slot| slot.tx.clone());
                if let Some(tx) = tx {
                    let _ = tx.send(StreamEvent::Fin);
                }
            }
            FrameType::WindowUpdate => {
                let increment = match frame.window_increment() {
                    Ok(increment) => increment as usize,
                    Err(e) => {
                        warn!(session_id = %self.id, stream_id, "Dropping window update: {}", e);
                        return;
                    }
                };

                let window = lock(&self.streams)
                    .get(&stream_id)
                    .map(|slot| slot.send_window.clone());
                let Some(window) = window else { return };

                // Credit never exceeds the window, whatever the peer claims
                if window.available_permits() + increment > STREAM_WINDOW as usize {
                    warn!(session_id = %self.id, stream_id, increment, "Peer granted credit it never received");
                    self.reset_stream(stream_id);
                    return;
                }
                window.add_permits(increment);
            }
            FrameType::Reset => {
                if let Some(slot) = lock(&self.streams).remove(&stream_id) {
                    slot.reset.cancel();
                }
                if let Some(waiter) = lock(&self.pending).remove(&stream_id) {
                    let _ = waiter.send(Err("stream reset by peer".to_string()));
                }
            }
            FrameType::Dial => match DialRequest::decode(&frame.payload) {
                Ok(request) => {
                    if dial_tx.send(IncomingDial { stream_id, request }).await.is_err() {
                        self.reject(stream_id, "dials are not accepted by this peer")
                            .await;
                    }
                }
                Err(e) => self.reject(stream_id, &e.to_string()).await,
            },
            FrameType::DialOk => {
                if let Some(waiter) = lock(&self.pending).remove(&stream_id) {
                    let _ = waiter.send(Ok(()));
                }
            }
            FrameType::DialErr => {
                lock(&self.streams).remove(&stream_id);
                if let Some(waiter) = lock(&self.pending).remove(&stream_id) {
                    let _ = waiter.send(Err(frame.payload_text()));
                }
            }
        }
    }
}

#[async_trait]
impl Dialer for TunnelSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn dial(&self, network: &str, address: &str) -> Result<TunnelStream, DialError> {
        if self.is_closed() {
            return Err(DialError::SessionClosed);
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();

        // Registered before DIAL goes out so data following DIAL_OK is queued
        let ends = self.register(stream_id);
        lock(&self.pending).insert(stream_id, done_tx);

        let request = DialRequest::new(network, address);
        debug!(session_id = %self.id, stream_id, target = %request, "Dialing through tunnel");

        if !self.send_frame(Frame::dial(stream_id, &request)).await {
            self.forget(stream_id);
            return Err(DialError::SessionClosed);
        }

        let outcome = tokio::select! {
            _ = self.closed.cancelled() => Err(DialError::SessionClosed),
            answer = tokio::time::timeout(DIAL_TIMEOUT, done_rx) => match answer {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(reason))) => Err(DialError::Refused {
                    address: address.to_string(),
                    reason,
                }),
                Ok(Err(_)) => Err(DialError::SessionClosed),
                Err(_) => Err(DialError::Timeout {
                    address: address.to_string(),
                    timeout: DIAL_TIMEOUT,
                }),
            },
        };

        match outcome {
            Ok(()) => Ok(self.open_stream(stream_id, ends)),
            Err(e) => {
                self.forget(stream_id);
                if matches!(e, DialError::Timeout { .. }) {
                    let _ = self.frame_tx.try_send(Frame::reset(stream_id));
                }
                Err(e)
            }
        }
    }
}

async fn writer_task<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    session_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = sink.send(Message::Binary(frame.encode())).await {
            debug!(session_id = %session_id, "WebSocket send error: {}", e);
            break;
        }
    }

    closed.cancel();
    let _ = sink.close().await;
    debug!(session_id = %session_id, "WebSocket writer task ended");
}

/// Move bytes between one stream's duplex end and the frame queue
///
/// Outbound data waits for send credit. Inbound data releases credit back
/// to the peer once it has been written into the local stream.
async fn pump(
    stream_id: StreamId,
    remote: DuplexStream,
    ends: StreamEnds,
    frame_tx: mpsc::Sender<Frame>,
    streams: StreamMap,
) {
    let StreamEnds {
        mut events,
        reset,
        send_window,
        buffered,
    } = ends;
    let (mut reader, mut writer) = tokio::io::split(remote);

    let outbound = async {
        let mut buf = vec![0u8; MAX_DATA_PAYLOAD];
        loop {
            let n = tokio::select! {
                _ = reset.cancelled() => return,
                read = reader.read(&mut buf) => read.unwrap_or(0),
            };

            if n == 0 {
                let _ = frame_tx.send(Frame::fin(stream_id)).await;
                return;
            }

            // n never exceeds MAX_DATA_PAYLOAD, well inside the window
            let credit = tokio::select! {
                _ = reset.cancelled() => return,
                credit = send_window.acquire_many(n as u32) => credit,
            };
            match credit {
                Ok(permit) => permit.forget(),
                Err(_) => return,
            }

            let frame = Frame::data(stream_id, Bytes::copy_from_slice(&buf[..n]));
            if frame_tx.send(frame).await.is_err() {
                return;
            }
        }
    };

    let inbound = async {
        loop {
            let event = tokio::select! {
                _ = reset.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Some(StreamEvent::Data(bytes)) => {
                    let written = tokio::select! {
                        _ = reset.cancelled() => return,
                        written = writer.write_all(&bytes) => written,
                    };
                    if written.is_err() {
                        let _ = frame_tx.send(Frame::reset(stream_id)).await;
                        reset.cancel();
                        return;
                    }
                    buffered.fetch_sub(bytes.len(), Ordering::AcqRel);
                    let update = Frame::window_update(stream_id, bytes.len() as u32);
                    if frame_tx.send(update).await.is_err() {
                        return;
                    }
                }
                Some(StreamEvent::Fin) | None => {
                    let _ = writer.shutdown().await;
                    return;
                }
            }
        }
    };

    tokio::join!(outbound, inbound);
    lock(&streams).remove(&stream_id);
    trace!(stream_id, "Stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn session_pair() -> (
        Arc<TunnelSession>,
        Arc<TunnelSession>,
        mpsc::Receiver<IncomingDial>,
    ) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        let (relay_ws, gateway_ws) = tokio::join!(
            WebSocketStream::from_raw_socket(a, Role::Server, None),
            WebSocketStream::from_raw_socket(b, Role::Client, None),
        );

        let shutdown = CancellationToken::new();
        let (relay, _) = TunnelSession::spawn(relay_ws, &shutdown);
        let (gateway, dials) = TunnelSession::spawn(gateway_ws, &shutdown);
        (relay, gateway, dials)
    }

    fn serve_echo(gateway: Arc<TunnelSession>, mut dials: mpsc::Receiver<IncomingDial>) {
        tokio::spawn(async move {
            while let Some(dial) = dials.recv().await {
                let mut stream = gateway.accept(dial.stream_id).await.unwrap();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    stream.read_to_end(&mut buf).await.unwrap();
                    stream.write_all(&buf).await.unwrap();
                    stream.shutdown().await.unwrap();
                });
            }
        });
    }

    #[tokio::test]
    async fn test_dial_and_echo() {
        let (relay, gateway, dials) = session_pair().await;
        serve_echo(gateway, dials);

        let mut stream = relay.dial("tcp", "127.0.0.1:9000").await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn test_large_payload_is_split_into_frames() {
        let (relay, gateway, dials) = session_pair().await;
        serve_echo(gateway, dials);

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let stream = relay.dial("tcp", "127.0.0.1:9000").await.unwrap();

        let (mut rd, mut wr) = tokio::io::split(stream);
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            wr.write_all(&payload).await.unwrap();
            wr.shutdown().await.unwrap();
        });

        let mut reply = Vec::new();
        rd.read_to_end(&mut reply).await.unwrap();
        writer.await.unwrap();
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn test_unread_stream_does_not_stall_siblings() {
        const BULK: usize = 4 * 1024 * 1024;

        let (relay, gateway, mut dials) = session_pair().await;
        tokio::spawn(async move {
            while let Some(dial) = dials.recv().await {
                let mut stream = gateway.accept(dial.stream_id).await.unwrap();
                if dial.request.address == "bulk:1" {
                    tokio::spawn(async move {
                        let chunk = vec![7u8; 64 * 1024];
                        for _ in 0..BULK / chunk.len() {
                            stream.write_all(&chunk).await.unwrap();
                        }
                        stream.shutdown().await.unwrap();
                    });
                } else {
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        stream.read_to_end(&mut buf).await.unwrap();
                        stream.write_all(&buf).await.unwrap();
                        stream.shutdown().await.unwrap();
                    });
                }
            }
        });

        // Nobody reads the bulk stream while its sender runs out of credit
        let mut bulk = relay.dial("tcp", "bulk:1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let sibling = async {
            let mut stream = relay.dial("tcp", "fast:1").await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            stream.shutdown().await.unwrap();
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            reply
        };
        let reply = tokio::time::timeout(Duration::from_secs(3), sibling)
            .await
            .expect("sibling stream stalled behind an unread stream");
        assert_eq!(reply, b"ping");

        // Backpressure, not loss: the bulk stream still delivers everything
        let mut received = Vec::new();
        bulk.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), BULK);
        assert!(received.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn test_window_overrun_resets_stream() {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let (relay_ws, mut peer) = tokio::join!(
            WebSocketStream::from_raw_socket(a, Role::Server, None),
            WebSocketStream::from_raw_socket(b, Role::Client, None),
        );
        let (relay, _) = TunnelSession::spawn(relay_ws, &CancellationToken::new());

        let dial = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.dial("tcp", "bulk:1").await })
        };
        let stream_id = match peer.next().await {
            Some(Ok(Message::Binary(data))) => Frame::decode(&data).unwrap().stream_id,
            other => panic!("expected a dial frame, got {other:?}"),
        };
        peer.send(Message::Binary(Frame::dial_ok(stream_id).encode()))
            .await
            .unwrap();
        let _unread = dial.await.unwrap().unwrap();

        // Ignore window updates and keep sending past the window
        let chunk = Bytes::from(vec![0u8; MAX_DATA_PAYLOAD]);
        let frames = (STREAM_WINDOW as usize + STREAM_BUFFER) / MAX_DATA_PAYLOAD + 2;
        for _ in 0..frames {
            peer.send(Message::Binary(Frame::data(stream_id, chunk.clone()).encode()))
                .await
                .unwrap();
        }

        let reset = tokio::time::timeout(Duration::from_secs(3), async {
            while let Some(Ok(message)) = peer.next().await {
                if let Message::Binary(data) = message {
                    let frame = Frame::decode(&data).unwrap();
                    if frame.frame_type == FrameType::Reset {
                        return frame.stream_id;
                    }
                }
            }
            panic!("tunnel closed without a reset");
        })
        .await
        .unwrap();
        assert_eq!(reset, stream_id);
        assert_eq!(relay.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_dial_refused_by_peer() {
        let (relay, gateway, mut dials) = session_pair().await;
        tokio::spawn(async move {
            let dial = dials.recv().await.unwrap();
            assert_eq!(dial.request.network, "tcp");
            assert_eq!(dial.request.address, "10.0.0.1:22");
            gateway.reject(dial.stream_id, "address not exposed").await;
        });

        let err = relay.dial("tcp", "10.0.0.1:22").await.unwrap_err();
        match err {
            DialError::Refused { address, reason } => {
                assert_eq!(address, "10.0.0.1:22");
                assert_eq!(reason, "address not exposed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(relay.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_dial_refused_when_peer_does_not_serve_dials() {
        let (relay, gateway, _dials) = session_pair().await;

        // The relay side dropped its dial receiver in session_pair
        let err = gateway.dial("tcp", "127.0.0.1:80").await.unwrap_err();
        assert!(matches!(err, DialError::Refused { .. }));
        drop(relay);
    }

    #[tokio::test]
    async fn test_close_fails_pending_dial() {
        let (relay, gateway, _dials) = session_pair().await;

        let dial = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.dial("tcp", "127.0.0.1:9000").await })
        };

        tokio::task::yield_now().await;
        gateway.close();

        let err = dial.await.unwrap().unwrap_err();
        assert!(matches!(err, DialError::SessionClosed));
        relay.closed().await;
        assert!(relay.is_closed());
    }

    #[tokio::test]
    async fn test_dial_after_close() {
        let (relay, _gateway, _dials) = session_pair().await;
        relay.close();

        let err = relay.dial("tcp", "127.0.0.1:9000").await.unwrap_err();
        assert!(matches!(err, DialError::SessionClosed));
    }

    #[tokio::test]
    async fn test_sessions_have_distinct_ids() {
        let (relay, gateway, _dials) = session_pair().await;
        assert_ne!(relay.id(), gateway.id());
        assert!(relay.id().starts_with("ws-"));
    }
}
