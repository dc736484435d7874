// Session transport
// One duplex WebSocket channel: ordered sends, received-frame hooks, the
// intercept-next primitive used by handshakes, and idempotent disposal.
// Frames that arrive before a hook or intercept exists are held back and
// delivered in order once one does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{transport_error, SimnetResult};

pub type TextHook = Arc<dyn Fn(String) + Send + Sync>;
pub type BinaryHook = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Delivery state for one frame kind; a single lock keeps intercepts, the
/// hook, and the backlog consistent with arrival order.
struct Delivery<T> {
    intercept: Option<oneshot::Sender<T>>,
    hook: Option<Arc<dyn Fn(T) + Send + Sync>>,
    backlog: VecDeque<T>,
}

impl<T> Delivery<T> {
    fn new() -> Self {
        Delivery {
            intercept: None,
            hook: None,
            backlog: VecDeque::new(),
        }
    }

    /// A frame came off the socket.
    fn deliver(&mut self, frame: T) {
        if let Some(tx) = self.intercept.take() {
            let _ = tx.send(frame);
            return;
        }
        match &self.hook {
            Some(hook) => hook(frame),
            None => self.backlog.push_back(frame),
        }
    }

    /// Install the ordinary handler and flush anything held back.
    fn set_hook(&mut self, hook: Arc<dyn Fn(T) + Send + Sync>) {
        while let Some(frame) = self.backlog.pop_front() {
            hook(frame);
        }
        self.hook = Some(hook);
    }
}

struct Shared {
    text: Mutex<Delivery<String>>,
    binary: Mutex<Delivery<Vec<u8>>>,
}

/// One live WebSocket connection with an id and a monitor.
///
/// Cloning is cheap; all clones refer to the same socket.
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    outbound: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
    // serialise intercept callers per kind: strict next-message semantics
    text_gate: Arc<AsyncMutex<()>>,
    binary_gate: Arc<AsyncMutex<()>>,
}

impl Session {
    /// Adopt an upgraded socket: split it and spawn the reader and writer
    /// tasks. The returned handle is the only way to talk to the peer.
    pub fn spawn(ws: WebSocket) -> Session {
        let id = Uuid::new_v4();
        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::channel::<Message>(64);
        let (closed_tx, closed_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            text: Mutex::new(Delivery::new()),
            binary: Mutex::new(Delivery::new()),
        });
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(
            stream,
            Arc::clone(&shared),
            Arc::clone(&closed),
            closed_tx,
        ));

        Session {
            id,
            outbound,
            shared,
            closed,
            closed_rx,
            text_gate: Arc::new(AsyncMutex::new(())),
            binary_gate: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one complete text frame, in caller order.
    pub async fn send_text(&self, text: String) -> SimnetResult<()> {
        if self.is_closed() {
            return Err(transport_error("session closed"));
        }
        self.outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| transport_error("session closed"))
    }

    /// Send one complete binary frame, in caller order.
    pub async fn send_binary(&self, bytes: Vec<u8>) -> SimnetResult<()> {
        if self.is_closed() {
            return Err(transport_error("session closed"));
        }
        self.outbound
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|_| transport_error("session closed"))
    }

    /// Capture the next text frame, bypassing the text hook. Only one
    /// intercept per kind is outstanding; a second caller waits for the
    /// first to resolve. Faults when the connection closes first.
    pub async fn intercept_next_text(&self) -> SimnetResult<String> {
        let _gate = self.text_gate.lock().await;
        let rx = {
            let mut delivery = self.shared.text.lock().unwrap();
            if let Some(frame) = delivery.backlog.pop_front() {
                return Ok(frame);
            }
            if self.is_closed() {
                return Err(transport_error("connection closed"));
            }
            let (tx, rx) = oneshot::channel();
            delivery.intercept = Some(tx);
            rx
        };
        rx.await.map_err(|_| transport_error("connection closed"))
    }

    /// Capture the next binary frame, bypassing the binary hook.
    pub async fn intercept_next_binary(&self) -> SimnetResult<Vec<u8>> {
        let _gate = self.binary_gate.lock().await;
        let rx = {
            let mut delivery = self.shared.binary.lock().unwrap();
            if let Some(frame) = delivery.backlog.pop_front() {
                return Ok(frame);
            }
            if self.is_closed() {
                return Err(transport_error("connection closed"));
            }
            let (tx, rx) = oneshot::channel();
            delivery.intercept = Some(tx);
            rx
        };
        rx.await.map_err(|_| transport_error("connection closed"))
    }

    /// Install the handler for ordinary text frames (those not captured by
    /// an intercept). Held-back frames flush through it immediately.
    pub fn set_text_hook(&self, hook: TextHook) {
        self.shared.text.lock().unwrap().set_hook(hook);
    }

    /// Install the handler for ordinary binary frames.
    pub fn set_binary_hook(&self, hook: BinaryHook) {
        self.shared.binary.lock().unwrap().set_hook(hook);
    }

    /// Close the socket with `code` and `reason`. Idempotent; all later
    /// sends fail fast.
    pub async fn dispose(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("session {} disposed: {} {}", self.id, code, reason);
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        // best effort: the writer forwards the close frame and stops
        let _ = self.outbound.send(Message::Close(Some(frame))).await;
    }

    /// Resolves when the connection is gone (peer disconnect, dispose, or
    /// transport failure). The session's cancellation signal.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        // the sender lives in the reader task; an error means it already quit
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if sink.send(msg).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
    closed_tx: watch::Sender<bool>,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                shared.text.lock().unwrap().deliver(text.to_string());
            }
            Ok(Message::Binary(bytes)) => {
                shared.binary.lock().unwrap().deliver(bytes.to_vec());
            }
            Ok(Message::Close(_)) => break,
            // axum answers pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(_) => break,
        }
    }

    closed.store(true, Ordering::SeqCst);
    let _ = closed_tx.send(true);
    // release any outstanding intercepts so their callers fault
    shared.text.lock().unwrap().intercept = None;
    shared.binary.lock().unwrap().intercept = None;
}
