//! Messaging channel between a participant and the relay server.
//!
//! A [`Connector`] opens one [`Link`]: an outbound [`MessagingChannel`] plus
//! a receiver of decoded server events. The WebSocket implementation runs a
//! writer task and a reader task per link; both stop when the channel is
//! closed or the socket goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skillroom_core::wire::{self, ClientMessage, ServerMessage};

use crate::error::TransportError;

/// Buffered outbound frames per link.
const OUTBOUND_QUEUE: usize = 256;
/// Buffered inbound events per link.
const INBOUND_QUEUE: usize = 256;

/// Outbound half of an open link.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;
    async fn close(&self);
    fn is_open(&self) -> bool;
}

/// An open connection to the relay.
pub struct Link {
    pub channel: Arc<dyn MessagingChannel>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Link, TransportError>;
}

/// Connects to the relay's `/ws` endpoint.
pub struct WebSocketConnector {
    url: String,
    max_message_size: usize,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, max_message_size: usize) -> Self {
        Self {
            url: url.into(),
            max_message_size,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Link, TransportError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url = %self.url, "messaging channel open");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(INBOUND_QUEUE);
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        let writer_open = Arc::clone(&open);
        let _writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        let Some(text) = frame else { break };
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %e, "websocket write failed");
                            break;
                        }
                    }
                    () = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            writer_open.store(false, Ordering::Relaxed);
        });

        let reader_cancel = cancel.clone();
        let reader_open = Arc::clone(&open);
        let limit = self.max_message_size;
        let _reader = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    () = reader_cancel.cancelled() => break,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match wire::decode::<ServerMessage>(text.as_str(), limit) {
                            Ok(event) => {
                                if in_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping undecodable server frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::Relaxed);
            debug!("messaging channel reader stopped");
        });

        Ok(Link {
            channel: Arc::new(WebSocketChannel {
                outbound: out_tx,
                open,
                cancel,
            }),
            inbound: in_rx,
        })
    }
}

struct WebSocketChannel {
    outbound: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

#[async_trait]
impl MessagingChannel for WebSocketChannel {
    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let text = wire::encode(message)?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.cancel.is_cancelled()
    }
}

/// In-memory connector for driving a session without a server.
pub mod loopback {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use skillroom_core::wire::{ClientMessage, ServerMessage};

    use super::{Connector, Link, MessagingChannel};
    use crate::error::TransportError;

    #[derive(Default)]
    struct Shared {
        sent: Mutex<Vec<ClientMessage>>,
        inject: Mutex<Option<mpsc::Sender<ServerMessage>>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        fail_sends: AtomicBool,
        refuse: AtomicBool,
    }

    /// Records everything sent and lets the caller inject server events.
    /// Clones share state.
    #[derive(Clone, Default)]
    pub struct LoopbackConnector {
        shared: Arc<Shared>,
    }

    impl LoopbackConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<ClientMessage> {
            self.shared.sent.lock().clone()
        }

        pub fn take_sent(&self) -> Vec<ClientMessage> {
            std::mem::take(&mut *self.shared.sent.lock())
        }

        pub fn opens(&self) -> usize {
            self.shared.opens.load(Ordering::Relaxed)
        }

        pub fn closes(&self) -> usize {
            self.shared.closes.load(Ordering::Relaxed)
        }

        pub fn fail_sends(&self, fail: bool) {
            self.shared.fail_sends.store(fail, Ordering::Relaxed);
        }

        pub fn refuse_connections(&self, refuse: bool) {
            self.shared.refuse.store(refuse, Ordering::Relaxed);
        }

        /// Queue a server event on the most recent link.
        pub fn inject(&self, event: ServerMessage) -> bool {
            match self.shared.inject.lock().as_ref() {
                Some(tx) => tx.try_send(event).is_ok(),
                None => false,
            }
        }

        /// End the most recent link's inbound stream.
        pub fn hang_up(&self) {
            let _ = self.shared.inject.lock().take();
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn open(&self) -> Result<Link, TransportError> {
            if self.shared.refuse.load(Ordering::Relaxed) {
                return Err(TransportError::Connect("connection refused".into()));
            }
            let _ = self.shared.opens.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::channel(64);
            *self.shared.inject.lock() = Some(tx);
            Ok(Link {
                channel: Arc::new(LoopbackChannel {
                    shared: Arc::clone(&self.shared),
                    open: AtomicBool::new(true),
                }),
                inbound: rx,
            })
        }
    }

    struct LoopbackChannel {
        shared: Arc<Shared>,
        open: AtomicBool,
    }

    #[async_trait]
    impl MessagingChannel for LoopbackChannel {
        async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
            if !self.is_open() || self.shared.fail_sends.load(Ordering::Relaxed) {
                return Err(TransportError::Closed);
            }
            self.shared.sent.lock().push(message.clone());
            Ok(())
        }

        async fn close(&self) {
            if self.open.swap(false, Ordering::Relaxed) {
                let _ = self.shared.closes.fetch_add(1, Ordering::Relaxed);
            }
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::Relaxed)
        }
    }
}
