//! Local capture and the peer-to-peer media network.
//!
//! The room never touches real devices directly. [`MediaDevices`] hands out
//! a [`LocalStream`]; [`PeerNetwork`] registers a peer id and places or
//! accepts calls. [`SyntheticDevices`] and the in-process [`Switchboard`]
//! back both traits for terminal participants and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use skillroom_core::PeerId;

use crate::error::{MediaError, PeerError};

/// A captured camera/microphone stream.
///
/// `stop` consumes the stream, so it can run at most once, and only after
/// every clone of the surrounding `Arc` (one per open call) is gone. The
/// tracks can be muted while calls share the stream.
#[derive(Debug)]
pub struct LocalStream {
    audio: AtomicBool,
    video: AtomicBool,
    stops: Arc<AtomicUsize>,
}

impl LocalStream {
    pub fn audio_enabled(&self) -> bool {
        self.audio.load(Ordering::Relaxed)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.load(Ordering::Relaxed)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio.store(enabled, Ordering::Relaxed);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video.store(enabled, Ordering::Relaxed);
    }

    pub fn stop(self) {
        let _ = self.stops.fetch_add(1, Ordering::Relaxed);
        debug!(
            audio = self.audio_enabled(),
            video = self.video_enabled(),
            "local stream stopped"
        );
    }
}

/// Whether the session runs with local media.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MediaMode {
    #[default]
    Full,
    /// Capture failed; chat, code and whiteboard still work.
    Degraded { reason: String },
}

impl MediaMode {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn capture(&self) -> Result<Arc<LocalStream>, MediaError>;
}

/// Devices with a fixed outcome. Counts captures and stops.
pub struct SyntheticDevices {
    outcome: Result<(), MediaError>,
    captures: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl SyntheticDevices {
    pub fn granted() -> Self {
        Self::with_outcome(Ok(()))
    }

    pub fn denied() -> Self {
        Self::with_outcome(Err(MediaError::PermissionDenied))
    }

    pub fn no_device() -> Self {
        Self::with_outcome(Err(MediaError::NoDevice))
    }

    fn with_outcome(outcome: Result<(), MediaError>) -> Self {
        Self {
            outcome,
            captures: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::Relaxed)
    }

    /// Streams from this device that have been stopped.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn capture(&self) -> Result<Arc<LocalStream>, MediaError> {
        self.outcome.clone()?;
        let _ = self.captures.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(LocalStream {
            audio: AtomicBool::new(true),
            video: AtomicBool::new(true),
            stops: Arc::clone(&self.stops),
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// One established media call. Closing is idempotent and visible to both ends.
#[derive(Debug)]
pub struct MediaCall {
    peer: PeerId,
    direction: CallDirection,
    stream: Option<Arc<LocalStream>>,
    line: Arc<AtomicBool>,
}

impl MediaCall {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn is_open(&self) -> bool {
        self.line.load(Ordering::Relaxed)
    }

    /// Whether the call carries local media (false for receive-only answers).
    pub fn sends_media(&self) -> bool {
        self.stream.is_some()
    }

    /// Hang up and drop this call's reference to the local stream.
    pub fn close(&mut self) {
        self.line.store(false, Ordering::Relaxed);
        self.stream = None;
    }
}

/// A call placed by a remote peer, waiting to be answered.
#[derive(Debug)]
pub struct IncomingCall {
    pub from: PeerId,
    line: Arc<AtomicBool>,
}

impl IncomingCall {
    pub fn answer(self, stream: Option<Arc<LocalStream>>) -> MediaCall {
        MediaCall {
            peer: self.from,
            direction: CallDirection::Inbound,
            stream,
            line: self.line,
        }
    }

    pub fn decline(self) {
        self.line.store(false, Ordering::Relaxed);
    }
}

#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Register `id` and receive calls placed to it.
    async fn open(&self, id: &PeerId) -> Result<mpsc::UnboundedReceiver<IncomingCall>, PeerError>;

    async fn call(
        &self,
        from: &PeerId,
        to: &PeerId,
        stream: Option<Arc<LocalStream>>,
    ) -> Result<MediaCall, PeerError>;

    async fn release(&self, id: &PeerId);
}

/// In-process peer network. Clones share the same directory.
#[derive(Clone, Default)]
pub struct Switchboard {
    lines: Arc<DashMap<PeerId, mpsc::UnboundedSender<IncomingCall>>>,
    placed: Arc<AtomicUsize>,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls successfully delivered so far.
    pub fn calls_placed(&self) -> usize {
        self.placed.load(Ordering::Relaxed)
    }

    pub fn is_registered(&self, id: &PeerId) -> bool {
        self.lines.get(id).is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl PeerNetwork for Switchboard {
    async fn open(&self, id: &PeerId) -> Result<mpsc::UnboundedReceiver<IncomingCall>, PeerError> {
        if self.is_registered(id) {
            return Err(PeerError::IdTaken(id.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.lines.insert(id.clone(), tx);
        debug!(peer_id = %id, "peer id registered");
        Ok(rx)
    }

    async fn call(
        &self,
        from: &PeerId,
        to: &PeerId,
        stream: Option<Arc<LocalStream>>,
    ) -> Result<MediaCall, PeerError> {
        let line = Arc::new(AtomicBool::new(true));
        let delivered = self
            .lines
            .get(to)
            .map(|tx| {
                tx.send(IncomingCall {
                    from: from.clone(),
                    line: Arc::clone(&line),
                })
                .is_ok()
            })
            .unwrap_or(false);
        if !delivered {
            return Err(PeerError::Unreachable(to.clone()));
        }
        let _ = self.placed.fetch_add(1, Ordering::Relaxed);
        info!(from = %from, to = %to, "call placed");
        Ok(MediaCall {
            peer: to.clone(),
            direction: CallDirection::Outbound,
            stream,
            line,
        })
    }

    async fn release(&self, id: &PeerId) {
        let _ = self.lines.remove(id);
    }
}
