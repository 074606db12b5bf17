//! One participant's view of a live session.
//!
//! [`LiveSession`] owns the connection manager and the four tools, routes
//! inbound server events to them and posts local notices into chat. It is
//! driven through `&mut self` by a single owner. In-flight runs and AI
//! questions hang off one cancellation token that [`LiveSession::close`]
//! fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use skillroom_core::assist::AiTurn;
use skillroom_core::chat::ChatMessage;
use skillroom_core::wire::{ClientMessage, PeerInfo, ServerMessage};
use skillroom_core::{FileId, ParticipantId, SessionId};
use skillroom_settings::SkillroomSettings;

use crate::ai_help::{AiHelpTool, AskEndpoint, HttpAskEndpoint};
use crate::chat::{ChatTool, ChunkOutcome};
use crate::code::{CodeTool, CompileResult};
use crate::connection::{ConnectionManager, JoinReport, Participant};
use crate::error::{AskRejected, RoomError};
use crate::media::{MediaDevices, MediaMode, PeerNetwork, Switchboard, SyntheticDevices};
use crate::render::Raster;
use crate::runner::{CodeRunner, MockRunner};
use crate::transport::{Connector, WebSocketConnector};
use crate::whiteboard::Whiteboard;

pub const MEDIA_NOTICE: &str =
    "Unable to access camera or microphone. Please check your permissions.";
pub const RUN_OK_NOTICE: &str = "Your code executed successfully";
pub const RUN_FAILED_NOTICE: &str = "Your code encountered an error during execution";
pub const CLEARED_NOTICE: &str = "You cleared the whiteboard";

/// Tunables for the room tools.
#[derive(Clone, Debug)]
pub struct RoomConfig {
    pub ask_timeout: Duration,
    pub compile_delay: Duration,
    /// Upper bound on one run, runner delay included.
    pub run_timeout: Duration,
    pub file_chunk_size: usize,
    pub max_file_bytes: usize,
    pub max_history_turns: usize,
    pub board_width: u32,
    pub board_height: u32,
}

impl RoomConfig {
    pub fn from_settings(settings: &SkillroomSettings) -> Self {
        let client = &settings.client;
        let compile_delay = Duration::from_millis(client.compile_delay_ms);
        Self {
            ask_timeout: Duration::from_millis(client.ask_timeout_ms),
            compile_delay,
            run_timeout: compile_delay + Duration::from_millis(client.run_grace_ms),
            file_chunk_size: client.file_chunk_size,
            max_file_bytes: client.max_file_bytes,
            max_history_turns: settings.assistant.max_history_turns,
            board_width: 800,
            board_height: 600,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from_settings(&SkillroomSettings::default())
    }
}

/// Backends a session runs on.
pub struct RoomDeps {
    pub connector: Arc<dyn Connector>,
    pub devices: Arc<dyn MediaDevices>,
    pub network: Arc<dyn PeerNetwork>,
    pub endpoint: Arc<dyn AskEndpoint>,
    pub runner: Arc<dyn CodeRunner>,
}

impl RoomDeps {
    /// A terminal participant: the relay over WebSocket and HTTP, no
    /// camera or microphone, the mock code runner.
    pub fn terminal(settings: &SkillroomSettings) -> Self {
        Self {
            connector: Arc::new(WebSocketConnector::new(
                settings.client.ws_url(),
                settings.server.max_message_size,
            )),
            devices: Arc::new(SyntheticDevices::no_device()),
            network: Arc::new(Switchboard::new()),
            endpoint: Arc::new(HttpAskEndpoint::new(&settings.client.server_url)),
            runner: Arc::new(MockRunner::new(Duration::from_millis(
                settings.client.compile_delay_ms,
            ))),
        }
    }
}

/// What changed after an inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    Joined { participants: usize },
    PeerJoined(PeerInfo),
    PeerLeft(ParticipantId),
    Chat(ChatMessage),
    FileOffered { file_id: FileId, name: String },
    FileProgress { file_id: FileId, received: u32, total: u32 },
    FileReceived(FileId),
    FileCorrupt { file_id: FileId, reason: String },
    CodeSynced { revision: u64, author: ParticipantId },
    /// The server refused our identity. `retry` is the id we rejoined
    /// with, if any.
    IdentityRejected { reason: String, retry: Option<ParticipantId> },
    ServerError { code: String, message: String },
}

pub struct LiveSession {
    session_id: SessionId,
    local: Participant,
    manager: ConnectionManager,
    chat: ChatTool,
    code: CodeTool,
    whiteboard: Whiteboard<Raster>,
    ai: AiHelpTool,
    endpoint: Arc<dyn AskEndpoint>,
    config: RoomConfig,
    cancel: CancellationToken,
}

impl LiveSession {
    /// Connect and set up the tools. Failing to capture media is not an
    /// error; it leaves a notice in chat.
    #[instrument(skip_all, fields(session_id = %session_id, participant_id = %local.id))]
    pub async fn join(
        deps: RoomDeps,
        config: RoomConfig,
        session_id: SessionId,
        local: Participant,
    ) -> Result<Self, RoomError> {
        let mut manager = ConnectionManager::new(deps.connector, deps.devices, deps.network);
        let report = manager.connect(session_id.clone(), local.clone()).await?;

        let mut chat = ChatTool::new(local.clone(), config.file_chunk_size, config.max_file_bytes);
        if let JoinReport::Joined {
            media: MediaMode::Degraded { .. },
        } = report
        {
            let _ = chat.system(MEDIA_NOTICE);
        }

        Ok(Self {
            code: CodeTool::new(local.id.clone(), deps.runner, config.run_timeout),
            whiteboard: Whiteboard::new(Raster::new(config.board_width, config.board_height)),
            ai: AiHelpTool::new(config.max_history_turns),
            endpoint: deps.endpoint,
            session_id,
            local,
            manager,
            chat,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn chat(&self) -> &ChatTool {
        &self.chat
    }

    pub fn code(&self) -> &CodeTool {
        &self.code
    }

    pub fn ai(&self) -> &AiHelpTool {
        &self.ai
    }

    pub fn whiteboard(&self) -> &Whiteboard<Raster> {
        &self.whiteboard
    }

    pub fn whiteboard_mut(&mut self) -> &mut Whiteboard<Raster> {
        &mut self.whiteboard
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Cancels in-flight runs and questions when fired.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Echo and transmit a chat line. A failed transmission keeps the local
    /// copy. Returns false for blank input.
    pub async fn send_chat(&mut self, text: &str) -> bool {
        let Some(event) = self.chat.send(&self.session_id, text) else {
            return false;
        };
        let _ = self.manager.send(event).await;
        true
    }

    pub async fn share_file(&mut self, name: &str, bytes: Vec<u8>) -> Result<FileId, RoomError> {
        let events = self.chat.share_file(&self.session_id, name, bytes)?;
        let Some(file_id) = self.chat.files().last().map(|r| r.offer.id.clone()) else {
            return Err(RoomError::NotConnected);
        };
        for event in events {
            self.manager.send(event).await?;
        }
        Ok(file_id)
    }

    /// Share a file from disk under its own name.
    pub async fn share_path(&mut self, path: &Path) -> Result<FileId, RoomError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.share_file(&name, bytes).await
    }

    /// Replace the code buffer and replicate it.
    pub async fn edit_code(&mut self, text: &str) -> u64 {
        let update = self.code.edit(text);
        self.publish_code(update).await
    }

    pub async fn set_language(&mut self, tag: &str) -> u64 {
        let update = self.code.set_language(tag);
        self.publish_code(update).await
    }

    async fn publish_code(&mut self, update: skillroom_core::code::CodeUpdate) -> u64 {
        let revision = update.revision;
        let event = ClientMessage::CodeUpdate {
            session_id: self.session_id.clone(),
            update,
        };
        let _ = self.manager.send(event).await;
        revision
    }

    pub async fn run_code(&mut self) -> CompileResult {
        let cancel = self.cancel.child_token();
        let result = self.code.run(&cancel).await.clone();
        let notice = if result.succeeded() {
            RUN_OK_NOTICE
        } else {
            RUN_FAILED_NOTICE
        };
        let _ = self.chat.system(notice);
        result
    }

    pub fn save_code(&mut self, dir: &Path) -> Result<PathBuf, RoomError> {
        let path = self.code.save_to(dir)?;
        let file_name = self.code.save().file_name;
        info!(path = %path.display(), "code saved");
        let _ = self.chat.system(format!("You saved your code as {file_name}"));
        Ok(path)
    }

    /// Ask the assistant and wait for the answer. `Ok(None)` means the
    /// session was closed first.
    pub async fn ask_ai(&mut self, question: &str) -> Result<Option<AiTurn>, AskRejected> {
        let cancel = self.cancel.child_token();
        let turn = self
            .ai
            .ask_and_wait(self.endpoint.as_ref(), question, self.config.ask_timeout, &cancel)
            .await?;
        Ok(turn.cloned())
    }

    /// Ask the assistant about the current code buffer.
    pub async fn ask_for_code_help(&mut self) -> Result<Option<AiTurn>, AskRejected> {
        let prompt = self.code.help_prompt();
        self.ask_ai(&prompt).await
    }

    /// Mute or unmute the microphone. False without local media.
    pub fn set_audio_enabled(&mut self, enabled: bool) -> bool {
        self.manager.set_audio_enabled(enabled)
    }

    /// Turn the camera on or off. False without local media.
    pub fn set_video_enabled(&mut self, enabled: bool) -> bool {
        self.manager.set_video_enabled(enabled)
    }

    pub fn clear_whiteboard(&mut self) {
        self.whiteboard.clear();
        let _ = self.chat.system(CLEARED_NOTICE);
    }

    /// Wait for the next inbound event that changed something. `None` once
    /// the session is closed or the server went away.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                message = self.manager.recv() => message?,
            };
            if let Some(event) = self.dispatch(message) {
                return Some(event);
            }
        }
    }

    fn dispatch(&mut self, message: ServerMessage) -> Option<RoomEvent> {
        if let Some(session_id) = event_session(&message) {
            if session_id != &self.session_id {
                debug!(other = %session_id, "event for another session ignored");
                return None;
            }
        }
        match message {
            ServerMessage::Joined { participants, .. } => Some(RoomEvent::Joined { participants }),
            ServerMessage::IdentityRejected { reason, .. } => {
                let retry = self.sync_identity();
                Some(RoomEvent::IdentityRejected { reason, retry })
            }
            ServerMessage::PeerJoined { peer, .. } => {
                (peer.participant_id != self.local.id).then_some(RoomEvent::PeerJoined(peer))
            }
            ServerMessage::PeerLeft { participant_id, .. } => {
                let _ = self.chat.abandon_from(&participant_id);
                Some(RoomEvent::PeerLeft(participant_id))
            }
            ServerMessage::ReceiveMessage { message, .. } => self
                .chat
                .on_receive(message.clone())
                .then_some(RoomEvent::Chat(message)),
            ServerMessage::ShareFile { file, .. } => {
                let event = RoomEvent::FileOffered {
                    file_id: file.id.clone(),
                    name: file.name.clone(),
                };
                self.chat.on_file_offer(file).then_some(event)
            }
            ServerMessage::FileChunk { chunk, .. } => {
                let file_id = chunk.file_id.clone();
                match self.chat.on_file_chunk(chunk) {
                    ChunkOutcome::Ignored => None,
                    ChunkOutcome::Progress { received, total } => Some(RoomEvent::FileProgress {
                        file_id,
                        received,
                        total,
                    }),
                    ChunkOutcome::Complete => Some(RoomEvent::FileReceived(file_id)),
                    ChunkOutcome::Corrupt { reason } => {
                        Some(RoomEvent::FileCorrupt { file_id, reason })
                    }
                }
            }
            ServerMessage::CodeUpdate { update, .. } => {
                let revision = update.revision;
                let author = update.author.clone();
                self.code
                    .apply_remote(update)
                    .then_some(RoomEvent::CodeSynced { revision, author })
            }
            ServerMessage::Error { code, message } => {
                warn!(%code, %message, "server reported an error");
                Some(RoomEvent::ServerError { code, message })
            }
        }
    }

    /// Adopt the identity the manager rejoined with, if it changed.
    fn sync_identity(&mut self) -> Option<ParticipantId> {
        let current = self.manager.local()?.clone();
        if current.id == self.local.id {
            return None;
        }
        info!(participant_id = %current.id, "now known as a new participant id");
        self.chat.set_local(current.clone());
        self.code.set_author(current.id.clone());
        self.local = current;
        Some(self.local.id.clone())
    }

    /// Cancel in-flight work and leave the session.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.manager.disconnect().await;
    }
}

fn event_session(message: &ServerMessage) -> Option<&SessionId> {
    match message {
        ServerMessage::Joined { session_id, .. }
        | ServerMessage::IdentityRejected { session_id, .. }
        | ServerMessage::PeerJoined { session_id, .. }
        | ServerMessage::PeerLeft { session_id, .. }
        | ServerMessage::ReceiveMessage { session_id, .. }
        | ServerMessage::ShareFile { session_id, .. }
        | ServerMessage::FileChunk { session_id, .. }
        | ServerMessage::CodeUpdate { session_id, .. } => Some(session_id),
        ServerMessage::Error { .. } => None,
    }
}
