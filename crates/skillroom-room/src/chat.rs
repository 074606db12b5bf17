//! Chat log and file sharing.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use skillroom_core::chat::ChatMessage;
use skillroom_core::files::{self, FileChunk, FileOffer};
use skillroom_core::wire::ClientMessage;
use skillroom_core::{FileId, MessageId, ParticipantId, SessionId};

use crate::connection::Participant;
use crate::error::ChatError;

/// Where a shared file stands on this side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileStatus {
    /// Shared by us; bytes held locally.
    Local { bytes: Vec<u8> },
    Receiving { received: u32, total: u32 },
    /// Every chunk arrived and the checksum matched.
    Complete { bytes: Vec<u8> },
    Corrupt { reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileShareRecord {
    pub offer: FileOffer,
    pub status: FileStatus,
}

impl FileShareRecord {
    /// File contents, once they are fully available.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.status {
            FileStatus::Local { bytes } | FileStatus::Complete { bytes } => Some(bytes),
            _ => None,
        }
    }
}

/// Progress reported for an inbound chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    Ignored,
    Progress { received: u32, total: u32 },
    Complete,
    Corrupt { reason: String },
}

struct FileAssembler {
    author: ParticipantId,
    size: u64,
    sha256: String,
    total: u32,
    received_bytes: u64,
    parts: BTreeMap<u32, Vec<u8>>,
}

impl FileAssembler {
    fn finish(self) -> Result<Vec<u8>, String> {
        let bytes: Vec<u8> = self.parts.into_values().flatten().collect();
        if bytes.len() as u64 != self.size {
            return Err(format!("expected {} bytes, got {}", self.size, bytes.len()));
        }
        let digest = files::sha256_hex(&bytes);
        if digest != self.sha256 {
            return Err("checksum mismatch".to_string());
        }
        Ok(bytes)
    }
}

pub struct ChatTool {
    local: Participant,
    log: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
    files: Vec<FileShareRecord>,
    assembling: HashMap<FileId, FileAssembler>,
    chunk_size: usize,
    max_file_bytes: usize,
}

impl ChatTool {
    pub fn new(local: Participant, chunk_size: usize, max_file_bytes: usize) -> Self {
        Self {
            local,
            log: Vec::new(),
            seen: HashSet::new(),
            files: Vec::new(),
            assembling: HashMap::new(),
            chunk_size: chunk_size.max(1),
            max_file_bytes,
        }
    }

    pub fn set_local(&mut self, local: Participant) {
        self.local = local;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
    }

    pub fn files(&self) -> &[FileShareRecord] {
        &self.files
    }

    pub fn file(&self, id: &FileId) -> Option<&FileShareRecord> {
        self.files.iter().find(|r| &r.offer.id == id)
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        let _ = self.seen.insert(message.id.clone());
        self.log.push(message);
        &self.log[self.log.len() - 1]
    }

    /// Echo `text` locally and build the event that transmits it.
    /// Blank input does nothing.
    pub fn send(&mut self, session_id: &SessionId, text: &str) -> Option<ClientMessage> {
        if text.trim().is_empty() {
            return None;
        }
        let message = ChatMessage::user(self.local.id.clone(), &self.local.display_name, text);
        let event = ClientMessage::SendMessage {
            session_id: session_id.clone(),
            message: message.clone(),
        };
        let _ = self.push(message);
        Some(event)
    }

    /// Append an inbound message. Our own messages and repeats are skipped.
    pub fn on_receive(&mut self, message: ChatMessage) -> bool {
        if message.author == self.local.id {
            debug!(message_id = %message.id, "skipping echo of own message");
            return false;
        }
        if self.seen.contains(&message.id) {
            debug!(message_id = %message.id, "duplicate message ignored");
            return false;
        }
        let _ = self.push(message);
        true
    }

    /// Append a local notice.
    pub fn system(&mut self, text: impl Into<String>) -> &ChatMessage {
        let notice = ChatMessage::system(self.local.id.clone(), text);
        self.push(notice)
    }

    /// Record a local share and build the announcement plus chunk events.
    pub fn share_file(
        &mut self,
        session_id: &SessionId,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<ClientMessage>, ChatError> {
        if name.trim().is_empty() {
            return Err(ChatError::EmptyFileName);
        }
        if bytes.len() > self.max_file_bytes {
            return Err(ChatError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_file_bytes,
            });
        }

        let offer = FileOffer {
            id: FileId::new(),
            name: name.to_string(),
            size: bytes.len() as u64,
            sender: self.local.display_name.clone(),
            author: self.local.id.clone(),
            timestamp: Utc::now(),
            chunk_count: files::chunk_count(bytes.len(), self.chunk_size),
            sha256: files::sha256_hex(&bytes),
        };

        let mut events = Vec::with_capacity(offer.chunk_count as usize + 1);
        events.push(ClientMessage::ShareFile {
            session_id: session_id.clone(),
            file: offer.clone(),
        });
        events.extend(
            files::split_chunks(&offer.id, &bytes, self.chunk_size)
                .into_iter()
                .map(|chunk| ClientMessage::FileChunk {
                    session_id: session_id.clone(),
                    chunk,
                }),
        );

        info!(file_id = %offer.id, name, size = offer.size, chunks = offer.chunk_count, "sharing file");
        self.files.push(FileShareRecord {
            offer,
            status: FileStatus::Local { bytes },
        });
        let _ = self.system(format!("You shared a file: {name}"));
        Ok(events)
    }

    /// Start receiving an announced file.
    ///
    /// Offers over the size limit, or with more chunks than bytes, are
    /// recorded as corrupt and never buffered.
    pub fn on_file_offer(&mut self, offer: FileOffer) -> bool {
        if offer.author == self.local.id || self.file(&offer.id).is_some() {
            return false;
        }
        let status = if offer.size > self.max_file_bytes as u64 {
            warn!(file_id = %offer.id, size = offer.size, "announced file exceeds limit");
            FileStatus::Corrupt {
                reason: format!("file exceeds the {} byte limit", self.max_file_bytes),
            }
        } else if u64::from(offer.chunk_count) > offer.size.max(1) {
            warn!(file_id = %offer.id, size = offer.size, chunks = offer.chunk_count, "chunk count does not fit size");
            FileStatus::Corrupt {
                reason: format!("{} chunks announced for {} bytes", offer.chunk_count, offer.size),
            }
        } else {
            let _ = self.assembling.insert(
                offer.id.clone(),
                FileAssembler {
                    author: offer.author.clone(),
                    size: offer.size,
                    sha256: offer.sha256.clone(),
                    total: offer.chunk_count.max(1),
                    received_bytes: 0,
                    parts: BTreeMap::new(),
                },
            );
            FileStatus::Receiving {
                received: 0,
                total: offer.chunk_count.max(1),
            }
        };
        self.files.push(FileShareRecord { offer, status });
        true
    }

    pub fn on_file_chunk(&mut self, chunk: FileChunk) -> ChunkOutcome {
        let Some(assembler) = self.assembling.get_mut(&chunk.file_id) else {
            warn!(file_id = %chunk.file_id, index = chunk.index, "chunk for unknown file");
            return ChunkOutcome::Ignored;
        };
        if chunk.index >= assembler.total {
            warn!(file_id = %chunk.file_id, index = chunk.index, total = assembler.total, "chunk index out of range");
            return ChunkOutcome::Ignored;
        }
        if assembler.parts.contains_key(&chunk.index) {
            return ChunkOutcome::Ignored;
        }

        let outcome = match chunk.decode() {
            Ok(data) if assembler.received_bytes + data.len() as u64 > assembler.size => {
                ChunkOutcome::Corrupt {
                    reason: format!("received more than the announced {} bytes", assembler.size),
                }
            }
            Ok(data) => {
                assembler.received_bytes += data.len() as u64;
                let _ = assembler.parts.insert(chunk.index, data);
                let received = assembler.parts.len() as u32;
                if received < assembler.total {
                    ChunkOutcome::Progress {
                        received,
                        total: assembler.total,
                    }
                } else {
                    ChunkOutcome::Complete
                }
            }
            Err(e) => ChunkOutcome::Corrupt {
                reason: e.to_string(),
            },
        };

        let status = match &outcome {
            ChunkOutcome::Progress { received, total } => FileStatus::Receiving {
                received: *received,
                total: *total,
            },
            ChunkOutcome::Complete => {
                let finished = self
                    .assembling
                    .remove(&chunk.file_id)
                    .map(FileAssembler::finish);
                match finished {
                    Some(Ok(bytes)) => FileStatus::Complete { bytes },
                    Some(Err(reason)) => FileStatus::Corrupt { reason },
                    None => return ChunkOutcome::Ignored,
                }
            }
            ChunkOutcome::Corrupt { reason } => {
                let _ = self.assembling.remove(&chunk.file_id);
                FileStatus::Corrupt {
                    reason: reason.clone(),
                }
            }
            ChunkOutcome::Ignored => return ChunkOutcome::Ignored,
        };

        let outcome = match &status {
            FileStatus::Corrupt { reason } => {
                warn!(file_id = %chunk.file_id, reason = %reason, "received file is corrupt");
                ChunkOutcome::Corrupt {
                    reason: reason.clone(),
                }
            }
            FileStatus::Complete { .. } => {
                info!(file_id = %chunk.file_id, "file received");
                outcome
            }
            _ => outcome,
        };
        if let Some(record) = self.files.iter_mut().find(|r| r.offer.id == chunk.file_id) {
            record.status = status;
        }
        outcome
    }

    /// Give up on every unfinished transfer from `author`. Returns the
    /// files now marked corrupt.
    pub fn abandon_from(&mut self, author: &ParticipantId) -> Vec<FileId> {
        let pending: Vec<FileId> = self
            .assembling
            .iter()
            .filter(|(_, a)| &a.author == author)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &pending {
            let _ = self.assembling.remove(id);
            if let Some(record) = self.files.iter_mut().find(|r| &r.offer.id == id) {
                record.status = FileStatus::Corrupt {
                    reason: "sender left".to_string(),
                };
            }
            warn!(file_id = %id, participant_id = %author, "sender left mid-transfer");
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillroom_core::chat::SYSTEM_SENDER;
    use skillroom_core::ParticipantId;

    fn session() -> SessionId {
        SessionId::from_raw("room-1")
    }

    fn tool(name: &str) -> ChatTool {
        ChatTool::new(
            Participant::new(ParticipantId::from_raw(format!("user_{name}")), name),
            4,
            64,
        )
    }

    fn chunks_of(events: &[ClientMessage]) -> (FileOffer, Vec<FileChunk>) {
        let mut offer = None;
        let mut chunks = Vec::new();
        for event in events {
            match event {
                ClientMessage::ShareFile { file, .. } => offer = Some(file.clone()),
                ClientMessage::FileChunk { chunk, .. } => chunks.push(chunk.clone()),
                other => panic!("unexpected {other:?}"),
            }
        }
        (offer.unwrap(), chunks)
    }

    #[test]
    fn send_echoes_locally_once() {
        let mut chat = tool("alice");
        let event = chat.send(&session(), "hello").unwrap();
        assert_eq!(chat.messages().len(), 1);
        let local = &chat.messages()[0];
        assert_eq!(local.content, "hello");
        assert_eq!(local.sender, "alice");
        assert_eq!(local.author.as_str(), "user_alice");
        match event {
            ClientMessage::SendMessage { message, .. } => assert_eq!(&message, local),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_send_is_noop() {
        let mut chat = tool("alice");
        assert!(chat.send(&session(), "   \n").is_none());
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn receive_skips_own_and_duplicates() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let event = bob.send(&session(), "hi alice").unwrap();
        let ClientMessage::SendMessage { message, .. } = event else {
            panic!("expected send-message");
        };
        assert!(alice.on_receive(message.clone()));
        assert!(!alice.on_receive(message.clone()));
        assert!(!bob.on_receive(message));
        assert_eq!(alice.messages().len(), 1);
        assert_eq!(bob.messages().len(), 1);
    }

    #[test]
    fn receive_keeps_arrival_order() {
        let mut alice = tool("alice");
        let bob = ParticipantId::from_raw("user_bob");
        for text in ["one", "two", "three"] {
            assert!(alice.on_receive(ChatMessage::user(bob.clone(), "bob", text)));
        }
        let contents: Vec<_> = alice.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn system_notice_uses_system_sender() {
        let mut chat = tool("alice");
        let notice = chat.system("You cleared the whiteboard");
        assert_eq!(notice.sender, SYSTEM_SENDER);
        assert!(notice.is_system());
    }

    #[test]
    fn share_announces_then_chunks() {
        let mut chat = tool("alice");
        let events = chat.share_file(&session(), "notes.txt", b"0123456789".to_vec()).unwrap();
        let (offer, chunks) = chunks_of(&events);
        assert_eq!(offer.size, 10);
        assert_eq!(offer.chunk_count, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chat.files()[0].bytes(), Some(&b"0123456789"[..]));
        assert_eq!(chat.messages()[0].content, "You shared a file: notes.txt");
    }

    #[test]
    fn oversize_share_rejected() {
        let mut chat = tool("alice");
        let err = chat.share_file(&session(), "big.bin", vec![0; 65]).unwrap_err();
        assert!(matches!(err, ChatError::FileTooLarge { size: 65, limit: 64 }));
        assert!(chat.files().is_empty());
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn transfer_reassembles_identical_bytes() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let payload = b"hello, shared world".to_vec();
        let events = alice.share_file(&session(), "greeting.txt", payload.clone()).unwrap();
        let (offer, mut chunks) = chunks_of(&events);
        let id = offer.id.clone();

        assert!(bob.on_file_offer(offer));
        chunks.reverse();
        let last = chunks.pop().unwrap();
        for chunk in chunks {
            assert!(matches!(bob.on_file_chunk(chunk), ChunkOutcome::Progress { .. }));
        }
        assert_eq!(bob.on_file_chunk(last), ChunkOutcome::Complete);
        assert_eq!(bob.file(&id).unwrap().bytes(), Some(payload.as_slice()));
    }

    #[test]
    fn tampered_chunk_marks_corrupt() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let events = alice.share_file(&session(), "a.txt", b"abcdefgh".to_vec()).unwrap();
        let (offer, mut chunks) = chunks_of(&events);
        let id = offer.id.clone();
        chunks[1] = FileChunk {
            data: "WFhYWA==".into(),
            ..chunks[1].clone()
        };

        assert!(bob.on_file_offer(offer));
        let _ = bob.on_file_chunk(chunks[0].clone());
        let outcome = bob.on_file_chunk(chunks[1].clone());
        assert!(matches!(outcome, ChunkOutcome::Corrupt { ref reason } if reason == "checksum mismatch"));
        assert!(matches!(bob.file(&id).unwrap().status, FileStatus::Corrupt { .. }));
    }

    #[test]
    fn undecodable_chunk_marks_corrupt() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let events = alice.share_file(&session(), "a.txt", b"abcdefgh".to_vec()).unwrap();
        let (offer, chunks) = chunks_of(&events);
        let id = offer.id.clone();
        assert!(bob.on_file_offer(offer));
        let bad = FileChunk {
            data: "%%%".into(),
            ..chunks[0].clone()
        };
        assert!(matches!(bob.on_file_chunk(bad), ChunkOutcome::Corrupt { .. }));
        assert!(matches!(bob.file(&id).unwrap().status, FileStatus::Corrupt { .. }));
        assert_eq!(bob.on_file_chunk(chunks[1].clone()), ChunkOutcome::Ignored);
    }

    #[test]
    fn unknown_and_out_of_range_chunks_ignored() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let events = alice.share_file(&session(), "a.txt", b"abcd".to_vec()).unwrap();
        let (offer, chunks) = chunks_of(&events);
        assert_eq!(bob.on_file_chunk(chunks[0].clone()), ChunkOutcome::Ignored);

        assert!(bob.on_file_offer(offer));
        let stray = FileChunk {
            index: 9,
            ..chunks[0].clone()
        };
        assert_eq!(bob.on_file_chunk(stray), ChunkOutcome::Ignored);
        assert_eq!(bob.on_file_chunk(chunks[0].clone()), ChunkOutcome::Complete);
    }

    #[test]
    fn empty_file_completes() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let events = alice.share_file(&session(), "empty.txt", Vec::new()).unwrap();
        let (offer, chunks) = chunks_of(&events);
        assert!(bob.on_file_offer(offer.clone()));
        assert_eq!(bob.on_file_chunk(chunks[0].clone()), ChunkOutcome::Complete);
        assert_eq!(bob.file(&offer.id).unwrap().bytes(), Some(&[][..]));
    }

    fn bogus_offer(author: &str, size: u64, chunk_count: u32) -> FileOffer {
        FileOffer {
            id: FileId::new(),
            name: "x.bin".into(),
            size,
            sender: author.into(),
            author: ParticipantId::from_raw(format!("user_{author}")),
            timestamp: Utc::now(),
            chunk_count,
            sha256: files::sha256_hex(b""),
        }
    }

    #[test]
    fn chunks_past_announced_size_are_corrupt() {
        let mut bob = tool("bob");
        let offer = bogus_offer("mallory", 8, 2);
        let id = offer.id.clone();
        assert!(bob.on_file_offer(offer));

        let big = files::split_chunks(&id, &[b'x'; 10_000], 10_000).remove(0);
        let outcome = bob.on_file_chunk(big);
        assert!(matches!(outcome, ChunkOutcome::Corrupt { .. }), "got {outcome:?}");
        assert!(matches!(bob.file(&id).unwrap().status, FileStatus::Corrupt { .. }));

        let more = FileChunk {
            index: 1,
            ..files::split_chunks(&id, b"abcd", 4).remove(0)
        };
        assert_eq!(bob.on_file_chunk(more), ChunkOutcome::Ignored);
    }

    #[test]
    fn more_chunks_than_bytes_is_rejected_up_front() {
        let mut bob = tool("bob");
        let offer = bogus_offer("mallory", 8, 1000);
        let id = offer.id.clone();
        assert!(bob.on_file_offer(offer));
        assert!(matches!(bob.file(&id).unwrap().status, FileStatus::Corrupt { .. }));

        let chunk = files::split_chunks(&id, b"abcd", 4).remove(0);
        assert_eq!(bob.on_file_chunk(chunk), ChunkOutcome::Ignored);
    }

    #[test]
    fn sender_leaving_abandons_their_transfers() {
        let mut alice = tool("alice");
        let mut bob = tool("bob");
        let events = alice.share_file(&session(), "a.txt", b"abcdefgh".to_vec()).unwrap();
        let (offer, chunks) = chunks_of(&events);
        let id = offer.id.clone();
        assert!(bob.on_file_offer(offer));
        assert!(matches!(bob.on_file_chunk(chunks[0].clone()), ChunkOutcome::Progress { .. }));

        assert!(bob.abandon_from(&ParticipantId::from_raw("user_carol")).is_empty());
        assert_eq!(bob.abandon_from(&ParticipantId::from_raw("user_alice")), vec![id.clone()]);
        assert_eq!(
            bob.file(&id).unwrap().status,
            FileStatus::Corrupt {
                reason: "sender left".into()
            }
        );
        assert_eq!(bob.on_file_chunk(chunks[1].clone()), ChunkOutcome::Ignored);
    }

    #[test]
    fn own_offer_not_tracked_twice() {
        let mut alice = tool("alice");
        let events = alice.share_file(&session(), "a.txt", b"ab".to_vec()).unwrap();
        let (offer, _) = chunks_of(&events);
        assert!(!alice.on_file_offer(offer));
        assert_eq!(alice.files().len(), 1);
    }
}
