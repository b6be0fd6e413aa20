use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_core::{
    Connection, ConnectionId, Frame, FrameSource, LobbyId, MessageId, MessageStore, PersistError,
    ReadError, SendError, UserId,
};

/// In-memory connection that records every payload it accepts.
pub struct RecordingConnection {
    id: ConnectionId,
    received: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            received: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, payload: &str) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) || self.is_closed() {
            return Err(SendError::Closed);
        }
        self.received.lock().push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Frame source that replays a fixed script, then reports the peer gone.
pub struct ScriptedFrames {
    frames: VecDeque<Result<Frame, ReadError>>,
}

impl ScriptedFrames {
    pub fn new(frames: impl IntoIterator<Item = Result<Frame, ReadError>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(Frame::Text(t.to_string()))))
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn next_frame(&mut self) -> Result<Frame, ReadError> {
        self.frames.pop_front().unwrap_or(Err(ReadError::Closed))
    }
}

/// Message store that hands out sequential IDs, optionally failing or panicking
/// on a given content string.
#[derive(Default)]
pub struct FakeStore {
    next_id: AtomicUsize,
    saved: Mutex<Vec<(String, UserId, LobbyId)>>,
    timestamps: Mutex<Vec<DateTime<Utc>>>,
    fail_on: Mutex<Option<String>>,
    panic_on: Mutex<Option<String>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, content: &str) {
        *self.fail_on.lock() = Some(content.to_string());
    }

    pub fn panic_on(&self, content: &str) {
        *self.panic_on.lock() = Some(content.to_string());
    }

    pub fn saved(&self) -> Vec<(String, UserId, LobbyId)> {
        self.saved.lock().clone()
    }

    pub fn saved_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.timestamps.lock().clone()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn save_message(
        &self,
        content: &str,
        user_id: UserId,
        lobby_id: LobbyId,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, PersistError> {
        if self.panic_on.lock().as_deref() == Some(content) {
            panic!("store blew up on {content}");
        }
        if self.fail_on.lock().as_deref() == Some(content) {
            return Err(PersistError::Unavailable("disk on fire".into()));
        }
        self.saved
            .lock()
            .push((content.to_string(), user_id, lobby_id));
        self.timestamps.lock().push(timestamp);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        Ok(MessageId::new(id))
    }
}
