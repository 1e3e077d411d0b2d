//! Subscription rooms and the per-room broadcast loop.
//!
//! A room exists for every task id from creation until retirement, whether
//! or not anyone is watching. Messages posted to a room are appended to its
//! history; each observer keeps a cursor into that history, so an observer
//! that attaches late (even during the grace period after the end-sentinel)
//! still receives the full history exactly once.
//!
//! At most one broadcast loop runs per room. It is started by the first
//! `attach` and exits when the room loses all observers before the task has
//! ended. Once the end-sentinel has been delivered, the loop waits for the
//! grace period and then retires the room, closing every observer channel.
//! A room whose task ends with nobody attached is retired by the same grace
//! period through an orphan timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::Instant;

use crate::error::CoreError;
use crate::progress::{ProgressMessage, ProgressStream};
use crate::types::{ObserverId, TaskId, Timestamp};

/// Receiver half handed to an attached observer. Closes on room retirement.
pub type ObserverReceiver = mpsc::UnboundedReceiver<ProgressMessage>;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// How long a room outlives the delivery of its end-sentinel.
    pub grace_period: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
        }
    }
}

struct Observer {
    sender: mpsc::UnboundedSender<ProgressMessage>,
    /// Index of the next history entry to deliver.
    cursor: usize,
}

struct Room {
    observers: HashMap<ObserverId, Observer>,
    history: Vec<ProgressMessage>,
    broadcasting: bool,
    wake: Arc<Notify>,
    created_at: Timestamp,
}

impl Room {
    fn new() -> Self {
        Self {
            observers: HashMap::new(),
            history: Vec::new(),
            broadcasting: false,
            wake: Arc::new(Notify::new()),
            created_at: chrono::Utc::now(),
        }
    }

    fn ended(&self) -> bool {
        self.history.last().is_some_and(ProgressMessage::is_end)
    }

    /// Push every undelivered history entry to every observer.
    ///
    /// Observers whose channel is closed are dropped from the room.
    /// Returns `true` if the end-sentinel has been delivered to at least
    /// one observer.
    fn deliver(&mut self, task_id: &str) -> bool {
        let ended = self.ended();
        let history = &self.history;
        let mut gone = Vec::new();
        let mut end_delivered = false;

        for (id, observer) in self.observers.iter_mut() {
            while let Some(message) = history.get(observer.cursor) {
                if observer.sender.send(message.clone()).is_err() {
                    gone.push(*id);
                    break;
                }
                observer.cursor += 1;
            }
            if ended && observer.cursor == history.len() {
                end_delivered = true;
            }
        }

        for id in gone {
            tracing::warn!(task_id, observer_id = id, "Observer unreachable, detaching");
            self.observers.remove(&id);
        }
        end_delivered
    }
}

struct Inner {
    rooms: RwLock<HashMap<TaskId, Room>>,
    next_observer: AtomicU64,
    config: RoomConfig,
}

/// Manages every live room.
///
/// Cheap to clone; all clones share the same rooms.
#[derive(Clone)]
pub struct RoomManager {
    inner: Arc<Inner>,
}

impl RoomManager {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(HashMap::new()),
                next_observer: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Create the room for `task_id`. A no-op if it already exists.
    pub async fn create_room(&self, task_id: &str) {
        let mut rooms = self.inner.rooms.write().await;
        if rooms.contains_key(task_id) {
            tracing::info!(task_id, "Room already exists");
            return;
        }
        rooms.insert(task_id.to_string(), Room::new());
        tracing::debug!(task_id, "Room created");
    }

    /// Register a new observer and make sure exactly one broadcast loop is
    /// running for the room.
    pub async fn attach(&self, task_id: &str) -> Result<(ObserverId, ObserverReceiver), CoreError> {
        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.get_mut(task_id).ok_or_else(|| CoreError::NotFound {
            entity: "Room",
            id: task_id.to_string(),
        })?;

        let observer_id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        room.observers.insert(observer_id, Observer { sender, cursor: 0 });
        tracing::info!(task_id, observer_id, "Observer attached");

        if room.broadcasting {
            room.wake.notify_one();
        } else {
            room.broadcasting = true;
            let wake = Arc::clone(&room.wake);
            tokio::spawn(self.clone().broadcast_loop(task_id.to_string(), wake));
        }
        Ok((observer_id, receiver))
    }

    /// Remove an observer. The room itself is kept.
    pub async fn detach(&self, task_id: &str, observer_id: ObserverId) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(room) = rooms.get_mut(task_id) {
            if room.observers.remove(&observer_id).is_some() {
                tracing::info!(task_id, observer_id, "Observer detached");
                room.wake.notify_one();
            }
        }
    }

    /// Append a message to the room's history.
    ///
    /// Returns `false` if the room no longer exists; the message is dropped.
    pub async fn post(&self, task_id: &str, message: ProgressMessage) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(room) = rooms.get_mut(task_id) else {
            tracing::warn!(task_id, action = %message.action, "Room gone, message dropped");
            return false;
        };
        room.history.push(message);
        room.wake.notify_one();
        true
    }

    /// Forward a task's progress stream into its room until the stream ends.
    ///
    /// If the task ends while no observer is attached, the room is retired
    /// after the grace period unless a broadcast loop has taken over.
    pub async fn pump(&self, mut stream: ProgressStream) {
        let task_id = stream.task_id().to_string();
        while let Some(message) = stream.next().await {
            if !self.post(&task_id, message).await {
                break;
            }
        }
        tracing::debug!(task_id = %task_id, "Progress stream drained into room");

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(manager.inner.config.grace_period).await;
            let orphaned = {
                let rooms = manager.inner.rooms.read().await;
                rooms.get(&task_id).is_some_and(|room| !room.broadcasting)
            };
            if orphaned {
                manager.retire(&task_id).await;
            }
        });
    }

    /// Remove the room; dropping its observers closes their channels.
    pub async fn retire(&self, task_id: &str) {
        let removed = self.inner.rooms.write().await.remove(task_id);
        if let Some(room) = removed {
            room.wake.notify_one();
            let lifetime_secs = (chrono::Utc::now() - room.created_at).num_seconds();
            tracing::info!(
                task_id,
                observers = room.observers.len(),
                messages = room.history.len(),
                lifetime_secs,
                "Room retired",
            );
        }
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.inner.rooms.read().await.contains_key(task_id)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    pub async fn observer_count(&self, task_id: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(task_id)
            .map_or(0, |room| room.observers.len())
    }

    /// Drop every room, closing all observer channels.
    pub async fn shutdown_all(&self) {
        let mut rooms = self.inner.rooms.write().await;
        let count = rooms.len();
        for (_, room) in rooms.drain() {
            room.wake.notify_one();
        }
        tracing::info!(count, "Closed all rooms");
    }

    async fn broadcast_loop(self, task_id: TaskId, wake: Arc<Notify>) {
        let grace = self.inner.config.grace_period;
        let mut retire_at: Option<Instant> = None;
        tracing::debug!(task_id = %task_id, "Broadcast loop started");

        loop {
            {
                let mut rooms = self.inner.rooms.write().await;
                let Some(room) = rooms.get_mut(&task_id) else {
                    return;
                };
                if room.observers.is_empty() && retire_at.is_none() {
                    room.broadcasting = false;
                    tracing::debug!(task_id = %task_id, "Broadcast loop idle, no observers");
                    return;
                }
                if room.deliver(&task_id) && retire_at.is_none() {
                    retire_at = Some(Instant::now() + grace);
                }
            }

            match retire_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            self.retire(&task_id).await;
                            return;
                        }
                    }
                }
                None => wake.notified().await,
            }
        }
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
