//! The authoritative in-memory map of rooms. Each room is its own
//! synchronization unit; the registry map is a second, short-lived lock used
//! only for lookup/insert/remove. Nothing slow (bcrypt, I/O, waiting on a
//! full consumer queue) happens under either lock.
//!
//! Broadcasts are enqueued onto subscriber queues while the room lock is
//! held, so every member observes room events in one order. Chat messages
//! are additionally serialized through a per-room async post lock that
//! carries the back-pressure path for members whose queue is full.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::events::{OutboundQueue, PushError, ServerEvent, SystemNotice};
use crate::ids;
use crate::models::{DeviceKind, ErrorCode, FileMeta, Message, MessageKind, RoomUser};

/// Bound on each room's message ring; the oldest entry is evicted past this.
pub const MESSAGE_RING_CAPACITY: usize = 100;

/// Length of auto-generated room passwords.
const ROOM_PASSWORD_LEN: usize = 6;

/// How long a message broadcast waits on one member's full queue before the
/// subscription is dropped as unrecoverably behind.
const SLOW_CONSUMER_WAIT_SECS: u64 = 5;

/// The one way to express a password change. The wire event maps `""` to
/// `Generate` and a missing/null field to `Remove`.
#[derive(Debug, Clone)]
pub enum PasswordChange {
    Remove,
    Generate,
    Set(String),
}

impl PasswordChange {
    pub fn from_wire(password: Option<String>) -> Self {
        match password {
            None => PasswordChange::Remove,
            Some(s) if s.is_empty() => PasswordChange::Generate,
            Some(s) => PasswordChange::Set(s),
        }
    }
}

/// Hash and plaintext kept together: the plaintext backs `shareRoomLink` and
/// the actor's `roomPasswordSet` echo, verification always goes through the
/// hash.
#[derive(Debug, Clone)]
struct RoomPassword {
    hash: String,
    plain: String,
}

#[derive(Debug)]
struct MemberState {
    user: RoomUser,
    fingerprint_hash: String,
    connections: usize,
}

#[derive(Debug)]
struct Subscriber {
    user_id: Uuid,
    queue: OutboundQueue,
}

#[derive(Debug)]
struct RoomState {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    password: Option<RoomPassword>,
    pinned: bool,
    destroying: bool,
    members: HashMap<Uuid, MemberState>,
    messages: VecDeque<Message>,
    subscribers: HashMap<Uuid, Subscriber>,
}

impl RoomState {
    fn new() -> Self {
        let now = Utc::now();
        RoomState {
            created_at: now,
            last_activity: now,
            password: None,
            pinned: false,
            destroying: false,
            members: HashMap::new(),
            messages: VecDeque::with_capacity(MESSAGE_RING_CAPACITY),
            subscribers: HashMap::new(),
        }
    }

    fn users(&self) -> Vec<RoomUser> {
        self.members.values().map(|m| m.user.clone()).collect()
    }

    fn all_queues(&self) -> Vec<OutboundQueue> {
        self.subscribers.values().map(|s| s.queue.clone()).collect()
    }

    /// Best-effort broadcast, enqueued in place so room events stay ordered.
    fn broadcast(&self, event: &ServerEvent, exclude_conn: Option<Uuid>) {
        for (conn_id, sub) in &self.subscribers {
            if Some(*conn_id) == exclude_conn {
                continue;
            }
            sub.queue.push(event.clone());
        }
    }

    fn push_to_user(&self, user_id: Uuid, event: &ServerEvent) {
        for sub in self.subscribers.values() {
            if sub.user_id == user_id {
                sub.queue.push(event.clone());
            }
        }
    }
}

struct Room {
    key: String,
    state: Mutex<RoomState>,
    /// Serializes message posting so append order equals delivery order,
    /// and gives the laggard path somewhere to wait without holding the
    /// state lock.
    post_lock: tokio::sync::Mutex<()>,
}

/// Result of a successful join: the member plus a consistent snapshot of
/// the room taken under one lock.
pub struct JoinOutcome {
    pub user: RoomUser,
    pub users: Vec<RoomUser>,
    pub history: Vec<Message>,
}

#[derive(Debug)]
pub struct PasswordOutcome {
    /// Plaintext for the actor only; None when the password was removed.
    pub plaintext: Option<String>,
    pub has_password: bool,
}

/// Room marked `destroying` by the sweep; the janitor finishes the cascade.
pub struct DestroyingRoom {
    pub room_key: String,
    pub subscribers: Vec<OutboundQueue>,
}

/// What `post_message` needs beyond the sender: content for text messages,
/// resolved store metadata for file messages.
pub enum MessageBody {
    Text(String),
    File {
        file_id: Uuid,
        info: FileMeta,
        download_url: String,
    },
}

pub struct Registry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    salt: String,
    bcrypt_cost: u32,
    base_url: String,
    idle_window: Duration,
}

impl Registry {
    pub fn new(config: &AppConfig) -> Self {
        Registry {
            rooms: Mutex::new(HashMap::new()),
            salt: config.user_id_salt.clone(),
            bcrypt_cost: config.bcrypt_cost,
            base_url: config.public_base_url.clone(),
            idle_window: Duration::hours(config.room_idle_hours),
        }
    }

    pub fn user_id_for(&self, fingerprint_hash: &str, room_key: &str) -> Uuid {
        ids::derive_user_id(&self.salt, fingerprint_hash, room_key)
    }

    fn get_room(&self, room_key: &str) -> Option<Arc<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_key)
            .cloned()
    }

    fn get_or_create_room(&self, room_key: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .entry(room_key.to_string())
            .or_insert_with(|| {
                Arc::new(Room {
                    key: room_key.to_string(),
                    state: Mutex::new(RoomState::new()),
                    post_lock: tokio::sync::Mutex::new(()),
                })
            })
            .clone()
    }

    // --- Membership ---

    /// Join (creating the room on first use) and bind `conn_id`'s outbound
    /// queue to the room fan-out. Re-joining with the same fingerprint
    /// refreshes the existing member instead of duplicating it. `userJoined`
    /// goes to everyone else before this returns.
    pub async fn join(
        &self,
        conn_id: Uuid,
        queue: OutboundQueue,
        room_key: &str,
        name: &str,
        device: DeviceKind,
        fingerprint_hash: &str,
        password: Option<&str>,
    ) -> Result<JoinOutcome, ErrorCode> {
        let room = self.get_or_create_room(room_key);

        // Clone the hash out, verify outside the lock: bcrypt at cost 12 is
        // far too slow to hold a room lock across.
        let stored = {
            let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.destroying {
                return Err(ErrorCode::RoomNotFound);
            }
            state.password.as_ref().map(|p| p.hash.clone())
        };
        if let Some(hash) = stored {
            let provided = password.ok_or(ErrorCode::PasswordRequired)?.to_string();
            if !verify_password(provided, hash).await? {
                return Err(ErrorCode::InvalidPassword);
            }
        }

        let user_id = self.user_id_for(fingerprint_hash, room_key);
        let now = Utc::now();

        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.destroying {
            return Err(ErrorCode::RoomNotFound);
        }

        let member = state.members.entry(user_id).or_insert_with(|| MemberState {
            user: RoomUser {
                id: user_id,
                name: name.to_string(),
                device,
                online: false,
                last_seen: now,
            },
            fingerprint_hash: fingerprint_hash.to_string(),
            connections: 0,
        });
        let rejoined = member.connections > 0 || member.user.online;
        member.user.name = name.to_string();
        member.user.device = device;
        member.user.online = true;
        member.user.last_seen = now;
        member.connections += 1;
        let user = member.user.clone();

        state.subscribers.insert(conn_id, Subscriber { user_id, queue });
        state.last_activity = now;

        if !rejoined {
            state.broadcast(
                &ServerEvent::UserJoined { user: user.clone() },
                Some(conn_id),
            );
        }

        let users = state.users();
        let history: Vec<Message> = state.messages.iter().cloned().collect();

        Ok(JoinOutcome { user, users, history })
    }

    /// Explicit leave, broadcasting `userLeft`. A second leave for the same
    /// member is a no-op; returns whether the member was present.
    pub fn leave(&self, room_key: &str, user_id: Uuid, conn_id: Option<Uuid>) -> bool {
        let Some(room) = self.get_room(room_key) else {
            return false;
        };
        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn_id) = conn_id {
            state.subscribers.remove(&conn_id);
        }
        let Some(member) = state.members.remove(&user_id) else {
            return false;
        };
        let mut user = member.user;
        user.online = false;
        user.last_seen = Utc::now();
        state.broadcast(&ServerEvent::UserLeft { user }, None);
        true
    }

    /// Connection dropped: unsubscribe it and clear the online flag when it
    /// was the member's last connection. Returns true in that case so the
    /// gateway can start the rebind grace timer.
    pub fn mark_offline(&self, room_key: &str, user_id: Uuid, conn_id: Uuid) -> bool {
        let Some(room) = self.get_room(room_key) else {
            return false;
        };
        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        state.subscribers.remove(&conn_id);
        if let Some(member) = state.members.get_mut(&user_id) {
            member.connections = member.connections.saturating_sub(1);
            if member.connections == 0 {
                member.user.online = false;
                member.user.last_seen = Utc::now();
                return true;
            }
        }
        false
    }

    /// Grace-period expiry: remove the member unless a new connection
    /// rebound in the meantime.
    pub fn leave_if_disconnected(&self, room_key: &str, user_id: Uuid) -> bool {
        let Some(room) = self.get_room(room_key) else {
            return false;
        };
        {
            let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.members.get(&user_id) {
                Some(member) if member.connections == 0 => {}
                _ => return false,
            }
        }
        self.leave(room_key, user_id, None)
    }

    // --- Messaging ---

    /// Append to the ring (evicting past the bound), stamp activity, and
    /// fan out to every member. Members whose queue is full get the
    /// back-pressure path: the post lock is held while waiting, so no later
    /// message can overtake this one; a member that stays stuck past the
    /// deadline loses its subscription rather than the room its liveness.
    ///
    /// `exclude_conn` skips the sender's own connection; the gateway writes
    /// to its socket directly.
    pub async fn post_message(
        &self,
        room_key: &str,
        sender_id: Uuid,
        body: MessageBody,
        exclude_conn: Option<Uuid>,
    ) -> Result<Message, ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let _posting = room.post_lock.lock().await;

        let (message, laggards) = {
            let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.destroying {
                return Err(ErrorCode::RoomNotFound);
            }
            let sender = state
                .members
                .get(&sender_id)
                .ok_or(ErrorCode::UserNotInRoom)?
                .user
                .clone();

            let message = match body {
                MessageBody::Text(content) => Message {
                    id: Uuid::new_v4(),
                    kind: MessageKind::Text,
                    sender,
                    timestamp: Utc::now(),
                    room_key: room_key.to_string(),
                    content: Some(content),
                    file_id: None,
                    file_info: None,
                    download_url: None,
                },
                MessageBody::File { file_id, info, download_url } => Message {
                    id: Uuid::new_v4(),
                    kind: MessageKind::File,
                    sender,
                    timestamp: Utc::now(),
                    room_key: room_key.to_string(),
                    content: None,
                    file_id: Some(file_id),
                    file_info: Some(info),
                    download_url: Some(download_url),
                },
            };

            if state.messages.len() >= MESSAGE_RING_CAPACITY {
                state.messages.pop_front();
            }
            state.messages.push_back(message.clone());
            state.last_activity = Utc::now();

            let event = ServerEvent::Message(Box::new(message.clone()));
            let mut laggards: Vec<(Uuid, OutboundQueue)> = Vec::new();
            for (conn_id, sub) in &state.subscribers {
                if Some(*conn_id) == exclude_conn {
                    continue;
                }
                if let Err(PushError::Full) = sub.queue.try_push(event.clone()) {
                    laggards.push((*conn_id, sub.queue.clone()));
                }
            }
            (message, laggards)
        };

        for (conn_id, queue) in laggards {
            let event = ServerEvent::Message(Box::new(message.clone()));
            let wait = tokio::time::Duration::from_secs(SLOW_CONSUMER_WAIT_SECS);
            let delivered = tokio::time::timeout(wait, queue.push_reliable(event)).await;
            if !matches!(delivered, Ok(true)) {
                let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
                state.subscribers.remove(&conn_id);
            }
        }

        Ok(message)
    }

    /// Only the sender may recall, and only while the message is in the
    /// ring. Broadcasts `messageRecalled`.
    pub fn recall_message(
        &self,
        room_key: &str,
        actor: Uuid,
        message_id: Uuid,
    ) -> Result<(), ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.contains_key(&actor) {
            return Err(ErrorCode::UserNotInRoom);
        }
        let idx = state
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(ErrorCode::MessageNotFound)?;
        if state.messages[idx].sender.id != actor {
            return Err(ErrorCode::NotYourMessage);
        }
        state.messages.remove(idx);
        state.broadcast(&ServerEvent::MessageRecalled { message_id }, None);
        Ok(())
    }

    pub fn recent_messages(&self, room_key: &str, limit: usize) -> Result<Vec<Message>, ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        let skip = state.messages.len().saturating_sub(limit);
        Ok(state.messages.iter().skip(skip).cloned().collect())
    }

    // --- Room administration ---

    /// Apply a password change. Only members may change it; hashing runs off
    /// the room lock. `actor_conn` is excluded from the broadcast because
    /// the actor gets its own echo carrying the plaintext.
    pub async fn set_password(
        &self,
        room_key: &str,
        actor: Uuid,
        actor_conn: Option<Uuid>,
        change: PasswordChange,
    ) -> Result<PasswordOutcome, ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        {
            let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.members.contains_key(&actor) {
                return Err(ErrorCode::UserNotInRoom);
            }
        }

        let new_password = match change {
            PasswordChange::Remove => None,
            PasswordChange::Generate => Some(ids::generate_password(ROOM_PASSWORD_LEN)),
            PasswordChange::Set(p) => Some(p),
        };
        let hashed = match &new_password {
            Some(plain) => Some(RoomPassword {
                hash: hash_password(plain.clone(), self.bcrypt_cost).await?,
                plain: plain.clone(),
            }),
            None => None,
        };

        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.contains_key(&actor) {
            return Err(ErrorCode::UserNotInRoom);
        }
        let has_password = hashed.is_some();
        state.password = hashed;
        state.last_activity = Utc::now();
        state.broadcast(
            &ServerEvent::RoomPasswordSet { has_password, password: None },
            actor_conn,
        );

        Ok(PasswordOutcome { plaintext: new_password, has_password })
    }

    /// URL for inviting others; embeds the plaintext password for protected
    /// rooms so the link is self-sufficient.
    pub fn share_room_link(&self, room_key: &str, actor: Uuid) -> Result<String, ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.contains_key(&actor) {
            return Err(ErrorCode::UserNotInRoom);
        }
        let mut url = format!("{}/?room={}", self.base_url, room_key);
        if let Some(password) = &state.password {
            url.push_str("&password=");
            url.push_str(&password.plain);
        }
        Ok(url)
    }

    /// Toggle the pinned flag; pinned rooms are exempt from idle
    /// destruction. Broadcasts `roomPinned`.
    pub fn pin_room(&self, room_key: &str, actor: Uuid, pinned: bool) -> Result<(), ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.contains_key(&actor) {
            return Err(ErrorCode::UserNotInRoom);
        }
        state.pinned = pinned;
        state.last_activity = Utc::now();
        state.broadcast(&ServerEvent::RoomPinned { pinned }, None);
        Ok(())
    }

    // --- Queries ---

    pub fn list_users(&self, room_key: &str) -> Result<Vec<RoomUser>, ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.users())
    }

    pub fn room_exists(&self, room_key: &str) -> bool {
        self.get_room(room_key).is_some()
    }

    pub fn is_member(&self, room_key: &str, user_id: Uuid) -> bool {
        self.get_room(room_key)
            .map(|room| {
                room.state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .members
                    .contains_key(&user_id)
            })
            .unwrap_or(false)
    }

    /// Reconnect probe: does the room exist, and does this fingerprint map
    /// to a current member?
    pub fn validate_user(&self, room_key: &str, fingerprint_hash: &str) -> (bool, bool) {
        let Some(room) = self.get_room(room_key) else {
            return (false, false);
        };
        let user_id = self.user_id_for(fingerprint_hash, room_key);
        let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        let user_exists = state
            .members
            .get(&user_id)
            .map(|m| m.fingerprint_hash == fingerprint_hash)
            .unwrap_or(false);
        (true, user_exists)
    }

    // --- Signalling pass-through ---

    /// Route a peer-to-peer signalling event to one member's connections.
    /// The payload is forwarded untouched.
    pub fn relay_p2p(
        &self,
        room_key: &str,
        from: Uuid,
        to: Uuid,
        event: ServerEvent,
    ) -> Result<(), ErrorCode> {
        let room = self.get_room(room_key).ok_or(ErrorCode::RoomNotFound)?;
        let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.members.contains_key(&from) || !state.members.contains_key(&to) {
            return Err(ErrorCode::UserNotInRoom);
        }
        state.push_to_user(to, &event);
        Ok(())
    }

    // --- System notifications ---

    /// Best-effort system notice to every subscribed connection of a room.
    pub fn notify_system(&self, room_key: &str, notice: SystemNotice) {
        if let Some(room) = self.get_room(room_key) {
            let state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            state.broadcast(&ServerEvent::SystemMessage(notice), None);
        }
    }

    // --- Janitor support ---

    /// Mark idle rooms as `destroying` and hand them to the janitor. A room
    /// qualifies when it is unpinned, memberless, and idle past the window.
    /// Marked rooms reject joins until `finish_destroy` removes them.
    pub fn begin_destroy_idle(&self) -> Vec<DestroyingRoom> {
        let rooms: Vec<Arc<Room>> = {
            let map = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };

        let now = Utc::now();
        let mut destroying = Vec::new();
        for room in rooms {
            let mut state = room.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.destroying
                || state.pinned
                || !state.members.is_empty()
                || now - state.last_activity <= self.idle_window
            {
                continue;
            }
            state.destroying = true;
            destroying.push(DestroyingRoom {
                room_key: room.key.clone(),
                subscribers: state.all_queues(),
            });
        }
        destroying
    }

    /// Complete the destroying → gone transition.
    pub fn finish_destroy(&self, room_key: &str) {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(room_key);
    }

    /// Test/ops hook: backdate a room's activity clock.
    pub fn backdate_activity(&self, room_key: &str, to: DateTime<Utc>) {
        if let Some(room) = self.get_room(room_key) {
            room.state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last_activity = to;
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn created_at(&self, room_key: &str) -> Option<DateTime<Utc>> {
        self.get_room(room_key)
            .map(|room| room.state.lock().unwrap_or_else(|e| e.into_inner()).created_at)
    }
}

// --- bcrypt off the critical section ---

async fn hash_password(plain: String, cost: u32) -> Result<String, ErrorCode> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|_| ErrorCode::Internal)?
        .map_err(|_| ErrorCode::Internal)
}

async fn verify_password(plain: String, hash: String) -> Result<bool, ErrorCode> {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|_| ErrorCode::Internal)?
        .map_err(|_| ErrorCode::Internal)
}
