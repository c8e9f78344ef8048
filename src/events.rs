//! The bidirectional event protocol: tagged-union payloads exchanged over the
//! session socket, plus the per-connection outbound queue the registry fans
//! out into.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{DeviceKind, ErrorCode, Message, MessageKind, RoomUser};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

// --- Client -> server ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_key: String,
    pub name: String,
    #[serde(default)]
    pub device: DeviceKind,
    /// Opaque client-computed fingerprint; hashed server-side, user ids
    /// derive from it.
    pub fingerprint: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_id: Option<Uuid>,
    #[serde(default)]
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoomPasswordPayload {
    /// `""` means auto-generate, `null`/absent means remove, anything else
    /// is the new plaintext.
    #[serde(default)]
    pub password: Option<String>,
}

/// Signalling payloads are routed to `to` unmodified; the server never
/// inspects `payload`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2pRequest {
    pub to: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinRoom(JoinRoomPayload),
    JoinRoomWithPassword(JoinRoomPayload),
    LeaveRoom,
    SendMessage(SendMessagePayload),
    RequestUserList,
    SetRoomPassword(SetRoomPasswordPayload),
    ShareRoomLink,
    #[serde(rename_all = "camelCase")]
    RecallMessage { message_id: Uuid },
    PinRoom { pinned: bool },
    P2pOffer(P2pRequest),
    P2pAnswer(P2pRequest),
    P2pIceCandidate(P2pRequest),
}

// --- Server -> client ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemNoticeKind {
    FileDeleted,
    FileExpired,
    RoomDestroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    pub kind: SystemNoticeKind,
    pub room_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Message(Box<Message>),
    MessageHistory { messages: Vec<Message> },
    UserJoined { user: RoomUser },
    UserLeft { user: RoomUser },
    UserList { users: Vec<RoomUser> },
    SystemMessage(SystemNotice),
    #[serde(rename_all = "camelCase")]
    RoomDestroyed { room_key: String, deleted_files: Vec<String> },
    #[serde(rename_all = "camelCase")]
    RoomPasswordSet {
        has_password: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    RoomLinkGenerated { url: String },
    #[serde(rename_all = "camelCase")]
    PasswordRequired { room_key: String },
    #[serde(rename_all = "camelCase")]
    MessageRecalled { message_id: Uuid },
    RoomPinned { pinned: bool },
    Error { code: ErrorCode, message: String },
    P2pOffer { from: Uuid, payload: serde_json::Value },
    P2pAnswer { from: Uuid, payload: serde_json::Value },
    P2pIceCandidate { from: Uuid, payload: serde_json::Value },
}

impl ServerEvent {
    pub fn error(code: ErrorCode) -> Self {
        ServerEvent::Error {
            code,
            message: code.as_str().to_string(),
        }
    }
}

// --- Outbound queues ---

/// Why an immediate push did not land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The consumer is alive but its queue is at capacity.
    Full,
    /// The consumer is gone.
    Closed,
}

/// Handle to one connection's bounded outbound queue. Room broadcasts are
/// enqueued under the room lock so every member observes the same order;
/// chat messages additionally get back-pressure handling for full queues.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<ServerEvent>,
}

impl OutboundQueue {
    pub fn pair() -> (OutboundQueue, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (OutboundQueue { tx }, rx)
    }

    /// Best-effort push. Overflow or a gone consumer drops the event.
    pub fn push(&self, event: ServerEvent) {
        let _ = self.tx.try_send(event);
    }

    /// Immediate push that reports why it failed.
    pub fn try_push(&self, event: ServerEvent) -> Result<(), PushError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Push that waits for queue space. Returns false if the consumer is
    /// gone.
    pub async fn push_reliable(&self, event: ServerEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}
