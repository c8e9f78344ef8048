use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error taxonomy ---

/// Stable error codes shared by REST responses and event-stream `error`
/// payloads. Clients translate; the server never rewords these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPayload,
    RateLimited,
    PasswordRequired,
    InvalidPassword,
    RoomNotFound,
    UserNotAuthenticated,
    UserNotInRoom,
    NotYourMessage,
    MessageNotFound,
    InvalidFileReference,
    FileTooLarge,
    FileNotFound,
    ShareNotFound,
    ShareExpired,
    ShareRevoked,
    AuthenticationRequired,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::PasswordRequired => "password_required",
            ErrorCode::InvalidPassword => "invalid_password",
            ErrorCode::RoomNotFound => "room_not_found",
            ErrorCode::UserNotAuthenticated => "user_not_authenticated",
            ErrorCode::UserNotInRoom => "user_not_in_room",
            ErrorCode::NotYourMessage => "not_your_message",
            ErrorCode::MessageNotFound => "message_not_found",
            ErrorCode::InvalidFileReference => "invalid_file_reference",
            ErrorCode::FileTooLarge => "file_too_large",
            ErrorCode::FileNotFound => "file_not_found",
            ErrorCode::ShareNotFound => "share_not_found",
            ErrorCode::ShareExpired => "share_expired",
            ErrorCode::ShareRevoked => "share_revoked",
            ErrorCode::AuthenticationRequired => "authentication_required",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Users ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mobile,
    Desktop,
    Tablet,
    #[default]
    Unknown,
}

/// A room member as seen on the wire. The fingerprint hash stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub id: Uuid,
    pub name: String,
    pub device: DeviceKind,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

// --- Messages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

/// Client-declared metadata for a file message. The authoritative name, size
/// and MIME come from the file store; `last_modified` is validated against
/// the 48 h clock-skew window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender: RoomUser,
    pub timestamp: DateTime<Utc>,
    pub room_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

// --- Files ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: Uuid,
    pub room_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

// --- Shares ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAccessLog {
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Share summary for list/detail responses. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareSummary {
    pub share_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ShareStatus,
    pub access_count: u64,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub url: String,
}

// --- REST request/response bodies ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateUserRequest {
    pub room_key: String,
    pub user_fingerprint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateUserResponse {
    pub room_exists: bool,
    pub user_exists: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareBody {
    pub file_id: Uuid,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
    /// `"auto-generate"` asks the server for a random password; any other
    /// non-empty string is used as-is; absent means no password.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareResponse {
    pub share_id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareListResponse {
    pub shares: Vec<ShareSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: Uuid,
    pub download_url: String,
}
