// Route module decomposition — each domain area in its own file.
// Shared types (request guards, the response envelope) live here; route
// functions in submodules.

mod files;
mod gateway;
mod rooms;
mod share;
mod system;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use files::{download_file, upload_file};
pub use gateway::session_socket;
pub use rooms::{get_messages, validate_user};
pub use share::{
    create_share, delete_share, download_share, get_access_logs, get_share, list_shares,
    permanent_delete,
};
pub use system::{
    bad_request, health, not_found, payload_too_large, stats, too_many_requests, unprocessable,
};

use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::models::ErrorCode;
use crate::rate_limit::RateLimitedError;

// --- Response envelope ---

/// Every JSON response is `{success, message?, data?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, message: None, data: Some(data) })
}

pub fn ok_empty() -> Json<ApiResponse<()>> {
    Json(ApiResponse { success: true, message: None, data: None })
}

// --- Error responders ---

/// An error code with its HTTP status; the body carries the stable code in
/// `message`.
pub struct ApiError {
    pub status: Status,
    pub code: ErrorCode,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        let status = match code {
            ErrorCode::InvalidPayload
            | ErrorCode::InvalidFileReference
            | ErrorCode::FileTooLarge => Status::BadRequest,
            ErrorCode::RateLimited => Status::TooManyRequests,
            ErrorCode::PasswordRequired
            | ErrorCode::InvalidPassword
            | ErrorCode::UserNotAuthenticated
            | ErrorCode::AuthenticationRequired => Status::Unauthorized,
            ErrorCode::UserNotInRoom | ErrorCode::NotYourMessage => Status::Forbidden,
            ErrorCode::RoomNotFound
            | ErrorCode::MessageNotFound
            | ErrorCode::FileNotFound
            | ErrorCode::ShareNotFound => Status::NotFound,
            // dead-but-once-valid shares are Gone so clients can tell them
            // from never-existed
            ErrorCode::ShareExpired | ErrorCode::ShareRevoked => Status::Gone,
            ErrorCode::Internal => Status::InternalServerError,
        };
        ApiError { status, code }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(ApiResponse::<()> {
            success: false,
            message: Some(self.code.as_str().to_string()),
            data: None,
        });
        Response::build_from(body.respond_to(req)?)
            .status(self.status)
            .ok()
    }
}

/// 401 with a Basic challenge, for password-protected share downloads.
pub struct AuthChallenge;

impl<'r, 'o: 'r> Responder<'r, 'o> for AuthChallenge {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(ApiResponse::<()> {
            success: false,
            message: Some(ErrorCode::AuthenticationRequired.as_str().to_string()),
            data: None,
        });
        Response::build_from(body.respond_to(req)?)
            .status(Status::Unauthorized)
            .header(Header::new(
                "WWW-Authenticate",
                "Basic realm=\"File Download\", charset=\"UTF-8\"",
            ))
            .ok()
    }
}

#[derive(rocket::Responder)]
pub enum Failure {
    Api(ApiError),
    RateLimited(RateLimitedError),
    Challenge(AuthChallenge),
}

impl From<ErrorCode> for Failure {
    fn from(code: ErrorCode) -> Self {
        Failure::Api(ApiError::new(code))
    }
}

// --- Shared request guards ---

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// `X-Room-Key` header. Routes take `Option<RoomKeyHeader>` and map absence
/// to `room_not_found`.
pub struct RoomKeyHeader(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RoomKeyHeader {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one("X-Room-Key") {
            Some(key) => Outcome::Success(RoomKeyHeader(key.trim().to_string())),
            None => Outcome::Forward(Status::BadRequest),
        }
    }
}

/// `X-User-Id` header. Routes take `Option<UserIdHeader>` and map absence to
/// `user_not_authenticated`.
pub struct UserIdHeader(pub Uuid);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserIdHeader {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req
            .headers()
            .get_one("X-User-Id")
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
        {
            Some(id) => Outcome::Success(UserIdHeader(id)),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// Password from `Authorization: Basic <base64>`; the username part is
/// ignored. Always succeeds so routes can fall back to `?password=`.
pub struct BasicAuthPassword(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BasicAuthPassword {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        use base64::Engine;
        let password = req
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Basic "))
            .and_then(|b64| {
                base64::engine::general_purpose::STANDARD
                    .decode(b64.trim())
                    .ok()
            })
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|creds| {
                creds
                    .split_once(':')
                    .map(|(_, password)| password.to_string())
            })
            .filter(|p| !p.is_empty());
        Outcome::Success(BasicAuthPassword(password))
    }
}

pub struct UserAgent(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserAgent {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(UserAgent(
            req.headers().get_one("User-Agent").map(String::from),
        ))
    }
}
