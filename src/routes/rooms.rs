use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiResponse, ClientIp, Failure, RoomKeyHeader, ok};
use crate::ids;
use crate::models::{ErrorCode, Message, ValidateUserRequest, ValidateUserResponse};
use crate::rate_limit::{Category, RateLimiter, RateLimitedError};
use crate::registry::{MESSAGE_RING_CAPACITY, Registry};

/// Backwards-compat history fetch for clients that poll over REST instead of
/// listening for `messageHistory` on the event stream.
#[get("/api/rooms/messages?<limit>")]
pub fn get_messages(
    registry: &State<Arc<Registry>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    room: Option<RoomKeyHeader>,
    limit: Option<usize>,
) -> Result<Json<ApiResponse<Vec<Message>>>, Failure> {
    let rl = rate_limiter.check(Category::HttpRoomAction, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let room_key = room.ok_or(ErrorCode::InvalidPayload)?.0;
    let limit = limit.unwrap_or(MESSAGE_RING_CAPACITY).min(MESSAGE_RING_CAPACITY);
    let messages = registry.recent_messages(&room_key, limit)?;
    Ok(ok(messages))
}

/// Reconnect probe: does the room exist, and does this fingerprint map to a
/// member in it?
#[post("/api/rooms/validate-user", format = "json", data = "<body>")]
pub fn validate_user(
    registry: &State<Arc<Registry>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    body: Json<ValidateUserRequest>,
) -> Result<Json<ApiResponse<ValidateUserResponse>>, Failure> {
    let rl = rate_limiter.check(Category::HttpRoomAction, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let fingerprint = body.user_fingerprint.trim();
    if fingerprint.is_empty() {
        return Err(ErrorCode::InvalidPayload.into());
    }
    let fingerprint_hash = ids::fingerprint_hash(fingerprint);

    let (room_exists, user_exists) = registry.validate_user(&body.room_key, &fingerprint_hash);
    Ok(ok(ValidateUserResponse { room_exists, user_exists }))
}
