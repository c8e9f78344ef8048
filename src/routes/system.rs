use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, catch, get};

use super::{ApiResponse, ok};
use crate::models::ErrorCode;
use crate::registry::Registry;
use crate::share::ShareService;
use crate::store::FileStore;

#[get("/health")]
pub fn health() -> Json<ApiResponse<serde_json::Value>> {
    ok(serde_json::json!({
        "status": "ok",
        "service": "clip-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[get("/api/stats")]
pub fn stats(
    registry: &State<Arc<Registry>>,
    store: &State<Arc<FileStore>>,
    shares: &State<Arc<ShareService>>,
) -> Json<ApiResponse<serde_json::Value>> {
    ok(serde_json::json!({
        "rooms": registry.room_count(),
        "files": store.file_count(),
        "fileBytes": store.total_bytes(),
        "shares": shares.share_count(),
    }))
}

#[catch(404)]
pub fn not_found() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        message: Some("Not found".to_string()),
        data: None,
    })
}

#[catch(429)]
pub fn too_many_requests() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        message: Some(ErrorCode::RateLimited.as_str().to_string()),
        data: None,
    })
}

#[catch(400)]
pub fn bad_request() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        message: Some(ErrorCode::InvalidPayload.as_str().to_string()),
        data: None,
    })
}

// Rocket answers 422 for bodies that parse but fail validation; clients see
// the same stable code either way.
#[catch(422)]
pub fn unprocessable() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        message: Some(ErrorCode::InvalidPayload.as_str().to_string()),
        data: None,
    })
}

#[catch(413)]
pub fn payload_too_large() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        message: Some(ErrorCode::FileTooLarge.as_str().to_string()),
        data: None,
    })
}
