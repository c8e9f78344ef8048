use std::sync::Arc;

use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{ContentType, Header};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{Request, State, get, post};
use uuid::Uuid;

use super::{ApiResponse, ClientIp, Failure, RoomKeyHeader, UserIdHeader, ok};
use crate::models::{ErrorCode, UploadResponse};
use crate::rate_limit::{Category, RateLimiter, RateLimitedError};
use crate::registry::Registry;
use crate::store::FileStore;
use crate::validate;

#[derive(rocket::FromForm)]
pub struct UploadForm<'f> {
    pub file: TempFile<'f>,
}

#[post("/api/files/upload", data = "<form>")]
pub async fn upload_file(
    store: &State<Arc<FileStore>>,
    registry: &State<Arc<Registry>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    room: Option<RoomKeyHeader>,
    user: Option<UserIdHeader>,
    mut form: Form<UploadForm<'_>>,
) -> Result<Json<ApiResponse<UploadResponse>>, Failure> {
    let rl = rate_limiter.check(Category::HttpUpload, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let room_key = room.ok_or(ErrorCode::InvalidPayload)?.0;
    let user_id = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    if !registry.is_member(&room_key, user_id) {
        return Err(ErrorCode::UserNotInRoom.into());
    }

    let size = form.file.len();
    if size == 0 {
        return Err(ErrorCode::InvalidPayload.into());
    }
    if size > store.max_file_size() {
        return Err(ErrorCode::FileTooLarge.into());
    }

    let raw_name = form
        .file
        .raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    if validate::denied_extension(&raw_name) {
        return Err(ErrorCode::InvalidPayload.into());
    }
    let original_name = validate::sanitize_filename(&raw_name);

    let mime_type = form
        .file
        .content_type()
        .map(|ct| ct.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    // The temp dir lives inside the upload dir, so this is an atomic rename;
    // the index entry only appears once the bytes are in place.
    let (file_id, path) = store.allocate();
    form.file
        .persist_to(&path)
        .await
        .map_err(|_| ErrorCode::Internal)?;
    let info = store.commit(file_id, &room_key, original_name, mime_type, size);

    Ok(ok(UploadResponse {
        file_id: info.file_id,
        download_url: info.download_url,
    }))
}

#[get("/api/files/download/<file_id>")]
pub async fn download_file(
    store: &State<Arc<FileStore>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    file_id: &str,
) -> Result<FileDownload, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let file_id = Uuid::parse_str(file_id).map_err(|_| ErrorCode::FileNotFound)?;
    let stored = store.lookup(file_id)?;
    let file = tokio::fs::File::open(&stored.path)
        .await
        .map_err(|_| ErrorCode::Internal)?;

    Ok(FileDownload {
        file,
        size: stored.info.size,
        mime_type: stored.info.mime_type,
        filename: stored.info.original_name,
    })
}

/// Streams a blob with its declared MIME and the sanitized original name in
/// Content-Disposition.
pub struct FileDownload {
    pub file: tokio::fs::File,
    pub size: u64,
    pub mime_type: String,
    pub filename: String,
}

impl<'r> Responder<'r, 'static> for FileDownload {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let content_type =
            ContentType::parse_flexible(&self.mime_type).unwrap_or(ContentType::Binary);
        Response::build()
            .header(content_type)
            .header(Header::new(
                "Content-Disposition",
                format!(
                    "attachment; filename=\"{}\"",
                    self.filename.replace('"', "\\\"")
                ),
            ))
            .sized_body(Some(self.size as usize), self.file)
            .ok()
    }
}
