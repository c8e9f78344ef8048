use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use rocket::http::{ContentType, Header};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{Request, State, delete, get, post};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use super::{
    ApiResponse, AuthChallenge, BasicAuthPassword, ClientIp, Failure, UserAgent, UserIdHeader,
    ok, ok_empty,
};
use crate::models::{
    CreateShareBody, CreateShareResponse, ErrorCode, ShareAccessLog, ShareListResponse,
    ShareStatus, ShareSummary,
};
use crate::rate_limit::{Category, RateLimiter, RateLimitedError};
use crate::registry::Registry;
use crate::share::{CreateShare, SharePassword, ShareService};
use crate::store::FileStore;
use crate::validate;

const LIST_DEFAULT_LIMIT: usize = 50;
const LIST_MAX_LIMIT: usize = 100;
const LOGS_DEFAULT_LIMIT: usize = 50;

#[post("/api/share", format = "json", data = "<body>")]
pub async fn create_share(
    shares: &State<Arc<ShareService>>,
    store: &State<Arc<FileStore>>,
    registry: &State<Arc<Registry>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    body: Json<CreateShareBody>,
) -> Result<Json<ApiResponse<CreateShareResponse>>, Failure> {
    let rl = rate_limiter.check(Category::HttpStrict, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    let expires_in_days = body.expires_in_days.unwrap_or(crate::share::DEFAULT_EXPIRY_DAYS);
    if !validate::valid_share_expiry_days(expires_in_days) {
        return Err(ErrorCode::InvalidPayload.into());
    }

    let stored = store.lookup(body.file_id)?;
    if !registry.is_member(&stored.info.room_key, actor) {
        return Err(ErrorCode::UserNotInRoom.into());
    }

    let (record, password) = shares
        .create(CreateShare {
            file_id: stored.info.file_id,
            file_name: stored.info.original_name,
            file_size: stored.info.size,
            room_key: stored.info.room_key,
            created_by: actor,
            expires_in_days,
            password: SharePassword::from_wire(body.password.clone()),
        })
        .await?;

    let has_password = record.has_password();
    Ok(ok(CreateShareResponse {
        url: shares.url_for(&record.share_id),
        share_id: record.share_id,
        expires_at: record.expires_at,
        has_password,
        password,
    }))
}

#[get("/api/share?<status>&<limit>&<offset>")]
pub fn list_shares(
    shares: &State<Arc<ShareService>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    status: Option<&str>,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Json<ApiResponse<ShareListResponse>>, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    let status = match status {
        Some("active") => Some(ShareStatus::Active),
        Some("expired") => Some(ShareStatus::Expired),
        Some("revoked") => Some(ShareStatus::Revoked),
        _ => None,
    };
    let limit = limit.unwrap_or(LIST_DEFAULT_LIMIT).min(LIST_MAX_LIMIT);
    let offset = offset.unwrap_or(0);

    let (page, total) = shares.list(actor, status, limit, offset);
    Ok(ok(ShareListResponse { shares: page, total, limit, offset }))
}

#[get("/api/share/<share_id>")]
pub fn get_share(
    shares: &State<Arc<ShareService>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    share_id: &str,
) -> Result<Json<ApiResponse<ShareSummary>>, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    let summary = shares.get_owned(share_id, actor)?;
    Ok(ok(summary))
}

#[delete("/api/share/<share_id>")]
pub fn delete_share(
    shares: &State<Arc<ShareService>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    share_id: &str,
) -> Result<Json<ApiResponse<()>>, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    shares.revoke(share_id, actor)?;
    Ok(ok_empty())
}

#[post("/api/share/<share_id>/permanent-delete")]
pub fn permanent_delete(
    shares: &State<Arc<ShareService>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    share_id: &str,
) -> Result<Json<ApiResponse<()>>, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    shares.permanent_delete(share_id, actor)?;
    Ok(ok_empty())
}

#[get("/api/share/<share_id>/access?<limit>")]
pub fn get_access_logs(
    shares: &State<Arc<ShareService>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    user: Option<UserIdHeader>,
    share_id: &str,
    limit: Option<usize>,
) -> Result<Json<ApiResponse<Vec<ShareAccessLog>>>, Failure> {
    let rl = rate_limiter.check(Category::HttpGeneral, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let actor = user.ok_or(ErrorCode::UserNotAuthenticated)?.0;
    let logs = shares.access_logs(share_id, actor, limit.unwrap_or(LOGS_DEFAULT_LIMIT))?;
    Ok(ok(logs))
}

/// Public share download. Decision order: existence, revocation, expiry,
/// credentials, file presence — each failure mode is logged with its code,
/// except an absent-credentials challenge, which is not an access attempt.
#[get("/api/share/<share_id>/download?<password>")]
pub async fn download_share(
    shares: &State<Arc<ShareService>>,
    store: &State<Arc<FileStore>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    ip: ClientIp,
    agent: UserAgent,
    basic: BasicAuthPassword,
    share_id: &str,
    password: Option<String>,
) -> Result<ShareDownload, Failure> {
    if !validate::well_formed_share_id(share_id) {
        return Err(ErrorCode::ShareNotFound.into());
    }

    let Some(record) = shares.get(share_id) else {
        return Err(ErrorCode::ShareNotFound.into());
    };

    // Protected shares count against the stricter auth window
    let category = if record.has_password() {
        Category::HttpAuth
    } else {
        Category::HttpGeneral
    };
    let rl = rate_limiter.check(category, &ip.0);
    if !rl.allowed {
        return Err(Failure::RateLimited(RateLimitedError { info: rl }));
    }

    let log_failure = |code: &str| {
        shares.log_access(
            share_id,
            ShareAccessLog {
                timestamp: Utc::now(),
                ip_address: ip.0.clone(),
                user_agent: agent.0.clone(),
                success: false,
                bytes_transferred: None,
                error_code: Some(code.to_string()),
            },
        );
    };

    if record.revoked {
        log_failure("revoked");
        return Err(ErrorCode::ShareRevoked.into());
    }
    if record.is_expired() {
        log_failure("expired");
        return Err(ErrorCode::ShareExpired.into());
    }

    if record.has_password() {
        // Basic Auth preferred, query parameter fallback
        let provided = match basic.0.or(password) {
            Some(p) => p,
            None => return Err(Failure::Challenge(AuthChallenge)),
        };
        if !shares.verify_password(share_id, provided).await? {
            log_failure("wrong_password");
            return Err(ErrorCode::InvalidPassword.into());
        }
    }

    let Some(stored) = store.get(record.file_id) else {
        log_failure("file_not_found");
        return Err(ErrorCode::FileNotFound.into());
    };

    let file = match tokio::fs::File::open(&stored.path).await {
        Ok(f) => f,
        Err(_) => {
            log_failure("file_not_found");
            return Err(ErrorCode::FileNotFound.into());
        }
    };

    // Counted once per download; the success log lands when the stream
    // closes, carrying however many bytes actually went out.
    shares.mark_accessed(share_id);
    let tracked = TrackedDownload {
        file,
        sent: 0,
        probe: Some(AccessProbe {
            shares: shares.inner().clone(),
            share_id: share_id.to_string(),
            ip_address: ip.0,
            user_agent: agent.0,
        }),
    };

    Ok(ShareDownload {
        body: tracked,
        size: stored.info.size,
        mime_type: stored.info.mime_type,
        filename: record.file_name,
    })
}

// --- Streaming with access accounting ---

struct AccessProbe {
    shares: Arc<ShareService>,
    share_id: String,
    ip_address: String,
    user_agent: Option<String>,
}

/// File reader that counts bytes out and writes the success log entry when
/// dropped, whether the stream completed or was aborted mid-way.
pub struct TrackedDownload {
    file: tokio::fs::File,
    sent: u64,
    probe: Option<AccessProbe>,
}

impl Drop for TrackedDownload {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.shares.log_access(
                &probe.share_id,
                ShareAccessLog {
                    timestamp: Utc::now(),
                    ip_address: probe.ip_address,
                    user_agent: probe.user_agent,
                    success: true,
                    bytes_transferred: Some(self.sent),
                    error_code: None,
                },
            );
        }
    }
}

impl AsyncRead for TrackedDownload {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.file).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.sent += (buf.filled().len() - before) as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl AsyncSeek for TrackedDownload {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.get_mut().file).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.get_mut().file).poll_complete(cx)
    }
}

pub struct ShareDownload {
    body: TrackedDownload,
    size: u64,
    mime_type: String,
    filename: String,
}

impl<'r> Responder<'r, 'static> for ShareDownload {
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
            .header(Header::new("Cache-Control", "no-store, no-cache, must-revalidate"))
            .header(Header::new("X-Content-Type-Options", "nosniff"))
            .sized_body(Some(self.size as usize), self.body)
            .ok()
    }
}
