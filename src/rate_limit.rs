use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rocket::Request;
use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

use crate::models::ErrorCode;

/// Interval between counter-record sweeps (seconds).
const SWEEP_INTERVAL_SECS: u64 = 300;

/// Admission categories. HTTP categories key per client IP, event categories
/// key per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    HttpGeneral,
    HttpUpload,
    HttpAuth,
    HttpStrict,
    HttpRoomAction,
    EventJoinRoom,
    EventLeaveRoom,
    EventSendMessage,
    EventUserList,
    EventPasswordChange,
    EventShareRoom,
}

impl Category {
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Category::HttpGeneral => "http_general",
            Category::HttpUpload => "http_upload",
            Category::HttpAuth => "http_auth",
            Category::HttpStrict => "http_strict",
            Category::HttpRoomAction => "http_room_action",
            Category::EventJoinRoom => "ev_join",
            Category::EventLeaveRoom => "ev_leave",
            Category::EventSendMessage => "ev_message",
            Category::EventUserList => "ev_user_list",
            Category::EventPasswordChange => "ev_password",
            Category::EventShareRoom => "ev_share_room",
        }
    }
}

/// Configurable quota values. All read from environment variables with
/// defaults matching the admission table.
///
/// Environment variables: `RATE_LIMIT_HTTP_GENERAL`, `RATE_LIMIT_HTTP_UPLOAD`,
/// `RATE_LIMIT_HTTP_AUTH`, `RATE_LIMIT_HTTP_STRICT`,
/// `RATE_LIMIT_HTTP_ROOM_ACTION`, `RATE_LIMIT_EVENT_JOIN`,
/// `RATE_LIMIT_EVENT_LEAVE`, `RATE_LIMIT_EVENT_MESSAGE`,
/// `RATE_LIMIT_EVENT_USER_LIST`, `RATE_LIMIT_EVENT_PASSWORD`,
/// `RATE_LIMIT_EVENT_SHARE_ROOM` — each overrides the max for its category;
/// windows are fixed.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub http_general_max: usize,
    pub http_upload_max: usize,
    pub http_auth_max: usize,
    pub http_strict_max: usize,
    pub http_room_action_max: usize,
    pub event_join_max: usize,
    pub event_leave_max: usize,
    pub event_message_max: usize,
    pub event_user_list_max: usize,
    pub event_password_max: usize,
    pub event_share_room_max: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            http_general_max: 100,
            http_upload_max: 5,
            http_auth_max: 20,
            http_strict_max: 50,
            http_room_action_max: 30,
            event_join_max: 5,
            event_leave_max: 10,
            event_message_max: 30,
            event_user_list_max: 20,
            event_password_max: 10,
            event_share_room_max: 20,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let overrides: [(&str, &mut usize); 11] = [
            ("RATE_LIMIT_HTTP_GENERAL", &mut config.http_general_max),
            ("RATE_LIMIT_HTTP_UPLOAD", &mut config.http_upload_max),
            ("RATE_LIMIT_HTTP_AUTH", &mut config.http_auth_max),
            ("RATE_LIMIT_HTTP_STRICT", &mut config.http_strict_max),
            (
                "RATE_LIMIT_HTTP_ROOM_ACTION",
                &mut config.http_room_action_max,
            ),
            ("RATE_LIMIT_EVENT_JOIN", &mut config.event_join_max),
            ("RATE_LIMIT_EVENT_LEAVE", &mut config.event_leave_max),
            ("RATE_LIMIT_EVENT_MESSAGE", &mut config.event_message_max),
            ("RATE_LIMIT_EVENT_USER_LIST", &mut config.event_user_list_max),
            ("RATE_LIMIT_EVENT_PASSWORD", &mut config.event_password_max),
            (
                "RATE_LIMIT_EVENT_SHARE_ROOM",
                &mut config.event_share_room_max,
            ),
        ];
        for (var, slot) in overrides {
            if let Ok(val) = env::var(var)
                && let Ok(n) = val.parse::<usize>()
            {
                *slot = n;
            }
        }

        config
    }

    /// (max, window_secs) for a category.
    pub fn quota(&self, category: Category) -> (usize, u64) {
        match category {
            Category::HttpGeneral => (self.http_general_max, 900),
            Category::HttpUpload => (self.http_upload_max, 60),
            Category::HttpAuth => (self.http_auth_max, 900),
            Category::HttpStrict => (self.http_strict_max, 300),
            Category::HttpRoomAction => (self.http_room_action_max, 60),
            Category::EventJoinRoom => (self.event_join_max, 60),
            Category::EventLeaveRoom => (self.event_leave_max, 60),
            Category::EventSendMessage => (self.event_message_max, 60),
            Category::EventUserList => (self.event_user_list_max, 60),
            Category::EventPasswordChange => (self.event_password_max, 60),
            Category::EventShareRoom => (self.event_share_room_max, 60),
        }
    }
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the window resets. 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

struct Window {
    started: Instant,
    span: Duration,
    count: usize,
}

/// Fixed-window admission counters. Counting happens on the attempt, whether
/// or not the request later succeeds.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed. `who` is the client IP for HTTP
    /// categories and the connection id for event categories.
    pub fn check(&self, category: Category, who: &str) -> RateLimitInfo {
        let (max, window_secs) = self.config.quota(category);
        let key = format!("{}:{}", category.key_prefix(), who);
        let span = Duration::from_secs(window_secs);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let entry = windows.entry(key).or_insert(Window {
            started: now,
            span,
            count: 0,
        });

        if now.duration_since(entry.started) >= span {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= max {
            let elapsed = now.duration_since(entry.started);
            let retry_after = span.saturating_sub(elapsed).as_secs() + 1;
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entry.count += 1;
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining: max - entry.count,
            retry_after_secs: 0,
        }
    }

    /// Drop windows whose span has fully elapsed. Called by the janitor.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < w.span);
        before - windows.len()
    }
}

/// Spawns the background task that reclaims expired counter records.
pub fn spawn_counter_sweeper(limiter: std::sync::Arc<RateLimiter>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            let reclaimed = limiter.sweep();
            if reclaimed > 0 {
                println!("🧹 Rate limiter: reclaimed {reclaimed} counter records");
            }
        }
    });
}

/// Error responder for rate-limited (429) responses with proper headers.
pub struct RateLimitedError {
    pub info: RateLimitInfo,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "success": false,
            "message": ErrorCode::RateLimited.as_str(),
            "retryAfterSecs": self.info.retry_after_secs,
        }));

        Response::build_from(body.respond_to(req)?)
            .status(rocket::http::Status::TooManyRequests)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", "0".to_string()))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .header(Header::new(
                "Retry-After",
                self.info.retry_after_secs.to_string(),
            ))
            .ok()
    }
}
