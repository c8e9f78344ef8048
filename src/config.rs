use std::env;
use std::path::PathBuf;

/// Server configuration. All read from environment variables with sensible
/// defaults.
///
/// Environment variables:
/// - `UPLOAD_DIR` — Directory for stored file blobs (default: `data/uploads`)
/// - `MAX_FILE_SIZE` — Upload size cap in bytes (default: 100 MiB)
/// - `BCRYPT_COST` — bcrypt work factor, floored at 12 (default: 12)
/// - `USER_ID_SALT` — Salt for deterministic user-id derivation (default:
///   random per process; set it to keep user ids stable across restarts)
/// - `PRESENCE_GRACE_SECS` — Seconds an offline member may rebind before
///   being removed from the room (default: 30)
/// - `SESSION_IDLE_TIMEOUT_SECS` — Idle read timeout for event-stream
///   connections (default: 300)
/// - `PUBLIC_BASE_URL` — External base URL used when building share and room
///   links (default: `http://localhost:8000`)
/// - `ALLOWED_ORIGINS` — Comma-separated CORS origins (default: all)
/// - `FILE_TTL_HOURS` — File retention before GC (default: 12)
/// - `ROOM_IDLE_HOURS` — Idle window before an empty, unpinned room is
///   destroyed (default: 24)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
    pub bcrypt_cost: u32,
    pub user_id_salt: String,
    pub presence_grace_secs: u64,
    pub session_idle_timeout_secs: u64,
    pub public_base_url: String,
    pub allowed_origins: Option<Vec<String>>,
    pub file_ttl_hours: i64,
    pub room_idle_hours: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/uploads"),
            max_file_size: 100 * 1024 * 1024,
            bcrypt_cost: 12,
            user_id_salt: uuid::Uuid::new_v4().simple().to_string(),
            presence_grace_secs: 30,
            session_idle_timeout_secs: 300,
            public_base_url: "http://localhost:8000".to_string(),
            allowed_origins: None,
            file_ttl_hours: 12,
            room_idle_hours: 24,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("UPLOAD_DIR")
            && !val.is_empty()
        {
            config.upload_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("MAX_FILE_SIZE")
            && let Ok(n) = val.parse::<u64>()
        {
            config.max_file_size = n;
        }
        if let Ok(val) = env::var("BCRYPT_COST")
            && let Ok(n) = val.parse::<u32>()
        {
            // 12 is the floor; weaker hashes are not accepted
            config.bcrypt_cost = n.max(12);
        }
        if let Ok(val) = env::var("USER_ID_SALT")
            && !val.is_empty()
        {
            config.user_id_salt = val;
        }
        if let Ok(val) = env::var("PRESENCE_GRACE_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.presence_grace_secs = n;
        }
        if let Ok(val) = env::var("SESSION_IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.session_idle_timeout_secs = n;
        }
        if let Ok(val) = env::var("PUBLIC_BASE_URL")
            && !val.is_empty()
        {
            config.public_base_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = env::var("ALLOWED_ORIGINS")
            && !val.is_empty()
        {
            config.allowed_origins = Some(
                val.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Ok(val) = env::var("FILE_TTL_HOURS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.file_ttl_hours = n;
        }
        if let Ok(val) = env::var("ROOM_IDLE_HOURS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.room_idle_hours = n;
        }

        config
    }
}
