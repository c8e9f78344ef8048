//! Externally addressable aliases for stored files, with independent expiry,
//! optional passwords, and per-share access logs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::ids;
use crate::models::{ErrorCode, ShareAccessLog, ShareStatus, ShareSummary};

/// Default expiry when the client does not pick one.
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

/// Expired/revoked records are hard-deleted this long after expiry.
const RECORD_GRACE_DAYS: i64 = 7;

/// Access-log retention.
const LOG_RETENTION_DAYS: i64 = 30;

/// Length of auto-generated share passwords.
const SHARE_PASSWORD_LEN: usize = 6;

/// Password intent for a new share. The REST body maps `"auto-generate"` to
/// `Auto`, any other non-empty string to `Set`, and absence to `None`.
#[derive(Debug, Clone)]
pub enum SharePassword {
    None,
    Auto,
    Set(String),
}

impl SharePassword {
    pub fn from_wire(password: Option<String>) -> Self {
        match password.as_deref() {
            None | Some("") => SharePassword::None,
            Some("auto-generate") => SharePassword::Auto,
            Some(p) => SharePassword::Set(p.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub share_id: String,
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub room_key: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    password_hash: Option<String>,
    pub revoked: bool,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_logs: Vec<ShareAccessLog>,
}

impl ShareRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// revoked wins over expired; active only while neither holds.
    pub fn status(&self) -> ShareStatus {
        if self.revoked {
            ShareStatus::Revoked
        } else if self.is_expired() {
            ShareStatus::Expired
        } else {
            ShareStatus::Active
        }
    }

    fn summary(&self, base_url: &str) -> ShareSummary {
        ShareSummary {
            share_id: self.share_id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            created_at: self.created_at,
            expires_at: self.expires_at,
            status: self.status(),
            access_count: self.access_count,
            has_password: self.has_password(),
            last_accessed_at: self.last_accessed_at,
            url: share_url(base_url, &self.share_id),
        }
    }
}

pub struct CreateShare {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub room_key: String,
    pub created_by: Uuid,
    pub expires_in_days: i64,
    pub password: SharePassword,
}

pub struct ShareService {
    base_url: String,
    bcrypt_cost: u32,
    shares: Mutex<HashMap<String, ShareRecord>>,
    user_shares: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl ShareService {
    pub fn new(config: &AppConfig) -> Self {
        ShareService {
            base_url: config.public_base_url.clone(),
            bcrypt_cost: config.bcrypt_cost,
            shares: Mutex::new(HashMap::new()),
            user_shares: Mutex::new(HashMap::new()),
        }
    }

    pub fn url_for(&self, share_id: &str) -> String {
        share_url(&self.base_url, share_id)
    }

    /// Create a share. The plaintext password (when one exists) is returned
    /// exactly once, here.
    pub async fn create(
        &self,
        req: CreateShare,
    ) -> Result<(ShareRecord, Option<String>), ErrorCode> {
        let plaintext = match &req.password {
            SharePassword::None => None,
            SharePassword::Auto => Some(ids::generate_password(SHARE_PASSWORD_LEN)),
            SharePassword::Set(p) => Some(p.clone()),
        };
        let password_hash = match &plaintext {
            Some(plain) => Some(hash_blocking(plain.clone(), self.bcrypt_cost).await?),
            None => None,
        };

        let now = Utc::now();
        let record = ShareRecord {
            share_id: ids::generate_share_id(),
            file_id: req.file_id,
            file_name: req.file_name,
            file_size: req.file_size,
            room_key: req.room_key,
            created_by: req.created_by,
            created_at: now,
            expires_at: now + Duration::days(req.expires_in_days),
            password_hash,
            revoked: false,
            access_count: 0,
            last_accessed_at: None,
            access_logs: Vec::new(),
        };

        self.shares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.share_id.clone(), record.clone());
        self.user_shares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(req.created_by)
            .or_default()
            .push(record.share_id.clone());

        println!("🔗 Share created: {}", record.share_id);
        Ok((record, plaintext))
    }

    pub fn get(&self, share_id: &str) -> Option<ShareRecord> {
        self.shares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(share_id)
            .cloned()
    }

    /// Owner-scoped lookup for the detail endpoint.
    pub fn get_owned(&self, share_id: &str, actor: Uuid) -> Result<ShareSummary, ErrorCode> {
        let record = self.get(share_id).ok_or(ErrorCode::ShareNotFound)?;
        if record.created_by != actor {
            return Err(ErrorCode::ShareNotFound);
        }
        Ok(record.summary(&self.base_url))
    }

    /// Page through one user's shares, newest first.
    pub fn list(
        &self,
        actor: Uuid,
        status: Option<ShareStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<ShareSummary>, usize) {
        let ids = self
            .user_shares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&actor)
            .cloned()
            .unwrap_or_default();

        let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<&ShareRecord> = ids.iter().filter_map(|id| shares.get(id)).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let filtered: Vec<&ShareRecord> = records
            .into_iter()
            .filter(|r| status.map(|s| r.status() == s).unwrap_or(true))
            .collect();
        let total = filtered.len();
        let page = filtered
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| r.summary(&self.base_url))
            .collect();
        (page, total)
    }

    /// Compare a provided password against the stored hash. No-password
    /// shares accept anything. bcrypt runs off the lock.
    pub async fn verify_password(
        &self,
        share_id: &str,
        password: String,
    ) -> Result<bool, ErrorCode> {
        let hash = {
            let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
            let record = shares.get(share_id).ok_or(ErrorCode::ShareNotFound)?;
            match &record.password_hash {
                Some(h) => h.clone(),
                None => return Ok(true),
            }
        };
        verify_blocking(password, hash).await
    }

    /// A successful access: bump the counter and stamp last-accessed. The
    /// log entry follows separately once the stream finishes.
    pub fn mark_accessed(&self, share_id: &str) {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = shares.get_mut(share_id) {
            record.access_count += 1;
            record.last_accessed_at = Some(Utc::now());
        }
    }

    pub fn log_access(&self, share_id: &str, entry: ShareAccessLog) {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = shares.get_mut(share_id) {
            record.access_logs.push(entry);
        }
    }

    /// Most recent access entries, newest first.
    pub fn access_logs(
        &self,
        share_id: &str,
        actor: Uuid,
        limit: usize,
    ) -> Result<Vec<ShareAccessLog>, ErrorCode> {
        let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        let record = shares.get(share_id).ok_or(ErrorCode::ShareNotFound)?;
        if record.created_by != actor {
            return Err(ErrorCode::ShareNotFound);
        }
        Ok(record.access_logs.iter().rev().take(limit).cloned().collect())
    }

    /// Revoke. Double-revoke is a no-op, not an error.
    pub fn revoke(&self, share_id: &str, actor: Uuid) -> Result<(), ErrorCode> {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        let record = shares.get_mut(share_id).ok_or(ErrorCode::ShareNotFound)?;
        if record.created_by != actor {
            return Err(ErrorCode::ShareNotFound);
        }
        record.revoked = true;
        Ok(())
    }

    /// Hard-remove the record and its access log.
    pub fn permanent_delete(&self, share_id: &str, actor: Uuid) -> Result<(), ErrorCode> {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        let record = shares.get(share_id).ok_or(ErrorCode::ShareNotFound)?;
        if record.created_by != actor {
            return Err(ErrorCode::ShareNotFound);
        }
        let owner = record.created_by;
        shares.remove(share_id);
        drop(shares);

        let mut user_shares = self.user_shares.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ids) = user_shares.get_mut(&owner) {
            ids.retain(|id| id != share_id);
        }
        Ok(())
    }

    /// Room-destruction cascade.
    pub fn revoke_room_shares(&self, room_key: &str) -> usize {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        let mut revoked = 0;
        for record in shares.values_mut() {
            if record.room_key == room_key && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        revoked
    }

    /// Hourly GC: hard-delete dead records past their grace window and trim
    /// old access-log entries. Returns (records removed, log entries
    /// trimmed).
    pub fn sweep(&self) -> (usize, usize) {
        let now = Utc::now();
        let record_cutoff = now - Duration::days(RECORD_GRACE_DAYS);
        let log_cutoff = now - Duration::days(LOG_RETENTION_DAYS);

        let dead: Vec<(String, Uuid)> = {
            let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
            shares
                .values()
                .filter(|r| r.status() != ShareStatus::Active && r.expires_at < record_cutoff)
                .map(|r| (r.share_id.clone(), r.created_by))
                .collect()
        };
        for (share_id, owner) in &dead {
            self.shares
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(share_id);
            let mut user_shares = self.user_shares.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(ids) = user_shares.get_mut(owner) {
                ids.retain(|id| id != share_id);
            }
        }

        let mut trimmed = 0;
        {
            let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
            for record in shares.values_mut() {
                let before = record.access_logs.len();
                record.access_logs.retain(|log| log.timestamp > log_cutoff);
                trimmed += before - record.access_logs.len();
            }
        }

        (dead.len(), trimmed)
    }

    pub fn share_count(&self) -> usize {
        self.shares.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Test/ops hook: backdate a share's expiry.
    pub fn backdate_expiry(&self, share_id: &str, to: DateTime<Utc>) {
        if let Some(record) = self
            .shares
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(share_id)
        {
            record.expires_at = to;
        }
    }
}

fn share_url(base_url: &str, share_id: &str) -> String {
    format!("{base_url}/api/share/{share_id}/download")
}

async fn hash_blocking(plain: String, cost: u32) -> Result<String, ErrorCode> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|_| ErrorCode::Internal)?
        .map_err(|_| ErrorCode::Internal)
}

async fn verify_blocking(plain: String, hash: String) -> Result<bool, ErrorCode> {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|_| ErrorCode::Internal)?
        .map_err(|_| ErrorCode::Internal)
}
