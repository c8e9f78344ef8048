//! Background sweeps: idle-room destruction, expired-file GC, share GC.
//! Sweep bodies are free functions so tests can drive one tick directly.

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::events::{ServerEvent, SystemNotice, SystemNoticeKind};
use crate::registry::Registry;
use crate::share::ShareService;
use crate::store::FileStore;

const ROOM_SWEEP_SECS: u64 = 60;
const FILE_SWEEP_SECS: u64 = 600;
const SHARE_SWEEP_SECS: u64 = 3600;

/// Let the server finish starting before the first sweep.
const STARTUP_DELAY_SECS: u64 = 10;

pub fn spawn_janitor(registry: Arc<Registry>, store: Arc<FileStore>, shares: Arc<ShareService>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(STARTUP_DELAY_SECS)).await;

        let mut room_tick = interval(Duration::from_secs(ROOM_SWEEP_SECS));
        room_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut file_tick = interval(Duration::from_secs(FILE_SWEEP_SECS));
        file_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut share_tick = interval(Duration::from_secs(SHARE_SWEEP_SECS));
        share_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = room_tick.tick() => {
                    let destroyed = sweep_rooms(&registry, &store, &shares);
                    if destroyed > 0 {
                        println!("🧹 Janitor: destroyed {destroyed} idle rooms");
                    }
                }
                _ = file_tick.tick() => {
                    let expired = sweep_files(&registry, &store);
                    if expired > 0 {
                        println!("🧹 Janitor: removed {expired} expired files");
                    }
                }
                _ = share_tick.tick() => {
                    let (removed, trimmed) = shares.sweep();
                    if removed > 0 || trimmed > 0 {
                        println!(
                            "🧹 Janitor: deleted {removed} dead shares, trimmed {trimmed} log entries"
                        );
                    }
                }
            }
        }
    });
}

/// One room-sweep tick. For each idle room: mark destroying, revoke its
/// shares, drop its files, notify whoever is still subscribed, then remove
/// it. Destruction work happens outside the registry map lock.
pub fn sweep_rooms(registry: &Registry, store: &FileStore, shares: &ShareService) -> usize {
    let destroying = registry.begin_destroy_idle();
    let count = destroying.len();

    for room in destroying {
        shares.revoke_room_shares(&room.room_key);
        let deleted = store.delete_room_files(&room.room_key);
        let deleted_files: Vec<String> = deleted
            .iter()
            .map(|f| f.info.original_name.clone())
            .collect();

        let destroyed = ServerEvent::RoomDestroyed {
            room_key: room.room_key.clone(),
            deleted_files: deleted_files.clone(),
        };
        let notice = ServerEvent::SystemMessage(SystemNotice {
            kind: SystemNoticeKind::RoomDestroyed,
            room_key: room.room_key.clone(),
            file_id: None,
            file_name: None,
            deleted_files: Some(deleted_files),
        });
        for queue in &room.subscribers {
            queue.push(destroyed.clone());
            queue.push(notice.clone());
        }

        registry.finish_destroy(&room.room_key);
    }

    count
}

/// One file-GC tick. Expired files are deleted and the owning room (if
/// still alive) is told which ones.
pub fn sweep_files(registry: &Registry, store: &FileStore) -> usize {
    let expired = store.sweep_expired();
    let count = expired.len();

    for stored in expired {
        registry.notify_system(
            &stored.info.room_key,
            SystemNotice {
                kind: SystemNoticeKind::FileExpired,
                room_key: stored.info.room_key.clone(),
                file_id: Some(stored.info.file_id),
                file_name: Some(stored.info.original_name.clone()),
                deleted_files: None,
            },
        );
    }

    count
}
