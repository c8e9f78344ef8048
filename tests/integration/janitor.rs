use chrono::{Duration, Utc};
use rocket::http::{Header, Status};
use uuid::Uuid;

use clip_relay::events::ServerEvent;
use clip_relay::models::ShareStatus;

use crate::common::{join_member, registry_of, test_client, upload};

fn services(
    client: &rocket::local::blocking::Client,
) -> (
    std::sync::Arc<clip_relay::store::FileStore>,
    std::sync::Arc<clip_relay::share::ShareService>,
) {
    (
        client
            .rocket()
            .state::<std::sync::Arc<clip_relay::store::FileStore>>()
            .unwrap()
            .clone(),
        client
            .rocket()
            .state::<std::sync::Arc<clip_relay::share::ShareService>>()
            .unwrap()
            .clone(),
    )
}

#[test]
fn test_idle_room_destruction_cascades() {
    let client = test_client();
    let registry = registry_of(&client);
    let (store, shares) = services(&client);

    let (user, conn, _rx) = join_member(&client, "delta1", "Alice", "fp-a");

    // One file and one share owned by the room
    let res = upload(&client, "delta1", &user.id, "doomed.txt", "text/plain", b"bytes");
    let body: serde_json::Value = res.into_json().unwrap();
    let file_id = Uuid::parse_str(body["data"]["fileId"].as_str().unwrap()).unwrap();

    let res = client
        .post("/api/share")
        .header(rocket::http::ContentType::JSON)
        .header(Header::new("X-User-Id", user.id.to_string()))
        .body(format!(r#"{{"fileId": "{file_id}"}}"#))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let share_id = body["data"]["shareId"].as_str().unwrap().to_string();

    // Member leaves; the room sits idle past the 24 h window
    registry.leave("delta1", user.id, Some(conn));
    registry.backdate_activity("delta1", Utc::now() - Duration::hours(24) - Duration::seconds(1));

    let destroyed = clip_relay::janitor::sweep_rooms(&registry, &store, &shares);
    assert_eq!(destroyed, 1);

    assert!(!registry.room_exists("delta1"));
    assert!(store.get(file_id).is_none(), "owned files dropped in cascade");
    assert_eq!(
        shares.get(&share_id).unwrap().status(),
        ShareStatus::Revoked,
        "owned shares revoked in cascade"
    );

    // Gone means the key can be used again
    let (fresh, _, _rx) = join_member(&client, "delta1", "Bob", "fp-b");
    assert_eq!(fresh.name, "Bob");
}

#[test]
fn test_pinned_room_survives_idleness() {
    let client = test_client();
    let registry = registry_of(&client);
    let (store, shares) = services(&client);

    let (user, conn, _rx) = join_member(&client, "pinme99", "Alice", "fp-a");
    registry.pin_room("pinme99", user.id, true).unwrap();
    registry.leave("pinme99", user.id, Some(conn));
    registry.backdate_activity("pinme99", Utc::now() - Duration::hours(48));

    let destroyed = clip_relay::janitor::sweep_rooms(&registry, &store, &shares);
    assert_eq!(destroyed, 0);
    assert!(registry.room_exists("pinme99"));
}

#[test]
fn test_room_with_members_survives_idleness() {
    let client = test_client();
    let registry = registry_of(&client);
    let (store, shares) = services(&client);

    let (_user, _conn, _rx) = join_member(&client, "alive55", "Alice", "fp-a");
    registry.backdate_activity("alive55", Utc::now() - Duration::hours(48));

    let destroyed = clip_relay::janitor::sweep_rooms(&registry, &store, &shares);
    assert_eq!(destroyed, 0);
    assert!(registry.room_exists("alive55"));
}

#[test]
fn test_file_expiry_notifies_room() {
    let client = test_client();
    let registry = registry_of(&client);
    let (store, _shares) = services(&client);

    let (user, _conn, mut rx) = join_member(&client, "beta12", "Alice", "fp-a");
    let res = upload(&client, "beta12", &user.id, "old.txt", "text/plain", b"stale");
    let body: serde_json::Value = res.into_json().unwrap();
    let file_id = Uuid::parse_str(body["data"]["fileId"].as_str().unwrap()).unwrap();

    store.backdate_created(file_id, Utc::now() - Duration::hours(13));
    let expired = clip_relay::janitor::sweep_files(&registry, &store);
    assert_eq!(expired, 1);
    assert!(store.get(file_id).is_none());

    let notice = loop {
        match rx.try_recv().expect("systemMessage should have been fanned out") {
            ServerEvent::SystemMessage(notice) => break notice,
            _ => continue,
        }
    };
    assert_eq!(notice.kind, clip_relay::events::SystemNoticeKind::FileExpired);
    assert_eq!(notice.file_id, Some(file_id));
    assert_eq!(notice.file_name.as_deref(), Some("old.txt"));
}

#[test]
fn test_destroyed_room_notifies_subscribers() {
    let client = test_client();
    let registry = registry_of(&client);
    let (store, shares) = services(&client);

    // Simulate a connection that is still subscribed while its member record
    // is gone (grace period raced the sweep)
    let (user, conn, mut rx) = join_member(&client, "race77", "Alice", "fp-a");
    let res = upload(&client, "race77", &user.id, "f.txt", "text/plain", b"x");
    assert_eq!(res.status(), Status::Ok);

    registry.leave("race77", user.id, None);
    registry.backdate_activity("race77", Utc::now() - Duration::hours(25));

    let destroyed = clip_relay::janitor::sweep_rooms(&registry, &store, &shares);
    assert_eq!(destroyed, 1);

    // Drain: userLeft from the leave, then roomDestroyed with the file list
    let mut saw_room_destroyed = false;
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::RoomDestroyed { room_key, deleted_files } = event {
            assert_eq!(room_key, "race77");
            assert_eq!(deleted_files, vec!["f.txt".to_string()]);
            saw_room_destroyed = true;
        }
    }
    assert!(saw_room_destroyed);
    let _ = conn;
}
