use rocket::http::{ContentType, Header, Status};
use uuid::Uuid;

use clip_relay::events::ServerEvent;
use clip_relay::models::ErrorCode;
use clip_relay::registry::{MESSAGE_RING_CAPACITY, MessageBody, PasswordChange};

use crate::common::{block_on, join_member, join_member_with_password, registry_of, test_client};

// --- Join & broadcast ---

#[test]
fn test_join_and_broadcast() {
    let client = test_client();
    let registry = registry_of(&client);

    let (alice, _, mut alice_rx) = join_member(&client, "test01", "Alice", "fp-a");
    let (bob, _, mut bob_rx) = join_member(&client, "test01", "Bob", "fp-b");

    // Alice hears about Bob joining
    match alice_rx.try_recv().expect("userJoined for Alice") {
        ServerEvent::UserJoined { user } => assert_eq!(user.id, bob.id),
        other => panic!("unexpected event: {other:?}"),
    }

    let message = block_on(registry.post_message(
        "test01",
        alice.id,
        MessageBody::Text("hi".into()),
        None,
    ))
    .unwrap();
    assert_eq!(message.content.as_deref(), Some("hi"));

    // Both members observe the message, sender included
    match bob_rx.try_recv().expect("message for Bob") {
        ServerEvent::Message(m) => {
            assert_eq!(m.content.as_deref(), Some("hi"));
            assert_eq!(m.sender.id, alice.id);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match alice_rx.try_recv().expect("message for Alice") {
        ServerEvent::Message(m) => assert_eq!(m.content.as_deref(), Some("hi")),
        other => panic!("unexpected event: {other:?}"),
    }

    let users = registry.list_users("test01").unwrap();
    assert_eq!(users.len(), 2);
}

#[test]
fn test_members_see_messages_in_post_order() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, _, _arx) = join_member(&client, "order12", "Alice", "fp-a");
    let (bob, _, mut bob_rx) = join_member(&client, "order12", "Bob", "fp-b");

    for i in 0..10 {
        let sender = if i % 2 == 0 { alice.id } else { bob.id };
        block_on(registry.post_message(
            "order12",
            sender,
            MessageBody::Text(format!("m{i}")),
            None,
        ))
        .unwrap();
    }

    let mut seen = Vec::new();
    while let Ok(event) = bob_rx.try_recv() {
        if let ServerEvent::Message(m) = event {
            seen.push(m.content.unwrap());
        }
    }
    let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_rejoin_does_not_duplicate_member() {
    let client = test_client();
    let registry = registry_of(&client);

    let (first, _, _rx1) = join_member(&client, "room123", "Alice", "fp-a");
    let (second, _, _rx2) = join_member(&client, "room123", "Alice's laptop", "fp-a");

    assert_eq!(first.id, second.id, "same fingerprint, same room, same id");
    assert_eq!(registry.list_users("room123").unwrap().len(), 1);
}

#[test]
fn test_deterministic_user_ids_across_rooms() {
    let client = test_client();
    let (in_a, _, _rx_a) = join_member(&client, "room123", "Alice", "fp-a");
    let (in_b, _, _rx_b) = join_member(&client, "other42", "Alice", "fp-a");
    assert_ne!(in_a.id, in_b.id, "ids must not link users across rooms");
}

// --- Message ring ---

#[test]
fn test_ring_eviction_keeps_last_100() {
    let client = test_client();
    let registry = registry_of(&client);
    let (user, _, _rx) = join_member(&client, "gamma1", "Solo", "fp-s");

    for i in 0..=100 {
        block_on(registry.post_message(
            "gamma1",
            user.id,
            MessageBody::Text(format!("m{i}")),
            None,
        ))
        .unwrap();
    }

    let messages = registry.recent_messages("gamma1", 200).unwrap();
    assert_eq!(messages.len(), MESSAGE_RING_CAPACITY);
    assert_eq!(messages.first().unwrap().content.as_deref(), Some("m1"));
    assert_eq!(messages.last().unwrap().content.as_deref(), Some("m100"));
}

#[test]
fn test_post_message_requires_membership() {
    let client = test_client();
    let registry = registry_of(&client);
    let (_user, _, _rx) = join_member(&client, "locked1", "Alice", "fp-a");

    let err = block_on(registry.post_message(
        "locked1",
        Uuid::new_v4(),
        MessageBody::Text("intruder".into()),
        None,
    ))
    .unwrap_err();
    assert_eq!(err, ErrorCode::UserNotInRoom);

    let err = block_on(registry.post_message(
        "ghost99",
        Uuid::new_v4(),
        MessageBody::Text("nowhere".into()),
        None,
    ))
    .unwrap_err();
    assert_eq!(err, ErrorCode::RoomNotFound);
}

// --- Recall ---

#[test]
fn test_recall_is_sender_only() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, _, _arx) = join_member(&client, "delta99", "Alice", "fp-a");
    let (bob, _, mut bob_rx) = join_member(&client, "delta99", "Bob", "fp-b");

    let message = block_on(registry.post_message(
        "delta99",
        alice.id,
        MessageBody::Text("oops".into()),
        None,
    ))
    .unwrap();

    assert_eq!(
        registry.recall_message("delta99", bob.id, message.id).unwrap_err(),
        ErrorCode::NotYourMessage
    );
    registry.recall_message("delta99", alice.id, message.id).unwrap();
    assert_eq!(
        registry.recall_message("delta99", alice.id, message.id).unwrap_err(),
        ErrorCode::MessageNotFound
    );
    assert!(registry.recent_messages("delta99", 10).unwrap().is_empty());

    // Bob saw the message and then the recall
    let mut saw_recall = false;
    while let Ok(event) = bob_rx.try_recv() {
        if let ServerEvent::MessageRecalled { message_id } = event {
            assert_eq!(message_id, message.id);
            saw_recall = true;
        }
    }
    assert!(saw_recall);
}

// --- Password lifecycle ---

#[test]
fn test_password_lifecycle() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, _, _arx) = join_member(&client, "alpha1", "Alice", "fp-a");

    // Empty string means auto-generate
    let outcome = block_on(registry.set_password(
        "alpha1",
        alice.id,
        None,
        PasswordChange::from_wire(Some(String::new())),
    ))
    .unwrap();
    assert!(outcome.has_password);
    let generated = outcome.plaintext.expect("plaintext returned to actor");
    assert_eq!(generated.len(), 6);
    assert!(!generated.contains(['I', 'l', 'O', '0', '1']));

    // Unauthenticated join now fails with password_required
    let err = join_member_with_password(&client, "alpha1", "Carol", "fp-c", None).unwrap_err();
    assert_eq!(err, ErrorCode::PasswordRequired);

    let err =
        join_member_with_password(&client, "alpha1", "Carol", "fp-c", Some("notit1")).unwrap_err();
    assert_eq!(err, ErrorCode::InvalidPassword);

    join_member_with_password(&client, "alpha1", "Carol", "fp-c", Some(&generated))
        .expect("correct password joins");

    // Null means remove
    let outcome = block_on(registry.set_password(
        "alpha1",
        alice.id,
        None,
        PasswordChange::from_wire(None),
    ))
    .unwrap();
    assert!(!outcome.has_password);
    assert!(outcome.plaintext.is_none());

    join_member_with_password(&client, "alpha1", "Dave", "fp-d", None)
        .expect("password removed, open join again");
}

#[test]
fn test_only_members_may_set_password() {
    let client = test_client();
    let registry = registry_of(&client);
    let (_alice, _, _rx) = join_member(&client, "alpha2", "Alice", "fp-a");

    let err = block_on(registry.set_password(
        "alpha2",
        Uuid::new_v4(),
        None,
        PasswordChange::Set("hunter2".into()),
    ))
    .unwrap_err();
    assert_eq!(err, ErrorCode::UserNotInRoom);
}

#[test]
fn test_room_link_embeds_password() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    let url = registry.share_room_link("beta12", alice.id).unwrap();
    assert!(url.contains("room=beta12"));
    assert!(!url.contains("password="));

    let outcome = block_on(registry.set_password(
        "beta12",
        alice.id,
        None,
        PasswordChange::Set("Kp3Rt9".into()),
    ))
    .unwrap();
    assert!(outcome.has_password);

    let url = registry.share_room_link("beta12", alice.id).unwrap();
    assert!(url.contains("password=Kp3Rt9"));

    let stranger = Uuid::new_v4();
    assert_eq!(
        registry.share_room_link("beta12", stranger).unwrap_err(),
        ErrorCode::UserNotInRoom
    );
}

// --- Leave semantics ---

#[test]
fn test_double_leave_is_noop() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, conn, _rx) = join_member(&client, "kappa7", "Alice", "fp-a");

    assert!(registry.leave("kappa7", alice.id, Some(conn)));
    assert!(!registry.leave("kappa7", alice.id, Some(conn)), "second leave is a no-op");
}

#[test]
fn test_offline_then_rebind_survives_grace() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, conn, _rx) = join_member(&client, "sigma3", "Alice", "fp-a");

    assert!(registry.mark_offline("sigma3", alice.id, conn));
    let users = registry.list_users("sigma3").unwrap();
    assert!(!users[0].online, "offline immediately on disconnect");

    // Rebind before the grace deadline
    let (rebound, _, _rx2) = join_member(&client, "sigma3", "Alice", "fp-a");
    assert_eq!(rebound.id, alice.id);

    assert!(
        !registry.leave_if_disconnected("sigma3", alice.id),
        "rebound member must not be removed"
    );
    assert!(registry.list_users("sigma3").unwrap()[0].online);
}

#[test]
fn test_grace_expiry_removes_member() {
    let client = test_client();
    let registry = registry_of(&client);
    let (alice, conn, _rx) = join_member(&client, "sigma4", "Alice", "fp-a");

    assert!(registry.mark_offline("sigma4", alice.id, conn));
    assert!(registry.leave_if_disconnected("sigma4", alice.id));
    assert!(registry.list_users("sigma4").unwrap().is_empty());
}

// --- REST surface ---

#[test]
fn test_validate_user_endpoint() {
    let client = test_client();
    let (_, _, _rx) = join_member(&client, "theta55", "Alice", "fp-a");

    let res = client
        .post("/api/rooms/validate-user")
        .header(ContentType::JSON)
        .body(r#"{"roomKey": "theta55", "userFingerprint": "fp-a"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["roomExists"], true);
    assert_eq!(body["data"]["userExists"], true);

    let res = client
        .post("/api/rooms/validate-user")
        .header(ContentType::JSON)
        .body(r#"{"roomKey": "theta55", "userFingerprint": "fp-z"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["roomExists"], true);
    assert_eq!(body["data"]["userExists"], false);

    let res = client
        .post("/api/rooms/validate-user")
        .header(ContentType::JSON)
        .body(r#"{"roomKey": "ghost99", "userFingerprint": "fp-a"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["roomExists"], false);
    assert_eq!(body["data"]["userExists"], false);
}

#[test]
fn test_recent_messages_endpoint() {
    let client = test_client();
    let registry = registry_of(&client);
    let (user, _, _rx) = join_member(&client, "omega88", "Alice", "fp-a");
    for i in 0..5 {
        block_on(registry.post_message(
            "omega88",
            user.id,
            MessageBody::Text(format!("m{i}")),
            None,
        ))
        .unwrap();
    }

    let res = client
        .get("/api/rooms/messages?limit=3")
        .header(Header::new("X-Room-Key", "omega88"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["content"], "m2");
    assert_eq!(messages[2]["content"], "m4");

    // Missing header is a payload error
    let res = client.get("/api/rooms/messages").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
