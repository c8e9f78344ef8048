use rocket::http::{ContentType, Header, Status};

use clip_relay::rate_limit::RateLimitConfig;

use crate::common::{join_member, test_client_with, test_config, upload};

#[test]
fn test_upload_quota_is_strict() {
    let mut rate_config = RateLimitConfig::default();
    rate_config.http_upload_max = 3;
    let client = test_client_with(test_config(), rate_config);
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    for i in 0..3 {
        let res = upload(&client, "beta12", &user.id, "f.txt", "text/plain", b"x");
        assert_eq!(res.status(), Status::Ok, "upload {i} should pass");
    }

    let res = upload(&client, "beta12", &user.id, "f.txt", "text/plain", b"x");
    assert_eq!(res.status(), Status::TooManyRequests);
    assert!(res.headers().get_one("Retry-After").is_some());
    assert_eq!(res.headers().get_one("X-RateLimit-Remaining"), Some("0"));
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message"], "rate_limited");
}

#[test]
fn test_quota_counts_attempts_not_successes() {
    let mut rate_config = RateLimitConfig::default();
    rate_config.http_room_action_max = 2;
    let client = test_client_with(test_config(), rate_config);

    // Two invalid requests burn the whole window
    for _ in 0..2 {
        let res = client
            .post("/api/rooms/validate-user")
            .header(ContentType::JSON)
            .body(r#"{"roomKey": "nope11", "userFingerprint": ""}"#)
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest);
    }

    let res = client
        .post("/api/rooms/validate-user")
        .header(ContentType::JSON)
        .body(r#"{"roomKey": "nope11", "userFingerprint": "fp"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
}

#[test]
fn test_clients_are_limited_independently() {
    let mut rate_config = RateLimitConfig::default();
    rate_config.http_room_action_max = 1;
    let client = test_client_with(test_config(), rate_config);

    let req = |ip: &str| {
        client
            .post("/api/rooms/validate-user")
            .header(ContentType::JSON)
            .header(Header::new("X-Forwarded-For", ip.to_string()))
            .body(r#"{"roomKey": "room55", "userFingerprint": "fp"}"#)
            .dispatch()
    };

    assert_eq!(req("10.0.0.1").status(), Status::Ok);
    assert_eq!(req("10.0.0.1").status(), Status::TooManyRequests);
    assert_eq!(req("10.0.0.2").status(), Status::Ok);
}
