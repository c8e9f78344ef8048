use rocket::http::Status;

use crate::common::test_client;

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["service"], "clip-relay");
}

#[test]
fn test_stats_counts_services() {
    let client = test_client();
    let (user, _, _rx) = crate::common::join_member(&client, "stats77", "Alice", "fp-a");
    let res = crate::common::upload(&client, "stats77", &user.id, "s.txt", "text/plain", b"1234");
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/stats").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["rooms"], 1);
    assert_eq!(body["data"]["files"], 1);
    assert_eq!(body["data"]["fileBytes"], 4);
    assert_eq!(body["data"]["shares"], 0);
}

#[test]
fn test_unknown_route_envelope() {
    let client = test_client();
    let res = client.get("/api/nope").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["success"], false);
}
