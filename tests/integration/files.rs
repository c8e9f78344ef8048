use rocket::http::Status;
use uuid::Uuid;

use crate::common::{join_member, test_client, upload};

#[test]
fn test_upload_and_download_roundtrip() {
    let client = test_client();
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    let payload = b"Hello, this is a test file!";
    let res = upload(&client, "beta12", &user.id, "report.pdf", "application/pdf", payload);
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["success"], true);
    let file_id = body["data"]["fileId"].as_str().unwrap().to_string();
    let url = body["data"]["downloadUrl"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/api/files/download/{file_id}"));

    let res = client.get(url).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let disposition = res.headers().get_one("Content-Disposition").unwrap().to_string();
    assert!(disposition.contains("report.pdf"));
    assert_eq!(res.into_bytes().unwrap(), payload);
}

#[test]
fn test_upload_requires_membership() {
    let client = test_client();
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    // Wrong room for this member
    let res = upload(&client, "other77", &user.id, "a.txt", "text/plain", b"x");
    assert_eq!(res.status(), Status::Forbidden);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message"], "user_not_in_room");

    // Unknown user id
    let stranger = Uuid::new_v4();
    let res = upload(&client, "beta12", &stranger, "a.txt", "text/plain", b"x");
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_upload_sanitizes_traversal_names() {
    let client = test_client();
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    let res = upload(
        &client,
        "beta12",
        &user.id,
        "../../etc/passwd",
        "text/plain",
        b"not a password file",
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let file_id = body["data"]["fileId"].as_str().unwrap();

    let res = client.get(format!("/api/files/download/{file_id}")).dispatch();
    let disposition = res.headers().get_one("Content-Disposition").unwrap();
    assert!(disposition.contains("etc_passwd"));
    assert!(!disposition.contains(".."));
}

#[test]
fn test_upload_rejects_denied_extensions() {
    let client = test_client();
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    let res = upload(
        &client,
        "beta12",
        &user.id,
        "setup.exe",
        "application/octet-stream",
        b"MZ",
    );
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message"], "invalid_payload");
}

#[test]
fn test_download_unknown_file_is_404() {
    let client = test_client();
    let res = client
        .get(format!("/api/files/download/{}", Uuid::new_v4()))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message"], "file_not_found");
}

#[test]
fn test_blob_is_stored_under_file_id_not_name() {
    let client = test_client();
    let (user, _, _rx) = join_member(&client, "beta12", "Alice", "fp-a");

    let res = upload(&client, "beta12", &user.id, "CON.txt", "text/plain", b"data");
    let body: serde_json::Value = res.into_json().unwrap();
    let file_id = body["data"]["fileId"].as_str().unwrap().to_string();

    let store = client
        .rocket()
        .state::<std::sync::Arc<clip_relay::store::FileStore>>()
        .unwrap();
    let stored = store.get(Uuid::parse_str(&file_id).unwrap()).unwrap();
    assert_eq!(stored.path.file_name().unwrap().to_str().unwrap(), file_id);
    assert_eq!(stored.info.original_name, "_CON.txt");
    assert!(stored.path.exists());
}
