use std::path::PathBuf;
use std::sync::Arc;

use rocket::http::Header;
use rocket::local::blocking::{Client, LocalResponse};
use uuid::Uuid;

use clip_relay::config::AppConfig;
use clip_relay::events::{OutboundQueue, ServerEvent};
use clip_relay::models::RoomUser;
use clip_relay::rate_limit::RateLimitConfig;
use clip_relay::registry::Registry;

/// Wrapper around Client that deletes the temp upload dir on drop so
/// parallel runs don't accumulate blobs under /tmp.
pub struct TestClient {
    client: Option<Client>,
    upload_dir: PathBuf,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

/// Fast-hash test config with a unique upload dir per test (avoids parallel
/// test contention).
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.upload_dir = std::env::temp_dir().join(format!(
        "clip_relay_test_{}",
        Uuid::new_v4().to_string().split('-').next().unwrap()
    ));
    // bcrypt cost 4 keeps password tests fast; production floors at 12
    config.bcrypt_cost = 4;
    config.user_id_salt = "test-salt".to_string();
    config
}

pub fn test_client() -> TestClient {
    test_client_with(test_config(), RateLimitConfig::default())
}

pub fn test_client_with(config: AppConfig, rate_config: RateLimitConfig) -> TestClient {
    let upload_dir = config.upload_dir.clone();
    let rocket = clip_relay::build_rocket(config, rate_config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        upload_dir,
    }
}

/// Run an async registry/service call from a blocking test.
pub fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    rocket::tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(fut)
}

pub fn registry_of(client: &Client) -> Arc<Registry> {
    client
        .rocket()
        .state::<Arc<Registry>>()
        .expect("registry state")
        .clone()
}

/// Join a room directly through the registry, the way the gateway binds a
/// connection. Returns the member, the connection id, and the connection's
/// outbound receiver for fan-out assertions.
pub fn join_member(
    client: &Client,
    room_key: &str,
    name: &str,
    fingerprint: &str,
) -> (RoomUser, Uuid, tokio::sync::mpsc::Receiver<ServerEvent>) {
    join_member_with_password(client, room_key, name, fingerprint, None).expect("join should succeed")
}

pub fn join_member_with_password(
    client: &Client,
    room_key: &str,
    name: &str,
    fingerprint: &str,
    password: Option<&str>,
) -> Result<(RoomUser, Uuid, tokio::sync::mpsc::Receiver<ServerEvent>), clip_relay::models::ErrorCode>
{
    let registry = registry_of(client);
    let conn_id = Uuid::new_v4();
    let (queue, rx) = OutboundQueue::pair();
    let fingerprint_hash = clip_relay::ids::fingerprint_hash(fingerprint);
    let outcome = block_on(registry.join(
        conn_id,
        queue,
        room_key,
        name,
        clip_relay::models::DeviceKind::Desktop,
        &fingerprint_hash,
        password,
    ))?;
    Ok((outcome.user, conn_id, rx))
}

/// Upload a file over the REST surface with a hand-built multipart body.
pub fn upload<'c>(
    client: &'c Client,
    room_key: &str,
    user_id: &Uuid,
    filename: &str,
    mime: &str,
    bytes: &[u8],
) -> LocalResponse<'c> {
    let boundary = "cliprelayboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    client
        .post("/api/files/upload")
        .header(Header::new(
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .header(Header::new("X-Room-Key", room_key.to_string()))
        .header(Header::new("X-User-Id", user_id.to_string()))
        .body(body)
        .dispatch()
}

pub fn basic_auth_header(password: &str) -> Header<'static> {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{password}"));
    Header::new("Authorization", format!("Basic {encoded}"))
}
