//! Identifier and secret generation: deterministic user ids, share ids,
//! generated passwords.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Characters used for generated passwords. Excludes the ambiguous
/// `I l O 0 1`.
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

const BASE62_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Share ids are the leading chars of a base62-encoded fresh UUID.
pub const SHARE_ID_LEN: usize = 10;

/// Derive the stable user id for a fingerprint inside a room. The id is the
/// first 16 bytes of `HMAC-SHA256(salt, fingerprint ":" room_key)`, so it is
/// deterministic per (fingerprint, room, salt) and unlinkable across rooms.
pub fn derive_user_id(salt: &str, fingerprint_hash: &str, room_key: &str) -> Uuid {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts any key length");
    mac.update(fingerprint_hash.as_bytes());
    mac.update(b":");
    mac.update(room_key.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Hex-encode a raw client fingerprint the way clients do, for callers that
/// receive the unhashed form.
pub fn fingerprint_hash(raw: &str) -> String {
    use sha2::Digest;
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Generate a random password from the unambiguous alphabet.
pub fn generate_password(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// New share id: base62 of a fresh UUID, truncated to `SHARE_ID_LEN`.
pub fn generate_share_id() -> String {
    let id = Uuid::new_v4().as_u128();
    base62(id).chars().take(SHARE_ID_LEN).collect()
}

fn base62(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(BASE62_ALPHABET[(value % 62) as usize]);
        value /= 62;
    }
    out.reverse();
    String::from_utf8(out).expect("alphabet is ASCII")
}
