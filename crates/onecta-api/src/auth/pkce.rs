// Proof-key-for-code-exchange material and the login fingerprint blob.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{Rng, RngCore};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A verifier and its S256 challenge. Generated fresh per login attempt.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))`, no padding.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random opaque `state` value for authorization requests.
pub fn random_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Browser-fingerprint blob the identity provider expects as `riskContext`
/// on the login call. The values only need to be plausible.
pub fn fingerprint() -> String {
    let mut rng = rand::thread_rng();
    let now = chrono::Local::now();
    json!({
        "b0": rng.gen_range(10_000..99_999),
        "b1": [0, 2, 3, 1],
        "b2": 4,
        "b3": ["-23.4", "-23.4"],
        "b4": 3,
        "b5": 1,
        "b6": concat!("onecta-rs/", env!("CARGO_PKG_VERSION")),
        "b7": [],
        "b8": now.format("%H:%M:%S").to_string(),
        "b9": now.offset().local_minus_utc() / -60,
        "b10": null,
        "b11": false,
        "b12": { "charging": true, "chargingTime": null, "level": 1, "dischargingTime": null },
        "b13": [5, "360|640|24", false, true],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_has_pkce_shape() {
        let pair = PkcePair::generate();
        // 32 bytes -> 43 base64url chars, inside RFC 7636's 43..=128 range.
        assert_eq!(pair.verifier.len(), 43);
        assert!(
            pair.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(!pair.challenge.contains('='));
        assert_eq!(pair.challenge, challenge_for(&pair.verifier));
    }

    #[test]
    fn pairs_are_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn challenge_is_sha256_sized() {
        // SHA-256 is 32 bytes -> 43 unpadded base64url chars.
        assert_eq!(challenge_for("anything").len(), 43);
        assert_ne!(challenge_for("a"), challenge_for("b"));
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::generate();
        assert!(!format!("{pair:?}").contains(&pair.verifier));
    }

    #[test]
    fn state_is_hex_uuid() {
        let state = random_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_json_object() {
        let blob: serde_json::Value = serde_json::from_str(&fingerprint()).unwrap_or_default();
        assert!(blob.is_object());
        assert!(blob.get("b0").is_some());
    }
}
