//! Safety numbers
//!
//! Deterministic, order-independent fingerprints of two identity keys that
//! users compare out of band. The same pair of keys always produces the same
//! digits, hex fingerprint and QR code regardless of which side computes it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::kdf::constant_time_eq;

/// Domain label hashed ahead of the sorted keys
pub const SAFETY_NUMBER_LABEL: &[u8] = b"ailydian-safety-v1";

/// Number of five-digit groups in the numeric form
pub const SAFETY_NUMBER_GROUPS: usize = 12;

/// Scheme used in QR payloads unless configured otherwise
pub const DEFAULT_QR_SCHEME: &str = "ailydian";

const EMOJI_LABEL: &[u8] = b"ailydian-emoji-v1";
const EMOJI_COUNT: usize = 8;
const EMOJI_TABLE: [&str; 64] = [
    "🐶", "🐱", "🐭", "🐹", "🐰", "🦊", "🐻", "🐼", "🐨", "🐯", "🦁", "🐮", "🐷", "🐸", "🐵", "🐔",
    "🐧", "🐦", "🦆", "🦅", "🦉", "🐺", "🐗", "🐴", "🦄", "🐝", "🐛", "🦋", "🐌", "🐞", "🐢", "🐍",
    "🐙", "🦑", "🦀", "🐡", "🐠", "🐬", "🐳", "🦈", "🐊", "🐘", "🦒", "🦓", "🐪", "🦘", "🌵", "🌲",
    "🌻", "🍄", "🌙", "⭐", "🔥", "🌈", "🍎", "🍋", "🍇", "🍉", "🍒", "🥕", "🌽", "🍞", "🎈", "🔔",
];

/// A computed safety number
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyNumber {
    fingerprint: String,
    numeric: String,
    qr_payload: String,
}

impl SafetyNumber {
    /// Hex-encoded SHA-256 fingerprint
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Sixty decimal digits
    pub fn numeric(&self) -> &str {
        &self.numeric
    }

    /// `scheme://verify/<fingerprint>/<localId>/<remoteId>`
    pub fn qr_payload(&self) -> &str {
        &self.qr_payload
    }

    /// Numeric form grouped for display
    pub fn display(&self) -> String {
        format_safety_number(&self.numeric)
    }
}

/// Compute the safety number for a pair of identity keys
pub fn generate_safety_number(
    local_key: &[u8],
    remote_key: &[u8],
    local_id: &str,
    remote_id: &str,
) -> SafetyNumber {
    generate_safety_number_with_scheme(local_key, remote_key, local_id, remote_id, DEFAULT_QR_SCHEME)
}

/// Compute the safety number with a custom QR scheme
pub fn generate_safety_number_with_scheme(
    local_key: &[u8],
    remote_key: &[u8],
    local_id: &str,
    remote_id: &str,
    scheme: &str,
) -> SafetyNumber {
    let mut parties = [
        (hex::encode(local_key), local_id, local_key),
        (hex::encode(remote_key), remote_id, remote_key),
    ];
    parties.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

    let mut hasher = Sha256::new();
    hasher.update(SAFETY_NUMBER_LABEL);
    for (_, id, key) in &parties {
        hasher.update(id.as_bytes());
        hasher.update(key);
    }
    let digest = hasher.finalize();

    let numeric = (0..SAFETY_NUMBER_GROUPS)
        .map(|i| {
            let chunk = (u32::from(digest[2 * i]) << 8) | u32::from(digest[2 * i + 1]);
            format!("{:05}", chunk % 100_000)
        })
        .collect::<String>();

    let fingerprint = hex::encode(digest);
    let qr_payload = format!("{}://verify/{}/{}/{}", scheme, fingerprint, local_id, remote_id);

    SafetyNumber {
        fingerprint,
        numeric,
        qr_payload,
    }
}

/// Compare two safety numbers in constant time
pub fn verify_safety_number(a: &SafetyNumber, b: &SafetyNumber) -> bool {
    constant_time_eq(a.fingerprint.as_bytes(), b.fingerprint.as_bytes())
}

/// Group digits in fives, four groups per line
pub fn format_safety_number(numeric: &str) -> String {
    let groups: Vec<&str> = numeric
        .as_bytes()
        .chunks(5)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();

    groups
        .chunks(4)
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short emoji rendering of a single identity key
pub fn emoji_fingerprint(identity_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(EMOJI_LABEL);
    hasher.update(identity_key);
    let digest = hasher.finalize();

    digest[..EMOJI_COUNT]
        .iter()
        .map(|b| EMOJI_TABLE[usize::from(*b) % EMOJI_TABLE.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 64] = [0x11; 64];
    const KEY_B: [u8; 64] = [0xEE; 64];

    #[test]
    fn test_commutative() {
        let a = generate_safety_number(&KEY_A, &KEY_B, "alice", "bob");
        let b = generate_safety_number(&KEY_B, &KEY_A, "bob", "alice");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.numeric(), b.numeric());
        assert!(verify_safety_number(&a, &b));
    }

    #[test]
    fn test_layout() {
        let n = generate_safety_number(&KEY_A, &KEY_B, "alice", "bob");

        assert_eq!(n.fingerprint().len(), 64);
        assert_eq!(n.numeric().len(), 60);
        assert!(n.numeric().chars().all(|c| c.is_ascii_digit()));
        assert_eq!(
            n.qr_payload(),
            format!("ailydian://verify/{}/alice/bob", n.fingerprint())
        );
    }

    #[test]
    fn test_matches_manual_digest() {
        let n = generate_safety_number(&KEY_B, &KEY_A, "bob", "alice");

        // 0x11.. sorts before 0xee..
        let mut hasher = Sha256::new();
        hasher.update(b"ailydian-safety-v1");
        hasher.update(b"alice");
        hasher.update(KEY_A);
        hasher.update(b"bob");
        hasher.update(KEY_B);
        let digest = hasher.finalize();

        assert_eq!(n.fingerprint(), hex::encode(digest));
        let first = (u32::from(digest[0]) << 8 | u32::from(digest[1])) % 100_000;
        assert_eq!(&n.numeric()[..5], format!("{:05}", first));
    }

    #[test]
    fn test_different_keys_differ() {
        let a = generate_safety_number(&KEY_A, &KEY_B, "alice", "bob");
        let c = generate_safety_number(&KEY_A, &[0x12; 64], "alice", "bob");
        assert!(!verify_safety_number(&a, &c));
    }

    #[test]
    fn test_custom_scheme() {
        let n = generate_safety_number_with_scheme(&KEY_A, &KEY_B, "a", "b", "chat");
        assert!(n.qr_payload().starts_with("chat://verify/"));
    }

    #[test]
    fn test_format_groups() {
        let digits: String = (0..60).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
        let formatted = format_safety_number(&digits);

        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "01234 56789 01234 56789");
    }

    #[test]
    fn test_emoji_fingerprint_stable() {
        let a = emoji_fingerprint(&KEY_A);
        assert_eq!(a, emoji_fingerprint(&KEY_A));
        assert_ne!(a, emoji_fingerprint(&KEY_B));
        assert_eq!(a.split(' ').count(), EMOJI_COUNT);
    }
}
