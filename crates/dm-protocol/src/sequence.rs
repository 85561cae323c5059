//! Keyed, time-windowed knock sequence derivation
//!
//! Every (key, period, index, length) tuple maps to one (port, protocol)
//! pair via HMAC-SHA256. The MAC input is the decimal text of
//! `period`, `index`, and `length` concatenated with no separators and
//! encoded UTF-16LE; both sides of the protocol must produce these
//! bytes exactly or the derived sequences will not agree.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::{Knock, Protocol};

type HmacSha256 = Hmac<Sha256>;

/// Compute the time period containing `unix_secs` for a given interval.
pub fn period_at(unix_secs: i64, interval: u32) -> i64 {
    unix_secs.div_euclid(i64::from(interval))
}

/// Normalize a textual key into raw secret bytes.
///
/// Keys that parse as standard base64 decode to the raw secret,
/// letting operators paste a generated high-entropy key; anything else
/// is treated as a passphrase and its UTF-16LE bytes become the
/// secret.
pub fn normalize_key(text: &str) -> Vec<u8> {
    match BASE64.decode(text) {
        Ok(raw) => raw,
        Err(_) => utf16le(text),
    }
}

/// Derive the full knock sequence for one period.
pub fn generate(key: &[u8], period: i64, length: u16) -> Vec<Knock> {
    (0..length).map(|i| derive(key, period, i, length)).collect()
}

/// Derive the knock at one index of a period's sequence.
pub fn derive(key: &[u8], period: i64, index: u16, length: u16) -> Knock {
    // HMAC-SHA256 places no constraint on key length.
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&utf16le(&format!("{}{}{}", period, index, length)));
    let hash = mac.finalize().into_bytes();

    // 2^32 - 1 is divisible by 65535, so the reduction is unbiased.
    let word = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
    let port = (word % 65535) as u16 + 1;
    let protocol = if hash[4] & 1 == 1 {
        Protocol::Udp
    } else {
        Protocol::Tcp
    };
    Knock::new(port, protocol)
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer_passphrase_key() {
        // Independently computed vectors for key "hunter2" (passphrase
        // path), period 12345, length 8.
        let key = normalize_key("hunter2");
        let expected = [
            (15343, Protocol::Udp),
            (63072, Protocol::Tcp),
            (56154, Protocol::Udp),
            (42716, Protocol::Tcp),
            (55760, Protocol::Tcp),
            (14486, Protocol::Udp),
            (50092, Protocol::Udp),
            (55733, Protocol::Tcp),
        ];

        let sequence = generate(&key, 12345, 8);
        assert_eq!(sequence.len(), 8);
        for (knock, (port, protocol)) in sequence.iter().zip(expected) {
            assert_eq!(*knock, Knock::new(port, protocol));
        }
    }

    #[test]
    fn test_known_answer_base64_key() {
        // "c2VjcmV0LWtleQ==" is base64 for "secret-key".
        let key = normalize_key("c2VjcmV0LWtleQ==");
        assert_eq!(key, b"secret-key");

        let expected = [
            (63692, Protocol::Udp),
            (47964, Protocol::Tcp),
            (3587, Protocol::Tcp),
            (4572, Protocol::Udp),
        ];
        let sequence = generate(&key, 1, 4);
        for (knock, (port, protocol)) in sequence.iter().zip(expected) {
            assert_eq!(*knock, Knock::new(port, protocol));
        }
    }

    #[test]
    fn test_passphrase_key_is_utf16le() {
        let key = normalize_key("hunter2");
        assert_eq!(key, hex::decode("680075006e007400650072003200").unwrap());
    }

    #[test]
    fn test_generate_is_deterministic() {
        let key = normalize_key("determinism");
        let a = generate(&key, 42, 16);
        let b = generate(&key, 42, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ports_in_range() {
        let key = normalize_key("range-check");
        for knock in generate(&key, 7, 2048) {
            assert!(knock.port >= 1);
        }
    }

    #[test]
    fn test_protocol_and_port_distribution() {
        // Statistical, not bit-exact: over 4096 draws the TCP/UDP
        // split should be near even and ports should cover the range.
        let key = normalize_key("distribution-check");
        let sequence = generate(&key, 777, 4096);

        let udp = sequence
            .iter()
            .filter(|k| k.protocol == Protocol::Udp)
            .count();
        let fraction = udp as f64 / sequence.len() as f64;
        assert!(
            (0.45..=0.55).contains(&fraction),
            "udp fraction {} outside expected band",
            fraction
        );

        let min = sequence.iter().map(|k| k.port).min().unwrap();
        let max = sequence.iter().map(|k| k.port).max().unwrap();
        assert!(min < 2000, "min port {} suspiciously high", min);
        assert!(max > 63500, "max port {} suspiciously low", max);
    }

    #[test]
    fn test_input_changes_change_output() {
        // Changing any one input should change the derived pair in all
        // but a vanishing number of cases.
        let key = normalize_key("avalanche");
        let other_key = normalize_key("avalanchf");
        let trials = 2000u16;

        let mut same_key = 0;
        let mut same_period = 0;
        let mut same_index = 0;
        let mut same_length = 0;
        for i in 0..trials {
            let base = derive(&key, 900, i, trials);
            if base == derive(&other_key, 900, i, trials) {
                same_key += 1;
            }
            if base == derive(&key, 901, i, trials) {
                same_period += 1;
            }
            if base == derive(&key, 900, i + 1, trials) {
                same_index += 1;
            }
            if base == derive(&key, 900, i, trials + 1) {
                same_length += 1;
            }
        }

        assert!(same_key < 3, "key change collided {} times", same_key);
        assert!(same_period < 3, "period change collided {} times", same_period);
        assert!(same_index < 3, "index change collided {} times", same_index);
        assert!(same_length < 3, "length change collided {} times", same_length);
    }

    #[test]
    fn test_period_at() {
        assert_eq!(period_at(0, 86400), 0);
        assert_eq!(period_at(86399, 86400), 0);
        assert_eq!(period_at(86400, 86400), 1);
        assert_eq!(period_at(1_700_000_000, 30), 56_666_666);
    }
}
