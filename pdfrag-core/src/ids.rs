//! Short random identifiers and timestamps.

use rand::Rng;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 8;

/// Generate `"{prefix}_"` followed by 8 random lowercase letters or digits.
pub fn rid(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{suffix}")
}

/// Current Unix time in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_shape() {
        let id = rid("f");
        assert!(id.starts_with("f_"));
        let suffix = &id[2..];
        assert_eq!(suffix.len(), 8);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_rid_unique_enough() {
        let a = rid("req");
        let b = rid("req");
        assert_ne!(a, b);
    }

    #[test]
    fn test_now_ts_positive() {
        assert!(now_ts() > 1_600_000_000);
    }
}
