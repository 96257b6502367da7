/// Numeric id to short code encoding.
///
/// Row ids are turned into short textual codes through an injective,
/// length-padded encoding over a shuffled 62-symbol alphabet. Sequential ids
/// therefore do not produce visibly sequential codes, though codes remain
/// enumerable in principle; the redirect path is rate limited and gated by
/// the membership filter.
use crate::error::{ApiError, ApiResult};
use lazy_static::lazy_static;
use sqids::Sqids;

const ALPHABET: &str = "k3G7QAe51FCsiWrNOYBUwM6XzZvdLT4j9JhyHKg2cVbxfERq0mSoI8lDpunPat";
const MIN_LENGTH: u8 = 3;

lazy_static! {
    static ref ENCODER: Sqids = Sqids::builder()
        .alphabet(ALPHABET.chars().collect())
        .min_length(MIN_LENGTH)
        .build()
        .expect("static sqids configuration is valid");
}

/// Encode a row id into its short code.
pub fn encode(id: u64) -> ApiResult<String> {
    ENCODER
        .encode(&[id])
        .map_err(|e| ApiError::Internal(format!("code generation failed: {}", e)))
}

/// Decode a short code back into the row id it was generated from.
/// Returns None for codes not produced by `encode`.
pub fn decode(code: &str) -> Option<u64> {
    let numbers = ENCODER.decode(code);
    match numbers.as_slice() {
        [id] => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_minimum_length() {
        for id in [0u64, 1, 61, 62, 4096] {
            assert!(encode(id).unwrap().len() >= MIN_LENGTH as usize, "id {}", id);
        }
    }

    #[test]
    fn test_alphabet_only() {
        for id in 0..200u64 {
            let code = encode(id).unwrap();
            assert!(code.chars().all(|c| ALPHABET.contains(c)), "code {}", code);
        }
    }

    #[test]
    fn test_injective() {
        let mut seen = HashSet::new();
        for id in 0..5000u64 {
            assert!(seen.insert(encode(id).unwrap()), "collision at id {}", id);
        }
    }

    #[test]
    fn test_roundtrip() {
        for id in [0u64, 1, 7, 999, 1_000_000, u32::MAX as u64] {
            let code = encode(id).unwrap();
            assert_eq!(decode(&code), Some(id));
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(encode(42).unwrap(), encode(42).unwrap());
    }
}
