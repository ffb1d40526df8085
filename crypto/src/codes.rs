//! Human-readable certificate codes.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Crockford base32 alphabet: no I, L, O or U to avoid misreading.
const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of the random suffix. 32^10 values per prefix and day.
const SUFFIX_LEN: usize = 10;

/// Generate a code such as `CERT-20261016-7K3QZ9M2XA`.
pub fn certificate_code(prefix: &str, issued_at: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{}-{}-{}", prefix, issued_at.format("%Y%m%d"), suffix)
}

/// Check that `code` has the shape produced by [`certificate_code`].
pub fn is_certificate_code(code: &str) -> bool {
    let mut parts = code.rsplitn(3, '-');
    let (Some(suffix), Some(date), Some(prefix)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    !prefix.is_empty()
        && date.len() == 8
        && date.chars().all(|c| c.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| ALPHABET.contains(&b))
}
