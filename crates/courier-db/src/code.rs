use rand::Rng;

/// Upper-case letters and digits without the look-alikes `0 O 1 I`.
pub const DELIVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const DELIVERY_CODE_LEN: usize = 10;

/// Fresh one-time delivery code drawn from the thread-local CSPRNG.
pub fn generate_delivery_code() -> String {
    let mut rng = rand::rng();
    (0..DELIVERY_CODE_LEN)
        .map(|_| DELIVERY_CODE_ALPHABET[rng.random_range(0..DELIVERY_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form used for comparison: surrounding whitespace dropped, upper-cased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}
