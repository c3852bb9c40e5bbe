//! Tag identifier generation

use rand::Rng;

/// Characters a key may contain
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of every generated key
pub const KEY_LEN: usize = 8;

/// Random 8-character key over `A-Z0-9`
///
/// Uniqueness is not checked here; the create-tag handler re-checks against
/// the record store.
pub fn generate_key() -> String {
    generate_key_with(&mut rand::thread_rng())
}

pub fn generate_key_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..KEY_LEN)
        .map(|_| char::from(KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())]))
        .collect()
}
