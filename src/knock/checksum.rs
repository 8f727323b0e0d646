//! Modular byte checksums and checksum-targeted URI synthesis.
//!
//! The knock request encodes the peer role into its URI path: the relay
//! recovers the role by summing the path bytes modulo [`CHECKSUM_BASE`].
//! URIs are synthesised at random so repeated knocks do not look alike.

use rand::Rng;

use crate::knock::{CHECKSUM_BASE, URI_CHARSET};

/// Maximum characters appended before the synthesis restarts from scratch.
const MAX_APPENDS: usize = 16;

/// Calculate the modulus based checksum of the given data.
///
/// Bytes are summed into a 32-bit accumulator reduced modulo `base` at
/// every step, so the result never overflows regardless of input length.
pub fn checksum(data: &[u8], base: u8) -> u8 {
    let base = u32::from(base);
    let mut sum = 0u32;
    for &b in data {
        sum += u32::from(b);
        sum %= base;
    }
    sum as u8
}

/// Generate a random string of `len` characters from `charset`.
pub fn random_string<R: Rng>(rng: &mut R, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

/// Synthesise a random URI segment whose checksum equals `target`.
///
/// Starts from a random string of one to three characters and appends one
/// random character at a time until the checksum matches; after
/// [`MAX_APPENDS`] unsuccessful appends the candidate is discarded and the
/// search restarts. Termination is almost sure: each append hits the
/// target with probability ~1/238.
pub fn new_checksum_uri_with<R: Rng>(rng: &mut R, target: u8) -> String {
    loop {
        let initial_len = rng.gen_range(1..=3);
        let mut uri = random_string(rng, URI_CHARSET, initial_len);
        for _ in 0..MAX_APPENDS {
            if checksum(uri.as_bytes(), CHECKSUM_BASE) == target {
                return uri;
            }
            uri.push_str(&random_string(rng, URI_CHARSET, 1));
        }
    }
}

/// Synthesise a checksum-targeted URI using the thread-local RNG.
pub fn new_checksum_uri(target: u8) -> String {
    new_checksum_uri_with(&mut rand::thread_rng(), target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_checksum_is_sum_mod_base() {
        assert_eq!(checksum(&[], 0xEE), 0);
        assert_eq!(checksum(&[1, 2, 3], 0xEE), 6);
        assert_eq!(checksum(&[0xFF; 4], 7), (255u32 * 4 % 7) as u8);
        assert_eq!(checksum(b"aB3_", 0xEE), {
            let sum: u32 = b"aB3_".iter().map(|&b| u32::from(b)).sum();
            (sum % 0xEE) as u8
        });
    }

    #[test]
    fn test_checksum_long_input_no_overflow() {
        let data = vec![0xFFu8; 1 << 20];
        let expected = ((0xFFu64 * (1 << 20)) % 0xEE) as u8;
        assert_eq!(checksum(&data, 0xEE), expected);
    }

    #[test]
    fn test_uri_hits_every_target() {
        let mut rng = StdRng::seed_from_u64(7);
        // Targets at or above the base are unreachable residues by definition.
        for target in 0..CHECKSUM_BASE {
            let uri = new_checksum_uri_with(&mut rng, target);
            assert_eq!(checksum(uri.as_bytes(), CHECKSUM_BASE), target);
            assert!(uri.bytes().all(|b| URI_CHARSET.contains(&b)));
        }
    }

    #[test]
    fn test_uri_length_bounded() {
        // 10k role-byte URIs, all within the 3 + 16 character bound.
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let uri = new_checksum_uri_with(&mut rng, 1);
            assert_eq!(checksum(uri.as_bytes(), CHECKSUM_BASE), 1);
            assert!(uri.len() <= 19, "uri too long: {}", uri.len());
        }
    }

    #[test]
    fn test_uri_varies_between_calls() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = new_checksum_uri_with(&mut rng, 0);
        let b = new_checksum_uri_with(&mut rng, 0);
        // Collisions are possible but vanishingly rare for a seeded pair.
        assert_ne!(a, b);
    }
}
