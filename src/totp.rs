//! One-time-password derivation for the web player credential exchange.
//!
//! The credential endpoint verifies a 6-digit TOTP computed over a shared
//! secret that ships obfuscated inside the web player. The obfuscation is
//! not a security boundary, but the exact transform matters: the server
//! derives the same bytes, so every step here must be reproduced verbatim -
//! the byte table, the XOR key schedule, the hex round-trip of the joined
//! decimal string and the unpadded base-32 encoding.

use std::fmt::Write;

use hmac::{Hmac, Mac};
use sha1::Sha1;

/// TOTP scheme version expected by the credential endpoint.
pub const VERSION: &str = "5";

/// RFC 4648 base-32 alphabet, used unpadded.
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Obfuscated secret as shipped in the web player bundle.
const SECRET_TABLE: [u8; 17] = [
    12, 56, 76, 33, 88, 44, 88, 33, 78, 78, 11, 66, 22, 22, 55, 69, 54,
];

/// TOTP time step.
const STEP_SECONDS: u64 = 30;

/// Number of output digits.
const DIGITS: u32 = 6;

/// Reconstructs the shared secret and encodes it for TOTP use.
///
/// Pure and deterministic: same table, same output, no I/O.
#[must_use]
pub fn derive_secret() -> String {
    // Per-index XOR key schedule, then join the results as decimal text.
    let joined = SECRET_TABLE
        .iter()
        .enumerate()
        .fold(String::new(), |mut acc, (index, byte)| {
            let key = (index as u8 % 33).wrapping_add(9);
            let _ = write!(acc, "{}", byte ^ key);
            acc
        });

    // Hex-encode the text's bytes, then decode the pairs back into raw
    // bytes. The round-trip is part of the upstream scheme and is kept
    // as-is so the derived bytes match the server's.
    let hex = joined.bytes().fold(String::new(), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    });
    let bytes = hex
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect::<Vec<u8>>();

    base32_encode(&bytes)
}

/// Computes the 6-digit one-time password for a timestamp in milliseconds.
///
/// Standard 30-second-step HMAC-SHA1 TOTP over an unpadded base-32 secret,
/// zero-padded to six digits. Characters outside the base-32 alphabet are
/// ignored, mirroring common TOTP generators.
#[must_use]
pub fn generate(secret: &str, timestamp_ms: u64) -> String {
    let key = base32_decode(secret);
    let counter = timestamp_ms / 1000 / STEP_SECONDS;

    let mut mac =
        <Hmac<Sha1> as Mac>::new_from_slice(&key).expect("hmac accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation per RFC 4226.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(DIGITS);
    format!("{code:06}")
}

/// Unpadded RFC 4648 base-32 encoding.
fn base32_encode(bytes: &[u8]) -> String {
    let mut bits = 0u32;
    let mut buffer = 0u32;
    let mut encoded = String::with_capacity(bytes.len().div_ceil(5) * 8);

    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            encoded.push(BASE32_ALPHABET[((buffer >> (bits - 5)) & 31) as usize] as char);
            bits -= 5;
        }
    }

    if bits > 0 {
        encoded.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 31) as usize] as char);
    }

    encoded
}

/// Inverse of [`base32_encode`]; unknown characters are skipped.
fn base32_decode(encoded: &str) -> Vec<u8> {
    let mut bits = 0u32;
    let mut buffer = 0u32;
    let mut decoded = Vec::with_capacity(encoded.len() * 5 / 8);

    for chr in encoded.bytes() {
        let Some(value) = BASE32_ALPHABET.iter().position(|&b| b == chr) else {
            continue;
        };
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            decoded.push(((buffer >> (bits - 8)) & 0xff) as u8);
            bits -= 8;
        }
    }

    decoded
}
