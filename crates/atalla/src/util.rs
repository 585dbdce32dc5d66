//! Common utilities for simulator operations

/// Hex string and byte array conversions
pub mod codec {
    use crate::{Error, Result};

    /// Encode bytes as uppercase hex, the form every Atalla field uses
    pub fn encode(data: impl AsRef<[u8]>) -> String {
        hex::encode_upper(data)
    }

    /// Decode a hex string of either case
    pub fn decode(data: &str) -> Result<Vec<u8>> {
        Ok(hex::decode(data)?)
    }

    /// Decode exactly `N` bytes of hex
    pub fn decode_array<const N: usize>(data: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        hex::decode_to_slice(data, &mut out)?;
        Ok(out)
    }

    /// Decode a string of decimal digits as packed BCD, left padded with zero
    /// nibbles to `N` bytes
    pub fn decode_digits<const N: usize>(digits: &str) -> Result<[u8; N]> {
        if digits.len() > N * 2 || !is_decimal(digits) {
            return Err(Error::MalformedCommand(format!(
                "expected at most {} decimal digits",
                N * 2
            )));
        }
        decode_array(&format!("{digits:0>width$}", width = N * 2))
    }

    /// True when the string is non-empty and only holds decimal digits
    pub fn is_decimal(data: &str) -> bool {
        !data.is_empty() && data.bytes().all(|b| b.is_ascii_digit())
    }

    /// True when the string is non-empty and only holds hex digits
    pub fn is_hex(data: &str) -> bool {
        !data.is_empty() && data.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

/// XOR `src` into `dst` over the shorter of the two
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (a, b) in dst.iter_mut().zip(src.iter()) {
        *a ^= *b;
    }
}

/// XOR two 8-byte blocks
pub fn xor_block(a: &[u8; 8], b: &[u8; 8]) -> [u8; 8] {
    let mut out = *a;
    xor_into(&mut out, b);
    out
}
