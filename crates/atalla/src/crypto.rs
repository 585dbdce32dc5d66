//! Cryptographic primitives for the simulated HSM
//!
//! This module provides the single and triple DES operations every command is
//! built from: ECB and CBC encryption, ISO 7816-4 padding, the ISO 9797-1
//! Algorithm 3 ("retail") MAC, check digits and decimalization.

use cbc_mac::{CbcMac, Mac};
use cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, Key, KeyInit, KeyIvInit,
    block_padding::{Iso7816, RawPadding},
    consts::U8,
    generic_array::GenericArray,
};
use des::{Des, TdesEde3};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{Error, Result, util::xor_block};

/// DES block length in bytes
pub const BLOCK_LEN: usize = 8;

/// A single DES block
pub type Block = [u8; BLOCK_LEN];

type CipherBlock = GenericArray<u8, U8>;

/// Standard decimalization table: hex digits A-F map to 0-5
pub const DEFAULT_DECIMALIZATION_TABLE: &str = "0123456789012345";

/// Clear key material of single, double or triple length
///
/// The bytes are scrubbed when the key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClearKey(Vec<u8>);

impl ClearKey {
    /// Wrap clear key bytes, rejecting lengths DES cannot use
    pub fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            8 | 16 | 24 => Ok(Self(key.to_vec())),
            len => Err(Error::InvalidKeyLength(len)),
        }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a clear key is never empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leftmost `digits` hex digits of the key check value
    pub fn check_digits(&self, digits: usize) -> Result<String> {
        check_digits(&self.0, digits)
    }
}

impl std::fmt::Debug for ClearKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClearKey({} bytes)", self.0.len())
    }
}

/// Expand a DES key to the 24 bytes `TdesEde3` takes
///
/// Single length keys run as K|K|K and double length keys as K1|K2|K1, so one
/// cipher covers every key length.
pub fn expand_key(key: &[u8]) -> Result<Zeroizing<[u8; 24]>> {
    let mut result = Zeroizing::new([0u8; 24]);
    match key.len() {
        8 => {
            for chunk in result.chunks_mut(8) {
                chunk.copy_from_slice(key);
            }
        }
        16 => {
            result[..16].copy_from_slice(key);
            result[16..].copy_from_slice(&key[..8]);
        }
        24 => result.copy_from_slice(key),
        len => return Err(Error::InvalidKeyLength(len)),
    }
    Ok(result)
}

fn cipher_for(key: &[u8]) -> Result<TdesEde3> {
    let key = expand_key(key)?;
    Ok(TdesEde3::new(Key::<TdesEde3>::from_slice(key.as_slice())))
}

fn to_blocks(data: &[u8]) -> Result<Vec<CipherBlock>> {
    if data.len() % BLOCK_LEN != 0 {
        return Err(Error::InvalidDataLength {
            expected: BLOCK_LEN,
            actual: data.len(),
        });
    }
    Ok(data
        .chunks_exact(BLOCK_LEN)
        .map(CipherBlock::clone_from_slice)
        .collect())
}

fn to_array(block: &CipherBlock) -> Block {
    let mut out = Block::default();
    out.copy_from_slice(block);
    out
}

fn from_blocks(blocks: &[CipherBlock]) -> Vec<u8> {
    blocks.iter().flat_map(|block| block.iter().copied()).collect()
}

/// Encrypt one block under a single, double or triple length key
pub fn encrypt_block(key: &[u8], block: &Block) -> Result<Block> {
    let mut block = CipherBlock::clone_from_slice(block);
    cipher_for(key)?.encrypt_block(&mut block);
    Ok(to_array(&block))
}

/// Decrypt one block under a single, double or triple length key
pub fn decrypt_block(key: &[u8], block: &Block) -> Result<Block> {
    let mut block = CipherBlock::clone_from_slice(block);
    cipher_for(key)?.decrypt_block(&mut block);
    Ok(to_array(&block))
}

/// Encrypt whole blocks in ECB mode
pub fn encrypt_ecb(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut blocks = to_blocks(data)?;
    cipher_for(key)?.encrypt_blocks(&mut blocks);
    Ok(from_blocks(&blocks))
}

/// Decrypt whole blocks in ECB mode
pub fn decrypt_ecb(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut blocks = to_blocks(data)?;
    cipher_for(key)?.decrypt_blocks(&mut blocks);
    Ok(from_blocks(&blocks))
}

/// Encrypt whole blocks in CBC mode
pub fn encrypt_cbc(key: &[u8], iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    let mut blocks = to_blocks(data)?;
    let key = expand_key(key)?;
    let mut encryptor = cbc::Encryptor::<TdesEde3>::new(
        Key::<TdesEde3>::from_slice(key.as_slice()),
        CipherBlock::from_slice(iv),
    );
    encryptor.encrypt_blocks_mut(&mut blocks);
    Ok(from_blocks(&blocks))
}

/// Decrypt whole blocks in CBC mode
pub fn decrypt_cbc(key: &[u8], iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    let mut blocks = to_blocks(data)?;
    let key = expand_key(key)?;
    let mut decryptor = cbc::Decryptor::<TdesEde3>::new(
        Key::<TdesEde3>::from_slice(key.as_slice()),
        CipherBlock::from_slice(iv),
    );
    decryptor.decrypt_blocks_mut(&mut blocks);
    Ok(from_blocks(&blocks))
}

/// Apply ISO 7816-4 padding: `0x80` then zeros up to the next block boundary
///
/// A full block of padding is added when the input is already aligned.
pub fn pad_iso7816(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    let pos = data.len() % BLOCK_LEN;
    let start = data.len() - pos;
    padded.resize(start + BLOCK_LEN, 0);
    Iso7816::raw_pad(&mut padded[start..], pos);
    padded
}

/// Strip ISO 7816-4 padding from the last block
pub fn unpad_iso7816(data: &[u8]) -> Result<&[u8]> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(Error::Padding);
    }
    let start = data.len() - BLOCK_LEN;
    let kept = Iso7816::raw_unpad(&data[start..])
        .map_err(|_| Error::Padding)?
        .len();
    Ok(&data[..start + kept])
}

/// Zero-fill to the next block boundary (ISO 9797-1 padding method 1)
///
/// Aligned input is returned unchanged; empty input becomes one zero block.
pub fn pad_zeros(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    let len = data.len().div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN;
    padded.resize(len, 0);
    padded
}

/// Calculate an ISO 9797-1 Algorithm 3 MAC
///
/// Every block but the last is chained with single DES under the left key
/// half; the last block is enciphered with the full triple DES key. The input
/// must already be padded.
///
/// # Arguments
///
/// * `key` - Double or triple length key
/// * `data` - Padded data, a whole number of blocks
/// * `out_len` - MAC bytes to keep, 1 to 8
pub fn mac_alg3(key: &[u8], data: &[u8], out_len: usize) -> Result<Vec<u8>> {
    if !(1..=BLOCK_LEN).contains(&out_len) {
        return Err(Error::InvalidMacLength(out_len));
    }
    if key.len() != 16 && key.len() != 24 {
        return Err(Error::InvalidKeyLength(key.len()));
    }
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(Error::InvalidDataLength {
            expected: BLOCK_LEN,
            actual: data.len(),
        });
    }

    let (head, last) = data.split_at(data.len() - BLOCK_LEN);
    let mut chain = Block::default();
    if !head.is_empty() {
        let mut mac = <CbcMac<Des> as Mac>::new_from_slice(&key[..8])
            .map_err(|_| Error::InvalidKeyLength(key.len()))?;
        mac.update(head);
        chain.copy_from_slice(&mac.finalize().into_bytes());
    }

    let mut last_block = Block::default();
    last_block.copy_from_slice(last);
    let mac = encrypt_block(key, &xor_block(&chain, &last_block))?;
    Ok(mac[..out_len].to_vec())
}

/// Leftmost `digits` hex digits of the encryption of a zero block
pub fn check_digits(key: &[u8], digits: usize) -> Result<String> {
    let kcv = encrypt_block(key, &Block::default())?;
    let mut hex = crate::util::codec::encode(kcv);
    hex.truncate(digits.min(BLOCK_LEN * 2));
    Ok(hex)
}

/// Decimalize hex digits the CVV/PVV way
///
/// Decimal digits are taken left to right first, then a second pass maps the
/// letters A-F to 0-5, until `len` digits are collected.
pub fn decimalize(hex: &str, len: usize) -> String {
    let digits = hex.chars().filter(char::is_ascii_digit);
    let letters = hex
        .chars()
        .filter(|c| c.is_ascii_hexdigit() && !c.is_ascii_digit())
        .map(|c| char::from(b'0' + (c.to_ascii_uppercase() as u8 - b'A')));
    digits.chain(letters).take(len).collect()
}

/// Decimalize hex digits through a 16 digit conversion table
///
/// Nibble value `n` becomes `table[n]`; the table must hold 16 decimal digits.
pub fn decimalize_with_table(hex: &str, table: &str, len: usize) -> Result<String> {
    let table = table.as_bytes();
    if table.len() != 16 || !table.iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedCommand(
            "decimalization table must hold 16 decimal digits".into(),
        ));
    }
    hex.chars()
        .take(len)
        .map(|c| {
            c.to_digit(16)
                .map(|nibble| char::from(table[nibble as usize]))
                .ok_or_else(|| Error::MalformedCommand("non-hex input to decimalization".into()))
        })
        .collect()
}

/// Force odd parity on every key byte
pub fn adjust_parity(key: &mut [u8]) {
    for byte in key.iter_mut() {
        let high = *byte & 0xFE;
        *byte = if high.count_ones() % 2 == 0 {
            high | 0x01
        } else {
            high
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const DOUBLE: [u8; 16] = hex!("0123456789ABCDEFFEDCBA9876543210");
    const PLAIN: [u8; 16] = hex!("4E6F77206973207468652074696D6520");

    #[test]
    fn test_expand_key() {
        let single = expand_key(&hex!("0123456789ABCDEF")).unwrap();
        assert_eq!(
            single.as_slice(),
            hex!("0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF")
        );

        let double = expand_key(&DOUBLE).unwrap();
        assert_eq!(
            double.as_slice(),
            hex!("0123456789ABCDEFFEDCBA98765432100123456789ABCDEF")
        );

        assert!(matches!(
            expand_key(&[0u8; 12]),
            Err(Error::InvalidKeyLength(12))
        ));
    }

    #[test]
    fn test_check_digits() {
        assert_eq!(check_digits(&DOUBLE, 4).unwrap(), "08D7");
        assert_eq!(check_digits(&DOUBLE, 16).unwrap(), "08D7B4FB629D0885");
        assert_eq!(
            check_digits(&hex!("0123456789ABCDEF"), 16).unwrap(),
            "D5D44FF720683D0D"
        );
        assert_eq!(
            check_digits(
                &hex!("0123456789ABCDEFFEDCBA987654321089ABCDEF01234567"),
                16
            )
            .unwrap(),
            "3FD539E3ABEB8B5B"
        );
    }

    #[test]
    fn test_ecb_and_cbc() {
        let ecb = encrypt_ecb(&DOUBLE, &PLAIN).unwrap();
        assert_eq!(ecb, hex!("D80A0D8B2BAE5E4E6A0094171ABCFC27"));
        assert_eq!(decrypt_ecb(&DOUBLE, &ecb).unwrap(), PLAIN);

        let cbc = encrypt_cbc(&DOUBLE, &Block::default(), &PLAIN).unwrap();
        assert_eq!(cbc, hex!("D80A0D8B2BAE5E4E319E5E68C3E8891B"));
        assert_eq!(decrypt_cbc(&DOUBLE, &Block::default(), &cbc).unwrap(), PLAIN);

        let single = encrypt_cbc(&hex!("0123456789ABCDEF"), &Block::default(), &PLAIN).unwrap();
        assert_eq!(single, hex!("3FA40E8A984D48150B2E73F88DC5856A"));
    }

    #[test]
    fn test_partial_blocks_rejected() {
        assert!(matches!(
            encrypt_ecb(&DOUBLE, &PLAIN[..5]),
            Err(Error::InvalidDataLength {
                expected: 8,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_iso7816_padding() {
        assert_eq!(pad_iso7816(&hex!("0102")), hex!("0102800000000000"));
        assert_eq!(
            pad_iso7816(&hex!("0102030405060708")),
            hex!("01020304050607088000000000000000")
        );
        assert_eq!(pad_iso7816(&[]), hex!("8000000000000000"));

        let padded = pad_iso7816(&hex!("0102030405"));
        assert_eq!(unpad_iso7816(&padded).unwrap(), hex!("0102030405"));
    }

    #[test]
    fn test_unpad_requires_marker() {
        assert!(matches!(
            unpad_iso7816(&hex!("0102030405060708")),
            Err(Error::Padding)
        ));
        assert!(matches!(unpad_iso7816(&hex!("0180")), Err(Error::Padding)));
        assert!(matches!(unpad_iso7816(&[]), Err(Error::Padding)));
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(pad_zeros(&hex!("0102")), hex!("0102000000000000"));
        assert_eq!(pad_zeros(&PLAIN), PLAIN);
        assert_eq!(pad_zeros(&[]), [0u8; 8]);
    }

    #[test]
    fn test_mac_alg3() {
        // Same vector the SCP02 full 3DES MAC is checked against
        let key = hex!("5b02e75ad63190aece0622936f11abab");
        let data = pad_iso7816(&hex!("8482010010810b098a8fbb88da"));
        assert_eq!(mac_alg3(&key, &data, 8).unwrap(), hex!("5271d7174a5a166a"));

        // A single block is one triple DES encryption
        assert_eq!(
            mac_alg3(&DOUBLE, &hex!("0123456789ABCDEF"), 8).unwrap(),
            hex!("1A4D672DCA6CB335")
        );

        let truncated = mac_alg3(&DOUBLE, &pad_iso7816(&hex!("0123456789ABCDEF")), 4).unwrap();
        assert_eq!(truncated, hex!("B4DF7452"));
    }

    #[test]
    fn test_mac_alg3_rejects_single_length() {
        assert!(matches!(
            mac_alg3(&hex!("0123456789ABCDEF"), &PLAIN, 8),
            Err(Error::InvalidKeyLength(8))
        ));
        assert!(mac_alg3(&DOUBLE, &PLAIN[..7], 8).is_err());
    }

    #[test]
    fn test_mac_alg3_rejects_out_of_range_length() {
        assert!(matches!(
            mac_alg3(&DOUBLE, &PLAIN, 0),
            Err(Error::InvalidMacLength(0))
        ));
        assert!(matches!(
            mac_alg3(&DOUBLE, &PLAIN, 9),
            Err(Error::InvalidMacLength(9))
        ));
        assert_eq!(mac_alg3(&DOUBLE, &PLAIN, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_decimalize() {
        assert_eq!(decimalize("5B614982E03C97DD", 8), "56149820");
        assert_eq!(decimalize("5B614982E03C97DD", 16), "5614982039714233");
        assert_eq!(decimalize("ABCDEF", 4), "0123");
    }

    #[test]
    fn test_decimalize_with_table() {
        assert_eq!(
            decimalize_with_table("0A1B", DEFAULT_DECIMALIZATION_TABLE, 4).unwrap(),
            "0011"
        );
        assert_eq!(
            decimalize_with_table("0A1B", "9876543210123456", 3).unwrap(),
            "918"
        );
        assert!(decimalize_with_table("0A1B", "01234", 4).is_err());
    }

    #[test]
    fn test_adjust_parity() {
        let mut key = hex!("0022446688AACCEE");
        adjust_parity(&mut key);
        assert_eq!(key, hex!("0123456789ABCDEF"));
    }

    #[test]
    fn test_clear_key() {
        let key = ClearKey::new(&DOUBLE).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(key.check_digits(6).unwrap(), "08D7B4");
        assert_eq!(format!("{key:?}"), "ClearKey(16 bytes)");
        assert!(ClearKey::new(&[0u8; 10]).is_err());
    }
}
