//! EMV key derivation and cryptograms
//!
//! ICC master keys are derived from an issuer master key with EMV option A,
//! session keys from the ICC master key with a diversification value. ARQCs
//! and script MACs are ISO 9797-1 Algorithm 3 MACs.

use zeroize::Zeroizing;

use crate::{
    Error, Result,
    constants::ARPC_METHOD2_LEN,
    crypto::{self, BLOCK_LEN, Block, ClearKey},
    pin::{Pan, Pin, PinBlock, PinFormat},
    util::{codec, xor_block, xor_into},
};

/// Byte of the diversification value replaced per session key half
const BRANCH_BYTE: usize = 2;

/// Branch value of the left session key half
const LEFT_BRANCH: u8 = 0xF0;

/// Branch value of the right session key half
const RIGHT_BRANCH: u8 = 0x0F;

/// Digits of PAN and PSN the option A derivation uses
const OPTION_A_DIGITS: usize = 16;

/// Padding applied to transaction data before the ARQC MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPadding {
    /// Zero fill (ISO 9797-1 method 1)
    Zeros,
    /// `0x80` then zeros (ISO 7816-4)
    Iso7816,
}

impl DataPadding {
    /// Pad `data` to a block boundary
    pub fn apply(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Zeros => crypto::pad_zeros(data),
            Self::Iso7816 => crypto::pad_iso7816(data),
        }
    }
}

/// Derive the ICC master key with EMV option A
///
/// `Y` is the rightmost 16 digits of PAN followed by PSN; the key is
/// `E(IMK, Y) || E(IMK, Y XOR FF..FF)` with odd parity.
pub fn icc_master_key(imk: &[u8], pan: &Pan, psn: &str) -> Result<ClearKey> {
    if psn.len() > 2 || !psn.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedCommand(format!(
            "PAN sequence number {psn:?} must be up to 2 digits"
        )));
    }
    let digits = format!("{}{psn:0>2}", pan.as_str());
    let rightmost = &digits[digits.len().saturating_sub(OPTION_A_DIGITS)..];
    let y: Block = codec::decode_digits(rightmost)?;

    let mut key = Zeroizing::new([0u8; 16]);
    key[..8].copy_from_slice(&crypto::encrypt_block(imk, &y)?);
    key[8..].copy_from_slice(&crypto::encrypt_block(imk, &xor_block(&y, &[0xFF; 8]))?);
    crypto::adjust_parity(&mut key[..]);
    ClearKey::new(&key[..])
}

/// Derive a session key from a diversification value `r`
///
/// `E(MK, r with r[2] = F0) || E(MK, r with r[2] = 0F)`
pub fn session_key(master_key: &ClearKey, r: &Block) -> Result<ClearKey> {
    let mut left = *r;
    left[BRANCH_BYTE] = LEFT_BRANCH;
    let mut right = *r;
    right[BRANCH_BYTE] = RIGHT_BRANCH;

    let mut key = Zeroizing::new([0u8; 16]);
    key[..8].copy_from_slice(&crypto::encrypt_block(master_key.as_bytes(), &left)?);
    key[8..].copy_from_slice(&crypto::encrypt_block(master_key.as_bytes(), &right)?);
    ClearKey::new(&key[..])
}

/// EMV common session key: the diversification value is `ATC || 00..00`
pub fn common_session_key(master_key: &ClearKey, atc: &[u8; 2]) -> Result<ClearKey> {
    session_key(master_key, &atc_block(atc))
}

/// ATC followed by zeros
pub fn atc_block(atc: &[u8; 2]) -> Block {
    let mut r = Block::default();
    r[..2].copy_from_slice(atc);
    r
}

/// Compute an ARQC over transaction data
pub fn arqc(key: &ClearKey, data: &[u8], padding: DataPadding) -> Result<Block> {
    let mac = crypto::mac_alg3(key.as_bytes(), &padding.apply(data), BLOCK_LEN)?;
    let mut out = Block::default();
    out.copy_from_slice(&mac);
    Ok(out)
}

/// ARPC method 1: `E(K, ARQC XOR (ARC || 00..00))`
pub fn arpc_method1(key: &ClearKey, arqc: &Block, arc: &[u8; 2]) -> Result<Block> {
    let mut arc_block = Block::default();
    arc_block[..2].copy_from_slice(arc);
    crypto::encrypt_block(key.as_bytes(), &xor_block(arqc, &arc_block))
}

/// ARPC method 2: the leftmost four bytes of the MAC over
/// `ARQC || CSU || proprietary authentication data`
pub fn arpc_method2(
    key: &ClearKey,
    arqc: &Block,
    csu: &[u8; 4],
    proprietary: &[u8],
) -> Result<Vec<u8>> {
    if proprietary.len() > 8 {
        return Err(Error::MalformedCommand(
            "proprietary authentication data is at most 8 bytes".into(),
        ));
    }
    let mut data = arqc.to_vec();
    data.extend_from_slice(csu);
    data.extend_from_slice(proprietary);
    crypto::mac_alg3(key.as_bytes(), &crypto::pad_iso7816(&data), ARPC_METHOD2_LEN)
}

/// Clear PIN data of an EMV PIN change script
///
/// The new PIN as an ISO format 2 block, XORed with the current PIN's format 2
/// block when the card requires it, then ISO 7816-4 padded.
pub fn pin_change_data(new_pin: &Pin, current: Option<&Pin>) -> Result<Zeroizing<Vec<u8>>> {
    let mut block = PinBlock::new(PinFormat::Iso2, new_pin.clone()).encode(None)?;
    if let Some(current) = current {
        let current = PinBlock::new(PinFormat::Iso2, current.clone()).encode(None)?;
        xor_into(&mut block[..], &current[..]);
    }
    Ok(Zeroizing::new(crypto::pad_iso7816(&block[..])))
}

/// Encipher PIN change data under the confidentiality session key
pub fn encipher_pin_data(smc_session_key: &ClearKey, data: &[u8]) -> Result<Vec<u8>> {
    crypto::encrypt_cbc(smc_session_key.as_bytes(), &Block::default(), data)
}

/// Script MAC over `header || ATC || ARQC || enciphered data` under the
/// integrity session key
pub fn script_mac(
    smi_session_key: &ClearKey,
    header: &[u8],
    atc: &[u8; 2],
    arqc: &Block,
    enciphered: &[u8],
) -> Result<Vec<u8>> {
    let mut data = header.to_vec();
    data.extend_from_slice(atc);
    data.extend_from_slice(arqc);
    data.extend_from_slice(enciphered);
    crypto::mac_alg3(
        smi_session_key.as_bytes(),
        &crypto::pad_iso7816(&data),
        BLOCK_LEN,
    )
}
