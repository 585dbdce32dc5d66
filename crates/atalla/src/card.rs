//! Card and PIN verification values
//!
//! Card verification values (CVV/CVC), IBM 3624 natural PINs and offsets,
//! and Visa PIN verification values.

use zeroize::Zeroizing;

use crate::{
    Error, Result,
    constants::PVV_LENGTH,
    crypto::{self, Block},
    pin::{Pan, Pin},
    util::{codec, xor_block},
};

/// Card data digits the CVV algorithm consumes
pub const CVV_DATA_DIGITS: usize = 32;

/// Longest CVV the algorithm yields
pub const MAX_CVV_LENGTH: usize = 16;

/// Placeholder for PAN digits in IBM 3624 validation data
const PAN_PLACEHOLDER: char = 'N';

/// Compute a card verification value
///
/// The card data (PAN, expiry, service code) is right padded with zeros to 32
/// digits and split into halves A and B; the value is the decimalized
/// `E_K(E_K1(A) XOR B)`.
pub fn cvv(key: &[u8], data: &str, len: usize) -> Result<String> {
    if !codec::is_decimal(data) || data.len() > CVV_DATA_DIGITS {
        return Err(Error::MalformedCommand(
            "card data must be at most 32 decimal digits".into(),
        ));
    }
    if !(1..=MAX_CVV_LENGTH).contains(&len) {
        return Err(Error::MalformedCommand(format!(
            "CVV length {len} out of range"
        )));
    }

    let data = format!("{data:0<CVV_DATA_DIGITS$}");
    let a: Block = codec::decode_array(&data[..16])?;
    let b: Block = codec::decode_array(&data[16..])?;

    let left = &key[..key.len().min(8)];
    let chained = xor_block(&crypto::encrypt_block(left, &a)?, &b);
    let result = crypto::encrypt_block(key, &chained)?;
    Ok(crypto::decimalize(&codec::encode(result), len))
}

/// Compare a presented CVV with the computed one of the same length
pub fn verify_cvv(key: &[u8], data: &str, presented: &str) -> Result<bool> {
    if !codec::is_decimal(presented) {
        return Ok(false);
    }
    Ok(cvv(key, data, presented.len())? == presented)
}

/// Expand IBM 3624 validation data
///
/// A run of `N` is replaced by as many PAN digits taken from the left of the
/// check digit. The result must be 16 hex digits.
pub fn validation_data(template: &str, pan: &Pan) -> Result<Block> {
    if !template.is_ascii() {
        return Err(Error::MalformedCommand(
            "validation data must be 16 hex digits".into(),
        ));
    }
    let run = template.matches(PAN_PLACEHOLDER).count();
    let expanded = if run == 0 {
        template.to_string()
    } else {
        let start = template.find(PAN_PLACEHOLDER).unwrap_or_default();
        if template[start..start + run].chars().any(|c| c != PAN_PLACEHOLDER) {
            return Err(Error::MalformedCommand(
                "PAN placeholder in validation data must be contiguous".into(),
            ));
        }
        let digits = format!("{:0>run$}", pan.digits_before_check(run));
        format!("{}{digits}{}", &template[..start], &template[start + run..])
    };

    if expanded.len() != 16 || !codec::is_hex(&expanded) {
        return Err(Error::MalformedCommand(
            "validation data must be 16 hex digits".into(),
        ));
    }
    codec::decode_array(&expanded)
}

/// IBM 3624 natural PIN of `len` digits
pub fn natural_pin(
    pvk: &[u8],
    validation: &Block,
    table: &str,
    len: usize,
) -> Result<Zeroizing<String>> {
    let encrypted = crypto::encrypt_block(pvk, validation)?;
    Ok(Zeroizing::new(crypto::decimalize_with_table(
        &codec::encode(encrypted),
        table,
        len,
    )?))
}

/// IBM 3624 offset of `pin` against `natural`, digit by digit modulo 10
pub fn pin_offset(natural: &str, pin: &Pin) -> String {
    natural
        .bytes()
        .zip(pin.digits())
        .map(|(n, p)| char::from(b'0' + (p + 10 - (n - b'0')) % 10))
        .collect()
}

/// Check a PIN against an IBM 3624 offset
///
/// The offset covers the leftmost `offset.len()` PIN digits; a PIN shorter
/// than the offset never verifies.
pub fn verify_pin_offset(
    pvk: &[u8],
    validation: &Block,
    table: &str,
    pin: &Pin,
    offset: &str,
) -> Result<bool> {
    if !codec::is_decimal(offset) || offset.len() > crate::pin::MAX_PIN_LEN {
        return Err(Error::MalformedCommand("offset must be decimal digits".into()));
    }
    if pin.len() < offset.len() {
        return Ok(false);
    }
    let natural = natural_pin(pvk, validation, table, offset.len())?;
    Ok(pin_offset(&natural, pin) == offset)
}

/// Visa PIN verification value
///
/// The transformed security parameter is the 11 PAN digits left of the check
/// digit, the PVKI and the first four PIN digits.
pub fn pvv(pvk: &[u8], pan: &Pan, pvki: char, pin: &Pin) -> Result<String> {
    if !pvki.is_ascii_digit() {
        return Err(Error::MalformedCommand(format!("PVKI {pvki:?} is not a digit")));
    }
    let tsp = Zeroizing::new(format!(
        "{:0>11}{pvki}{}",
        pan.digits_before_check(11),
        &pin.as_str()[..4]
    ));
    let block: Zeroizing<Block> = Zeroizing::new(codec::decode_array(&tsp)?);
    let encrypted = crypto::encrypt_block(pvk, &block)?;
    Ok(crypto::decimalize(&codec::encode(encrypted), PVV_LENGTH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DEFAULT_DECIMALIZATION_TABLE;
    use hex_literal::hex;

    const K0: [u8; 16] = hex!("0123456789ABCDEFFEDCBA9876543210");
    const PVK: [u8; 8] = hex!("3333333333333333");

    fn pan() -> Pan {
        Pan::parse("4123456789012345").unwrap()
    }

    fn pin(digits: &str) -> Pin {
        Pin::parse(digits).unwrap()
    }

    #[test]
    fn test_cvv() {
        assert_eq!(cvv(&K0, "41234567890123458701101", 8).unwrap(), "56149820");
        assert_eq!(cvv(&K0, "41234567890123458701101", 3).unwrap(), "561");
        assert_eq!(
            cvv(
                &hex!("0123456789ABCDEF0123456789ABCDEF"),
                "41234567890123452512101",
                3
            )
            .unwrap(),
            "510"
        );
    }

    #[test]
    fn test_cvv_rejects_bad_data() {
        assert!(cvv(&K0, "4123X", 3).is_err());
        assert!(cvv(&K0, &"1".repeat(33), 3).is_err());
        assert!(cvv(&K0, "4123", 0).is_err());
        assert!(cvv(&K0, "4123", 17).is_err());
    }

    #[test]
    fn test_verify_cvv() {
        assert!(verify_cvv(&K0, "41234567890123458701101", "561").unwrap());
        assert!(!verify_cvv(&K0, "41234567890123458701101", "562").unwrap());
        assert!(!verify_cvv(&K0, "41234567890123458701101", "56A").unwrap());
    }

    #[test]
    fn test_validation_data() {
        let pan = pan();
        assert_eq!(
            validation_data("4123456789012345", &pan).unwrap(),
            hex!("4123456789012345")
        );
        assert_eq!(
            validation_data("41234NNNNN012345", &pan).unwrap(),
            hex!("4123401234012345")
        );
        assert!(validation_data("4123N567N9012345", &pan).is_err());
        assert!(validation_data("41234567", &pan).is_err());
    }

    #[test]
    fn test_ibm3624_offsets() {
        let validation = hex!("4123456789012345");
        let natural = natural_pin(&PVK, &validation, DEFAULT_DECIMALIZATION_TABLE, 4).unwrap();
        assert_eq!(natural.as_str(), "4498");

        assert_eq!(pin_offset(&natural, &pin("7441")), "3053");
        assert_eq!(pin_offset(&natural, &pin("0538")), "6140");

        let table = DEFAULT_DECIMALIZATION_TABLE;
        assert!(verify_pin_offset(&PVK, &validation, table, &pin("7441"), "3053").unwrap());
        assert!(verify_pin_offset(&PVK, &validation, table, &pin("744199"), "3053").unwrap());
        assert!(!verify_pin_offset(&PVK, &validation, table, &pin("1111"), "3053").unwrap());
        assert!(!verify_pin_offset(&PVK, &validation, table, &pin("7441"), "305300").unwrap());
    }

    #[test]
    fn test_visa_pvv() {
        assert_eq!(pvv(&K0, &pan(), '1', &pin("7441")).unwrap(), "9067");
        assert!(pvv(&K0, &pan(), 'A', &pin("7441")).is_err());
    }
}
