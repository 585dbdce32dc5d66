//! ISO 9564 PIN blocks
//!
//! A clear PIN block is a 16 nibble PIN field, optionally XORed with an
//! account field built from the PAN:
//!
//! ```text
//! PIN field:     C L P P P P P/F P/F P/F P/F P/F P/F P/F P/F F F
//! account field: 0 0 0 0 A1 A2 ... A12
//! ```
//!
//! `C` is the format number, `L` the PIN length and `A1..A12` the twelve PAN
//! digits to the left of the check digit.

use std::fmt;

use zeroize::Zeroizing;

use crate::{
    Error, Result,
    crypto::{self, Block},
    util::{codec, xor_into},
};

/// Nibble holding the format number
const CONTROL_NIBBLE: usize = 0;

/// Nibble holding the PIN length
const LENGTH_NIBBLE: usize = 1;

/// First PIN digit nibble
const PIN_START: usize = 2;

/// Nibbles in a PIN field
const FIELD_NIBBLES: usize = 16;

/// Shortest PIN a block can carry
pub const MIN_PIN_LEN: usize = 4;

/// Longest PIN a block can carry
pub const MAX_PIN_LEN: usize = 12;

/// Digits of the PAN used for the account field
const ACCOUNT_DIGITS: usize = 12;

/// Primary account number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pan(String);

impl Pan {
    /// Parse a 12 to 19 digit PAN
    pub fn parse(digits: &str) -> Result<Self> {
        if !codec::is_decimal(digits) || !(12..=19).contains(&digits.len()) {
            return Err(Error::MalformedCommand(
                "expected a PAN of 12 to 19 digits".into(),
            ));
        }
        Ok(Self(digits.to_string()))
    }

    /// PAN digits
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Up to `count` digits immediately left of the check digit
    pub fn digits_before_check(&self, count: usize) -> &str {
        let end = self.0.len() - 1;
        &self.0[end.saturating_sub(count)..end]
    }

    /// ISO 9564 account field
    ///
    /// A 12 digit PAN is taken whole; longer ones drop the check digit.
    pub fn account_field(&self) -> Block {
        let digits = if self.0.len() == ACCOUNT_DIGITS {
            self.as_str()
        } else {
            self.digits_before_check(ACCOUNT_DIGITS)
        };
        // Twelve decimal digits always fit
        codec::decode_digits(digits).unwrap_or_default()
    }
}

impl fmt::Display for Pan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A clear PIN, scrubbed on drop
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Parse a 4 to 12 digit PIN
    pub fn parse(digits: &str) -> Result<Self> {
        if !codec::is_decimal(digits) || !(MIN_PIN_LEN..=MAX_PIN_LEN).contains(&digits.len()) {
            return Err(Error::InvalidPinBlock("PIN must be 4 to 12 digits"));
        }
        Ok(Self(Zeroizing::new(digits.to_string())))
    }

    /// PIN digits
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed PIN
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Digit values
    pub fn digits(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b - b'0')
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({} digits)", self.0.len())
    }
}

/// ISO 9564 PIN block format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFormat {
    /// Format 0 (ANSI X9.8): PIN XOR account field, `F` fill
    Iso0,
    /// Format 1: no PAN, transaction fill
    Iso1,
    /// Format 2: ICC offline PIN, `F` fill
    Iso2,
    /// Format 3: PIN XOR account field, `A`..`F` fill
    Iso3,
}

impl PinFormat {
    /// Format for a control nibble
    pub const fn from_control(control: u8) -> Option<Self> {
        match control {
            0 => Some(Self::Iso0),
            1 => Some(Self::Iso1),
            2 => Some(Self::Iso2),
            3 => Some(Self::Iso3),
            _ => None,
        }
    }

    /// Parse a request format field (`0` to `3`)
    pub fn parse(field: &str) -> Result<Self> {
        field
            .parse::<u8>()
            .ok()
            .and_then(Self::from_control)
            .ok_or_else(|| Error::MalformedCommand(format!("unsupported PIN block format {field:?}")))
    }

    /// Control nibble
    pub const fn control(self) -> u8 {
        match self {
            Self::Iso0 => 0,
            Self::Iso1 => 1,
            Self::Iso2 => 2,
            Self::Iso3 => 3,
        }
    }

    /// True when the block is XORed with the account field
    pub const fn uses_pan(self) -> bool {
        matches!(self, Self::Iso0 | Self::Iso3)
    }

    const fn fill(self, nibble: usize) -> u8 {
        match self {
            Self::Iso3 => 0x0A + (nibble % 6) as u8,
            _ => 0x0F,
        }
    }

    const fn fill_is_valid(self, value: u8) -> bool {
        match self {
            Self::Iso0 | Self::Iso2 => value == 0x0F,
            Self::Iso1 => true,
            Self::Iso3 => value >= 0x0A,
        }
    }
}

/// A PIN with the format it travels in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinBlock {
    format: PinFormat,
    pin: Pin,
}

impl PinBlock {
    /// Pair a PIN with a format
    pub const fn new(format: PinFormat, pin: Pin) -> Self {
        Self { format, pin }
    }

    /// Block format
    pub const fn format(&self) -> PinFormat {
        self.format
    }

    /// The PIN
    pub const fn pin(&self) -> &Pin {
        &self.pin
    }

    /// Build the clear block
    pub fn encode(&self, pan: Option<&Pan>) -> Result<Zeroizing<Block>> {
        let mut nibbles = Zeroizing::new([0u8; FIELD_NIBBLES]);
        nibbles[CONTROL_NIBBLE] = self.format.control();
        nibbles[LENGTH_NIBBLE] = self.pin.len() as u8;
        for (i, nibble) in nibbles.iter_mut().enumerate().skip(PIN_START) {
            *nibble = self.format.fill(i);
        }
        for (nibble, digit) in nibbles[PIN_START..].iter_mut().zip(self.pin.digits()) {
            *nibble = digit;
        }

        let mut block = Zeroizing::new(Block::default());
        for (byte, pair) in block.iter_mut().zip(nibbles.chunks_exact(2)) {
            *byte = (pair[0] << 4) | pair[1];
        }
        if self.format.uses_pan() {
            xor_into(&mut block[..], &require_pan(self.format, pan)?.account_field());
        }
        Ok(block)
    }

    /// Parse a clear block, taking the format from its control nibble
    pub fn decode(clear: &Block, pan: Option<&Pan>) -> Result<Self> {
        let format = PinFormat::from_control(clear[0] >> 4)
            .ok_or(Error::InvalidPinBlock("unsupported control nibble"))?;

        let mut field = Zeroizing::new(*clear);
        if format.uses_pan() {
            xor_into(&mut field[..], &require_pan(format, pan)?.account_field());
        }

        let nibbles: Zeroizing<Vec<u8>> = Zeroizing::new(
            field
                .iter()
                .flat_map(|byte| [byte >> 4, byte & 0x0F])
                .collect(),
        );
        let len = usize::from(nibbles[LENGTH_NIBBLE]);
        if !(MIN_PIN_LEN..=MAX_PIN_LEN).contains(&len) {
            return Err(Error::InvalidPinBlock("PIN length out of range"));
        }

        let digits = &nibbles[PIN_START..PIN_START + len];
        if digits.iter().any(|d| *d > 9) {
            return Err(Error::InvalidPinBlock("non-decimal PIN digit"));
        }
        if !nibbles[PIN_START + len..]
            .iter()
            .all(|f| format.fill_is_valid(*f))
        {
            return Err(Error::InvalidPinBlock("invalid fill"));
        }

        let pin: Zeroizing<String> =
            Zeroizing::new(digits.iter().map(|d| char::from(b'0' + d)).collect());
        Ok(Self::new(format, Pin::parse(&pin)?))
    }

    /// Parse a clear block that must be in `format`
    pub fn decode_as(format: PinFormat, clear: &Block, pan: Option<&Pan>) -> Result<Self> {
        if clear[0] >> 4 != format.control() {
            return Err(Error::InvalidPinBlock("format does not match control nibble"));
        }
        Self::decode(clear, pan)
    }

    /// Decrypt and parse an encrypted block
    pub fn decrypt(key: &[u8], encrypted: &Block, pan: Option<&Pan>) -> Result<Self> {
        let clear = Zeroizing::new(crypto::decrypt_block(key, encrypted)?);
        Self::decode(&clear, pan)
    }

    /// Build and encrypt the block
    pub fn encrypt(&self, key: &[u8], pan: Option<&Pan>) -> Result<Block> {
        crypto::encrypt_block(key, &*self.encode(pan)?)
    }
}

fn require_pan(format: PinFormat, pan: Option<&Pan>) -> Result<&Pan> {
    pan.ok_or_else(|| {
        Error::MalformedCommand(format!("PIN block format {} needs a PAN", format.control()))
    })
}
