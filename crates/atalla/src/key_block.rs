//! Atalla key blocks (AKB)
//!
//! A key block carries an 8 character header, the key encrypted under the LMK
//! variant of the header's usage and an 8 byte integrity tag. The text form is
//! `header,HEX(encrypted key),HEX(check value)`.
//!
//! Header layout:
//!
//! | Offset | Meaning |
//! |---|---|
//! | 0 | version: `1` MAC protected, `0` KCV protected |
//! | 1 | key usage |
//! | 2 | algorithm or usage qualifier |
//! | 3 | mode of use |
//! | 4 | exportability |
//! | 5..8 | reserved |

use std::{fmt, str::FromStr};

use derive_more::Display;
use tracing::debug;

use crate::{
    Error, Result,
    constants::{header, variant},
    crypto::{self, Block, ClearKey},
    lmk::LmkTable,
    util::codec,
};

/// What a key may be used for
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsage {
    /// Key encryption key
    #[display("K")]
    KeyEncryption,
    /// PIN encryption key
    #[display("P")]
    PinEncryption,
    /// PIN verification key
    #[display("V")]
    PinVerification,
    /// Card verification key
    #[display("C")]
    CardVerification,
    /// MAC key
    #[display("M")]
    Mac,
    /// Data encryption key
    #[display("D")]
    DataEncryption,
    /// EMV issuer master key
    #[display("m")]
    IssuerMaster,
}

impl KeyUsage {
    /// Every usage, in header character order
    pub const ALL: [Self; 7] = [
        Self::KeyEncryption,
        Self::PinEncryption,
        Self::PinVerification,
        Self::CardVerification,
        Self::Mac,
        Self::DataEncryption,
        Self::IssuerMaster,
    ];

    /// Parse the usage character of a header
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'K' => Some(Self::KeyEncryption),
            'P' => Some(Self::PinEncryption),
            'V' => Some(Self::PinVerification),
            'C' => Some(Self::CardVerification),
            'M' => Some(Self::Mac),
            'D' => Some(Self::DataEncryption),
            'm' => Some(Self::IssuerMaster),
            _ => None,
        }
    }

    /// Header character of the usage
    pub const fn as_char(self) -> char {
        match self {
            Self::KeyEncryption => 'K',
            Self::PinEncryption => 'P',
            Self::PinVerification => 'V',
            Self::CardVerification => 'C',
            Self::Mac => 'M',
            Self::DataEncryption => 'D',
            Self::IssuerMaster => 'm',
        }
    }

    /// LMK variant byte of the usage
    pub const fn variant(self) -> u8 {
        match self {
            Self::KeyEncryption => variant::KEY_ENCRYPTION,
            Self::PinEncryption => variant::PIN_ENCRYPTION,
            Self::PinVerification => variant::PIN_VERIFICATION,
            Self::CardVerification => variant::CARD_VERIFICATION,
            Self::Mac => variant::MAC,
            Self::DataEncryption => variant::DATA_ENCRYPTION,
            Self::IssuerMaster => variant::ISSUER_MASTER,
        }
    }
}

/// Usage and optional qualifier a command requires of a key block
///
/// A role without a qualifier accepts any header of its usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRole {
    usage: KeyUsage,
    qualifier: Option<char>,
}

impl KeyRole {
    /// Key encryption key
    pub const KEK: Self = Self::new(KeyUsage::KeyEncryption);
    /// PIN encryption key
    pub const KPE: Self = Self::new(KeyUsage::PinEncryption);
    /// IBM 3624 PIN verification key
    pub const PVK_IBM: Self = Self::qualified(KeyUsage::PinVerification, '3');
    /// Visa PVV PIN verification key
    pub const PVK_VISA: Self = Self::qualified(KeyUsage::PinVerification, 'V');
    /// Card verification key
    pub const CVK: Self = Self::new(KeyUsage::CardVerification);
    /// Issuer master key for application cryptograms
    pub const IMK_AC: Self = Self::qualified(KeyUsage::IssuerMaster, 'E');
    /// Issuer master key for secure messaging integrity
    pub const IMK_SMI: Self = Self::qualified(KeyUsage::IssuerMaster, 'I');
    /// Issuer master key for secure messaging confidentiality
    pub const IMK_SMC: Self = Self::qualified(KeyUsage::IssuerMaster, 'C');

    /// Role accepting any qualifier
    pub const fn new(usage: KeyUsage) -> Self {
        Self {
            usage,
            qualifier: None,
        }
    }

    /// Role accepting one qualifier only
    pub const fn qualified(usage: KeyUsage, qualifier: char) -> Self {
        Self {
            usage,
            qualifier: Some(qualifier),
        }
    }

    /// Required usage
    pub const fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Whether a header fits this role
    pub fn accepts(&self, header: &Header) -> bool {
        header.usage() == self.usage && self.qualifier.is_none_or(|q| q == header.qualifier())
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.usage)?;
        if let Some(qualifier) = self.qualifier {
            write!(f, "{qualifier}")?;
        }
        Ok(())
    }
}

/// Validated key block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    raw: [u8; header::LEN],
    usage: KeyUsage,
}

impl Header {
    /// Parse an 8 character header
    pub fn parse(text: &str) -> Result<Self> {
        let raw: [u8; header::LEN] = text
            .as_bytes()
            .try_into()
            .map_err(|_| Error::MalformedCommand(format!("key block header {text:?}")))?;
        if !raw.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::MalformedCommand(format!(
                "key block header {text:?} is not alphanumeric"
            )));
        }

        let version = char::from(raw[0]);
        if version != header::VERSION_MAC && version != header::VERSION_KCV {
            return Err(Error::MalformedCommand(format!(
                "unknown key block version {version}"
            )));
        }
        let usage = KeyUsage::from_char(char::from(raw[1])).ok_or_else(|| {
            Error::MalformedCommand(format!("unknown key usage {}", char::from(raw[1])))
        })?;

        Ok(Self { raw, usage })
    }

    /// Version character
    pub const fn version(&self) -> char {
        self.raw[0] as char
    }

    /// Key usage
    pub const fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Algorithm or usage qualifier, e.g. `3` for an IBM 3624 PVK
    pub const fn qualifier(&self) -> char {
        self.raw[2] as char
    }

    /// Mode of use
    pub const fn mode(&self) -> char {
        self.raw[3] as char
    }

    /// Exportability flag
    pub const fn exportability(&self) -> char {
        self.raw[4] as char
    }

    /// True for blocks protected by a MAC rather than a KCV
    pub const fn is_mac_protected(&self) -> bool {
        self.version() == header::VERSION_MAC
    }

    /// Raw header bytes, used as the CBC IV of the encrypted key
    pub const fn as_bytes(&self) -> &[u8; header::LEN] {
        &self.raw
    }

    /// Header text
    pub fn as_str(&self) -> &str {
        // Alphanumeric ASCII was checked in `parse`
        std::str::from_utf8(&self.raw).unwrap_or_default()
    }
}

impl FromStr for Header {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encrypted, integrity protected key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    header: Header,
    encrypted: Vec<u8>,
    check: Block,
}

impl KeyBlock {
    /// Encrypt a clear key under the LMK variant of `header`'s usage
    pub fn encode(header: Header, key: &ClearKey, lmk: &LmkTable) -> Result<Self> {
        let encrypted = crypto::encrypt_cbc(
            lmk.variant_key(header.usage()),
            header.as_bytes(),
            key.as_bytes(),
        )?;
        let check = if header.is_mac_protected() {
            block_mac(&header, &encrypted, lmk)?
        } else {
            crypto::encrypt_block(key.as_bytes(), &Block::default())?
        };

        debug!(header = %header, len = key.len(), "encoded key block");
        Ok(Self {
            header,
            encrypted,
            check,
        })
    }

    /// Header of the block
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Key usage from the header
    pub const fn usage(&self) -> KeyUsage {
        self.header.usage()
    }

    /// Encrypted key bytes
    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted
    }

    /// Embedded check value or MAC
    pub const fn check_value(&self) -> &Block {
        &self.check
    }

    /// Recompute the integrity tag and decrypt the key
    ///
    /// A tag mismatch fails with [`Error::KeyBlockIntegrity`]; the key is never
    /// returned unverified.
    pub fn decrypt_key(&self, lmk: &LmkTable) -> Result<ClearKey> {
        if self.header.is_mac_protected() && block_mac(&self.header, &self.encrypted, lmk)? != self.check
        {
            debug!(header = %self.header, "key block MAC mismatch");
            return Err(Error::KeyBlockIntegrity);
        }

        let clear = zeroize::Zeroizing::new(crypto::decrypt_cbc(
            lmk.variant_key(self.usage()),
            self.header.as_bytes(),
            &self.encrypted,
        )?);
        let key = ClearKey::new(&clear)?;

        if !self.header.is_mac_protected()
            && crypto::encrypt_block(key.as_bytes(), &Block::default())? != self.check
        {
            debug!(header = %self.header, "key block KCV mismatch");
            return Err(Error::KeyBlockIntegrity);
        }
        Ok(key)
    }

    /// Verify the integrity tag without keeping the key
    pub fn verify(&self, lmk: &LmkTable) -> Result<()> {
        self.decrypt_key(lmk).map(drop)
    }
}

impl FromStr for KeyBlock {
    type Err = Error;

    /// Parse the text form; integrity is checked on decryption
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',');
        let (Some(header), Some(encrypted), Some(check), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::MalformedCommand(
                "key block must have three comma separated parts".into(),
            ));
        };

        let header = Header::parse(header)?;
        let encrypted = codec::decode(encrypted)?;
        if !matches!(encrypted.len(), 8 | 16 | 24) {
            return Err(Error::InvalidKeyLength(encrypted.len()));
        }
        let check = codec::decode_array(check)?;

        Ok(Self {
            header,
            encrypted,
            check,
        })
    }
}

impl fmt::Display for KeyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.header,
            codec::encode(&self.encrypted),
            codec::encode(self.check)
        )
    }
}

fn block_mac(header: &Header, encrypted: &[u8], lmk: &LmkTable) -> Result<Block> {
    let mut data = header.as_bytes().to_vec();
    data.extend_from_slice(encrypted);
    let mac = crypto::mac_alg3(lmk.block_mac_key(), &crypto::pad_iso7816(&data), 8)?;

    let mut out = Block::default();
    out.copy_from_slice(&mac);
    Ok(out)
}
