//! Constants used across the simulator
//!
//! This module contains the opcodes of the supported command set, the LMK
//! variant bytes applied per key usage and the framing characters of the
//! Atalla message format.

/// Request opcodes
pub mod opcode {
    /// Import a working key encrypted under a KEK
    pub const IMPORT_WORKING_KEY: &str = "11";
    /// Translate an ANSI PIN block between two PIN encryption keys
    pub const TRANSLATE_PIN_BLOCK: &str = "31";
    /// Change a PIN verified by IBM 3624 offset
    pub const CHANGE_PIN: &str = "37";
    /// Verify a card security code and a PIN in one call
    pub const VERIFY_CARD_AND_PIN: &str = "3A";
    /// Translate a PIN block between ISO formats
    pub const TRANSLATE_ISO_PIN_BLOCK: &str = "335";
    /// Verify an ARQC and generate an ARPC
    pub const VERIFY_ARQC: &str = "350";
    /// Build an EMV PIN change script
    pub const EMV_PIN_CHANGE: &str = "352";
    /// Generate a card verification value
    pub const GENERATE_CVV: &str = "5D";
    /// Verify a card verification value
    pub const VERIFY_CVV: &str = "5E";
    /// Return the check digits of a key block
    pub const CHECK_DIGITS: &str = "7E";
}

/// Response code of error replies
pub const ERROR_RESPONSE: &str = "00";

/// Field delimiter of requests and responses
pub const DELIMITER: char = '#';

/// Opening frame character
pub const FRAME_START: char = '<';

/// Closing frame character
pub const FRAME_END: char = '>';

/// Verification outcome fields
pub mod outcome {
    /// Verification passed
    pub const MATCH: &str = "Y";
    /// Verification failed
    pub const MISMATCH: &str = "N";

    /// Outcome field for a comparison result
    pub const fn flag(matched: bool) -> &'static str {
        if matched { MATCH } else { MISMATCH }
    }
}

/// Key block header layout
pub mod header {
    /// Header length in characters
    pub const LEN: usize = 8;
    /// Version of MAC protected key blocks
    pub const VERSION_MAC: char = '1';
    /// Version of KCV protected key blocks
    pub const VERSION_KCV: char = '0';
}

/// LMK variant bytes, XORed into the first byte of each LMK component
pub mod variant {
    /// Key encryption keys
    pub const KEY_ENCRYPTION: u8 = 0x08;
    /// PIN encryption keys
    pub const PIN_ENCRYPTION: u8 = 0x24;
    /// PIN verification keys
    pub const PIN_VERIFICATION: u8 = 0x42;
    /// Card verification keys
    pub const CARD_VERIFICATION: u8 = 0x5A;
    /// MAC keys
    pub const MAC: u8 = 0x6C;
    /// Data encryption keys
    pub const DATA_ENCRYPTION: u8 = 0x7E;
    /// EMV issuer master keys
    pub const ISSUER_MASTER: u8 = 0xA6;
    /// Key block MAC key
    pub const BLOCK_MAC: u8 = 0xC8;
}

/// Built-in simulated LMK (triple length)
pub const DEFAULT_MASTER_KEY: [u8; 24] = [
    0x2F, 0x8A, 0x57, 0xC1, 0xE3, 0x09, 0x4B, 0xD6, 0x7A, 0x1C, 0x05, 0xE2, 0xB4, 0xF9, 0x3D, 0x68,
    0xC5, 0x01, 0x6E, 0x9F, 0x3B, 0x27, 0xA8, 0x4D,
];

/// Check digits emitted in responses unless configured otherwise
pub const DEFAULT_CHECK_DIGITS: usize = 4;

/// Digits of a generated CVV unless the request asks otherwise
pub const DEFAULT_CVV_LENGTH: usize = 8;

/// Digits of a Visa PVV
pub const PVV_LENGTH: usize = 4;

/// Bytes kept from a method 2 ARPC
pub const ARPC_METHOD2_LEN: usize = 4;
