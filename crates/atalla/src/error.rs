use thiserror::Error;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for simulator operations
///
/// Only protocol and integrity failures are errors. A PIN, CVV or cryptogram
/// that simply does not match is reported as an `N` field in a successful
/// response.
#[derive(Debug, Error)]
pub enum Error {
    /// Request framing, arity or field content is invalid
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// No command is registered for the opcode (and sub-mode)
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    /// A key block failed its check value or MAC verification
    #[error("Key block integrity check failed")]
    KeyBlockIntegrity,

    /// ISO 7816-4 padding marker missing
    #[error("Invalid padding")]
    Padding,

    /// Key material is not single, double or triple length
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    /// Block cipher input is not a whole number of blocks
    #[error("Invalid data length: expected a multiple of {expected}, got {actual}")]
    InvalidDataLength {
        /// Required block multiple
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key block usage or qualifier does not fit the role it was supplied for
    #[error("Key usage {actual} not permitted, expected {expected}")]
    KeyUsage {
        /// Usage and qualifier pairs the role accepts
        expected: String,
        /// Usage and qualifier found in the key block header
        actual: String,
    },

    /// MAC output length outside 1 to 8 bytes
    #[error("Invalid MAC length: {0} bytes")]
    InvalidMacLength(usize),

    /// A decrypted PIN block does not decode
    #[error("Invalid PIN block: {0}")]
    InvalidPinBlock(&'static str),

    /// Simulator configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Build a malformed command error for a request field
    pub fn field(index: usize, name: &str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedCommand(format!("field {index} ({name}): {reason}"))
    }

    /// Two character code used in `00` error responses
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedCommand(_) => "01",
            Self::UnsupportedCommand(_) => "02",
            Self::KeyBlockIntegrity => "03",
            Self::Padding => "04",
            Self::InvalidKeyLength(_) => "05",
            Self::InvalidDataLength { .. } => "06",
            Self::KeyUsage { .. } => "07",
            Self::InvalidPinBlock(_) => "08",
            Self::Config(_) => "09",
            Self::InvalidMacLength(_) => "10",
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Self::MalformedCommand(format!("invalid hex: {err}"))
    }
}
