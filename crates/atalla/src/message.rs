//! Request and response framing
//!
//! Atalla messages are `#` delimited fields in an optional `<`..`>` frame:
//!
//! ```text
//! <5D#3#1CDNE000,...,...#41234567890123458701101#>
//! ```
//!
//! Field 0 is the opcode on requests and the response code on responses.
//! Requests are validated once here and then read through typed accessors.

use std::{fmt, ops::RangeInclusive};

use crate::{
    Error, Result,
    constants::{DELIMITER, ERROR_RESPONSE, FRAME_END, FRAME_START},
    key_block::KeyBlock,
    pin::Pan,
    util::codec,
};

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    fields: Vec<String>,
}

impl Request {
    /// Parse a request string
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let body = match (text.strip_prefix(FRAME_START), text.ends_with(FRAME_END)) {
            (Some(inner), true) => &inner[..inner.len() - FRAME_END.len_utf8()],
            (None, false) => text,
            _ => {
                return Err(Error::MalformedCommand(
                    "unbalanced message frame".into(),
                ));
            }
        };
        let body = body.strip_suffix(DELIMITER).unwrap_or(body);
        Self::from_fields(body.split(DELIMITER))
    }

    /// Build a request from an ordered field list, opcode first
    pub fn from_fields<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let opcode = fields.first().map(String::as_str).unwrap_or_default();
        if !(2..=4).contains(&opcode.len()) || !opcode.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::MalformedCommand(format!("invalid opcode {opcode:?}")));
        }
        if fields.iter().any(|f| f.contains(DELIMITER)) {
            return Err(Error::MalformedCommand(
                "field contains the delimiter".into(),
            ));
        }
        Ok(Self { fields })
    }

    /// Opcode in field 0
    pub fn opcode(&self) -> &str {
        &self.fields[0]
    }

    /// Field 1, which selects the sub-mode of multi-mode commands
    pub fn mode(&self) -> Option<&str> {
        self.field(1)
    }

    /// Number of fields including the opcode
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false; a request has at least its opcode
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw field, if present
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Optional field: absent and empty both read as `None`
    pub fn optional(&self, index: usize) -> Option<&str> {
        self.field(index).filter(|f| !f.is_empty())
    }

    /// Required non-empty field
    pub fn text(&self, index: usize, name: &str) -> Result<&str> {
        self.optional(index)
            .ok_or_else(|| Error::field(index, name, "missing"))
    }

    /// Field of decimal digits with a length in `len`
    pub fn decimal(&self, index: usize, name: &str, len: RangeInclusive<usize>) -> Result<&str> {
        let value = self.text(index, name)?;
        if !codec::is_decimal(value) || !len.contains(&value.len()) {
            return Err(Error::field(
                index,
                name,
                format!("expected {} to {} decimal digits", len.start(), len.end()),
            ));
        }
        Ok(value)
    }

    /// Field holding a number in `range`
    pub fn number(&self, index: usize, name: &str, range: RangeInclusive<usize>) -> Result<usize> {
        self.text(index, name)?
            .parse()
            .ok()
            .filter(|n| range.contains(n))
            .ok_or_else(|| {
                Error::field(
                    index,
                    name,
                    format!("expected a number from {} to {}", range.start(), range.end()),
                )
            })
    }

    /// Hex field decoding to a byte count in `len`
    pub fn hex(&self, index: usize, name: &str, len: RangeInclusive<usize>) -> Result<Vec<u8>> {
        let value = self.text(index, name)?;
        let bytes = codec::decode(value).map_err(|e| Error::field(index, name, e))?;
        if !len.contains(&bytes.len()) {
            return Err(Error::field(
                index,
                name,
                format!("expected {} to {} bytes", len.start(), len.end()),
            ));
        }
        Ok(bytes)
    }

    /// Hex field of exactly `N` bytes
    pub fn hex_array<const N: usize>(&self, index: usize, name: &str) -> Result<[u8; N]> {
        let value = self.text(index, name)?;
        if value.len() != N * 2 {
            return Err(Error::field(index, name, format!("expected {} hex digits", N * 2)));
        }
        codec::decode_array(value).map_err(|e| Error::field(index, name, e))
    }

    /// Key block field; integrity is checked when the key is opened
    pub fn key_block(&self, index: usize, name: &str) -> Result<KeyBlock> {
        self.text(index, name)?
            .parse()
            .map_err(|e| Error::field(index, name, e))
    }

    /// Primary account number field
    pub fn pan(&self, index: usize) -> Result<Pan> {
        Pan::parse(self.text(index, "PAN")?).map_err(|e| Error::field(index, "PAN", e))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_framed(f, &self.fields)
    }
}

/// Response code of an opcode: the first hex digit incremented
///
/// `5D` answers with `6D` and `350` with `450`.
pub fn response_code(opcode: &str) -> String {
    let mut chars = opcode.chars();
    let first = chars
        .next()
        .and_then(|c| c.to_digit(16))
        .and_then(|d| char::from_digit((d + 1) % 16, 16))
        .map(|c| c.to_ascii_uppercase());
    match first {
        Some(first) => std::iter::once(first).chain(chars).collect(),
        None => opcode.to_string(),
    }
}

/// A response with its code in field 0
///
/// Empty fields are kept so positions stay significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    fields: Vec<String>,
}

impl Response {
    /// Start a response with the given code
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            fields: vec![code.into()],
        }
    }

    /// Start the response to a request opcode
    pub fn to(opcode: &str) -> Self {
        Self::new(response_code(opcode))
    }

    /// Error reply `<00#CC#>`
    pub fn error(err: &Error) -> Self {
        Self::new(ERROR_RESPONSE).with(err.code())
    }

    /// Append a field
    pub fn with(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Append a verification outcome as `Y` or `N`
    pub fn with_flag(self, matched: bool) -> Self {
        self.with(crate::constants::outcome::flag(matched))
    }

    /// Response code
    pub fn code(&self) -> &str {
        &self.fields[0]
    }

    /// Fields after the response code
    pub fn values(&self) -> &[String] {
        &self.fields[1..]
    }

    /// Raw field, if present
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_framed(f, &self.fields)
    }
}

fn write_framed(f: &mut fmt::Formatter<'_>, fields: &[String]) -> fmt::Result {
    write!(f, "{FRAME_START}")?;
    for field in fields {
        write!(f, "{field}{DELIMITER}")?;
    }
    write!(f, "{FRAME_END}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_framed_and_bare() {
        let framed = Request::parse("<5D#3#KEY#4123#>").unwrap();
        let bare = Request::parse("5D#3#KEY#4123").unwrap();
        assert_eq!(framed, bare);
        assert_eq!(framed.opcode(), "5D");
        assert_eq!(framed.mode(), Some("3"));
        assert_eq!(framed.len(), 4);
        assert_eq!(framed.to_string(), "<5D#3#KEY#4123#>");
    }

    #[test]
    fn test_parse_keeps_empty_fields() {
        let request = Request::parse("<350#0##9901234567890123#>\n").unwrap();
        assert_eq!(request.len(), 4);
        assert_eq!(request.field(2), Some(""));
        assert_eq!(request.optional(2), None);
        assert!(request.text(2, "IMK").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(Request::parse("<5D#3#").is_err());
        assert!(Request::parse("5D#3#>").is_err());
        assert!(Request::parse("").is_err());
        assert!(Request::parse("<#>").is_err());
        assert!(Request::parse("5D!#3").is_err());
        assert!(Request::parse("12345#1").is_err());
    }

    #[test]
    fn test_typed_readers() {
        let request =
            Request::parse("<5D#3#ZZ#41234567890123458701101#3#0123456789ABCDEF#>").unwrap();
        assert_eq!(
            request.decimal(3, "data", 1..=32).unwrap(),
            "41234567890123458701101"
        );
        assert_eq!(request.number(4, "length", 1..=16).unwrap(), 3);
        assert!(request.number(4, "length", 4..=16).is_err());
        assert_eq!(request.hex_array::<8>(5, "ARQC").unwrap().len(), 8);
        assert!(request.hex_array::<4>(5, "ATC").is_err());

        let err = request.key_block(2, "CVK").unwrap_err();
        assert!(err.to_string().contains("field 2 (CVK)"));
    }

    #[test]
    fn test_response_code() {
        assert_eq!(response_code("5D"), "6D");
        assert_eq!(response_code("350"), "450");
        assert_eq!(response_code("11"), "21");
        assert_eq!(response_code("7E"), "8E");
        assert_eq!(response_code("9A"), "AA");
    }

    #[test]
    fn test_response_format() {
        let response = Response::to("350")
            .with_flag(true)
            .with("8AE6E836084B0E80")
            .with("08D7");
        assert_eq!(response.to_string(), "<450#Y#8AE6E836084B0E80#08D7#>");
        assert_eq!(response.code(), "450");
        assert_eq!(response.values().len(), 3);

        let empty = Response::to("3A").with("").with_flag(false);
        assert_eq!(empty.to_string(), "<4A##N#>");
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(&Error::UnsupportedCommand("99".into()));
        assert_eq!(response.to_string(), "<00#02#>");
    }
}
