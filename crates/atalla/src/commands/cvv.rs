//! Generate and Verify CVV (`5D` / `5E` mode `3`)
//!
//! ```text
//! <5D#3#CVK#card data#[length]#>  ->  <6D#CVV#check digits of CVK#>
//! <5E#3#CVK#card data#CVV#>       ->  <6E#Y|N#check digits of CVK#>
//! ```
//!
//! Card data is PAN, expiry and service code, at most 32 digits. A CVV key
//! block may be a card verification key or an issuer master key.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    Result, Simulator,
    card::{self, CVV_DATA_DIGITS, MAX_CVV_LENGTH},
    commands::HsmCommand,
    constants::{DEFAULT_CVV_LENGTH, opcode},
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
};

/// Roles accepted for CVV keys
pub(crate) const CVK_ROLES: &[KeyRole] = &[KeyRole::CVK, KeyRole::IMK_AC];

/// Generate a card verification value
#[derive(Debug, Clone)]
pub struct GenerateCvv {
    cvk: KeyBlock,
    data: String,
    length: usize,
}

impl HsmCommand for GenerateCvv {
    const OPCODE: &'static str = opcode::GENERATE_CVV;
    const MODES: &'static [&'static str] = &["3"];
    const ARITY: RangeInclusive<usize> = 4..=5;

    fn from_request(request: &Request) -> Result<Self> {
        let cvk = request.key_block(2, "CVK")?;
        let data = request.decimal(3, "card data", 1..=CVV_DATA_DIGITS)?.to_string();
        let length = match request.optional(4) {
            Some(_) => request.number(4, "CVV length", 1..=MAX_CVV_LENGTH)?,
            None => DEFAULT_CVV_LENGTH,
        };
        Ok(Self { cvk, data, length })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let cvk = simulator.open_key(&self.cvk, CVK_ROLES)?;
        let value = card::cvv(cvk.as_bytes(), &self.data, self.length)?;
        Ok(Response::to(Self::OPCODE)
            .with(value)
            .with(simulator.kcv(&cvk)?))
    }
}

/// Verify a card verification value
#[derive(Debug, Clone)]
pub struct VerifyCvv {
    cvk: KeyBlock,
    data: String,
    cvv: String,
}

impl HsmCommand for VerifyCvv {
    const OPCODE: &'static str = opcode::VERIFY_CVV;
    const MODES: &'static [&'static str] = &["3"];
    const ARITY: RangeInclusive<usize> = 5..=5;

    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            cvk: request.key_block(2, "CVK")?,
            data: request
                .decimal(3, "card data", 1..=CVV_DATA_DIGITS)?
                .to_string(),
            cvv: request.decimal(4, "CVV", 1..=MAX_CVV_LENGTH)?.to_string(),
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let cvk = simulator.open_key(&self.cvk, CVK_ROLES)?;
        let matched = card::verify_cvv(cvk.as_bytes(), &self.data, &self.cvv)?;
        debug!(matched, "CVV verification");
        Ok(Response::to(Self::OPCODE)
            .with_flag(matched)
            .with(simulator.kcv(&cvk)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const DATA: &str = "41234567890123458701101";

    #[test]
    fn test_generate_default_length() {
        let sim = Simulator::new();
        let cvk = sim.as_akb(Simulator::IMK_ARQC).unwrap();
        let response = sim.execute(&format!("<5D#3#{cvk}#{DATA}#>")).unwrap();
        assert_eq!(response.to_string(), "<6D#56149820#08D7#>");
    }

    #[test]
    fn test_generate_three_digits() {
        let sim = Simulator::new();
        let cvk = sim
            .as_akb("1CDNE000,0123456789ABCDEF0123456789ABCDEF")
            .unwrap();
        let response = sim
            .execute(&format!("<5D#3#{cvk}#41234567890123452512101#3#>"))
            .unwrap();
        assert_eq!(response.field(1), Some("510"));
    }

    #[test]
    fn test_verify() {
        let sim = Simulator::new();
        let cvk = sim.as_akb(Simulator::IMK_ARQC).unwrap();
        let ok = sim.execute(&format!("<5E#3#{cvk}#{DATA}#561#>")).unwrap();
        assert_eq!(ok.to_string(), "<6E#Y#08D7#>");
        let bad = sim.execute(&format!("<5E#3#{cvk}#{DATA}#562#>")).unwrap();
        assert_eq!(bad.field(1), Some("N"));
    }

    #[test]
    fn test_rejects_pin_key() {
        let sim = Simulator::new();
        let kpe = sim.as_akb("1PUNE000,1111111111111111").unwrap();
        assert!(matches!(
            sim.execute(&format!("<5D#3#{kpe}#{DATA}#>")),
            Err(Error::KeyUsage { .. })
        ));
        assert!(matches!(
            sim.execute(&format!("<5D#3#{kpe}#{DATA}#0#>")),
            Err(Error::MalformedCommand(_))
        ));
    }
}
