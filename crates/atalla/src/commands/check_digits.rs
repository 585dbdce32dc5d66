//! Check Digits (`7E`)
//!
//! ```text
//! <7E#key block#[digits]#>  ->  <8E#check digits#>
//! ```

use std::ops::RangeInclusive;

use crate::{
    Result, Simulator,
    commands::HsmCommand,
    config::{MAX_CHECK_DIGITS, MIN_CHECK_DIGITS},
    constants::opcode,
    key_block::KeyBlock,
    message::{Request, Response},
};

/// Report the check digits of a key block
#[derive(Debug, Clone)]
pub struct CheckDigits {
    key: KeyBlock,
    digits: Option<usize>,
}

impl HsmCommand for CheckDigits {
    const OPCODE: &'static str = opcode::CHECK_DIGITS;
    const ARITY: RangeInclusive<usize> = 2..=3;

    fn from_request(request: &Request) -> Result<Self> {
        let key = request.key_block(1, "key")?;
        let digits = match request.optional(2) {
            Some(_) => Some(request.number(2, "digits", MIN_CHECK_DIGITS..=MAX_CHECK_DIGITS)?),
            None => None,
        };
        Ok(Self { key, digits })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let key = simulator.decrypt_key(&self.key)?;
        let digits = self
            .digits
            .unwrap_or_else(|| simulator.check_digit_count());
        Ok(Response::to(Self::OPCODE).with(key.check_digits(digits)?))
    }
}
