//! Change PIN, IBM 3624 (`37` mode `2`)
//!
//! Verifies the old PIN against its offset and, when it matches, returns the
//! offset of the new PIN.
//!
//! ```text
//! <37#2#KPE#old PIN block#new PIN block#PAN#PVK#table#old offset#validation data#
//!     minimum PIN length#[new offset length]#>
//!     ->  <47#Y|N#new offset#check digits of PVK#>
//! ```
//!
//! The new offset field is empty when the old PIN fails or the new PIN is
//! shorter than the minimum or the offset length.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    Error, Result, Simulator,
    card,
    commands::HsmCommand,
    constants::opcode,
    crypto::Block,
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::{MAX_PIN_LEN, MIN_PIN_LEN, Pan, PinBlock},
};

/// Change a PIN verified by IBM 3624 offset
#[derive(Debug, Clone)]
pub struct ChangePin {
    kpe: KeyBlock,
    old_pin_block: Block,
    new_pin_block: Block,
    pan: Pan,
    pvk: KeyBlock,
    table: String,
    old_offset: String,
    validation_data: String,
    min_pin_len: usize,
    new_offset_len: Option<usize>,
}

impl HsmCommand for ChangePin {
    const OPCODE: &'static str = opcode::CHANGE_PIN;
    const MODES: &'static [&'static str] = &["2"];
    const ARITY: RangeInclusive<usize> = 11..=12;

    fn from_request(request: &Request) -> Result<Self> {
        let pan = request.pan(5)?;
        let validation_data = request.text(9, "validation data")?.to_string();
        card::validation_data(&validation_data, &pan)
            .map_err(|e| Error::field(9, "validation data", e))?;
        let new_offset_len = match request.optional(11) {
            Some(_) => Some(request.number(11, "new offset length", 1..=MAX_PIN_LEN)?),
            None => None,
        };

        Ok(Self {
            kpe: request.key_block(2, "KPE")?,
            old_pin_block: request.hex_array(3, "old PIN block")?,
            new_pin_block: request.hex_array(4, "new PIN block")?,
            pan,
            pvk: request.key_block(6, "PVK")?,
            table: request.decimal(7, "conversion table", 16..=16)?.to_string(),
            old_offset: request.decimal(8, "old offset", 1..=MAX_PIN_LEN)?.to_string(),
            validation_data,
            min_pin_len: request.number(10, "minimum PIN length", MIN_PIN_LEN..=MAX_PIN_LEN)?,
            new_offset_len,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let kpe = simulator.open_key(&self.kpe, &[KeyRole::KPE])?;
        let pvk = simulator.open_key(&self.pvk, &[KeyRole::PVK_IBM])?;
        let old = PinBlock::decrypt(kpe.as_bytes(), &self.old_pin_block, Some(&self.pan))?;
        let new = PinBlock::decrypt(kpe.as_bytes(), &self.new_pin_block, Some(&self.pan))?;
        let validation = card::validation_data(&self.validation_data, &self.pan)?;

        let verified = card::verify_pin_offset(
            pvk.as_bytes(),
            &validation,
            &self.table,
            old.pin(),
            &self.old_offset,
        )?;
        let offset_len = self.new_offset_len.unwrap_or(self.old_offset.len());
        let acceptable = new.pin().len() >= self.min_pin_len && new.pin().len() >= offset_len;

        let new_offset = if verified && acceptable {
            let natural = card::natural_pin(pvk.as_bytes(), &validation, &self.table, offset_len)?;
            card::pin_offset(&natural, new.pin())
        } else {
            String::new()
        };
        debug!(verified, acceptable, "PIN change");

        Ok(Response::to(Self::OPCODE)
            .with_flag(verified && acceptable)
            .with(new_offset)
            .with(simulator.kcv(&pvk)?))
    }
}
