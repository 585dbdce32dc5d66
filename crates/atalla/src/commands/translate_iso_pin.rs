//! Translate ISO PIN Block (`335`)
//!
//! Moves a PIN between ISO 9564 formats 0 to 3, keys and account numbers.
//!
//! ```text
//! <335#in format#KPE in#PIN block#PAN in#out format#KPE out#PAN out#>
//!     ->  <435#PIN block#check digits of KPE out#>
//! ```
//!
//! The PAN fields may be empty for formats that do not use one.

use std::ops::RangeInclusive;

use zeroize::Zeroizing;

use crate::{
    Error, Result, Simulator,
    commands::HsmCommand,
    constants::opcode,
    crypto::{self, Block},
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::{Pan, PinBlock, PinFormat},
    util::codec,
};

/// Translate a PIN block between ISO formats
#[derive(Debug, Clone)]
pub struct TranslateIsoPinBlock {
    format_in: PinFormat,
    kpe_in: KeyBlock,
    pin_block: Block,
    pan_in: Option<Pan>,
    format_out: PinFormat,
    kpe_out: KeyBlock,
    pan_out: Option<Pan>,
}

fn format_field(request: &Request, index: usize, name: &str) -> Result<PinFormat> {
    PinFormat::parse(request.text(index, name)?).map_err(|e| Error::field(index, name, e))
}

fn pan_field(request: &Request, index: usize, format: PinFormat) -> Result<Option<Pan>> {
    match request.optional(index) {
        Some(_) => request.pan(index).map(Some),
        None if format.uses_pan() => Err(Error::field(
            index,
            "PAN",
            "required by the PIN block format",
        )),
        None => Ok(None),
    }
}

impl HsmCommand for TranslateIsoPinBlock {
    const OPCODE: &'static str = opcode::TRANSLATE_ISO_PIN_BLOCK;
    const ARITY: RangeInclusive<usize> = 8..=8;

    fn from_request(request: &Request) -> Result<Self> {
        let format_in = format_field(request, 1, "incoming format")?;
        let format_out = format_field(request, 5, "outgoing format")?;
        Ok(Self {
            format_in,
            kpe_in: request.key_block(2, "incoming KPE")?,
            pin_block: request.hex_array(3, "PIN block")?,
            pan_in: pan_field(request, 4, format_in)?,
            format_out,
            kpe_out: request.key_block(6, "outgoing KPE")?,
            pan_out: pan_field(request, 7, format_out)?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let kpe_in = simulator.open_key(&self.kpe_in, &[KeyRole::KPE])?;
        let kpe_out = simulator.open_key(&self.kpe_out, &[KeyRole::KPE])?;

        let clear = Zeroizing::new(crypto::decrypt_block(kpe_in.as_bytes(), &self.pin_block)?);
        let block = PinBlock::decode_as(self.format_in, &clear, self.pan_in.as_ref())?;
        let translated = PinBlock::new(self.format_out, block.pin().clone())
            .encrypt(kpe_out.as_bytes(), self.pan_out.as_ref())?;

        Ok(Response::to(Self::OPCODE)
            .with(codec::encode(translated))
            .with(simulator.kcv(&kpe_out)?))
    }
}
