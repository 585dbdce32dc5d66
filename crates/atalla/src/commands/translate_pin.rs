//! Translate PIN Block, ANSI (`31` mode `1`)
//!
//! Re-encrypts an ANSI X9.8 (ISO format 0) PIN block from one PIN encryption
//! key to another. The PIN never leaves the call.
//!
//! ```text
//! <31#1#KPE in#KPE out#PIN block#PAN#>  ->  <41#PIN block#check digits of KPE out#>
//! ```

use std::ops::RangeInclusive;

use zeroize::Zeroizing;

use crate::{
    Result, Simulator,
    commands::HsmCommand,
    constants::opcode,
    crypto::{self, Block},
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::{Pan, PinBlock, PinFormat},
    util::codec,
};

/// Translate an ANSI PIN block between two keys
#[derive(Debug, Clone)]
pub struct TranslatePinBlock {
    kpe_in: KeyBlock,
    kpe_out: KeyBlock,
    pin_block: Block,
    pan: Pan,
}

impl HsmCommand for TranslatePinBlock {
    const OPCODE: &'static str = opcode::TRANSLATE_PIN_BLOCK;
    const MODES: &'static [&'static str] = &["1"];
    const ARITY: RangeInclusive<usize> = 6..=6;

    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            kpe_in: request.key_block(2, "incoming KPE")?,
            kpe_out: request.key_block(3, "outgoing KPE")?,
            pin_block: request.hex_array(4, "PIN block")?,
            pan: request.pan(5)?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let kpe_in = simulator.open_key(&self.kpe_in, &[KeyRole::KPE])?;
        let kpe_out = simulator.open_key(&self.kpe_out, &[KeyRole::KPE])?;

        let clear = Zeroizing::new(crypto::decrypt_block(kpe_in.as_bytes(), &self.pin_block)?);
        let block = PinBlock::decode_as(PinFormat::Iso0, &clear, Some(&self.pan))?;
        let translated = block.encrypt(kpe_out.as_bytes(), Some(&self.pan))?;

        Ok(Response::to(Self::OPCODE)
            .with(codec::encode(translated))
            .with(simulator.kcv(&kpe_out)?))
    }
}
