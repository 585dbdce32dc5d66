//! Verify Card and PIN (`3A`)
//!
//! Checks a PIN and a card verification value in one call. Mode `2` verifies
//! the PIN by IBM 3624 offset, mode `V` by Visa PVV.
//!
//! ```text
//! <3A#2#KPE#PIN block#PAN#PVK#table#offset#validation data#CVK#card data#CVV#>
//! <3A#V#KPE#PIN block#PAN#PVK#PVKI#PVV#CVK#card data#CVV#>
//!     ->  <4A#PIN Y|N#CVV Y|N#check digits of PVK#>
//! ```

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    Error, Result, Simulator,
    card::{self, CVV_DATA_DIGITS, MAX_CVV_LENGTH},
    commands::{HsmCommand, cvv::CVK_ROLES},
    constants::{PVV_LENGTH, opcode},
    crypto::{Block, ClearKey},
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::{MAX_PIN_LEN, Pan, Pin, PinBlock},
};

/// Card verification part shared by both modes
#[derive(Debug, Clone)]
struct CardCheck {
    cvk: KeyBlock,
    data: String,
    cvv: String,
}

impl CardCheck {
    fn from_request(request: &Request, first: usize) -> Result<Self> {
        Ok(Self {
            cvk: request.key_block(first, "CVK")?,
            data: request
                .decimal(first + 1, "card data", 1..=CVV_DATA_DIGITS)?
                .to_string(),
            cvv: request
                .decimal(first + 2, "CVV", 1..=MAX_CVV_LENGTH)?
                .to_string(),
        })
    }

    fn verify(&self, simulator: &Simulator) -> Result<bool> {
        let cvk = simulator.open_key(&self.cvk, CVK_ROLES)?;
        card::verify_cvv(cvk.as_bytes(), &self.data, &self.cvv)
    }
}

/// Encrypted PIN with the keys needed to open it
#[derive(Debug, Clone)]
struct EncryptedPin {
    kpe: KeyBlock,
    pin_block: Block,
    pan: Pan,
    pvk: KeyBlock,
}

impl EncryptedPin {
    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            kpe: request.key_block(2, "KPE")?,
            pin_block: request.hex_array(3, "PIN block")?,
            pan: request.pan(4)?,
            pvk: request.key_block(5, "PVK")?,
        })
    }

    fn open(&self, simulator: &Simulator, pvk_role: KeyRole) -> Result<(Pin, ClearKey)> {
        let kpe = simulator.open_key(&self.kpe, &[KeyRole::KPE])?;
        let pvk = simulator.open_key(&self.pvk, &[pvk_role])?;
        let block = PinBlock::decrypt(kpe.as_bytes(), &self.pin_block, Some(&self.pan))?;
        Ok((block.pin().clone(), pvk))
    }
}

fn respond(
    simulator: &Simulator,
    pin_ok: bool,
    card_ok: bool,
    pvk: &ClearKey,
) -> Result<Response> {
    debug!(pin_ok, card_ok, "card and PIN verification");
    Ok(Response::to(opcode::VERIFY_CARD_AND_PIN)
        .with_flag(pin_ok)
        .with_flag(card_ok)
        .with(simulator.kcv(pvk)?))
}

/// Verify a PIN by IBM 3624 offset and a CVV
#[derive(Debug, Clone)]
pub struct VerifyCardAndPinIbm {
    pin: EncryptedPin,
    table: String,
    offset: String,
    validation_data: String,
    card: CardCheck,
}

impl HsmCommand for VerifyCardAndPinIbm {
    const OPCODE: &'static str = opcode::VERIFY_CARD_AND_PIN;
    const MODES: &'static [&'static str] = &["2"];
    const ARITY: RangeInclusive<usize> = 12..=12;

    fn from_request(request: &Request) -> Result<Self> {
        let pin = EncryptedPin::from_request(request)?;
        let validation_data = request.text(8, "validation data")?.to_string();
        card::validation_data(&validation_data, &pin.pan)
            .map_err(|e| Error::field(8, "validation data", e))?;
        Ok(Self {
            table: request.decimal(6, "conversion table", 16..=16)?.to_string(),
            offset: request.decimal(7, "offset", 1..=MAX_PIN_LEN)?.to_string(),
            validation_data,
            card: CardCheck::from_request(request, 9)?,
            pin,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (pin, pvk) = self.pin.open(simulator, KeyRole::PVK_IBM)?;
        let validation = card::validation_data(&self.validation_data, &self.pin.pan)?;
        let pin_ok =
            card::verify_pin_offset(pvk.as_bytes(), &validation, &self.table, &pin, &self.offset)?;
        let card_ok = self.card.verify(simulator)?;
        respond(simulator, pin_ok, card_ok, &pvk)
    }
}

/// Verify a PIN by Visa PVV and a CVV
#[derive(Debug, Clone)]
pub struct VerifyCardAndPinVisa {
    pin: EncryptedPin,
    pvki: char,
    pvv: String,
    card: CardCheck,
}

impl HsmCommand for VerifyCardAndPinVisa {
    const OPCODE: &'static str = opcode::VERIFY_CARD_AND_PIN;
    const MODES: &'static [&'static str] = &["V"];
    const ARITY: RangeInclusive<usize> = 11..=11;

    fn from_request(request: &Request) -> Result<Self> {
        let pvki = request
            .decimal(6, "PVKI", 1..=1)?
            .chars()
            .next()
            .unwrap_or('0');
        Ok(Self {
            pin: EncryptedPin::from_request(request)?,
            pvki,
            pvv: request.decimal(7, "PVV", PVV_LENGTH..=PVV_LENGTH)?.to_string(),
            card: CardCheck::from_request(request, 8)?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (pin, pvk) = self.pin.open(simulator, KeyRole::PVK_VISA)?;
        let pin_ok = card::pvv(pvk.as_bytes(), &self.pin.pan, self.pvki, &pin)? == self.pvv;
        let card_ok = self.card.verify(simulator)?;
        respond(simulator, pin_ok, card_ok, &pvk)
    }
}
