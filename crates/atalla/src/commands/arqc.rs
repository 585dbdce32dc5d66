//! Verify ARQC and generate ARPC (`350`)
//!
//! The sub-mode in field 1 selects the card scheme:
//!
//! | Mode | Scheme | Session key | ARQC padding | ARPC |
//! |---|---|---|---|---|
//! | `0` | supplied diversification | `r` from the request | zeros | method 1, ICC master key |
//! | `1` | MasterCard M/Chip | common session key from ATC | ISO 7816-4 | method 1, session key |
//! | `2` | Visa CVN 10 | none, ICC master key | zeros | method 1, ICC master key |
//! | `3` | Visa CVN 18 | common session key from ATC | ISO 7816-4 | method 2, session key |
//!
//! ```text
//! <350#0#IMK#PAN#PSN#diversification#ARQC#data#ARC#>
//! <350#1#IMK#PAN#PSN#ATC#ARQC#data#ARC#>
//! <350#2#IMK#PAN#PSN#ARQC#data#ARC#>
//! <350#3#IMK#PAN#PSN#ATC#ARQC#data#CSU#[proprietary data]#>
//!     ->  <450#Y|N#ARPC#check digits of IMK#>
//! ```
//!
//! A mismatching ARQC is answered with `N` and an empty ARPC.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    Result, Simulator,
    commands::HsmCommand,
    constants::opcode,
    crypto::{Block, ClearKey},
    emv::{self, DataPadding},
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::Pan,
    util::codec,
};

/// Longest transaction data accepted
const MAX_DATA_LEN: usize = 255;

/// Card identification shared by every mode
#[derive(Debug, Clone)]
struct CardKeys {
    imk: KeyBlock,
    pan: Pan,
    psn: String,
}

impl CardKeys {
    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            imk: request.key_block(2, "IMK")?,
            pan: request.pan(3)?,
            psn: match request.optional(4) {
                Some(_) => request.decimal(4, "PSN", 1..=2)?.to_string(),
                None => String::new(),
            },
        })
    }

    /// Open the IMK and derive the ICC master key
    fn derive(&self, simulator: &Simulator) -> Result<(ClearKey, ClearKey)> {
        let imk = simulator.open_key(&self.imk, &[KeyRole::IMK_AC])?;
        let master_key = emv::icc_master_key(imk.as_bytes(), &self.pan, &self.psn)?;
        Ok((imk, master_key))
    }
}

fn transaction_data(request: &Request, index: usize) -> Result<Vec<u8>> {
    request.hex(index, "transaction data", 1..=MAX_DATA_LEN)
}

fn respond(simulator: &Simulator, imk: &ClearKey, arpc: Option<&[u8]>) -> Result<Response> {
    debug!(matched = arpc.is_some(), "ARQC verification");
    Ok(Response::to(opcode::VERIFY_ARQC)
        .with_flag(arpc.is_some())
        .with(arpc.map(codec::encode).unwrap_or_default())
        .with(simulator.kcv(imk)?))
}

/// ARQC with a supplied session key diversification value
#[derive(Debug, Clone)]
pub struct VerifyArqc {
    card: CardKeys,
    diversification: Block,
    arqc: Block,
    data: Vec<u8>,
    arc: [u8; 2],
}

impl HsmCommand for VerifyArqc {
    const OPCODE: &'static str = opcode::VERIFY_ARQC;
    const MODES: &'static [&'static str] = &["0"];
    const ARITY: RangeInclusive<usize> = 9..=9;

    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            card: CardKeys::from_request(request)?,
            diversification: request.hex_array(5, "diversification")?,
            arqc: request.hex_array(6, "ARQC")?,
            data: transaction_data(request, 7)?,
            arc: request.hex_array(8, "ARC")?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (imk, master_key) = self.card.derive(simulator)?;
        let session_key = emv::session_key(&master_key, &self.diversification)?;
        let arpc = if emv::arqc(&session_key, &self.data, DataPadding::Zeros)? == self.arqc {
            Some(emv::arpc_method1(&master_key, &self.arqc, &self.arc)?)
        } else {
            None
        };
        respond(simulator, &imk, arpc.as_ref().map(|a| &a[..]))
    }
}

/// MasterCard M/Chip ARQC with an ATC based session key
#[derive(Debug, Clone)]
pub struct MasterCardArqc {
    card: CardKeys,
    atc: [u8; 2],
    arqc: Block,
    data: Vec<u8>,
    arc: [u8; 2],
}

impl HsmCommand for MasterCardArqc {
    const OPCODE: &'static str = opcode::VERIFY_ARQC;
    const MODES: &'static [&'static str] = &["1"];
    const ARITY: RangeInclusive<usize> = 9..=9;

    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            card: CardKeys::from_request(request)?,
            atc: request.hex_array(5, "ATC")?,
            arqc: request.hex_array(6, "ARQC")?,
            data: transaction_data(request, 7)?,
            arc: request.hex_array(8, "ARC")?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (imk, master_key) = self.card.derive(simulator)?;
        let session_key = emv::common_session_key(&master_key, &self.atc)?;
        let arpc = if emv::arqc(&session_key, &self.data, DataPadding::Iso7816)? == self.arqc {
            Some(emv::arpc_method1(&session_key, &self.arqc, &self.arc)?)
        } else {
            None
        };
        respond(simulator, &imk, arpc.as_ref().map(|a| &a[..]))
    }
}

/// Visa CVN 10 ARQC, MAC'd directly under the ICC master key
#[derive(Debug, Clone)]
pub struct VisaCvn10Arqc {
    card: CardKeys,
    arqc: Block,
    data: Vec<u8>,
    arc: [u8; 2],
}

impl HsmCommand for VisaCvn10Arqc {
    const OPCODE: &'static str = opcode::VERIFY_ARQC;
    const MODES: &'static [&'static str] = &["2"];
    const ARITY: RangeInclusive<usize> = 8..=8;

    fn from_request(request: &Request) -> Result<Self> {
        Ok(Self {
            card: CardKeys::from_request(request)?,
            arqc: request.hex_array(5, "ARQC")?,
            data: transaction_data(request, 6)?,
            arc: request.hex_array(7, "ARC")?,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (imk, master_key) = self.card.derive(simulator)?;
        let arpc = if emv::arqc(&master_key, &self.data, DataPadding::Zeros)? == self.arqc {
            Some(emv::arpc_method1(&master_key, &self.arqc, &self.arc)?)
        } else {
            None
        };
        respond(simulator, &imk, arpc.as_ref().map(|a| &a[..]))
    }
}

/// Visa CVN 18 ARQC with a method 2 ARPC
#[derive(Debug, Clone)]
pub struct VisaCvn18Arqc {
    card: CardKeys,
    atc: [u8; 2],
    arqc: Block,
    data: Vec<u8>,
    csu: [u8; 4],
    proprietary: Vec<u8>,
}

impl HsmCommand for VisaCvn18Arqc {
    const OPCODE: &'static str = opcode::VERIFY_ARQC;
    const MODES: &'static [&'static str] = &["3"];
    const ARITY: RangeInclusive<usize> = 9..=10;

    fn from_request(request: &Request) -> Result<Self> {
        let proprietary = match request.optional(9) {
            Some(_) => request.hex(9, "proprietary authentication data", 1..=8)?,
            None => Vec::new(),
        };
        Ok(Self {
            card: CardKeys::from_request(request)?,
            atc: request.hex_array(5, "ATC")?,
            arqc: request.hex_array(6, "ARQC")?,
            data: transaction_data(request, 7)?,
            csu: request.hex_array(8, "CSU")?,
            proprietary,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let (imk, master_key) = self.card.derive(simulator)?;
        let session_key = emv::common_session_key(&master_key, &self.atc)?;
        let arpc = if emv::arqc(&session_key, &self.data, DataPadding::Iso7816)? == self.arqc {
            Some(emv::arpc_method2(
                &session_key,
                &self.arqc,
                &self.csu,
                &self.proprietary,
            )?)
        } else {
            None
        };
        respond(simulator, &imk, arpc.as_deref())
    }
}
