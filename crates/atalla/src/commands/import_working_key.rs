//! Import Working Key (`11`)
//!
//! Takes a working key encrypted under a key encryption key and returns it as
//! a key block under the LMK.
//!
//! ```text
//! <11#header#KEK#key under KEK#>  ->  <21#key block#check digits#>
//! ```

use std::ops::RangeInclusive;

use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    Error, Result, Simulator,
    commands::HsmCommand,
    constants::opcode,
    crypto::{self, ClearKey},
    key_block::{Header, KeyBlock, KeyRole},
    message::{Request, Response},
};

/// Import a working key under a KEK
#[derive(Debug, Clone)]
pub struct ImportWorkingKey {
    header: Header,
    kek: KeyBlock,
    encrypted_key: Vec<u8>,
}

impl HsmCommand for ImportWorkingKey {
    const OPCODE: &'static str = opcode::IMPORT_WORKING_KEY;
    const ARITY: RangeInclusive<usize> = 4..=4;

    fn from_request(request: &Request) -> Result<Self> {
        let header = Header::parse(request.text(1, "header")?)
            .map_err(|e| Error::field(1, "header", e))?;
        let kek = request.key_block(2, "KEK")?;
        let encrypted_key = request.hex(3, "working key", 8..=24)?;
        if encrypted_key.len() % 8 != 0 {
            return Err(Error::field(3, "working key", "expected 8, 16 or 24 bytes"));
        }
        Ok(Self {
            header,
            kek,
            encrypted_key,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let kek = simulator.open_key(&self.kek, &[KeyRole::KEK])?;
        let clear = Zeroizing::new(crypto::decrypt_ecb(kek.as_bytes(), &self.encrypted_key)?);
        let key = ClearKey::new(&clear)?;

        let block = simulator.import_key(self.header, &key)?;
        debug!(header = %self.header, "imported working key");
        Ok(Response::to(Self::OPCODE)
            .with(block.to_string())
            .with(simulator.kcv(&key)?))
    }
}
