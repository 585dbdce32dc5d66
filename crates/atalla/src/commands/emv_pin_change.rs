//! EMV PIN change script (`352`)
//!
//! Verifies the cardholder's current PIN by IBM 3624 offset and, when it
//! matches, builds the enciphered PIN data and MAC of an issuer script that
//! changes the offline PIN on the card. Session keys come from the ATC
//! (mode `0`) or from a supplied diversification value whose first two bytes
//! are the ATC (mode `1`).
//!
//! ```text
//! <352#0|1#IMK-SMI#IMK-SMC#PAN#PSN#ATC|diversification#ARQC#KPE#new PIN block#
//!     script header#current PIN block#PVK#table#current offset#validation data#
//!     [include current PIN]#>
//!     ->  <452#Y|N#enciphered PIN data#MAC#check digits of IMK-SMI#>
//! ```
//!
//! The script fields are empty when the current PIN fails. With the last
//! field set to `1` the script data also carries the current PIN, for cards
//! that check it before accepting the change.

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    Error, Result, Simulator,
    card,
    commands::HsmCommand,
    constants::opcode,
    crypto::Block,
    emv,
    key_block::{KeyBlock, KeyRole},
    message::{Request, Response},
    pin::{MAX_PIN_LEN, Pan, PinBlock},
    util::codec,
};

/// Longest script command header accepted
const MAX_HEADER_LEN: usize = 16;

/// How the session keys are diversified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Diversification {
    /// Common session key from the ATC
    Atc([u8; 2]),
    /// Supplied value, ATC in the first two bytes
    Supplied(Block),
}

impl Diversification {
    fn atc(&self) -> [u8; 2] {
        match self {
            Self::Atc(atc) => *atc,
            Self::Supplied(r) => [r[0], r[1]],
        }
    }

    fn block(&self) -> Block {
        match self {
            Self::Atc(atc) => emv::atc_block(atc),
            Self::Supplied(r) => *r,
        }
    }
}

/// Issuer script data for an offline PIN change
#[derive(Debug, Clone)]
pub struct EmvPinChange {
    smi: KeyBlock,
    smc: KeyBlock,
    pan: Pan,
    psn: String,
    diversification: Diversification,
    arqc: Block,
    kpe: KeyBlock,
    new_pin_block: Block,
    script_header: Vec<u8>,
    current_pin_block: Block,
    pvk: KeyBlock,
    table: String,
    current_offset: String,
    validation_data: String,
    include_current_pin: bool,
}

impl HsmCommand for EmvPinChange {
    const OPCODE: &'static str = opcode::EMV_PIN_CHANGE;
    const MODES: &'static [&'static str] = &["0", "1"];
    const ARITY: RangeInclusive<usize> = 16..=17;

    fn from_request(request: &Request) -> Result<Self> {
        let diversification = match request.mode() {
            Some("1") => Diversification::Supplied(request.hex_array(6, "diversification")?),
            _ => Diversification::Atc(request.hex_array(6, "ATC")?),
        };
        let psn = match request.optional(5) {
            Some(_) => request.decimal(5, "PSN", 1..=2)?.to_string(),
            None => String::new(),
        };
        let pan = request.pan(4)?;
        let validation_data = request.text(15, "validation data")?.to_string();
        card::validation_data(&validation_data, &pan)
            .map_err(|e| Error::field(15, "validation data", e))?;
        let include_current_pin = match request.optional(16) {
            Some(_) => request.number(16, "include current PIN", 0..=1)? == 1,
            None => false,
        };

        Ok(Self {
            smi: request.key_block(2, "IMK-SMI")?,
            smc: request.key_block(3, "IMK-SMC")?,
            pan,
            psn,
            diversification,
            arqc: request.hex_array(7, "ARQC")?,
            kpe: request.key_block(8, "KPE")?,
            new_pin_block: request.hex_array(9, "new PIN block")?,
            script_header: request.hex(10, "script header", 1..=MAX_HEADER_LEN)?,
            current_pin_block: request.hex_array(11, "current PIN block")?,
            pvk: request.key_block(12, "PVK")?,
            table: request.decimal(13, "conversion table", 16..=16)?.to_string(),
            current_offset: request
                .decimal(14, "current offset", 1..=MAX_PIN_LEN)?
                .to_string(),
            validation_data,
            include_current_pin,
        })
    }

    fn process(&self, simulator: &Simulator) -> Result<Response> {
        let imk_smi = simulator.open_key(&self.smi, &[KeyRole::IMK_SMI])?;
        let imk_smc = simulator.open_key(&self.smc, &[KeyRole::IMK_SMC])?;
        let kpe = simulator.open_key(&self.kpe, &[KeyRole::KPE])?;
        let pvk = simulator.open_key(&self.pvk, &[KeyRole::PVK_IBM])?;

        let current = PinBlock::decrypt(kpe.as_bytes(), &self.current_pin_block, Some(&self.pan))?;
        let new_pin = PinBlock::decrypt(kpe.as_bytes(), &self.new_pin_block, Some(&self.pan))?;
        let validation = card::validation_data(&self.validation_data, &self.pan)?;
        let verified = card::verify_pin_offset(
            pvk.as_bytes(),
            &validation,
            &self.table,
            current.pin(),
            &self.current_offset,
        )?;
        if !verified {
            debug!("current PIN rejected");
            return Ok(Response::to(opcode::EMV_PIN_CHANGE)
                .with_flag(false)
                .with("")
                .with("")
                .with(simulator.kcv(&imk_smi)?));
        }

        let r = self.diversification.block();
        let smi = emv::session_key(
            &emv::icc_master_key(imk_smi.as_bytes(), &self.pan, &self.psn)?,
            &r,
        )?;
        let smc = emv::session_key(
            &emv::icc_master_key(imk_smc.as_bytes(), &self.pan, &self.psn)?,
            &r,
        )?;

        let data = emv::pin_change_data(
            new_pin.pin(),
            self.include_current_pin.then(|| current.pin()),
        )?;
        let enciphered = emv::encipher_pin_data(&smc, &data)?;
        let mac = emv::script_mac(
            &smi,
            &self.script_header,
            &self.diversification.atc(),
            &self.arqc,
            &enciphered,
        )?;
        debug!(
            include_current_pin = self.include_current_pin,
            len = enciphered.len(),
            "PIN change script"
        );

        Ok(Response::to(opcode::EMV_PIN_CHANGE)
            .with_flag(true)
            .with(codec::encode(&enciphered))
            .with(codec::encode(&mac))
            .with(simulator.kcv(&imk_smi)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KPE: &str = "1PUNE000,1111111111111111";
    const PVK: &str = "1V3NE000,3333333333333333";
    const PAN: &str = "5413330089020011";
    const ARQC: &str = "4D685BA45EA22F00";
    const NEW_PIN_0538: &str = "3190A30832A14B44";
    const PIN_7441: &str = "7B0EAF7014FE51E4";
    const PIN_1111: &str = "531DFF2EE3171208";

    struct Fields<'a> {
        mode: &'a str,
        diversification: &'a str,
        current_pin_block: &'a str,
        include_current_pin: &'a str,
    }

    impl Default for Fields<'_> {
        fn default() -> Self {
            Self {
                mode: "0",
                diversification: "0012",
                current_pin_block: PIN_7441,
                include_current_pin: "",
            }
        }
    }

    fn request(sim: &Simulator, fields: Fields<'_>) -> String {
        let smi = sim.as_akb(Simulator::IMK_SMI).unwrap();
        let smc = sim.as_akb(Simulator::IMK_SMC).unwrap();
        let kpe = sim.as_akb(KPE).unwrap();
        let pvk = sim.as_akb(PVK).unwrap();
        let Fields {
            mode,
            diversification,
            current_pin_block,
            include_current_pin,
        } = fields;
        format!(
            "<352#{mode}#{smi}#{smc}#{PAN}#01#{diversification}#{ARQC}#{kpe}#{NEW_PIN_0538}#\
             8424000218#{current_pin_block}#{pvk}#0123456789012345#3053#4123456789012345#\
             {include_current_pin}#>"
        )
    }

    #[test]
    fn test_common_session_key() {
        let sim = Simulator::new();
        let response = sim.execute(&request(&sim, Fields::default())).unwrap();
        assert_eq!(
            response.to_string(),
            "<452#Y#721B76529504D4046C18173F47CE5929#970888D66280F057#7B83#>"
        );
    }

    #[test]
    fn test_includes_current_pin() {
        let sim = Simulator::new();
        let response = sim
            .execute(&request(
                &sim,
                Fields {
                    include_current_pin: "1",
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(response.field(1), Some("Y"));
        assert_eq!(response.field(2), Some("2DE7B246072E341AF99201899525C5EF"));
        assert_eq!(response.field(3), Some("7EEAD6AC6124B027"));

        // An explicit 0 keeps the new PIN only
        let response = sim
            .execute(&request(
                &sim,
                Fields {
                    include_current_pin: "0",
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(response.field(2), Some("721B76529504D4046C18173F47CE5929"));
    }

    #[test]
    fn test_supplied_diversification() {
        let sim = Simulator::new();
        let response = sim
            .execute(&request(
                &sim,
                Fields {
                    mode: "1",
                    diversification: "0012000012345678",
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(response.field(1), Some("Y"));
        assert_eq!(response.field(2), Some("B3DD933A3744E266ED5F74E48D6EC0D1"));
        assert_eq!(response.field(3), Some("761E87B4E95EC09F"));
    }

    #[test]
    fn test_wrong_current_pin() {
        let sim = Simulator::new();
        let response = sim
            .execute(&request(
                &sim,
                Fields {
                    current_pin_block: PIN_1111,
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(response.to_string(), "<452#N###7B83#>");
    }

    #[test]
    fn test_rejects_wrong_keys_and_fields() {
        let sim = Simulator::new();
        // Mode 1 wants an 8 byte diversification value
        assert!(matches!(
            sim.execute(&request(
                &sim,
                Fields {
                    mode: "1",
                    ..Default::default()
                },
            )),
            Err(Error::MalformedCommand(msg)) if msg.contains("diversification")
        ));

        // The current PIN is required
        assert!(matches!(
            sim.execute(&request(
                &sim,
                Fields {
                    current_pin_block: "",
                    ..Default::default()
                },
            )),
            Err(Error::MalformedCommand(msg)) if msg.contains("current PIN block")
        ));

        assert!(
            sim.execute(&request(
                &sim,
                Fields {
                    include_current_pin: "2",
                    ..Default::default()
                },
            ))
            .is_err()
        );
    }

    #[test]
    fn test_secure_messaging_keys_need_their_qualifier() {
        let sim = Simulator::new();
        let smi = sim.as_akb(Simulator::IMK_SMI).unwrap().to_string();
        let smc = sim.as_akb(Simulator::IMK_SMC).unwrap().to_string();
        let arqc = sim.as_akb(Simulator::IMK_ARQC).unwrap().to_string();

        // A cryptogram key offered for integrity
        let text = request(&sim, Fields::default()).replacen(&smi, &arqc, 1);
        assert!(matches!(
            sim.execute(&text),
            Err(Error::KeyUsage { ref expected, ref actual }) if expected == "mI" && actual == "mE"
        ));

        // A cryptogram key offered for confidentiality
        let text = request(&sim, Fields::default()).replacen(&smc, &arqc, 1);
        assert!(matches!(
            sim.execute(&text),
            Err(Error::KeyUsage { ref expected, ref actual }) if expected == "mC" && actual == "mE"
        ));

        // A KPE in place of the confidentiality key
        let kpe = sim.as_akb(KPE).unwrap().to_string();
        let text = request(&sim, Fields::default()).replacen(&smc, &kpe, 1);
        assert!(matches!(
            sim.execute(&text),
            Err(Error::KeyUsage { ref actual, .. }) if actual == "PU"
        ));
    }
}
