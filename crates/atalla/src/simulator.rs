//! The simulated HSM
//!
//! A [`Simulator`] owns the LMK table and answers requests. It keeps no state
//! between commands: every key arrives in the request as a key block and is
//! opened, used and dropped within the call.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    Error, Result,
    commands::Command,
    config::SimulatorConfig,
    crypto::{self, Block, ClearKey},
    key_block::{Header, KeyBlock, KeyRole},
    lmk::LmkTable,
    message::{Request, Response},
    util::codec,
};

/// Software Atalla HSM
///
/// Cloning is cheap; clones share the LMK table.
#[derive(Debug, Clone)]
pub struct Simulator {
    lmk: Arc<LmkTable>,
    check_digits: usize,
}

impl Simulator {
    /// Issuer master key for application cryptograms
    pub const IMK_ARQC: &'static str = "1mENE000,0123456789ABCDEFFEDCBA9876543210";

    /// Issuer master key for secure messaging integrity
    pub const IMK_SMI: &'static str = "1mINE000,FEDCBA98765432100123456789ABCDEF";

    /// Issuer master key for secure messaging confidentiality
    pub const IMK_SMC: &'static str = "1mCNE000,00112233445566778899AABBCCDDEEFF";

    /// Simulator with the built-in LMK and default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulator built from validated configuration
    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lmk: Arc::new(LmkTable::from_hex(&config.master_key)?),
            check_digits: config.check_digits,
        })
    }

    /// Copy of this simulator running under another master key
    ///
    /// The current table is left untouched, so requests in flight on other
    /// clones keep a consistent LMK.
    pub fn with_master_key(&self, master_key: &[u8]) -> Result<Self> {
        Ok(Self {
            lmk: Arc::new(LmkTable::new(master_key)?),
            check_digits: self.check_digits,
        })
    }

    /// LMK table
    pub fn lmk(&self) -> &LmkTable {
        &self.lmk
    }

    /// Check digits emitted in responses
    pub const fn check_digit_count(&self) -> usize {
        self.check_digits
    }

    /// Turn a `header,HEXKEY` plaintext fixture into a live key block
    pub fn as_akb(&self, plaintext: &str) -> Result<KeyBlock> {
        let (header, key) = plaintext.split_once(',').ok_or_else(|| {
            Error::MalformedCommand("plaintext key must be `header,hexkey`".into())
        })?;
        let key = zeroize::Zeroizing::new(codec::decode(key)?);
        self.import_key(Header::parse(header)?, &ClearKey::new(&key)?)
    }

    /// Encrypt a clear key under the LMK
    pub fn import_key(&self, header: Header, key: &ClearKey) -> Result<KeyBlock> {
        KeyBlock::encode(header, key, &self.lmk)
    }

    /// Parse a key block and verify its integrity tag
    pub fn decode(&self, text: &str) -> Result<KeyBlock> {
        let block: KeyBlock = text.parse()?;
        block.verify(&self.lmk)?;
        Ok(block)
    }

    /// Verify and decrypt a key block
    pub fn decrypt_key(&self, block: &KeyBlock) -> Result<ClearKey> {
        block.decrypt_key(&self.lmk)
    }

    /// Open a key block that fits one of `roles`
    pub fn open_key(&self, block: &KeyBlock, roles: &[KeyRole]) -> Result<ClearKey> {
        let header = block.header();
        if !roles.iter().any(|role| role.accepts(header)) {
            return Err(Error::KeyUsage {
                expected: roles
                    .iter()
                    .map(KeyRole::to_string)
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: format!("{}{}", header.usage().as_char(), header.qualifier()),
            });
        }
        self.decrypt_key(block)
    }

    /// Encrypt whole blocks under a key block (CBC, zero IV)
    pub fn encrypt(&self, block: &KeyBlock, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.decrypt_key(block)?;
        crypto::encrypt_cbc(key.as_bytes(), &Block::default(), data)
    }

    /// Decrypt whole blocks under a key block (CBC, zero IV)
    pub fn decrypt(&self, block: &KeyBlock, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.decrypt_key(block)?;
        crypto::decrypt_cbc(key.as_bytes(), &Block::default(), data)
    }

    /// Check digits of a key block's key, at the configured length
    pub fn check_digits(&self, block: &KeyBlock) -> Result<String> {
        self.kcv(&self.decrypt_key(block)?)
    }

    /// Check digits of a clear key, at the configured length
    pub fn kcv(&self, key: &ClearKey) -> Result<String> {
        key.check_digits(self.check_digits)
    }

    /// Run a parsed request
    #[instrument(skip_all, fields(opcode = request.opcode(), fields = request.len()))]
    pub fn process(&self, request: &Request) -> Result<Response> {
        let command = Command::from_request(request)?;
        let response = command.process(self);
        match &response {
            Ok(response) => debug!(code = response.code(), "processed"),
            Err(err) => debug!(%err, "rejected"),
        }
        response
    }

    /// Parse and run a request string
    pub fn execute(&self, request: &str) -> Result<Response> {
        self.process(&Request::parse(request)?)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            lmk: Arc::new(LmkTable::default()),
            check_digits: crate::constants::DEFAULT_CHECK_DIGITS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_block::KeyUsage;
    use hex_literal::hex;

    #[test]
    fn test_as_akb() {
        let sim = Simulator::new();
        let block = sim.as_akb(Simulator::IMK_ARQC).unwrap();
        assert_eq!(
            block.to_string(),
            "1mENE000,BF9E98B7E8BC36241EED50EFC96AD9CD,3DA6F14B2F07703D"
        );
        assert_eq!(sim.check_digits(&block).unwrap(), "08D7");

        assert!(sim.as_akb("1mENE000").is_err());
        assert!(sim.as_akb("1mENE000,0123").is_err());
    }

    #[test]
    fn test_decode_verifies() {
        let sim = Simulator::new();
        let text = sim.as_akb(Simulator::IMK_SMI).unwrap().to_string();
        let block = sim.decode(&text).unwrap();
        assert_eq!(
            sim.decrypt_key(&block).unwrap().as_bytes(),
            hex!("FEDCBA98765432100123456789ABCDEF")
        );

        // Blocks from another LMK do not open
        let other = sim
            .with_master_key(&hex!("00112233445566778899AABBCCDDEEFF"))
            .unwrap();
        assert!(matches!(other.decode(&text), Err(Error::KeyBlockIntegrity)));
        assert!(sim.decode(&text).is_ok());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let sim = Simulator::new();
        let block = sim
            .as_akb("1DDNE000,0123456789ABCDEFFEDCBA9876543210")
            .unwrap();
        let data = hex!("4E6F77206973207468652074696D6520");
        let encrypted = sim.encrypt(&block, &data).unwrap();
        assert_eq!(encrypted, hex!("D80A0D8B2BAE5E4E319E5E68C3E8891B"));
        assert_eq!(sim.decrypt(&block, &encrypted).unwrap(), data);
    }

    #[test]
    fn test_open_key_checks_usage() {
        let sim = Simulator::new();
        let block = sim.as_akb("1PUNE000,1111111111111111").unwrap();
        assert!(sim.open_key(&block, &[KeyRole::KPE]).is_ok());
        let roles = [
            KeyRole::new(KeyUsage::Mac),
            KeyRole::new(KeyUsage::DataEncryption),
        ];
        assert!(matches!(
            sim.open_key(&block, &roles),
            Err(Error::KeyUsage { ref expected, ref actual }) if expected == "M or D" && actual == "PU"
        ));
    }

    #[test]
    fn test_open_key_checks_qualifier() {
        let sim = Simulator::new();
        let arqc = sim.as_akb(Simulator::IMK_ARQC).unwrap();
        assert!(sim.open_key(&arqc, &[KeyRole::IMK_AC]).is_ok());
        assert!(matches!(
            sim.open_key(&arqc, &[KeyRole::IMK_SMI]),
            Err(Error::KeyUsage { ref expected, ref actual }) if expected == "mI" && actual == "mE"
        ));
        assert!(sim.open_key(&arqc, &[KeyRole::IMK_SMC]).is_err());

        let smi = sim.as_akb(Simulator::IMK_SMI).unwrap();
        assert!(sim.open_key(&smi, &[KeyRole::IMK_SMI]).is_ok());
        assert!(sim.open_key(&smi, &[KeyRole::IMK_AC]).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = SimulatorConfig {
            check_digits: 6,
            ..Default::default()
        };
        let sim = Simulator::from_config(&config).unwrap();
        let block = sim.as_akb(Simulator::IMK_ARQC).unwrap();
        assert_eq!(sim.check_digits(&block).unwrap(), "08D7B4");

        let config = SimulatorConfig {
            check_digits: 17,
            ..Default::default()
        };
        assert!(matches!(
            Simulator::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_simulator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Simulator>();
    }
}
