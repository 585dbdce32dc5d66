//! Simulated Local Master Key table
//!
//! Every key usage has its own LMK variant: the usage's variant byte XORed
//! into the first byte of each 8-byte LMK component. Key blocks are encrypted
//! under the variant of their usage and MAC'd under the block-MAC variant.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::{
    Error, Result,
    constants::{DEFAULT_MASTER_KEY, variant},
    crypto::BLOCK_LEN,
    key_block::KeyUsage,
    util::codec,
};

/// The LMK with one derived key per usage
///
/// The table is built once and never mutated; callers wanting a different
/// master key build a new table.
pub struct LmkTable {
    variants: BTreeMap<KeyUsage, Zeroizing<Vec<u8>>>,
    block_mac: Zeroizing<Vec<u8>>,
}

impl LmkTable {
    /// Build the table from a double or triple length master key
    pub fn new(master_key: &[u8]) -> Result<Self> {
        if master_key.len() != 16 && master_key.len() != 24 {
            return Err(Error::InvalidKeyLength(master_key.len()));
        }
        Ok(Self::build(master_key))
    }

    fn build(master_key: &[u8]) -> Self {
        let variants = KeyUsage::ALL
            .iter()
            .map(|usage| (*usage, derive_variant(master_key, usage.variant())))
            .collect();

        Self {
            variants,
            block_mac: derive_variant(master_key, variant::BLOCK_MAC),
        }
    }

    /// Build the table from a hex master key
    pub fn from_hex(master_key: &str) -> Result<Self> {
        let key = Zeroizing::new(
            codec::decode(master_key).map_err(|e| Error::Config(format!("master key: {e}")))?,
        );
        Self::new(&key).map_err(|e| Error::Config(format!("master key: {e}")))
    }

    /// Variant key protecting blocks of `usage`
    pub fn variant_key(&self, usage: KeyUsage) -> &[u8] {
        // Populated for every usage in `new`
        self.variants
            .get(&usage)
            .map(|key| key.as_slice())
            .unwrap_or_default()
    }

    /// Key computing key block MACs
    pub fn block_mac_key(&self) -> &[u8] {
        &self.block_mac
    }
}

impl Default for LmkTable {
    fn default() -> Self {
        Self::build(&DEFAULT_MASTER_KEY)
    }
}

impl std::fmt::Debug for LmkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmkTable")
            .field("usages", &self.variants.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn derive_variant(master_key: &[u8], variant: u8) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(master_key.to_vec());
    for component in key.chunks_mut(BLOCK_LEN) {
        component[0] ^= variant;
    }
    key
}
