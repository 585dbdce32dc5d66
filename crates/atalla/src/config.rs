//! Simulator configuration

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    constants::{DEFAULT_CHECK_DIGITS, DEFAULT_MASTER_KEY},
    util::codec,
};

/// Smallest accepted check digit count
pub const MIN_CHECK_DIGITS: usize = 4;

/// Largest accepted check digit count
pub const MAX_CHECK_DIGITS: usize = 16;

/// Settings a [`Simulator`](crate::Simulator) is built from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Hex LMK, double or triple length
    pub master_key: String,
    /// Check digits emitted in responses
    pub check_digits: usize,
}

impl SimulatorConfig {
    /// Check the digit count range and the master key encoding
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHECK_DIGITS..=MAX_CHECK_DIGITS).contains(&self.check_digits) {
            return Err(Error::Config(format!(
                "check_digits must be between {MIN_CHECK_DIGITS} and {MAX_CHECK_DIGITS}, got {}",
                self.check_digits
            )));
        }
        if !matches!(self.master_key.len(), 32 | 48) || !codec::is_hex(&self.master_key) {
            return Err(Error::Config(
                "master_key must be 32 or 48 hex digits".into(),
            ));
        }
        Ok(())
    }

    /// Load defaults, then an optional TOML file, then `ATALLA_SIM_*`
    /// environment variables
    #[cfg(feature = "cli")]
    pub fn load(path: Option<&std::path::Path>) -> eyre::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        let config: Self = figment.merge(Env::prefixed("ATALLA_SIM_")).extract()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            master_key: codec::encode(DEFAULT_MASTER_KEY),
            check_digits: DEFAULT_CHECK_DIGITS,
        }
    }
}

impl std::fmt::Debug for SimulatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorConfig")
            .field("master_key", &"<redacted>")
            .field("check_digits", &self.check_digits)
            .finish()
    }
}
