//! Software simulator for the Atalla payment HSM command set
//!
//! Requests arrive as `<OP#field#...#>` strings and are answered with
//! `<RC#field#...#>`, where the response code is the opcode with its first
//! hex digit incremented. Keys travel inside requests as Atalla key blocks
//! (AKB) protected by a local master key (LMK); the simulator holds nothing
//! but the LMK.
//!
//! Supported commands cover working key import and check digits, PIN block
//! translation, CVV generation and verification, IBM 3624 and Visa PVV PIN
//! verification, IBM 3624 PIN change, EMV ARQC verification with ARPC
//! generation, and EMV PIN change scripts.
//!
//! The main entry point is [`Simulator`]:
//!
//! ```
//! use nexum_hsm_atalla::Simulator;
//!
//! let sim = Simulator::new();
//! let cvk = sim.as_akb("1CDNE000,0123456789ABCDEFFEDCBA9876543210").unwrap();
//! let response = sim
//!     .execute(&format!("<5D#3#{cvk}#41234567890123458701101#>"))
//!     .unwrap();
//! assert_eq!(response.to_string(), "<6D#56149820#08D7#>");
//! ```

pub mod card;
pub mod commands;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod emv;
pub mod error;
pub mod key_block;
pub mod lmk;
pub mod message;
pub mod pin;
pub mod simulator;
pub mod util;

// Re-exports
pub use commands::{Command, HsmCommand};
pub use config::SimulatorConfig;
pub use crypto::ClearKey;
pub use error::{Error, Result};
pub use key_block::{Header, KeyBlock, KeyRole, KeyUsage};
pub use lmk::LmkTable;
pub use message::{Request, Response};
pub use pin::{Pan, Pin, PinBlock, PinFormat};
pub use simulator::Simulator;
