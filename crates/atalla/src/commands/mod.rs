//! Atalla command definitions
//!
//! Every command is an immutable value parsed once from a [`Request`] and run
//! against a [`Simulator`]. A static registry maps opcode and sub-mode to the
//! command type; arity is checked there before any field is read.

use std::ops::RangeInclusive;

use derive_more::From;
use tracing::trace;

use crate::{Error, Result, Simulator, message::Request, message::Response};

// Submodules
pub mod arqc;
pub mod change_pin;
pub mod check_digits;
pub mod cvv;
pub mod emv_pin_change;
pub mod import_working_key;
pub mod translate_iso_pin;
pub mod translate_pin;
pub mod verify_card_and_pin;

// Re-exports for convenience
pub use arqc::{MasterCardArqc, VerifyArqc, VisaCvn10Arqc, VisaCvn18Arqc};
pub use change_pin::ChangePin;
pub use check_digits::CheckDigits;
pub use cvv::{GenerateCvv, VerifyCvv};
pub use emv_pin_change::EmvPinChange;
pub use import_working_key::ImportWorkingKey;
pub use translate_iso_pin::TranslateIsoPinBlock;
pub use translate_pin::TranslatePinBlock;
pub use verify_card_and_pin::{VerifyCardAndPinIbm, VerifyCardAndPinVisa};

/// Core trait for simulator commands
pub trait HsmCommand: Sized {
    /// Opcode in field 0
    const OPCODE: &'static str;

    /// Accepted values of field 1; empty for commands without sub-modes
    const MODES: &'static [&'static str] = &[];

    /// Accepted field counts, opcode included
    const ARITY: RangeInclusive<usize>;

    /// Read the command's fields from a request of valid arity
    fn from_request(request: &Request) -> Result<Self>;

    /// Execute the command
    fn process(&self, simulator: &Simulator) -> Result<Response>;
}

/// Any supported command
#[derive(Debug, Clone, From)]
pub enum Command {
    /// `11`
    ImportWorkingKey(ImportWorkingKey),
    /// `7E`
    CheckDigits(CheckDigits),
    /// `31` mode `1`
    TranslatePinBlock(TranslatePinBlock),
    /// `335`
    TranslateIsoPinBlock(TranslateIsoPinBlock),
    /// `5D` mode `3`
    GenerateCvv(GenerateCvv),
    /// `5E` mode `3`
    VerifyCvv(VerifyCvv),
    /// `3A` mode `2`
    VerifyCardAndPinIbm(VerifyCardAndPinIbm),
    /// `3A` mode `V`
    VerifyCardAndPinVisa(VerifyCardAndPinVisa),
    /// `37` mode `2`
    ChangePin(ChangePin),
    /// `350` mode `0`
    VerifyArqc(VerifyArqc),
    /// `350` mode `1`
    MasterCardArqc(MasterCardArqc),
    /// `350` mode `2`
    VisaCvn10Arqc(VisaCvn10Arqc),
    /// `350` mode `3`
    VisaCvn18Arqc(VisaCvn18Arqc),
    /// `352` modes `0` and `1`
    EmvPinChange(EmvPinChange),
}

impl Command {
    /// Select and build the command for a request
    ///
    /// Unknown opcodes or sub-modes fail with [`Error::UnsupportedCommand`];
    /// a wrong field count fails with [`Error::MalformedCommand`].
    pub fn from_request(request: &Request) -> Result<Self> {
        let opcode = request.opcode();
        let mut candidates = REGISTRY
            .iter()
            .filter(|entry| entry.opcode.eq_ignore_ascii_case(opcode))
            .peekable();
        if candidates.peek().is_none() {
            return Err(Error::UnsupportedCommand(opcode.to_string()));
        }

        let mode = request.mode().unwrap_or_default();
        let entry = candidates
            .find(|entry| entry.modes.is_empty() || entry.modes.contains(&mode))
            .ok_or_else(|| Error::UnsupportedCommand(format!("{opcode} mode {mode:?}")))?;

        if !entry.arity.contains(&request.len()) {
            return Err(Error::MalformedCommand(format!(
                "{opcode} takes {} to {} fields, got {}",
                entry.arity.start(),
                entry.arity.end(),
                request.len()
            )));
        }
        trace!(opcode = entry.opcode, mode, "dispatching");
        (entry.build)(request)
    }

    /// Execute the command
    pub fn process(&self, simulator: &Simulator) -> Result<Response> {
        match self {
            Self::ImportWorkingKey(command) => command.process(simulator),
            Self::CheckDigits(command) => command.process(simulator),
            Self::TranslatePinBlock(command) => command.process(simulator),
            Self::TranslateIsoPinBlock(command) => command.process(simulator),
            Self::GenerateCvv(command) => command.process(simulator),
            Self::VerifyCvv(command) => command.process(simulator),
            Self::VerifyCardAndPinIbm(command) => command.process(simulator),
            Self::VerifyCardAndPinVisa(command) => command.process(simulator),
            Self::ChangePin(command) => command.process(simulator),
            Self::VerifyArqc(command) => command.process(simulator),
            Self::MasterCardArqc(command) => command.process(simulator),
            Self::VisaCvn10Arqc(command) => command.process(simulator),
            Self::VisaCvn18Arqc(command) => command.process(simulator),
            Self::EmvPinChange(command) => command.process(simulator),
        }
    }
}

struct Entry {
    opcode: &'static str,
    modes: &'static [&'static str],
    arity: RangeInclusive<usize>,
    build: fn(&Request) -> Result<Command>,
}

fn build<T: HsmCommand + Into<Command>>(request: &Request) -> Result<Command> {
    T::from_request(request).map(Into::into)
}

const fn entry<T: HsmCommand + Into<Command>>() -> Entry {
    Entry {
        opcode: T::OPCODE,
        modes: T::MODES,
        arity: T::ARITY,
        build: build::<T>,
    }
}

static REGISTRY: [Entry; 14] = [
    entry::<ImportWorkingKey>(),
    entry::<CheckDigits>(),
    entry::<TranslatePinBlock>(),
    entry::<TranslateIsoPinBlock>(),
    entry::<GenerateCvv>(),
    entry::<VerifyCvv>(),
    entry::<VerifyCardAndPinIbm>(),
    entry::<VerifyCardAndPinVisa>(),
    entry::<ChangePin>(),
    entry::<VerifyArqc>(),
    entry::<MasterCardArqc>(),
    entry::<VisaCvn10Arqc>(),
    entry::<VisaCvn18Arqc>(),
    entry::<EmvPinChange>(),
];
