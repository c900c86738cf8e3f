//! The boundary between the engine and a guest CPU.

use crate::bus::Bus;
use crate::ir::IrBuilder;
use crate::DrcError;

/// Architectural state the engine needs to see
pub trait GuestState {
    fn pc(&self) -> u32;
    fn set_pc(&mut self, pc: u32);
    fn regs(&self) -> &[u32];
    fn regs_mut(&mut self) -> &mut [u32];

    /// The guest stopped on its own (halt instruction or similar), `Drc::run` returns
    fn stopped(&self) -> bool {
        false
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    FallThrough,
    /// May transfer control, ends the block
    Branch,
    /// Ends the block without being a branch (halt, exception, mode switch...)
    EndBlock,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    /// Instruction length in bytes
    pub len: u32,
    pub flow: Flow,
}

/// The instruction has no translation, the block it's in stays interpreted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Unsupported(pub String);

pub trait SourceCpu {
    type State: GuestState;

    const REGISTER_COUNT: usize;

    /// Upper bound on the IR ops `translate` emits for any single instruction
    const MAX_IR_PER_INSTRUCTION: usize = 8;

    fn name(&self) -> &'static str;

    /// Length and control flow of `word`, `None` if it isn't a valid instruction
    fn decode(&self, pc: u32, word: u32) -> Option<Decoded>;

    /// Executes `word` (fetched from `state.pc()`) and advances the PC
    fn interpret(&self, state: &mut Self::State, bus: &mut Bus<'_>, word: u32) -> Result<(), DrcError>;

    fn translate(&self, pc: u32, word: u32, ir: &mut IrBuilder) -> Result<(), Unsupported>;
}
