//! The shape of a single REIL instruction.

use crate::{opcode::Opcode, operand::Operand};

/// One REIL instruction, as produced by an external lifter and consumed by
/// [`crate::cpu::Cpu::execute`].
///
/// `addr` and `inum` together identify the instruction's position in the
/// REIL stream: `addr` is the native (machine-code) instruction it lowers
/// from, `inum` its index within that native instruction's expansion.
///
/// `next_fetch` is not part of the distilled wire format, but this crate's
/// `CodeStorage` contract is the boundary between "what the lifter knows"
/// (native instruction lengths) and "what the CPU knows" (REIL semantics
/// only) — see the design notes on instruction fallthrough. Whoever builds
/// an `Instruction` list must supply it: the CPU has no other way to learn
/// where execution continues once the lifter is out of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Native instruction address.
    pub addr: u64,
    /// Intra-native REIL index.
    pub inum: u8,
    /// The operator.
    pub op: Opcode,
    /// First operand.
    pub a: Operand,
    /// Second operand.
    pub b: Operand,
    /// Third operand (destination, for most opcodes).
    pub c: Operand,
    /// Address to fetch next if this instruction does not branch and is the
    /// last instruction dispatched out of its native expansion. For
    /// non-terminal instructions in a list this is conventionally the
    /// instruction's own `addr`, since the run loop doesn't re-fetch
    /// storage until the whole list is exhausted.
    pub next_fetch: u64,
}

impl Instruction {
    /// Construct an instruction whose fallthrough is its own address
    /// (appropriate for every entry but the last in a native expansion).
    pub fn new(addr: u64, inum: u8, op: Opcode, a: Operand, b: Operand, c: Operand) -> Self {
        Instruction {
            addr,
            inum,
            op,
            a,
            b,
            c,
            next_fetch: addr,
        }
    }

    /// Override the fallthrough address (used for the last instruction in a
    /// native expansion, where it must point at the next native
    /// instruction).
    pub fn with_next_fetch(mut self, next_fetch: u64) -> Self {
        self.next_fetch = next_fetch;
        self
    }

    /// The address to fetch next if this instruction falls through.
    pub const fn next_fetch(&self) -> u64 {
        self.next_fetch
    }
}
