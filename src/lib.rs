//! An emulator core for REIL (Reverse Engineering Intermediate Language).
//!
//! REIL is a small, fixed-width intermediate language used by
//! disassembler-adjacent tooling to express native machine instructions as
//! sequences of simple arithmetic, logic and memory operations. This crate
//! implements the parts of a REIL emulator that do not depend on any
//! particular source architecture or lifter: a typed evaluator ([`math`]),
//! sparse demand-filled memory ([`memory`]), a register file distinguishing
//! persistent from per-instruction temporaries ([`register`]), the
//! instruction-dispatch and run loop ([`cpu`]), a stack convenience layer
//! ([`stack`]), and a calling-convention façade ([`abi`]) for marshaling
//! high-level calls.
//!
//! The REIL lifter itself — turning native machine code into
//! [`instruction::Instruction`] lists — is out of scope; callers supply one
//! through the [`storage::CodeStorage`] trait. A minimal, concrete x86
//! [`arch::Arch`] description is bundled so the crate is directly usable
//! without an external architecture table.

#![forbid(unsafe_code)]

pub mod abi;
pub mod arch;
pub mod cpu;
pub mod error;
pub mod instruction;
pub mod math;
pub mod memory;
pub mod opcode;
pub mod operand;
pub mod register;
pub mod stack;
pub mod storage;
pub mod width;

/// Re-exports of the types most callers need, for a single `use
/// reil_vm::prelude::*;` import.
pub mod prelude {
    pub use crate::{
        abi::{Abi, Arg, DUMMY_RET_ADDR},
        arch::{Arch, X86},
        cpu::Cpu,
        error::{ArithError, CpuError, MemoryError, VmError, VmResult},
        instruction::Instruction,
        memory::{Memory, MemoryReader},
        opcode::Opcode,
        operand::Operand,
        register::RegisterFile,
        stack::Stack,
        storage::CodeStorage,
        width::Width,
    };
}
