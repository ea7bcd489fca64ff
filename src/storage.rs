//! The read-only code provider the CPU's run loop queries.
//!
//! `CodeStorage` is the consumer contract for the REIL lifter/translator,
//! which is explicitly out of scope for this crate: something external
//! turns native machine code into [`Instruction`] lists and answers
//! [`CodeStorage::get_insn`]. This module only fixes the shape of that
//! query so the CPU can be written against it.

use std::rc::Rc;

use crate::{instruction::Instruction, memory::MemoryReader};

/// A read-only, address-keyed provider of REIL instruction expansions.
///
/// Borrowed read-only for the duration of [`crate::cpu::Cpu::run`]; may be shared
/// across CPU instances as long as callers provide their own
/// synchronization (the core itself is single-threaded).
pub trait CodeStorage {
    /// The error a failed lookup produces. The CPU does not inspect it; it
    /// only cares that the lookup failed, and maps that to
    /// [`crate::error::CpuError::Read`].
    type Error;

    /// Return the ordered list of REIL instructions the native instruction
    /// at `addr` lowers to.
    ///
    /// Must fail when `addr` is unknown; this is the run loop's only
    /// termination signal (see the sentinel-return convention in
    /// [`crate::abi::Abi`]).
    fn get_insn(&self, addr: u64) -> Result<Vec<Instruction>, Self::Error>;

    /// The byte-level demand-fill reader this storage vouches for, if any.
    ///
    /// [`crate::cpu::Cpu::run`] wires this into its [`crate::memory::Memory`]
    /// at the start of every run, the same way the original emulator's
    /// `Cpu.set_storage` assigns `self.mem.reader = storage.reader` before
    /// executing — so that code the CPU runs can also be read back as data
    /// (see seed scenario S2) without every caller wiring the reader in by
    /// hand. Most storage implementations have no reader to offer.
    fn reader(&self) -> Option<Rc<dyn MemoryReader>> {
        None
    }
}
