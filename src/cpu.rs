//! Execution core: resolves operands, dispatches single instructions, and
//! drives the run loop over an address-addressable [`CodeStorage`].

use crate::{
    arch::Arch,
    error::{CpuError, VmError, VmResult},
    instruction::Instruction,
    math,
    memory::Memory,
    operand::Operand,
    opcode::Opcode,
    register::RegisterFile,
    storage::CodeStorage,
    width::Width,
};

/// A REIL-executing CPU: a register file, a memory, and an architecture
/// description, run against an externally supplied [`CodeStorage`].
pub struct Cpu {
    /// The register file. Public so that seed tests and the ABI layer can
    /// seed/inspect registers directly, as the original emulator does with
    /// bare attribute access.
    pub registers: RegisterFile,
    /// The memory.
    pub memory: Memory,
    /// Architecture description this CPU was built for.
    pub arch: Arch,
}

impl Cpu {
    /// A fresh CPU with an empty register file and lenient, reader-less
    /// memory.
    pub fn new(arch: Arch) -> Self {
        Cpu {
            registers: RegisterFile::new(),
            memory: Memory::default(),
            arch,
        }
    }

    /// A fresh CPU using a caller-provided memory (e.g. strict mode, or
    /// with a demand-fill reader already configured).
    pub fn with_memory(arch: Arch, memory: Memory) -> Self {
        Cpu {
            registers: RegisterFile::new(),
            memory,
            arch,
        }
    }

    /// Replace the register set; see [`RegisterFile::reset`].
    pub fn reset(&mut self, regs: Option<&[(&str, u64)]>) {
        self.registers.reset(regs);
    }

    /// Read a register by (case-insensitive, unprefixed or prefixed) name.
    pub fn reg(&mut self, name: &str) -> u64 {
        self.registers.read(name)
    }

    /// Write a persistent register by name.
    pub fn set_reg(&mut self, name: &str, value: u64) {
        self.registers.write(name, false, value);
    }

    /// Current instruction pointer, per the architecture description.
    pub fn ip(&mut self) -> u64 {
        let ip = self.arch.ip;
        self.registers.read(ip)
    }

    fn set_ip(&mut self, value: u64) {
        let ip = self.arch.ip;
        self.registers.write(ip, false, value);
    }

    /// Resolve an operand to a concrete (value, width) pair, reading
    /// registers as needed. Returns `None` for [`Operand::None`].
    fn resolve(&mut self, op: &Operand) -> Option<(u64, Width)> {
        match op {
            Operand::Register { name, width } | Operand::Temp { name, width } => {
                Some((self.registers.read(name), *width))
            }
            Operand::Const { value, width } => Some((width.truncate(*value), *width)),
            Operand::None => None,
        }
    }

    fn write_dest(&mut self, dest: &Operand, value: u64) {
        let is_temp = matches!(dest, Operand::Temp { .. });
        let name = dest
            .name()
            .expect("arithmetic/load destinations always name a register");
        self.registers.write(name, is_temp, value);
    }

    /// Execute a single REIL instruction.
    ///
    /// Returns `Ok(Some(target))` when a conditional branch was taken
    /// (`target` is where the run loop should fetch next), `Ok(None)`
    /// otherwise.
    #[tracing::instrument(name = "execute", skip(self, insn), fields(addr = %format_args!("{:#x}", insn.addr), inum = insn.inum, op = %insn.op))]
    pub fn execute(&mut self, insn: &Instruction) -> VmResult<Option<u64>> {
        tracing::trace!("dispatching instruction");

        match insn.op {
            Opcode::None => Ok(None),

            Opcode::Jcc => {
                let (a, _) = self
                    .resolve(&insn.a)
                    .expect("I_JCC requires a condition operand");
                if a != 0 {
                    let (target, _) = self
                        .resolve(&insn.c)
                        .expect("I_JCC requires a branch target operand");
                    Ok(Some(target))
                } else {
                    Ok(None)
                }
            }

            Opcode::Stm => {
                let (value, width) = self
                    .resolve(&insn.a)
                    .expect("I_STM requires a value operand");
                let (addr, _) = self
                    .resolve(&insn.c)
                    .expect("I_STM requires a destination address operand");
                self.memory.store(addr, width, value)?;
                Ok(None)
            }

            Opcode::Ldm => {
                let (addr, _) = self
                    .resolve(&insn.a)
                    .expect("I_LDM requires a source address operand");
                let dest_width = insn
                    .c
                    .width()
                    .expect("I_LDM requires a destination register operand");
                let value = self.memory.load(addr, dest_width)?;
                self.write_dest(&insn.c, value);
                Ok(None)
            }

            Opcode::Invalid(_) => {
                tracing::warn!("unrecognized opcode");
                Err(VmError::Cpu(CpuError::Instruction {
                    addr: insn.addr,
                    inum: insn.inum,
                }))
            }

            op => {
                let (a, aw) = self.resolve(&insn.a).unwrap_or((0, Width::U64));
                let (b, bw) = self.resolve(&insn.b).unwrap_or((0, Width::U64));
                let dest_width = insn
                    .c
                    .width()
                    .expect("arithmetic/logic opcodes always have a destination width");
                let result = math::eval(op, dest_width, a, aw, b, bw)?;
                self.write_dest(&insn.c, result);
                Ok(None)
            }
        }
    }

    /// Drive the run loop starting at `start_addr` against `storage`.
    ///
    /// `storage`'s demand-fill reader (if any) is wired into `self.memory`
    /// before the loop starts, so code the CPU executes can also be read
    /// back as data.
    ///
    /// There is no normal exit: the loop runs until `storage.get_insn`
    /// fails, which is mapped to [`crate::error::CpuError::Read`]. Callers that want a
    /// bounded call (rather than raw looping) use [`crate::abi::Abi::call`], which
    /// recognizes the sentinel return address.
    #[tracing::instrument(name = "run", skip(self, storage), fields(start = %format_args!("{:#x}", start_addr)))]
    pub fn run<S: CodeStorage>(&mut self, storage: &S, start_addr: u64) -> VmResult<()> {
        self.memory.set_reader(storage.reader());

        let mut next = start_addr;
        self.set_ip(next);

        loop {
            let insns = storage
                .get_insn(next)
                .map_err(|_| VmError::Cpu(CpuError::Read { addr: next }))?;

            for insn in &insns {
                match self.execute(insn)? {
                    Some(target) => {
                        next = target;
                        self.set_ip(next);
                        break;
                    }
                    None => {
                        next = insn.next_fetch();
                        self.set_ip(next);
                    }
                }
            }

            self.registers.reset_temp();
        }
    }
}
