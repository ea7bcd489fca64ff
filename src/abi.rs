//! Call-convention marshaling: turn a high-level "invoke function at `addr`
//! with these arguments" request into CPU/Memory/Stack setup, run the CPU,
//! and recover a result.

use crate::{
    cpu::Cpu,
    error::{CpuError, VmError, VmResult},
    stack::Stack,
    storage::CodeStorage,
};

/// Sentinel return address pushed by [`Abi::call`]. No code exists behind
/// it; the CPU's fetch fault at this address is the run loop's only
/// termination signal, and [`Abi::call`] is the layer that recognizes it.
pub const DUMMY_RET_ADDR: u64 = 0xcafe_babe;

/// Round `value` up to the next multiple of `ptr_len`, per the original
/// emulator's `align()` helper.
///
/// Always advances to a strictly later boundary, even when `value` is
/// already a multiple of `ptr_len` — e.g. `align(8, 4) == 12`, not `8`. This
/// mirrors the source's own `val + (ptr_len - val % ptr_len)` formula
/// exactly rather than special-casing the already-aligned input.
fn align(value: usize, ptr_len: usize) -> usize {
    value + (ptr_len - value % ptr_len)
}

/// An argument to a marshaled call.
///
/// Plain integers are pushed as-is; strings are allocated into memory first
/// (see [`Abi::string`]) and their address is pushed in their place.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A raw integer value, pointer-width truncated.
    Value(u64),
    /// A string, allocated via [`Abi::string`] before the pointer is pushed.
    Str(String),
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

/// High-level call marshaling over a [`Cpu`].
pub struct Abi<'a, S> {
    cpu: &'a mut Cpu,
    storage: &'a S,
}

impl<'a, S: CodeStorage> Abi<'a, S> {
    /// Build an ABI façade over `cpu`, querying `storage` for instructions.
    pub fn new(cpu: &'a mut Cpu, storage: &'a S) -> Self {
        Abi { cpu, storage }
    }

    /// Clear memory and zero every general-purpose and flag register.
    pub fn reset(&mut self) {
        self.cpu.memory.clear();
        let arch = self.cpu.arch;
        for name in arch.general.iter().chain(arch.flags.iter()) {
            self.cpu.set_reg(name, 0);
        }
    }

    /// Allocate a buffer, optionally at a fixed address, optionally
    /// pre-filled with `data` (zero-padded to `size` when given).
    ///
    /// The allocated size is always rounded up to the architecture's
    /// pointer width via [`align`], matching the original emulator's
    /// `align()` helper.
    pub fn buff(&mut self, size: Option<usize>, addr: Option<u64>, fill: Option<&[u8]>) -> u64 {
        let ptr_len = self.cpu.arch.ptr_len;
        let raw_size = size.unwrap_or_else(|| fill.map(<[u8]>::len).unwrap_or(0));
        self.cpu.memory.alloc(addr, Some(align(raw_size, ptr_len)), fill)
    }

    /// Allocate a buffer containing `s`'s bytes followed by 4 NUL bytes, to
    /// cover wide-char terminators without special-casing encoding.
    pub fn string(&mut self, s: &str) -> u64 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 4]);
        self.buff(Some(bytes.len()), None, Some(&bytes))
    }

    /// Build a fresh stack, push `args` in reverse order (so the first
    /// argument ends up closest to the top), then push the sentinel return
    /// address on top of them. String-like arguments are allocated into
    /// memory first and their pointer is pushed in their place.
    ///
    /// Returns the resulting stack pointer.
    fn pushargs(&mut self, args: &[Arg]) -> u64 {
        let ptr_len = self.cpu.arch.ptr_len;
        let pointers: Vec<u64> = args
            .iter()
            .map(|arg| match arg {
                Arg::Value(v) => *v,
                Arg::Str(s) => self.string(s),
            })
            .collect();

        let mut stack = Stack::new(&mut self.cpu.memory, ptr_len, None, None);
        for value in pointers.iter().rev() {
            stack
                .push(*value)
                .expect("fresh stack allocation always accepts a push");
        }
        stack
            .push(DUMMY_RET_ADDR)
            .expect("fresh stack allocation always accepts a push");
        stack.top()
    }

    /// Push `args`, push the sentinel return address, point the stack
    /// pointer register at the resulting stack top, and run the CPU at
    /// `addr` until it faults fetching the sentinel.
    ///
    /// Any other fault propagates to the caller; a fetch fault at
    /// [`DUMMY_RET_ADDR`] is the expected normal termination and is
    /// swallowed.
    pub fn call(&mut self, addr: u64, args: &[Arg]) -> VmResult<()> {
        let sp_name = self.cpu.arch.sp;
        let sp = self.pushargs(args);
        self.cpu.set_reg(sp_name, sp);

        match self.cpu.run(self.storage, addr) {
            Err(VmError::Cpu(CpuError::Read { addr })) if addr == DUMMY_RET_ADDR => Ok(()),
            other => other,
        }
    }

    /// `call`, then return the accumulator (return-value) register.
    ///
    /// Matches `stdcall` semantics for this emulator; caller-cleanup vs
    /// callee-cleanup is invisible here because the CPU simply halts at the
    /// sentinel regardless of which side "would have" adjusted the stack.
    pub fn stdcall(&mut self, addr: u64, args: &[Arg]) -> VmResult<u64> {
        let accum = self.cpu.arch.accum;
        self.cpu.set_reg(accum, 0);
        self.call(addr, args)?;
        Ok(self.cpu.reg(accum))
    }

    /// Equivalent to [`Abi::stdcall`] for this emulator.
    pub fn cdecl(&mut self, addr: u64, args: &[Arg]) -> VmResult<u64> {
        self.stdcall(addr, args)
    }

    /// Up to the first two `args` are loaded into the architecture's
    /// fastcall argument registers; the remainder flow through
    /// [`Abi::stdcall`] as stack arguments.
    pub fn ms_fastcall(&mut self, addr: u64, args: &[Arg]) -> VmResult<u64> {
        let fastcall_args = self.cpu.arch.fastcall_args;
        let (reg_args, stack_args) = args.split_at(args.len().min(2));

        for (reg_name, arg) in fastcall_args.iter().zip(reg_args) {
            let value = match arg {
                Arg::Value(v) => *v,
                Arg::Str(s) => self.string(s),
            };
            self.cpu.set_reg(reg_name, value);
        }

        self.stdcall(addr, stack_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::X86, instruction::Instruction, operand::Operand, opcode::Opcode, width::Width};
    use std::collections::BTreeMap;

    struct MapStorage {
        code: BTreeMap<u64, Vec<Instruction>>,
    }

    impl CodeStorage for MapStorage {
        type Error = ();

        fn get_insn(&self, addr: u64) -> Result<Vec<Instruction>, Self::Error> {
            self.code.get(&addr).cloned().ok_or(())
        }
    }

    fn reg(name: &str, width: Width) -> Operand {
        Operand::register(name, width)
    }

    #[test]
    fn align_rounds_up_and_bumps_already_aligned_values() {
        assert_eq!(align(6, 4), 8);
        assert_eq!(align(1, 4), 4);
        assert_eq!(align(8, 4), 12);
        assert_eq!(align(0, 4), 4);
    }

    fn ret_insn(addr: u64) -> Instruction {
        // ret: pop eip
        Instruction::new(
            addr,
            0,
            Opcode::Ldm,
            reg("R_ESP", Width::U32),
            Operand::None,
            reg("R_EIP", Width::U32),
        )
    }

    #[test]
    fn stdcall_returns_the_accumulator() {
        let addr = 0x4141_4141u64;
        // mov eax, [esp]; ret — reads the top-of-stack value (the sentinel
        // return address pushargs placed there) into eax, so the returned
        // accumulator value is observable without a real callee body.
        let insns = vec![
            Instruction::new(
                addr,
                0,
                Opcode::Ldm,
                reg("R_ESP", Width::U32),
                Operand::None,
                reg("R_EAX", Width::U32),
            ),
            ret_insn(addr).with_next_fetch(addr),
        ];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);
        let result = abi.stdcall(addr, &[Arg::Value(7)]).unwrap();
        assert_eq!(result, DUMMY_RET_ADDR);
    }

    #[test]
    fn call_swallows_sentinel_fault_but_not_other_faults() {
        let addr = 0x4141_4141u64;
        let insns = vec![ret_insn(addr)];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);
        abi.call(addr, &[]).unwrap();
    }

    #[test]
    fn string_arg_is_allocated_and_nul_terminated() {
        let addr = 0x5000u64;
        let insns = vec![ret_insn(addr)];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);
        let ptr = abi.string("hi");
        let bytes = abi.cpu.memory.read(ptr, 6).unwrap();
        assert_eq!(bytes, vec![b'h', b'i', 0, 0, 0, 0]);
    }

    #[test]
    fn buff_rounds_allocation_size_up_to_pointer_width() {
        let addr = 0x5100u64;
        let insns = vec![ret_insn(addr)];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);

        // X86's ptr_len is 4; a 6-byte request rounds up to 8, so a buffer
        // placed immediately after has an 8-byte gap from the first base.
        let first = abi.buff(Some(6), None, None);
        let second = abi.buff(Some(1), None, None);
        assert_eq!(second, first + 8);
    }

    #[test]
    fn string_goes_through_buff_and_inherits_its_alignment() {
        let addr = 0x5200u64;
        let insns = vec![ret_insn(addr)];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);

        // "hi" + 4 NUL bytes is 6 bytes, which aligns up to 8.
        let first = abi.string("hi");
        let second = abi.buff(Some(1), None, None);
        assert_eq!(second, first + 8);
    }

    #[test]
    fn ms_fastcall_loads_first_two_args_into_ecx_edx() {
        let addr = 0x6000u64;
        let insns = vec![ret_insn(addr)];
        let storage = MapStorage {
            code: BTreeMap::from([(addr, insns)]),
        };
        let mut cpu = Cpu::new(X86);
        let mut abi = Abi::new(&mut cpu, &storage);
        abi.ms_fastcall(addr, &[Arg::Value(11), Arg::Value(22)]).unwrap();
        assert_eq!(abi.cpu.reg("R_ECX"), 11);
        assert_eq!(abi.cpu.reg("R_EDX"), 22);
    }
}
