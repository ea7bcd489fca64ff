//! Pure evaluator of REIL operators at a given width.
//!
//! [`eval`] takes an opcode and up to two already-resolved constant operands
//! and produces the result truncated to the destination width. It has no
//! knowledge of registers, memory or the run loop; [`crate::cpu::Cpu`] is the only
//! caller.

use crate::{
    error::{ArithError, ArithResult},
    opcode::Opcode,
    width::Width,
};

/// Evaluate `op` over `a` (and `b`, for binary operators), each interpreted
/// at `a_width`/`b_width`, and return the result truncated to `dest_width`.
///
/// `op` must be one of the arithmetic/logic opcodes
/// ([`Opcode::is_arithmetic`]); the CPU dispatches `None`, `Jcc`, `Stm` and
/// `Ldm` itself and never reaches this function with them.
pub fn eval(
    op: Opcode,
    dest_width: Width,
    a: u64,
    a_width: Width,
    b: u64,
    b_width: Width,
) -> ArithResult<u64> {
    let ua = a_width.truncate(a);
    let ub = b_width.truncate(b);

    let raw = match op {
        Opcode::Str => ua,
        Opcode::Add => ua.wrapping_add(ub),
        Opcode::Sub => ua.wrapping_sub(ub),
        Opcode::Neg => ua.wrapping_neg(),
        Opcode::Mul => ua.wrapping_mul(ub),
        Opcode::Div => {
            if ub == 0 {
                return Err(ArithError::DivByZero);
            }
            ua / ub
        }
        Opcode::Mod => {
            if ub == 0 {
                return Err(ArithError::DivByZero);
            }
            ua % ub
        }
        Opcode::Smul => {
            let sa = a_width.sign_extend(ua);
            let sb = b_width.sign_extend(ub);
            sa.wrapping_mul(sb) as u64
        }
        Opcode::Sdiv => {
            if ub == 0 {
                return Err(ArithError::DivByZero);
            }
            let sa = a_width.sign_extend(ua);
            let sb = b_width.sign_extend(ub);
            sa.wrapping_div(sb) as u64
        }
        Opcode::Smod => {
            if ub == 0 {
                return Err(ArithError::DivByZero);
            }
            let sa = a_width.sign_extend(ua);
            let sb = b_width.sign_extend(ub);
            sa.wrapping_rem(sb) as u64
        }
        Opcode::Shl => ua.wrapping_shl(ub as u32),
        Opcode::Shr => ua.wrapping_shr(ub as u32),
        Opcode::And => ua & ub,
        Opcode::Or => ua | ub,
        Opcode::Xor => ua ^ ub,
        Opcode::Not => !ua,
        Opcode::Eq => (ua == ub) as u64,
        Opcode::Lt => (ua < ub) as u64,
        Opcode::None | Opcode::Jcc | Opcode::Stm | Opcode::Ldm | Opcode::Invalid(_) => {
            unreachable!("{op} is dispatched directly by the CPU, not evaluated here")
        }
    };

    Ok(dest_width.truncate(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8(v: u64) -> (u64, Width) {
        (v, Width::U8)
    }

    #[test]
    fn add_wraps_at_width() {
        let (a, aw) = u8(0xFF);
        let (b, bw) = u8(0x02);
        assert_eq!(eval(Opcode::Add, Width::U8, a, aw, b, bw).unwrap(), 0x01);
    }

    #[test]
    fn signed_vs_unsigned_divide() {
        // -1 / 2 == 0 when interpreted as signed i8, per spec invariant 6.
        let (a, aw) = u8(0xFF);
        let (b, bw) = u8(0x02);
        assert_eq!(eval(Opcode::Sdiv, Width::U8, a, aw, b, bw).unwrap(), 0x00);
        assert_eq!(eval(Opcode::Div, Width::U8, a, aw, b, bw).unwrap(), 0x7F);
    }

    #[test]
    fn divide_by_zero_fails_for_all_variants() {
        let (a, aw) = u8(10);
        let (b, bw) = u8(0);
        for op in [Opcode::Div, Opcode::Mod, Opcode::Sdiv, Opcode::Smod] {
            assert_eq!(
                eval(op, Width::U8, a, aw, b, bw),
                Err(ArithError::DivByZero)
            );
        }
    }

    #[test]
    fn eq_and_lt_produce_booleans() {
        let (a, aw) = u8(3);
        let (b, bw) = u8(5);
        assert_eq!(eval(Opcode::Eq, Width::U1, a, aw, b, bw).unwrap(), 0);
        assert_eq!(eval(Opcode::Lt, Width::U1, a, aw, b, bw).unwrap(), 1);
        assert_eq!(eval(Opcode::Eq, Width::U1, a, aw, a, aw).unwrap(), 1);
    }

    #[test]
    fn not_complements_at_destination_width() {
        let (a, aw) = u8(0b0000_1111);
        assert_eq!(
            eval(Opcode::Not, Width::U8, a, aw, 0, Width::U8).unwrap(),
            0b1111_0000
        );
    }

    #[quickcheck_macros::quickcheck]
    fn add_is_commutative_mod_width(a: u8, b: u8) -> bool {
        let lhs = eval(Opcode::Add, Width::U8, a as u64, Width::U8, b as u64, Width::U8).unwrap();
        let rhs = eval(Opcode::Add, Width::U8, b as u64, Width::U8, a as u64, Width::U8).unwrap();
        lhs == rhs && lhs == (a.wrapping_add(b)) as u64
    }
}
