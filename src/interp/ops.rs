//! Numeric opcode dispatch shared by both interpreters.
//!
//! Everything here operates on the 64-bit [`UntypedValue`] cells both operand
//! stacks are built from; the byte stream already guarantees (via validation)
//! which type each cell holds at every point, so no tag is carried at runtime.

use num_traits::ToPrimitive;

use crate::common::stack::StackWithLimit;
use crate::error::TrapCode;
use crate::isa::Opcode;
use crate::nan_preserving_float::{F32, F64};
use crate::value::{unsigned, unsigned64, ArithmeticOps, Float, Integer, UntypedValue};

macro_rules! impl_trunc {
    ($name:ident, $src:ty, $dst:ty, $method:ident) => {
        fn $name(v: $src) -> Result<$dst, TrapCode> {
            v.$method().ok_or(TrapCode::InvalidConversionToInt)
        }
    };
}
impl_trunc!(trunc_f32_i32, f32, i32, to_i32);
impl_trunc!(trunc_f32_i64, f32, i64, to_i64);
impl_trunc!(trunc_f32_u32, f32, u32, to_u32);
impl_trunc!(trunc_f32_u64, f32, u64, to_u64);
impl_trunc!(trunc_f64_i32, f64, i32, to_i32);
impl_trunc!(trunc_f64_i64, f64, i64, to_i64);
impl_trunc!(trunc_f64_u32, f64, u32, to_u32);
impl_trunc!(trunc_f64_u64, f64, u64, to_u64);

/// Apply a fixed-arity opcode (everything from `i32.eqz` through the
/// reinterpret casts) to the top of `stack`. Callers are responsible for
/// instructions with their own immediates or variable arity (consts,
/// branches, locals/globals, memory, calls) — those never reach here.
pub(super) fn eval(op: Opcode, stack: &mut StackWithLimit<UntypedValue>) -> Result<(), TrapCode> {
    macro_rules! pop {
        () => {
            stack.pop().expect("validated stack shape guarantees an operand here")
        };
    }
    macro_rules! push {
        ($v:expr) => {
            stack
                .push($v)
                .expect("a net stack-neutral or shrinking op cannot overflow")
        };
    }
    macro_rules! unop {
        ($conv:ident, $f:expr) => {{
            let v = pop!().$conv();
            push!(UntypedValue::from($f(v)));
        }};
    }
    macro_rules! binop {
        ($conv:ident, $f:expr) => {{
            let rhs = pop!().$conv();
            let lhs = pop!().$conv();
            push!(UntypedValue::from($f(lhs, rhs)));
        }};
    }
    macro_rules! relop {
        ($conv:ident, $f:expr) => {{
            let rhs = pop!().$conv();
            let lhs = pop!().$conv();
            push!(UntypedValue::from($f(lhs, rhs)));
        }};
    }
    macro_rules! try_binop {
        ($conv:ident, $f:expr) => {{
            let rhs = pop!().$conv();
            let lhs = pop!().$conv();
            push!(UntypedValue::from($f(lhs, rhs)?));
        }};
    }
    macro_rules! try_unop {
        ($conv:ident, $f:expr) => {{
            let v = pop!().$conv();
            push!(UntypedValue::from($f(v)?));
        }};
    }

    use Opcode::*;
    match op {
        I32Eqz => unop!(i32, |v: i32| v == 0),
        I32Eq => relop!(i32, |a: i32, b: i32| a == b),
        I32Ne => relop!(i32, |a: i32, b: i32| a != b),
        I32LtS => relop!(i32, |a: i32, b: i32| a < b),
        I32LtU => relop!(u32, |a: u32, b: u32| a < b),
        I32GtS => relop!(i32, |a: i32, b: i32| a > b),
        I32GtU => relop!(u32, |a: u32, b: u32| a > b),
        I32LeS => relop!(i32, |a: i32, b: i32| a <= b),
        I32LeU => relop!(u32, |a: u32, b: u32| a <= b),
        I32GeS => relop!(i32, |a: i32, b: i32| a >= b),
        I32GeU => relop!(u32, |a: u32, b: u32| a >= b),

        I64Eqz => unop!(i64, |v: i64| v == 0),
        I64Eq => relop!(i64, |a: i64, b: i64| a == b),
        I64Ne => relop!(i64, |a: i64, b: i64| a != b),
        I64LtS => relop!(i64, |a: i64, b: i64| a < b),
        I64LtU => relop!(u64, |a: u64, b: u64| a < b),
        I64GtS => relop!(i64, |a: i64, b: i64| a > b),
        I64GtU => relop!(u64, |a: u64, b: u64| a > b),
        I64LeS => relop!(i64, |a: i64, b: i64| a <= b),
        I64LeU => relop!(u64, |a: u64, b: u64| a <= b),
        I64GeS => relop!(i64, |a: i64, b: i64| a >= b),
        I64GeU => relop!(u64, |a: u64, b: u64| a >= b),

        F32Eq => relop!(f32, |a: F32, b: F32| a == b),
        F32Ne => relop!(f32, |a: F32, b: F32| a != b),
        F32Lt => relop!(f32, |a: F32, b: F32| a < b),
        F32Gt => relop!(f32, |a: F32, b: F32| a > b),
        F32Le => relop!(f32, |a: F32, b: F32| a <= b),
        F32Ge => relop!(f32, |a: F32, b: F32| a >= b),

        F64Eq => relop!(f64, |a: F64, b: F64| a == b),
        F64Ne => relop!(f64, |a: F64, b: F64| a != b),
        F64Lt => relop!(f64, |a: F64, b: F64| a < b),
        F64Gt => relop!(f64, |a: F64, b: F64| a > b),
        F64Le => relop!(f64, |a: F64, b: F64| a <= b),
        F64Ge => relop!(f64, |a: F64, b: F64| a >= b),

        I32Clz => unop!(i32, |v: i32| Integer::leading_zeros(v)),
        I32Ctz => unop!(i32, |v: i32| Integer::trailing_zeros(v)),
        I32Popcnt => unop!(i32, |v: i32| Integer::count_ones(v)),
        I32Add => binop!(i32, |a: i32, b: i32| ArithmeticOps::add(a, b)),
        I32Sub => binop!(i32, |a: i32, b: i32| ArithmeticOps::sub(a, b)),
        I32Mul => binop!(i32, |a: i32, b: i32| ArithmeticOps::mul(a, b)),
        I32DivS => try_binop!(i32, |a: i32, b: i32| ArithmeticOps::div(a, b)),
        I32DivU => try_binop!(i32, unsigned::div_u),
        I32RemS => try_binop!(i32, |a: i32, b: i32| Integer::rem(a, b)),
        I32RemU => try_binop!(i32, unsigned::rem_u),
        I32And => binop!(i32, |a: i32, b: i32| a & b),
        I32Or => binop!(i32, |a: i32, b: i32| a | b),
        I32Xor => binop!(i32, |a: i32, b: i32| a ^ b),
        I32Shl => binop!(i32, |a: i32, b: i32| a.wrapping_shl(b as u32)),
        I32ShrS => binop!(i32, |a: i32, b: i32| a.wrapping_shr(b as u32)),
        I32ShrU => binop!(i32, |a: i32, b: i32| (a as u32).wrapping_shr(b as u32) as i32),
        I32Rotl => binop!(i32, |a: i32, b: i32| Integer::rotl(a, b)),
        I32Rotr => binop!(i32, |a: i32, b: i32| Integer::rotr(a, b)),

        I64Clz => unop!(i64, |v: i64| Integer::leading_zeros(v)),
        I64Ctz => unop!(i64, |v: i64| Integer::trailing_zeros(v)),
        I64Popcnt => unop!(i64, |v: i64| Integer::count_ones(v)),
        I64Add => binop!(i64, |a: i64, b: i64| ArithmeticOps::add(a, b)),
        I64Sub => binop!(i64, |a: i64, b: i64| ArithmeticOps::sub(a, b)),
        I64Mul => binop!(i64, |a: i64, b: i64| ArithmeticOps::mul(a, b)),
        I64DivS => try_binop!(i64, |a: i64, b: i64| ArithmeticOps::div(a, b)),
        I64DivU => try_binop!(i64, unsigned64::div_u),
        I64RemS => try_binop!(i64, |a: i64, b: i64| Integer::rem(a, b)),
        I64RemU => try_binop!(i64, unsigned64::rem_u),
        I64And => binop!(i64, |a: i64, b: i64| a & b),
        I64Or => binop!(i64, |a: i64, b: i64| a | b),
        I64Xor => binop!(i64, |a: i64, b: i64| a ^ b),
        I64Shl => binop!(i64, |a: i64, b: i64| a.wrapping_shl(b as u32)),
        I64ShrS => binop!(i64, |a: i64, b: i64| a.wrapping_shr(b as u32)),
        I64ShrU => binop!(i64, |a: i64, b: i64| (a as u64).wrapping_shr(b as u32) as i64),
        I64Rotl => binop!(i64, |a: i64, b: i64| Integer::rotl(a, b)),
        I64Rotr => binop!(i64, |a: i64, b: i64| Integer::rotr(a, b)),

        F32Abs => unop!(f32, |v: F32| Float::abs(v)),
        F32Neg => unop!(f32, |v: F32| -v),
        F32Ceil => unop!(f32, |v: F32| Float::ceil(v)),
        F32Floor => unop!(f32, |v: F32| Float::floor(v)),
        F32Trunc => unop!(f32, |v: F32| Float::trunc(v)),
        F32Nearest => unop!(f32, |v: F32| Float::nearest(v)),
        F32Sqrt => unop!(f32, |v: F32| Float::sqrt(v)),
        F32Add => binop!(f32, |a: F32, b: F32| ArithmeticOps::add(a, b)),
        F32Sub => binop!(f32, |a: F32, b: F32| ArithmeticOps::sub(a, b)),
        F32Mul => binop!(f32, |a: F32, b: F32| ArithmeticOps::mul(a, b)),
        F32Div => binop!(f32, |a: F32, b: F32| ArithmeticOps::div(a, b).expect("float division never traps")),
        F32Min => binop!(f32, |a: F32, b: F32| Float::min(a, b)),
        F32Max => binop!(f32, |a: F32, b: F32| Float::max(a, b)),
        F32Copysign => binop!(f32, |a: F32, b: F32| Float::copysign(a, b)),

        F64Abs => unop!(f64, |v: F64| Float::abs(v)),
        F64Neg => unop!(f64, |v: F64| -v),
        F64Ceil => unop!(f64, |v: F64| Float::ceil(v)),
        F64Floor => unop!(f64, |v: F64| Float::floor(v)),
        F64Trunc => unop!(f64, |v: F64| Float::trunc(v)),
        F64Nearest => unop!(f64, |v: F64| Float::nearest(v)),
        F64Sqrt => unop!(f64, |v: F64| Float::sqrt(v)),
        F64Add => binop!(f64, |a: F64, b: F64| ArithmeticOps::add(a, b)),
        F64Sub => binop!(f64, |a: F64, b: F64| ArithmeticOps::sub(a, b)),
        F64Mul => binop!(f64, |a: F64, b: F64| ArithmeticOps::mul(a, b)),
        F64Div => binop!(f64, |a: F64, b: F64| ArithmeticOps::div(a, b).expect("float division never traps")),
        F64Min => binop!(f64, |a: F64, b: F64| Float::min(a, b)),
        F64Max => binop!(f64, |a: F64, b: F64| Float::max(a, b)),
        F64Copysign => binop!(f64, |a: F64, b: F64| Float::copysign(a, b)),

        I32WrapI64 => unop!(i64, |v: i64| v as i32),
        I32TruncSF32 => try_unop!(f32, |v: F32| trunc_f32_i32(v.to_float())),
        I32TruncUF32 => try_unop!(f32, |v: F32| trunc_f32_u32(v.to_float()).map(|v| v as i32)),
        I32TruncSF64 => try_unop!(f64, |v: F64| trunc_f64_i32(v.to_float())),
        I32TruncUF64 => try_unop!(f64, |v: F64| trunc_f64_u32(v.to_float()).map(|v| v as i32)),
        I64ExtendSI32 => unop!(i32, |v: i32| v as i64),
        I64ExtendUI32 => unop!(i32, |v: i32| v as u32 as i64),
        I64TruncSF32 => try_unop!(f32, |v: F32| trunc_f32_i64(v.to_float())),
        I64TruncUF32 => try_unop!(f32, |v: F32| trunc_f32_u64(v.to_float()).map(|v| v as i64)),
        I64TruncSF64 => try_unop!(f64, |v: F64| trunc_f64_i64(v.to_float())),
        I64TruncUF64 => try_unop!(f64, |v: F64| trunc_f64_u64(v.to_float()).map(|v| v as i64)),
        F32ConvertSI32 => unop!(i32, |v: i32| F32::from(v as f32)),
        F32ConvertUI32 => unop!(i32, |v: i32| F32::from(v as u32 as f32)),
        F32ConvertSI64 => unop!(i64, |v: i64| F32::from(v as f32)),
        F32ConvertUI64 => unop!(i64, |v: i64| F32::from(v as u64 as f32)),
        F32DemoteF64 => unop!(f64, |v: F64| F32::from(v.to_float() as f32)),
        F64ConvertSI32 => unop!(i32, |v: i32| F64::from(v as f64)),
        F64ConvertUI32 => unop!(i32, |v: i32| F64::from(v as u32 as f64)),
        F64ConvertSI64 => unop!(i64, |v: i64| F64::from(v as f64)),
        F64ConvertUI64 => unop!(i64, |v: i64| F64::from(v as u64 as f64)),
        F64PromoteF32 => unop!(f32, |v: F32| F64::from(v.to_float() as f64)),

        I32ReinterpretF32 => unop!(f32, |v: F32| v.to_bits() as i32),
        I64ReinterpretF64 => unop!(f64, |v: F64| v.to_bits() as i64),
        F32ReinterpretI32 => unop!(i32, |v: i32| F32::from_bits(v as u32)),
        F64ReinterpretI64 => unop!(i64, |v: i64| F64::from_bits(v as u64)),

        Unreachable | Br | BrIfEqz | BrIfNez | BrTable | Return | Call | CallIndirect | Drop | Select | LocalGet
        | LocalSet | LocalTee | GlobalGet | GlobalSet | I32Load | I64Load | F32Load | F64Load | I32Load8S | I32Load8U
        | I32Load16S | I32Load16U | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S | I64Load32U
        | I32Store | I64Store | F32Store | F64Store | I32Store8 | I32Store16 | I64Store8 | I64Store16 | I64Store32
        | MemorySize | MemoryGrow | I32Const | I64Const | F32Const | F64Const => {
            unreachable!("{op:?} has its own dispatch arm outside eval_simple")
        }
    }
    Ok(())
}
