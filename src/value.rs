//! Typed Wasm values and the numeric-operation traits the interpreters dispatch
//! through. Ported from the teacher's `value.rs`, trimmed to the conversions the
//! two interpreters actually need.

use crate::error::TrapCode;
use crate::nan_preserving_float::{F32, F64};
use crate::types::ValueType;

/// Runtime representation of a value at the host embedding boundary.
///
/// Wasm code manipulates values of four basic types: 32/64-bit integers (no
/// signed/unsigned distinction at the type level — individual operators interpret
/// the bits as needed) and 32/64-bit IEEE-754 floats.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(F32),
    F64(F64),
}

impl Value {
    pub fn default(value_type: ValueType) -> Self {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0f32.into()),
            ValueType::F64 => Value::F64(0f64.into()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match *self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Value::I32(val)
    }
}
impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::I64(val)
    }
}
impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Value::I32(val as i32)
    }
}
impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Value::I64(val as i64)
    }
}
impl From<F32> for Value {
    fn from(val: F32) -> Self {
        Value::F32(val)
    }
}
impl From<F64> for Value {
    fn from(val: F64) -> Self {
        Value::F64(val)
    }
}
impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Value::F32(val.into())
    }
}
impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value::F64(val.into())
    }
}

/// Create a value of type `Self` from a [`Value`], or `None` if the variant
/// doesn't match.
pub trait FromValue
where
    Self: Sized,
{
    fn from_value(val: Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($variant:ident, $t:ty) => {
        impl FromValue for $t {
            fn from_value(val: Value) -> Option<Self> {
                match val {
                    Value::$variant(v) => Some(v as $t),
                    _ => None,
                }
            }
        }
    };
}
impl_from_value!(I32, i32);
impl_from_value!(I64, i64);
impl_from_value!(I32, u32);
impl_from_value!(I64, u64);

impl FromValue for F32 {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }
}
impl FromValue for F64 {
    fn from_value(val: Value) -> Option<Self> {
        match val {
            Value::F64(v) => Some(v),
            _ => None,
        }
    }
}

/// Arithmetic common to integers and floats.
pub trait ArithmeticOps<T> {
    fn add(self, other: T) -> T;
    fn sub(self, other: T) -> T;
    fn mul(self, other: T) -> T;
    fn div(self, other: T) -> Result<T, TrapCode>;
}

/// Integer-only operations.
pub trait Integer<T>: ArithmeticOps<T> {
    fn leading_zeros(self) -> T;
    fn trailing_zeros(self) -> T;
    fn count_ones(self) -> T;
    fn rotl(self, other: T) -> T;
    fn rotr(self, other: T) -> T;
    fn rem(self, other: T) -> Result<T, TrapCode>;
}

/// Float-only operations.
pub trait Float<T>: ArithmeticOps<T> {
    fn abs(self) -> T;
    fn floor(self) -> T;
    fn ceil(self) -> T;
    fn trunc(self) -> T;
    fn nearest(self) -> T;
    fn sqrt(self) -> T;
    fn min(self, other: T) -> T;
    fn max(self, other: T) -> T;
    fn copysign(self, other: T) -> T;
}

macro_rules! impl_integer_ops {
    ($t:ty, $unsigned:ty) => {
        impl ArithmeticOps<$t> for $t {
            fn add(self, other: $t) -> $t {
                self.wrapping_add(other)
            }
            fn sub(self, other: $t) -> $t {
                self.wrapping_sub(other)
            }
            fn mul(self, other: $t) -> $t {
                self.wrapping_mul(other)
            }
            fn div(self, other: $t) -> Result<$t, TrapCode> {
                if other == 0 {
                    Err(TrapCode::DivisionByZero)
                } else {
                    self.checked_div(other).ok_or(TrapCode::IntegerOverflow)
                }
            }
        }

        impl Integer<$t> for $t {
            fn leading_zeros(self) -> $t {
                self.leading_zeros() as $t
            }
            fn trailing_zeros(self) -> $t {
                self.trailing_zeros() as $t
            }
            fn count_ones(self) -> $t {
                self.count_ones() as $t
            }
            fn rotl(self, other: $t) -> $t {
                self.rotate_left(other as u32)
            }
            fn rotr(self, other: $t) -> $t {
                self.rotate_right(other as u32)
            }
            fn rem(self, other: $t) -> Result<$t, TrapCode> {
                if other == 0 {
                    Err(TrapCode::DivisionByZero)
                } else {
                    Ok(self.wrapping_rem(other))
                }
            }
        }
    };
}
impl_integer_ops!(i32, u32);
impl_integer_ops!(i64, u64);

macro_rules! impl_unsigned_div_rem {
    ($signed:ty, $unsigned:ty) => {
        /// Divide treating both operands as unsigned.
        pub fn div_u(lhs: $signed, rhs: $signed) -> Result<$signed, TrapCode> {
            if rhs == 0 {
                return Err(TrapCode::DivisionByZero);
            }
            Ok(((lhs as $unsigned) / (rhs as $unsigned)) as $signed)
        }
        /// Remainder treating both operands as unsigned.
        pub fn rem_u(lhs: $signed, rhs: $signed) -> Result<$signed, TrapCode> {
            if rhs == 0 {
                return Err(TrapCode::DivisionByZero);
            }
            Ok(((lhs as $unsigned) % (rhs as $unsigned)) as $signed)
        }
    };
}

pub mod unsigned {
    use super::*;
    impl_unsigned_div_rem!(i32, u32);
}
pub mod unsigned64 {
    use super::*;
    impl_unsigned_div_rem!(i64, u64);
}

macro_rules! impl_float_ops {
    ($t:ident, $host:ty) => {
        impl ArithmeticOps<$t> for $t {
            fn add(self, other: $t) -> $t {
                self + other
            }
            fn sub(self, other: $t) -> $t {
                self - other
            }
            fn mul(self, other: $t) -> $t {
                self * other
            }
            fn div(self, other: $t) -> Result<$t, TrapCode> {
                Ok(self / other)
            }
        }

        impl Float<$t> for $t {
            fn abs(self) -> $t {
                $t::from(self.to_float().abs())
            }
            fn floor(self) -> $t {
                $t::from(self.to_float().floor())
            }
            fn ceil(self) -> $t {
                $t::from(self.to_float().ceil())
            }
            fn trunc(self) -> $t {
                $t::from(self.to_float().trunc())
            }
            fn nearest(self) -> $t {
                let x = self.to_float();
                let rounded = x.round();
                let nearest = if (x - x.floor() - 0.5).abs() < <$host>::EPSILON && rounded % 2.0 != 0.0 {
                    rounded - x.signum()
                } else {
                    rounded
                };
                $t::from(nearest)
            }
            fn sqrt(self) -> $t {
                $t::from(self.to_float().sqrt())
            }
            fn min(self, other: $t) -> $t {
                // Resolves to the inherent `min` defined alongside the float newtype,
                // which picks the non-NaN operand the way Wasm's min/max require.
                self.min(other)
            }
            fn max(self, other: $t) -> $t {
                self.max(other)
            }
            fn copysign(self, other: $t) -> $t {
                let bits = core::mem::size_of::<$host>() * 8 - 1;
                let sign_bit_other = other.to_bits() & (1 << bits);
                let mag_self = self.to_bits() & !(1 << bits);
                $t::from_bits(mag_self | sign_bit_other)
            }
        }
    };
}

impl_float_ops!(F32, f32);
impl_float_ops!(F64, f64);

/// A 64-bit bit-cast operand-stack cell, used internally by both interpreters.
///
/// Unlike [`Value`] this carries no type tag: the bytecode already knows, at
/// every point in a function, which type the bits on top of the stack should
/// be interpreted as (that's what validation checked), so the interpreters
/// never need to ask.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UntypedValue(u64);

impl UntypedValue {
    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        UntypedValue(bits)
    }

    pub fn i32(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn i64(self) -> i64 {
        self.0 as i64
    }

    pub fn u32(self) -> u32 {
        self.0 as u32
    }

    pub fn u64(self) -> u64 {
        self.0
    }

    pub fn f32(self) -> F32 {
        F32::from_bits(self.0 as u32)
    }

    pub fn f64(self) -> F64 {
        F64::from_bits(self.0)
    }
}

impl From<i32> for UntypedValue {
    fn from(v: i32) -> Self {
        UntypedValue(v as u32 as u64)
    }
}
impl From<u32> for UntypedValue {
    fn from(v: u32) -> Self {
        UntypedValue(v as u64)
    }
}
impl From<i64> for UntypedValue {
    fn from(v: i64) -> Self {
        UntypedValue(v as u64)
    }
}
impl From<u64> for UntypedValue {
    fn from(v: u64) -> Self {
        UntypedValue(v)
    }
}
impl From<F32> for UntypedValue {
    fn from(v: F32) -> Self {
        UntypedValue(v.to_bits() as u64)
    }
}
impl From<F64> for UntypedValue {
    fn from(v: F64) -> Self {
        UntypedValue(v.to_bits())
    }
}
impl From<bool> for UntypedValue {
    fn from(v: bool) -> Self {
        UntypedValue(v as u64)
    }
}

impl From<Value> for UntypedValue {
    fn from(v: Value) -> Self {
        match v {
            Value::I32(i) => i.into(),
            Value::I64(i) => i.into(),
            Value::F32(f) => f.into(),
            Value::F64(f) => f.into(),
        }
    }
}

impl UntypedValue {
    /// Reinterpret this cell as a [`Value`] of the given type. The caller is
    /// responsible for knowing the right type — that's the whole point of
    /// the untyped representation.
    pub fn with_type(self, ty: ValueType) -> Value {
        match ty {
            ValueType::I32 => Value::I32(self.i32()),
            ValueType::I64 => Value::I64(self.i64()),
            ValueType::F32 => Value::F32(self.f32()),
            ValueType::F64 => Value::F64(self.f64()),
        }
    }
}
