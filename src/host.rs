//! The host embedding boundary: how Rust code supplies imported functions to
//! a module and gets called back into.

use core::any::TypeId;
use core::fmt;

use crate::error::{TrapCode, TrapError};
use crate::value::Value;

/// Wrapper around a slice of [`Value`] for convenient indexed access to a host
/// function's arguments.
#[derive(Debug)]
pub struct RuntimeArgs<'a>(&'a [Value]);

impl<'a> From<&'a [Value]> for RuntimeArgs<'a> {
    fn from(inner: &'a [Value]) -> Self {
        RuntimeArgs(inner)
    }
}

impl<'a> AsRef<[Value]> for RuntimeArgs<'a> {
    fn as_ref(&self) -> &[Value] {
        self.0
    }
}

impl<'a> RuntimeArgs<'a> {
    /// Total number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract argument by index, traps if the index is out of range.
    pub fn nth_value_checked(&self, idx: usize) -> Result<Value, TrapError> {
        self.0
            .get(idx)
            .copied()
            .ok_or(TrapError::Code(TrapCode::UnexpectedSignature))
    }
}

/// Trait that lets a host function report a custom error back through a trap.
///
/// Implementations are typically downcast back to their concrete type by the
/// embedder after a call returns `Err`.
pub trait HostError: 'static + fmt::Display + fmt::Debug + Send + Sync {
    #[doc(hidden)]
    fn type_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

impl dyn HostError {
    pub fn downcast_ref<T: HostError>(&self) -> Option<&T> {
        if self.type_id() == TypeId::of::<T>() {
            // SAFETY: type_id() just confirmed the concrete type matches T.
            unsafe { Some(&*(self as *const dyn HostError as *const T)) }
        } else {
            None
        }
    }
}

/// Implemented by the embedder to provide the bodies of imported functions.
///
/// Each imported function is identified by the small integer index it was
/// registered under, not by name — name resolution happens once, at
/// instantiation, via [`crate::imports::ImportResolver`].
pub trait Externals {
    fn invoke_index(&mut self, index: usize, args: RuntimeArgs) -> Result<Option<Value>, TrapError>;
}

/// An [`Externals`] that traps on every call. Useful for modules that import
/// no functions, or while testing the parts of the pipeline that sit below
/// the host boundary.
pub struct NopExternals;

impl Externals for NopExternals {
    fn invoke_index(&mut self, _index: usize, _args: RuntimeArgs) -> Result<Option<Value>, TrapError> {
        Err(TrapError::Code(TrapCode::Unreachable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_runtime_args() {
        let args: RuntimeArgs = (&[Value::I32(0)][..]).into();
        assert_eq!(args.nth_value_checked(0).unwrap(), Value::I32(0));
    }

    #[test]
    fn out_of_range_arg_traps() {
        let args: RuntimeArgs = (&[][..]).into();
        assert!(args.nth_value_checked(0).is_err());
    }

    #[test]
    fn nop_externals_always_traps() {
        let mut nop = NopExternals;
        assert!(nop.invoke_index(0, (&[][..]).into()).is_err());
    }
}
