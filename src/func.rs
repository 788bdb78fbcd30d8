//! Callable functions: either defined by a module's code section, or supplied
//! by the host.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{TrapCode, TrapError};
use crate::host::Externals;
use crate::instance::{Instance, InstanceData};
use crate::module::CompiledFunction;
use crate::types::Signature;
use crate::value::Value;
use crate::{interp, Engine};

/// Reference-counted handle to a [`FuncInstance`].
#[derive(Clone, Debug)]
pub struct FuncRef(Rc<FuncInstance>);

impl std::ops::Deref for FuncRef {
    type Target = FuncInstance;
    fn deref(&self) -> &FuncInstance {
        &self.0
    }
}

pub struct FuncInstance(FuncInstanceInternal);

enum FuncInstanceInternal {
    Internal {
        signature: Signature,
        engine: Engine,
        instance: Weak<InstanceData>,
        body: Rc<CompiledFunction>,
    },
    Host {
        signature: Signature,
        host_func_index: usize,
    },
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            FuncInstanceInternal::Internal { signature, .. } => {
                write!(f, "FuncInstance::Internal {{ signature: {signature:?} }}")
            }
            FuncInstanceInternal::Host { signature, .. } => {
                write!(f, "FuncInstance::Host {{ signature: {signature:?} }}")
            }
        }
    }
}

impl FuncInstance {
    pub fn alloc_host(signature: Signature, host_func_index: usize) -> FuncRef {
        FuncRef(Rc::new(FuncInstance(FuncInstanceInternal::Host {
            signature,
            host_func_index,
        })))
    }

    pub(crate) fn alloc_internal(
        engine: Engine,
        instance: Weak<InstanceData>,
        signature: Signature,
        body: Rc<CompiledFunction>,
    ) -> FuncRef {
        FuncRef(Rc::new(FuncInstance(FuncInstanceInternal::Internal {
            signature,
            engine,
            instance,
            body,
        })))
    }

    pub fn signature(&self) -> &Signature {
        match &self.0 {
            FuncInstanceInternal::Internal { signature, .. } => signature,
            FuncInstanceInternal::Host { signature, .. } => signature,
        }
    }

    pub(crate) fn is_host(&self) -> bool {
        matches!(self.0, FuncInstanceInternal::Host { .. })
    }

    /// Invoke this function with `args`, routing to whichever interpreter
    /// backend compiled its body, or to the host if it's an imported
    /// function.
    ///
    /// Every call, internal or host, passes through here, so this is also
    /// where recursion depth is tracked: each level of Wasm call nesting
    /// (`call`, `call_indirect`, a host import calling back into the module)
    /// increments a thread-local counter that traps once it reaches the
    /// owning engine's `call_stack_limit`, rather than letting unbounded
    /// recursion overflow the host's own stack.
    pub fn invoke<E: Externals>(func: &FuncRef, args: &[Value], externals: &mut E) -> Result<Option<Value>, TrapError> {
        check_signature(func.signature(), args)?;
        match &func.0 {
            FuncInstanceInternal::Internal {
                engine,
                instance,
                body,
                signature,
            } => {
                let _guard = enter_call(engine.config().call_stack_limit())?;
                let instance = Instance::from_data(
                    instance
                        .upgrade()
                        .expect("an internal FuncRef always outlives its owning instance"),
                );
                match body.as_ref() {
                    CompiledFunction::High(code) => interp::high::execute(engine, &instance, code, signature, args, externals),
                    CompiledFunction::Low(code) => interp::low::execute(engine, &instance, code, signature, args, externals),
                }
            }
            FuncInstanceInternal::Host { host_func_index, .. } => {
                let _guard = enter_call(usize::MAX)?;
                externals.invoke_index(*host_func_index, args.into())
            }
        }
    }
}

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct CallGuard;

impl Drop for CallGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

fn enter_call(limit: usize) -> Result<CallGuard, TrapError> {
    CALL_DEPTH.with(|depth| {
        if depth.get() >= limit {
            return Err(TrapError::Code(TrapCode::StackOverflow));
        }
        depth.set(depth.get() + 1);
        Ok(())
    })?;
    Ok(CallGuard)
}

fn check_signature(signature: &Signature, args: &[Value]) -> Result<(), TrapError> {
    let matches = args.len() == signature.params().len()
        && args
            .iter()
            .zip(signature.params())
            .all(|(arg, ty)| arg.value_type() == *ty);
    if matches {
        Ok(())
    } else {
        Err(TrapError::Code(TrapCode::UnexpectedSignature))
    }
}
