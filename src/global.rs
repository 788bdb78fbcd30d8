//! Global variables: a single mutable-or-not value of fixed type.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::LinkError;
use crate::types::ValueType;
use crate::value::Value;

/// Reference-counted handle to a [`GlobalInstance`].
#[derive(Clone, Debug)]
pub struct GlobalRef(Rc<GlobalInstance>);

impl std::ops::Deref for GlobalRef {
    type Target = GlobalInstance;
    fn deref(&self) -> &GlobalInstance {
        &self.0
    }
}

pub struct GlobalInstance {
    val: Cell<Value>,
    mutable: bool,
}

impl fmt::Debug for GlobalInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GlobalInstance")
            .field("value_type", &self.value_type())
            .field("mutable", &self.mutable)
            .finish()
    }
}

impl GlobalInstance {
    /// Allocate a global with initial value `val`. Imported and exported
    /// globals are always immutable; `mutable` only matters for globals owned
    /// by a single instance.
    pub fn alloc(val: Value, mutable: bool) -> GlobalRef {
        GlobalRef(Rc::new(GlobalInstance {
            val: Cell::new(val),
            mutable,
        }))
    }

    pub fn set(&self, val: Value) -> Result<(), LinkError> {
        if !self.mutable {
            return Err(LinkError("attempt to change an immutable global".into()));
        }
        if self.value_type() != val.value_type() {
            return Err(LinkError("attempt to change a global's value type".into()));
        }
        self.val.set(val);
        Ok(())
    }

    pub fn get(&self) -> Value {
        self.val.get()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn value_type(&self) -> ValueType {
        self.val.get().value_type()
    }
}
