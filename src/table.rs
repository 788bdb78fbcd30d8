//! Tables: growable arrays of optional function references, indirectly
//! callable via `call_indirect`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::LinkError;
use crate::func::FuncRef;

/// Reference-counted handle to a [`TableInstance`].
#[derive(Clone, Debug)]
pub struct TableRef(Rc<TableInstance>);

impl std::ops::Deref for TableRef {
    type Target = TableInstance;
    fn deref(&self) -> &TableInstance {
        &self.0
    }
}

pub struct TableInstance {
    buffer: RefCell<Vec<Option<FuncRef>>>,
    maximum: Option<u32>,
}

impl fmt::Debug for TableInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableInstance")
            .field("len", &self.buffer.borrow().len())
            .field("maximum", &self.maximum)
            .finish()
    }
}

impl TableInstance {
    /// Allocate a table with `initial` uninitialized (`None`) slots, growable
    /// up to `maximum`.
    pub fn alloc(initial: u32, maximum: Option<u32>) -> Result<TableRef, LinkError> {
        if let Some(max) = maximum {
            if initial > max {
                return Err(LinkError(format!(
                    "table initial size {initial} exceeds maximum {max}"
                )));
            }
        }
        Ok(TableRef(Rc::new(TableInstance {
            buffer: RefCell::new(vec![None; initial as usize]),
            maximum,
        })))
    }

    pub fn current_size(&self) -> u32 {
        self.buffer.borrow().len() as u32
    }

    pub fn maximum_size(&self) -> Option<u32> {
        self.maximum
    }

    pub fn grow(&self, by: u32) -> Option<u32> {
        let current = self.current_size();
        let max = self.maximum.unwrap_or(u32::MAX);
        let new_size = current.checked_add(by).filter(|&sz| sz <= max)?;
        self.buffer.borrow_mut().resize(new_size as usize, None);
        Some(current)
    }

    pub fn get(&self, offset: u32) -> Option<Option<FuncRef>> {
        self.buffer.borrow().get(offset as usize).cloned()
    }

    pub fn set(&self, offset: u32, value: Option<FuncRef>) -> Result<(), LinkError> {
        let mut buffer = self.buffer.borrow_mut();
        let len = buffer.len();
        match buffer.get_mut(offset as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LinkError(format!(
                "element segment offset {offset} is out of bounds for table of size {len}"
            ))),
        }
    }
}
