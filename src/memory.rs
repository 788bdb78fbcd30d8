//! Linear memory: a contiguous, growable byte array Wasm code can load from
//! and store to at any address, trapping on out-of-bounds access.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{LinkError, TrapCode};
use crate::types::MemoryDescriptor;

/// Size of a linear memory page: 64KiB. Memory size is always a multiple of
/// this.
pub const PAGE_SIZE: usize = 65536;

const MAX_PAGES: u32 = 65536;

/// Reference-counted handle to a [`MemoryInstance`].
#[derive(Clone, Debug)]
pub struct MemoryRef(Rc<MemoryInstance>);

impl std::ops::Deref for MemoryRef {
    type Target = MemoryInstance;
    fn deref(&self) -> &MemoryInstance {
        &self.0
    }
}

pub struct MemoryInstance {
    buffer: RefCell<Vec<u8>>,
    initial: u32,
    maximum: Option<u32>,
}

impl fmt::Debug for MemoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryInstance")
            .field("current_pages", &self.current_pages())
            .field("initial", &self.initial)
            .field("maximum", &self.maximum)
            .finish()
    }
}

impl MemoryInstance {
    /// Allocate a memory instance with `initial` pages, zeroed, growable up
    /// to `maximum` pages (or to the Wasm hard limit of 65536 pages if none is
    /// given).
    pub fn alloc(initial: u32, maximum: Option<u32>) -> Result<MemoryRef, LinkError> {
        if initial > MAX_PAGES || maximum.is_some_and(|max| max > MAX_PAGES) {
            return Err(LinkError(format!(
                "memory size {initial} pages exceeds the hard limit of {MAX_PAGES} pages"
            )));
        }
        if let Some(max) = maximum {
            if initial > max {
                return Err(LinkError(format!(
                    "memory initial size {initial} exceeds maximum {max}"
                )));
            }
        }
        Ok(MemoryRef(Rc::new(MemoryInstance {
            buffer: RefCell::new(vec![0u8; initial as usize * PAGE_SIZE]),
            initial,
            maximum,
        })))
    }

    pub fn initial_pages(&self) -> u32 {
        self.initial
    }

    pub fn maximum_pages(&self) -> Option<u32> {
        self.maximum
    }

    pub fn current_pages(&self) -> u32 {
        (self.buffer.borrow().len() / PAGE_SIZE) as u32
    }

    /// Grow the memory by `delta` pages, returning the previous size in pages,
    /// or `None` if that would exceed the maximum (per spec, growth failure is
    /// reported to the caller, not a trap).
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let current = self.current_pages();
        let max = self.maximum.unwrap_or(MAX_PAGES);
        let new_size = current.checked_add(delta).filter(|&sz| sz <= max)?;
        self.buffer.borrow_mut().resize(new_size as usize * PAGE_SIZE, 0);
        Some(current)
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn get_into(&self, offset: u32, buf: &mut [u8]) -> Result<(), TrapCode> {
        let buffer = self.buffer.borrow();
        let range = checked_range(offset, buf.len(), buffer.len())?;
        buf.copy_from_slice(&buffer[range]);
        Ok(())
    }

    /// Overwrite `value.len()` bytes starting at `offset` with `value`.
    pub fn set(&self, offset: u32, value: &[u8]) -> Result<(), TrapCode> {
        let mut buffer = self.buffer.borrow_mut();
        let range = checked_range(offset, value.len(), buffer.len())?;
        buffer[range].copy_from_slice(value);
        Ok(())
    }

    /// Used by data-segment application at instantiation time: same as
    /// [`set`](Self::set), surfaced separately because callers there treat an
    /// out-of-bounds segment as a link error rather than a trap.
    pub fn set_checked(&self, offset: u32, value: &[u8]) -> Result<(), LinkError> {
        self.set(offset, value)
            .map_err(|_| LinkError(format!("data segment at offset {offset} is out of bounds")))
    }
}

fn checked_range(offset: u32, len: usize, buffer_len: usize) -> Result<std::ops::Range<usize>, TrapCode> {
    let offset = offset as usize;
    let end = offset.checked_add(len).ok_or(TrapCode::MemoryAccessOutOfBounds)?;
    if end > buffer_len {
        return Err(TrapCode::MemoryAccessOutOfBounds);
    }
    Ok(offset..end)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn alloc_zeroes_memory() {
        let mem = MemoryInstance::alloc(1, None).unwrap();
        let mut buf = [0xffu8; 4];
        mem.get_into(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn out_of_bounds_access_traps() {
        let mem = MemoryInstance::alloc(1, None).unwrap();
        let mut buf = [0u8; 4];
        assert_matches!(mem.get_into(PAGE_SIZE as u32 - 2, &mut buf), Err(TrapCode::MemoryAccessOutOfBounds));
    }

    #[test]
    fn grow_respects_maximum() {
        let mem = MemoryInstance::alloc(1, Some(2)).unwrap();
        assert_eq!(mem.grow(1), Some(1));
        assert_eq!(mem.current_pages(), 2);
        assert_eq!(mem.grow(1), None);
    }
}
