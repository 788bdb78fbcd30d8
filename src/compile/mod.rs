//! The two bytecode backends.
//!
//! Both take the same input — a function's [`crate::section::Inst`] tree plus
//! its locals and signature — and write a byte buffer, but they disagree on
//! how control flow is represented:
//!
//! - [`high`] keeps Wasm's structured nesting: each `block`/`loop`/`if` is
//!   prefixed with the byte length of its body, so the interpreter can skip
//!   over it in one jump without decoding it. Branches carry a relative label
//!   depth, exactly as the source did.
//! - [`low`] flattens all control flow into absolute byte-offset jumps,
//!   computed by a forward-reference fixup pass once every instruction has
//!   been emitted (see `low::Reloc`). Multi-byte immediates are written in
//!   whichever byte order the `Engine`'s `Config` selects.

pub mod high;
pub mod low;
