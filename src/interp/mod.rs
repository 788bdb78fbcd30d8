//! The two interpreters: each executes one of the two bytecode shapes
//! `compile::high`/`compile::low` produce. Both are entered exclusively
//! through [`crate::func::FuncInstance::invoke`], which picks the matching
//! one based on which backend compiled the callee.

pub mod high;
pub mod low;
mod ops;
