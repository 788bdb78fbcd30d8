//! A WebAssembly engine core: decode and validate a module, compile every
//! function body with one of two interchangeable backends, instantiate it
//! against host-supplied imports, and run it.
//!
//! The pipeline mirrors the four embedding-facing stages on [`Engine`]:
//! [`Engine::compile`] (decode + validate + lower to bytecode),
//! [`Engine::instantiate`] (resolve imports, allocate state, run segments and
//! `start`), and [`Instance::invoke_export`]/[`Engine::run`] to call in.
//! [`Config::with_backend`] picks which of the two compilers
//! ([`compile::high`], a structured, self-describing encoding, or
//! [`compile::low`], a flattened one with precomputed jump targets) lowers
//! function bodies; [`interp::high`] and [`interp::low`] are the matching
//! interpreters.

pub mod common;
pub mod compile;
pub mod engine;
pub mod error;
pub mod func;
pub mod global;
pub mod host;
pub mod imports;
pub mod instance;
pub mod interp;
pub mod isa;
pub mod memory;
pub mod module;
pub mod nan_preserving_float;
pub mod section;
pub mod table;
pub mod types;
pub mod value;

pub use engine::{Backend, ByteOrder, Config, DataPlacement, Engine};
pub use error::{CompileError, DecodeError, Error, LinkError, TrapCode, TrapError, ValidationError};
pub use func::FuncRef;
pub use global::GlobalRef;
pub use host::{Externals, HostError, NopExternals, RuntimeArgs};
pub use imports::{ImportResolver, ImportsBuilder, ModuleImportResolver};
pub use instance::{ExternVal, Instance};
pub use memory::MemoryRef;
pub use module::Module;
pub use table::TableRef;
pub use types::{GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor, ValueType};
pub use value::Value;
