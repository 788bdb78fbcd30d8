//! The immutable, validated, already-compiled artifact produced by
//! [`crate::engine::Engine::compile`]. Instantiating the same `Module`
//! multiple times re-uses all of this without recompiling anything.

use crate::compile::{high, low};
use crate::section::ConstExpr;
use crate::types::{GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor};

/// A function body compiled by one of the two backends. Which variant shows
/// up is a property of the [`crate::engine::Config`] the module was compiled
/// with, not of the function itself — an engine picks one backend for all of
/// its modules.
#[derive(Debug, Clone)]
pub enum CompiledFunction {
    High(high::Code),
    Low(low::Code),
}

#[derive(Clone)]
pub struct ModuleFunction {
    pub signature: Signature,
    pub compiled: CompiledFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Global,
    Memory,
    Table,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    pub offset: ConstExpr,
    pub func_indices: Vec<Option<u32>>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory_index: u32,
    pub offset: ConstExpr,
    pub bytes: Vec<u8>,
}

/// A fully decoded and compiled module, ready to instantiate.
pub struct Module {
    pub(crate) types: Vec<Signature>,
    pub(crate) import_funcs: Vec<(String, String, u32)>,
    pub(crate) import_globals: Vec<(String, String, GlobalDescriptor)>,
    pub(crate) import_memories: Vec<(String, String, MemoryDescriptor)>,
    pub(crate) import_tables: Vec<(String, String, TableDescriptor)>,
    pub(crate) funcs: Vec<ModuleFunction>,
    pub(crate) imported_func_count: u32,
    pub(crate) tables: Vec<TableDescriptor>,
    pub(crate) memories: Vec<MemoryDescriptor>,
    pub(crate) globals: Vec<(GlobalDescriptor, ConstExpr)>,
    pub(crate) exports: Vec<(String, ExportKind, u32)>,
    pub(crate) start: Option<u32>,
    pub(crate) elements: Vec<ElementSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) custom_sections: Vec<(String, Vec<u8>)>,
}

impl Module {
    pub fn signature_of_type(&self, type_index: u32) -> &Signature {
        &self.types[type_index as usize]
    }

    /// Number of functions imported (these occupy function indices
    /// `0..imported_func_count`; `funcs` holds the rest).
    pub(crate) fn imported_func_count(&self) -> u32 {
        self.imported_func_count
    }

    /// Custom sections (opaque name+payload), in the order they appeared in
    /// the binary. Never interpreted by the engine itself.
    pub fn custom_sections(&self) -> &[(String, Vec<u8>)] {
        &self.custom_sections
    }
}
