//! Type descriptors: the bits of a module's type section that the instantiator
//! and host embedding API need to reason about, independent of any particular
//! function body.

/// One of the four value types Wasm code operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub(crate) fn from_wasmparser(ty: wasmparser::ValType) -> ValueType {
        match ty {
            wasmparser::ValType::I32 => ValueType::I32,
            wasmparser::ValType::I64 => ValueType::I64,
            wasmparser::ValType::F32 => ValueType::F32,
            wasmparser::ValType::F64 => ValueType::F64,
            other => panic!("unsupported value type {other:?} (validation should have rejected this module)"),
        }
    }
}

/// Signature of a function: zero or more parameter types and zero or one
/// return type.
///
/// Two signatures are equal iff their parameter lists and return types match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Box<[ValueType]>,
    return_type: Option<ValueType>,
}

impl Signature {
    pub fn new(params: impl Into<Box<[ValueType]>>, return_type: Option<ValueType>) -> Signature {
        Signature {
            params: params.into(),
            return_type,
        }
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn return_type(&self) -> Option<ValueType> {
        self.return_type
    }

    pub(crate) fn from_wasmparser(func_type: &wasmparser::FuncType) -> Signature {
        Signature {
            params: func_type
                .params()
                .iter()
                .copied()
                .map(ValueType::from_wasmparser)
                .collect(),
            return_type: func_type.results().first().map(|ty| ValueType::from_wasmparser(*ty)),
        }
    }
}

/// Description of a global, used to describe and type-check global imports.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDescriptor {
    value_type: ValueType,
    mutable: bool,
}

impl GlobalDescriptor {
    pub fn new(value_type: ValueType, mutable: bool) -> Self {
        GlobalDescriptor { value_type, mutable }
    }

    pub(crate) fn from_wasmparser(global_type: &wasmparser::GlobalType) -> GlobalDescriptor {
        GlobalDescriptor {
            value_type: ValueType::from_wasmparser(global_type.content_type),
            mutable: global_type.mutable,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }
}

/// Description of a table, used to describe and type-check table imports.
#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    initial: u32,
    maximum: Option<u32>,
}

impl TableDescriptor {
    pub fn new(initial: u32, maximum: Option<u32>) -> Self {
        TableDescriptor { initial, maximum }
    }

    pub(crate) fn from_wasmparser(table_type: &wasmparser::TableType) -> TableDescriptor {
        TableDescriptor {
            initial: table_type.initial,
            maximum: table_type.maximum,
        }
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}

/// Description of a linear memory, used to describe and type-check memory
/// imports. Sizes are in 64KiB pages.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDescriptor {
    initial: u32,
    maximum: Option<u32>,
}

impl MemoryDescriptor {
    pub fn new(initial: u32, maximum: Option<u32>) -> Self {
        MemoryDescriptor { initial, maximum }
    }

    pub(crate) fn from_wasmparser(memory_type: &wasmparser::MemoryType) -> MemoryDescriptor {
        MemoryDescriptor {
            initial: memory_type.initial as u32,
            maximum: memory_type.maximum.map(|m| m as u32),
        }
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}
