//! The Instantiator: turns a compiled [`Module`] plus a set of resolved
//! imports into a runnable [`Instance`] (`spec.md` §4.4).
//!
//! Every piece of instance state — memories, tables, globals, the function
//! table, the export index — is owned by the `Instance` value itself, so a
//! failed instantiation needs no explicit teardown: the partially built
//! pieces are simply dropped along with the `Rc<InstanceData>` that was never
//! handed out.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::Config;
use crate::error::{Error, LinkError};
use crate::func::{FuncInstance, FuncRef};
use crate::global::{GlobalInstance, GlobalRef};
use crate::host::Externals;
use crate::imports::ImportResolver;
use crate::memory::{MemoryInstance, MemoryRef};
use crate::module::{ExportKind, Module};
use crate::section::ConstExpr;
use crate::table::{TableInstance, TableRef};
use crate::types::Signature;
use crate::value::Value;
use crate::Engine;

/// One resolved export: whichever kind of entity a module exposed under a
/// given name.
#[derive(Clone)]
pub enum ExternVal {
    Func(FuncRef),
    Table(TableRef),
    Memory(MemoryRef),
    Global(GlobalRef),
}

impl fmt::Debug for ExternVal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            ExternVal::Func(_) => "Func",
            ExternVal::Table(_) => "Table",
            ExternVal::Memory(_) => "Memory",
            ExternVal::Global(_) => "Global",
        };
        write!(f, "ExternVal::{kind}")
    }
}

impl ExternVal {
    pub fn as_func(&self) -> Option<&FuncRef> {
        match self {
            ExternVal::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryRef> {
        match self {
            ExternVal::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            ExternVal::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<&GlobalRef> {
        match self {
            ExternVal::Global(g) => Some(g),
            _ => None,
        }
    }
}

/// The reference-counted innards of an [`Instance`]. Kept as a separate type
/// so that internally defined functions can hold a [`Weak`] pointer to it
/// directly — the same pattern `FuncRef`/`MemoryRef`/`TableRef`/`GlobalRef`
/// use for their own backing storage — rather than a `Weak` pointing at the
/// `Instance` newtype, which would be a second, unrelated allocation.
pub(crate) struct InstanceData {
    signatures: Vec<Signature>,
    funcs: RefCell<Vec<FuncRef>>,
    tables: RefCell<Vec<TableRef>>,
    memories: RefCell<Vec<MemoryRef>>,
    globals: RefCell<Vec<GlobalRef>>,
    exports: RefCell<BTreeMap<String, ExternVal>>,
}

/// Reference-counted handle to an instantiated module. Cheap to clone; every
/// internal `Func`/`Memory`/`Table`/`Global` ref holds only a [`Weak`] pointer
/// back to its owning instance, so the instance graph never forms a cycle.
#[derive(Clone)]
pub struct Instance(Rc<InstanceData>);

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Instance")
            .field("exports", &self.0.exports.borrow().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl Instance {
    pub(crate) fn from_data(data: Rc<InstanceData>) -> Instance {
        Instance(data)
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceData> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn func_by_index(&self, idx: u32) -> Option<FuncRef> {
        self.0.funcs.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn table_by_index(&self, idx: u32) -> Option<TableRef> {
        self.0.tables.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn memory_by_index(&self, idx: u32) -> Option<MemoryRef> {
        self.0.memories.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn global_by_index(&self, idx: u32) -> Option<GlobalRef> {
        self.0.globals.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn signature_by_index(&self, idx: u32) -> &Signature {
        &self.0.signatures[idx as usize]
    }

    pub fn export_by_name(&self, name: &str) -> Option<ExternVal> {
        self.0.exports.borrow().get(name).cloned()
    }

    pub fn exported_func(&self, name: &str) -> Option<FuncRef> {
        self.export_by_name(name).and_then(|e| e.as_func().cloned())
    }

    pub fn exported_memory(&self, name: &str) -> Option<MemoryRef> {
        self.export_by_name(name).and_then(|e| e.as_memory().cloned())
    }

    pub fn exported_table(&self, name: &str) -> Option<TableRef> {
        self.export_by_name(name).and_then(|e| e.as_table().cloned())
    }

    pub fn exported_global(&self, name: &str) -> Option<GlobalRef> {
        self.export_by_name(name).and_then(|e| e.as_global().cloned())
    }

    /// Look up `func_name` among the exports and invoke it with `args`.
    #[tracing::instrument(name = "instance::invoke_export", level = "debug", skip(self, args, externals))]
    pub fn invoke_export<E: Externals>(&self, func_name: &str, args: &[Value], externals: &mut E) -> Result<Option<Value>, Error> {
        let func = self
            .exported_func(func_name)
            .ok_or_else(|| LinkError(format!("no exported function named {func_name}")))?;
        let result = FuncInstance::invoke(&func, args, externals);
        if let Err(trap) = &result {
            tracing::debug!(%trap, "export call trapped");
        }
        Ok(result?)
    }

    /// Run every step of `spec.md` §4.4: resolve imports, allocate storage,
    /// evaluate initializers, apply segments, build the export index, invoke
    /// `start`. Nothing here is exposed to the caller until every step has
    /// succeeded.
    pub(crate) fn instantiate<I: ImportResolver>(module: Module, imports: &I, config: Config) -> Result<Instance, Error> {
        let engine = Engine::new(config);
        let signatures = module.types.clone();

        let data = Rc::new(InstanceData {
            signatures,
            funcs: RefCell::new(Vec::with_capacity(module.funcs.len() + module.import_funcs.len())),
            tables: RefCell::new(Vec::new()),
            memories: RefCell::new(Vec::new()),
            globals: RefCell::new(Vec::new()),
            exports: RefCell::new(BTreeMap::new()),
        });
        let instance = Instance(data);

        for (module_name, field_name, type_idx) in &module.import_funcs {
            let signature = &module.types[*type_idx as usize];
            let func = imports.resolve_func(module_name, field_name, signature)?;
            if func.signature() != signature {
                return Err(LinkError(format!(
                    "imported function {module_name}.{field_name} has signature {:?}, expected {signature:?}",
                    func.signature()
                ))
                .into());
            }
            instance.0.funcs.borrow_mut().push(func);
        }
        for (module_name, field_name, descriptor) in &module.import_tables {
            let table = imports.resolve_table(module_name, field_name, descriptor)?;
            check_table_limits(&table, descriptor, module_name, field_name)?;
            instance.0.tables.borrow_mut().push(table);
        }
        for (module_name, field_name, descriptor) in &module.import_memories {
            let memory = imports.resolve_memory(module_name, field_name, descriptor)?;
            check_memory_limits(&memory, descriptor, module_name, field_name)?;
            instance.0.memories.borrow_mut().push(memory);
        }
        for (module_name, field_name, descriptor) in &module.import_globals {
            let global = imports.resolve_global(module_name, field_name, descriptor)?;
            instance.0.globals.borrow_mut().push(global);
        }

        let weak_instance = instance.downgrade();
        for module_func in &module.funcs {
            let func = FuncInstance::alloc_internal(
                engine,
                weak_instance.clone(),
                module_func.signature.clone(),
                Rc::new(module_func.compiled.clone()),
            );
            instance.0.funcs.borrow_mut().push(func);
        }

        for table_descriptor in &module.tables {
            let table = TableInstance::alloc(table_descriptor.initial(), table_descriptor.maximum())?;
            instance.0.tables.borrow_mut().push(table);
        }
        for memory_descriptor in &module.memories {
            let memory = MemoryInstance::alloc(memory_descriptor.initial(), memory_descriptor.maximum())?;
            instance.0.memories.borrow_mut().push(memory);
        }
        for (descriptor, init) in &module.globals {
            let value = instance.eval_const_expr(init);
            let global = GlobalInstance::alloc(value, descriptor.is_mutable());
            instance.0.globals.borrow_mut().push(global);
        }

        for (name, kind, index) in &module.exports {
            let extern_val = match kind {
                ExportKind::Func => ExternVal::Func(
                    instance
                        .func_by_index(*index)
                        .expect("validation guarantees export indices are in range"),
                ),
                ExportKind::Global => ExternVal::Global(
                    instance
                        .global_by_index(*index)
                        .expect("validation guarantees export indices are in range"),
                ),
                ExportKind::Memory => ExternVal::Memory(
                    instance
                        .memory_by_index(*index)
                        .expect("validation guarantees export indices are in range"),
                ),
                ExportKind::Table => ExternVal::Table(
                    instance
                        .table_by_index(*index)
                        .expect("validation guarantees export indices are in range"),
                ),
            };
            instance.0.exports.borrow_mut().insert(name.clone(), extern_val);
        }

        for segment in &module.elements {
            let table = instance
                .table_by_index(segment.table_index)
                .ok_or_else(|| LinkError(format!("element segment targets nonexistent table {}", segment.table_index)))?;
            let offset = instance.eval_const_expr(&segment.offset).i32_expect()?;
            let offset = offset as u32;
            for (i, func_index) in segment.func_indices.iter().enumerate() {
                let func = func_index.and_then(|idx| instance.func_by_index(idx));
                table.set(offset + i as u32, func)?;
            }
        }
        for segment in &module.data {
            let memory = instance
                .memory_by_index(segment.memory_index)
                .ok_or_else(|| LinkError(format!("data segment targets nonexistent memory {}", segment.memory_index)))?;
            let offset = instance.eval_const_expr(&segment.offset).i32_expect()?;
            memory.set_checked(offset as u32, &segment.bytes)?;
        }

        if let Some(start) = module.start {
            let func = instance
                .func_by_index(start)
                .expect("validation guarantees the start function index is in range");
            tracing::debug!(start, "running start function");
            FuncInstance::invoke(&func, &[], &mut crate::host::NopExternals)?;
        }

        Ok(instance)
    }

    fn eval_const_expr(&self, expr: &ConstExpr) -> Value {
        match *expr {
            ConstExpr::I32Const(v) => Value::I32(v),
            ConstExpr::I64Const(v) => Value::I64(v),
            ConstExpr::F32Const(bits) => Value::F32(crate::nan_preserving_float::F32::from_bits(bits)),
            ConstExpr::F64Const(bits) => Value::F64(crate::nan_preserving_float::F64::from_bits(bits)),
            ConstExpr::GlobalGet(idx) => self
                .global_by_index(idx)
                .expect("validation guarantees constant-expression global indices are in range")
                .get(),
        }
    }
}

trait ExpectI32 {
    fn i32_expect(self) -> Result<i32, LinkError>;
}

impl ExpectI32 for Value {
    fn i32_expect(self) -> Result<i32, LinkError> {
        match self {
            Value::I32(v) => Ok(v),
            other => Err(LinkError(format!("expected an i32 constant expression, found {other:?}"))),
        }
    }
}

fn check_table_limits(
    table: &TableRef,
    descriptor: &crate::types::TableDescriptor,
    module_name: &str,
    field_name: &str,
) -> Result<(), LinkError> {
    if table.current_size() < descriptor.initial() {
        return Err(LinkError(format!(
            "imported table {module_name}.{field_name} is smaller than required"
        )));
    }
    match (descriptor.maximum(), table.maximum_size()) {
        (Some(_), None) => Err(LinkError(format!(
            "imported table {module_name}.{field_name} has no maximum, but one is required"
        ))),
        (Some(required), Some(actual)) if actual > required => Err(LinkError(format!(
            "imported table {module_name}.{field_name} has maximum {actual}, exceeding required {required}"
        ))),
        _ => Ok(()),
    }
}

fn check_memory_limits(
    memory: &MemoryRef,
    descriptor: &crate::types::MemoryDescriptor,
    module_name: &str,
    field_name: &str,
) -> Result<(), LinkError> {
    if memory.current_pages() < descriptor.initial() {
        return Err(LinkError(format!(
            "imported memory {module_name}.{field_name} is smaller than required"
        )));
    }
    match (descriptor.maximum(), memory.maximum_pages()) {
        (Some(_), None) => Err(LinkError(format!(
            "imported memory {module_name}.{field_name} has no maximum, but one is required"
        ))),
        (Some(required), Some(actual)) if actual > required => Err(LinkError(format!(
            "imported memory {module_name}.{field_name} has maximum {actual}, exceeding required {required}"
        ))),
        _ => Ok(()),
    }
}
