//! Resolving a module's imports against host- or instance-provided
//! definitions.

use std::collections::BTreeMap;

use crate::error::LinkError;
use crate::func::FuncRef;
use crate::global::GlobalRef;
use crate::instance::Instance;
use crate::memory::MemoryRef;
use crate::table::TableRef;
use crate::types::{GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor};

/// Resolver of an entire module's dependencies: a (module name, field name,
/// descriptor) triple maps to a concrete reference.
pub trait ImportResolver {
    fn resolve_func(&self, module_name: &str, field_name: &str, signature: &Signature) -> Result<FuncRef, LinkError>;

    fn resolve_global(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &GlobalDescriptor,
    ) -> Result<GlobalRef, LinkError>;

    fn resolve_memory(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &MemoryDescriptor,
    ) -> Result<MemoryRef, LinkError>;

    fn resolve_table(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &TableDescriptor,
    ) -> Result<TableRef, LinkError>;
}

/// Per-module import resolver. [`ImportsBuilder`] dispatches to one of these
/// per module name.
pub trait ModuleImportResolver {
    fn resolve_func(&self, field_name: &str, _signature: &Signature) -> Result<FuncRef, LinkError> {
        Err(export_not_found(field_name))
    }

    fn resolve_global(&self, field_name: &str, _descriptor: &GlobalDescriptor) -> Result<GlobalRef, LinkError> {
        Err(export_not_found(field_name))
    }

    fn resolve_memory(&self, field_name: &str, _descriptor: &MemoryDescriptor) -> Result<MemoryRef, LinkError> {
        Err(export_not_found(field_name))
    }

    fn resolve_table(&self, field_name: &str, _descriptor: &TableDescriptor) -> Result<TableRef, LinkError> {
        Err(export_not_found(field_name))
    }
}

fn export_not_found(field_name: &str) -> LinkError {
    LinkError(format!("export {field_name} not found"))
}

/// Builds an [`ImportResolver`] out of named [`ModuleImportResolver`]s — one
/// per imported module name.
#[derive(Default)]
pub struct ImportsBuilder<'a> {
    modules: BTreeMap<String, &'a dyn ModuleImportResolver>,
}

impl<'a> ImportsBuilder<'a> {
    pub fn new() -> Self {
        ImportsBuilder::default()
    }

    #[must_use]
    pub fn with_resolver(mut self, name: impl Into<String>, resolver: &'a dyn ModuleImportResolver) -> Self {
        self.modules.insert(name.into(), resolver);
        self
    }

    pub fn push_resolver(&mut self, name: impl Into<String>, resolver: &'a dyn ModuleImportResolver) {
        self.modules.insert(name.into(), resolver);
    }

    fn resolver(&self, name: &str) -> Result<&dyn ModuleImportResolver, LinkError> {
        self.modules
            .get(name)
            .copied()
            .ok_or_else(|| LinkError(format!("module {name} not found among imports")))
    }
}

impl<'a> ImportResolver for ImportsBuilder<'a> {
    fn resolve_func(&self, module_name: &str, field_name: &str, signature: &Signature) -> Result<FuncRef, LinkError> {
        self.resolver(module_name)?.resolve_func(field_name, signature)
    }

    fn resolve_global(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &GlobalDescriptor,
    ) -> Result<GlobalRef, LinkError> {
        self.resolver(module_name)?.resolve_global(field_name, descriptor)
    }

    fn resolve_memory(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &MemoryDescriptor,
    ) -> Result<MemoryRef, LinkError> {
        self.resolver(module_name)?.resolve_memory(field_name, descriptor)
    }

    fn resolve_table(
        &self,
        module_name: &str,
        field_name: &str,
        descriptor: &TableDescriptor,
    ) -> Result<TableRef, LinkError> {
        self.resolver(module_name)?.resolve_table(field_name, descriptor)
    }
}

/// A previously instantiated module can itself resolve imports: its exports
/// are the other module's imports.
impl ModuleImportResolver for Instance {
    fn resolve_func(&self, field_name: &str, _signature: &Signature) -> Result<FuncRef, LinkError> {
        self.exported_func(field_name).ok_or_else(|| export_not_found(field_name))
    }

    fn resolve_global(&self, field_name: &str, _descriptor: &GlobalDescriptor) -> Result<GlobalRef, LinkError> {
        self.exported_global(field_name).ok_or_else(|| export_not_found(field_name))
    }

    fn resolve_memory(&self, field_name: &str, _descriptor: &MemoryDescriptor) -> Result<MemoryRef, LinkError> {
        self.exported_memory(field_name).ok_or_else(|| export_not_found(field_name))
    }

    fn resolve_table(&self, field_name: &str, _descriptor: &TableDescriptor) -> Result<TableRef, LinkError> {
        self.exported_table(field_name).ok_or_else(|| export_not_found(field_name))
    }
}
