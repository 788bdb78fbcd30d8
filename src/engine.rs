//! The embedding-facing facade: configuration, compilation, instantiation.
//!
//! An [`Engine`] is a cheap, `Clone`-able value — it owns a [`Config`] and
//! nothing else. Compilation is a pure function of the input bytes and the
//! config; instantiation reads an immutable [`Module`] and writes only to the
//! freshly allocated [`crate::instance::Instance`]. Nothing here needs
//! internal mutability, so there's no `Arc` to share, unlike the teacher's
//! `Rc<RefCell<..>>`-heavy instance graph.

use crate::error::Error;
use crate::host::Externals;
use crate::imports::ImportResolver;
use crate::instance::Instance;
use crate::module::Module;
use crate::section;

/// Which of the two compiler backends an [`Engine`] lowers function bodies
/// with. Fixed for the lifetime of an `Engine`: every `Module` it compiles
/// uses the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Structured, self-describing byte encoding (`compile::high`).
    High,
    /// Flattened byte encoding with absolute jumps (`compile::low`).
    Low,
}

/// Byte order used by the low-level backend's multi-byte immediates. The
/// high-level backend always writes big-endian, regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
    Native,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Native
    }
}

/// Where a linear memory's backing buffer is allocated.
///
/// Both variants currently allocate on the heap (`Vec<u8>`); `OffHeap` is
/// carried through as a config knob so an embedder's choice round-trips, but
/// there's no separate off-heap allocator wired up yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPlacement {
    Heap,
    OffHeap,
}

impl Default for DataPlacement {
    fn default() -> Self {
        DataPlacement::Heap
    }
}

/// Engine configuration: back-end selection, byte order, data placement, and
/// stack limits. Construct with [`Config::default`] and the `with_*` builder
/// methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    backend: Backend,
    byte_order: ByteOrder,
    data_placement: DataPlacement,
    value_stack_limit: usize,
    call_stack_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: Backend::High,
            byte_order: ByteOrder::default(),
            data_placement: DataPlacement::default(),
            value_stack_limit: 1024 * 1024,
            call_stack_limit: 64 * 1024,
        }
    }
}

impl Config {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_data_placement(mut self, data_placement: DataPlacement) -> Self {
        self.data_placement = data_placement;
        self
    }

    pub fn with_value_stack_limit(mut self, limit: usize) -> Self {
        self.value_stack_limit = limit;
        self
    }

    pub fn with_call_stack_limit(mut self, limit: usize) -> Self {
        self.call_stack_limit = limit;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn data_placement(&self) -> DataPlacement {
        self.data_placement
    }

    pub fn value_stack_limit(&self) -> usize {
        self.value_stack_limit
    }

    pub fn call_stack_limit(&self) -> usize {
        self.call_stack_limit
    }
}

/// Entry point: decodes, validates, compiles and instantiates modules
/// according to a fixed [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decode, validate and compile every function body in one pass.
    /// `wasmparser`'s validator runs inline, so a malformed or ill-typed
    /// module never reaches the section builder.
    #[tracing::instrument(name = "engine::compile", level = "debug", skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, Error> {
        section::assemble(bytes, self.config.backend, self.config.byte_order)
    }

    /// Validate without compiling, for callers that only need a yes/no
    /// answer (`spec.md` §6's `validate` entry point).
    pub fn validate(&self, bytes: &[u8]) -> Result<(), Error> {
        self.compile(bytes).map(|_| ())
    }

    /// Resolve imports, allocate instance state, run element/data segments
    /// and the start function, per `spec.md` §4.4.
    #[tracing::instrument(name = "engine::instantiate", level = "debug", skip_all)]
    pub fn instantiate<I: ImportResolver>(&self, module: Module, imports: &I) -> Result<Instance, Error> {
        Instance::instantiate(module, imports, self.config)
    }

    /// Instantiate and immediately invoke an exported function, driving host
    /// calls through `externals`. A convenience composing `instantiate` with
    /// `Instance::invoke_export`.
    pub fn run<I: ImportResolver>(
        &self,
        module: Module,
        imports: &I,
        export_name: &str,
        args: &[crate::value::Value],
        externals: &mut dyn Externals,
    ) -> Result<Option<crate::value::Value>, Error> {
        let instance = self.instantiate(module, imports)?;
        instance.invoke_export(export_name, args, externals)
    }
}
