//! Interfaces consumed from the host runtime.
//!
//! The cache subsystem does not compile kernels or resolve runtime
//! symbols itself; both are supplied by the embedder through the traits
//! here. Process-wide switches (disabling the cache, the reusable
//! context-slot layout) are passed explicitly as [`CacheConfig`] rather
//! than read from ambient globals, so the subsystem stays testable.

use crate::artifact::Artifact;
use crate::error::CompileError;
use crate::ledger::Dependency;

/// Symbol queried before a cache write to record whether the runtime
/// library is currently threadable.
pub const SYM_IS_THREADABLE: &str = "__isThreadable";

/// Symbol queried after loading a non-threadable cached artifact so the
/// runtime can clear its global threading flag.
pub const SYM_CLEAR_THREADABLE: &str = "__clearThreadable";

/// One source module handed to the compiler collaborator.
#[derive(Debug, Clone)]
pub struct Source {
    /// Module name, used in diagnostics.
    pub name: String,

    /// Opaque front-end module bytes.
    pub module: Vec<u8>,
}

impl Source {
    /// Creates a source handle.
    pub fn new(name: impl Into<String>, module: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            module,
        }
    }
}

/// Options forwarded to the compiler collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Embedder-defined flag bits, passed through unchanged.
    pub flags: u64,
}

/// The external source-to-native compilation pipeline.
pub trait Compiler {
    /// Compiles a source module to a native artifact.
    fn compile(&self, source: &Source, options: &CompileOptions) -> Result<Artifact, CompileError>;
}

/// Host-runtime symbol lookup, used for relocation patching and for the
/// threadable-flag queries.
pub trait SymbolResolver {
    /// Resolves a symbol name to an absolute address, or `None` if the
    /// symbol is unknown to the host runtime.
    fn lookup(&self, name: &str) -> Option<u64>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&str) -> Option<u64>,
{
    fn lookup(&self, name: &str) -> Option<u64> {
        self(name)
    }
}

/// Process-level cache configuration supplied by the embedder.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; when `false` every load falls through to compile.
    pub enabled: bool,

    /// Runtime-library ledger entries, recorded before any per-source
    /// dependency on both the read and write paths.
    pub runtime_deps: Vec<Dependency>,

    /// Number of reusable object slots in the current host context
    /// layout. A cached artifact recording a slot at or beyond this
    /// count is rejected.
    pub context_slot_count: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime_deps: Vec::new(),
            context_slot_count: 0,
        }
    }
}
