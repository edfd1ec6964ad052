//! Persistent compilation cache for the kiln kernel runtime.
//!
//! Instead of recompiling a kernel module on every load, the runtime
//! serializes the compiled artifact (native object bytes plus export
//! metadata) to a pair of companion files and, on a later load,
//! validates and reloads it if nothing relevant has changed. This crate
//! provides the on-disk format, the validating reader, the writer, the
//! advisory file-lock protocol, and the per-unit orchestrator. All
//! validation is fail-safe: any mismatch, corruption, or truncation is
//! a routine cache miss that falls through to compilation.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod format;
pub mod host;
pub mod ledger;
pub mod lock;
pub mod reader;
pub mod script;
pub mod writer;

pub use artifact::{Artifact, FunctionInfo, KernelInfo, Relocation};
pub use error::{CacheError, CacheMiss, CompileError, PrepareError};
pub use host::{CacheConfig, CompileOptions, Compiler, Source, SymbolResolver};
pub use ledger::{Dependency, DependencyLedger};
pub use lock::FileLock;
pub use reader::CacheReader;
pub use script::{Script, ScriptStatus};
pub use writer::CacheWriter;
