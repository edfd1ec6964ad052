//! Per-unit orchestration: load from cache or compile, then persist.
//!
//! A [`Script`] owns one source module's compile-or-load lifecycle. It
//! starts in `Unknown`, and a single successful
//! [`prepare_executable`](Script::prepare_executable) moves it to either
//! `Cached` (artifact reloaded from the companion files) or `Compiled`
//! (freshly compiled, with a best-effort cache write). Both paths lock
//! the object file before the info file, so concurrent readers and a
//! writer on the same cache directory cannot deadlock.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use kiln_common::Digest;

use crate::artifact::{Artifact, FunctionInfo, KernelInfo};
use crate::error::PrepareError;
use crate::format::{INFO_EXT, OBJECT_EXT};
use crate::host::{
    CacheConfig, CompileOptions, Compiler, Source, SymbolResolver, SYM_CLEAR_THREADABLE,
    SYM_IS_THREADABLE,
};
use crate::ledger::{Dependency, DependencyLedger};
use crate::lock::FileLock;
use crate::reader::CacheReader;
use crate::writer::CacheWriter;

/// Lifecycle state of a script, with the artifact owned by whichever
/// terminal state was reached.
#[derive(Debug)]
enum ScriptState {
    Unknown,
    Cached(Artifact),
    Compiled(Artifact),
}

/// Observable lifecycle state of a [`Script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// No load or compile has happened yet.
    Unknown,
    /// The artifact was reloaded from a validated cache.
    Cached,
    /// The artifact was freshly compiled.
    Compiled,
}

/// One compilation unit's end-to-end compile-or-load lifecycle.
pub struct Script {
    /// The source module this unit compiles or loads.
    source: Source,

    state: ScriptState,

    /// Registered per-source ledger entries, in registration order.
    source_deps: Vec<Dependency>,

    /// Sticky diagnostic: the last cache rejection was a context-slot
    /// incompatibility rather than a dependency change.
    context_slot_unavailable: bool,
}

impl Script {
    /// Creates a unit for `source` in the `Unknown` state.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            state: ScriptState::Unknown,
            source_deps: Vec::new(),
            context_slot_unavailable: false,
        }
    }

    /// The unit's source module.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ScriptStatus {
        match self.state {
            ScriptState::Unknown => ScriptStatus::Unknown,
            ScriptState::Cached(_) => ScriptStatus::Cached,
            ScriptState::Compiled(_) => ScriptStatus::Compiled,
        }
    }

    /// Wipes the unit back to `Unknown`: the artifact, the registered
    /// source dependencies, and the sticky diagnostic are all cleared.
    pub fn reset(&mut self) {
        self.state = ScriptState::Unknown;
        self.source_deps.clear();
        self.context_slot_unavailable = false;
    }

    /// Registers a source dependency for the next prepare. Entries are
    /// recorded in the ledger in registration order.
    pub fn add_source_dependency(&mut self, name: impl Into<String>, digest: Digest) {
        self.source_deps.push(Dependency::new(name, digest));
    }

    /// Returns `true` if the last cache rejection happened at the
    /// context-slot stage.
    pub fn is_context_slot_unavailable(&self) -> bool {
        self.context_slot_unavailable
    }

    /// Loads the unit from cache or compiles it, persisting the result.
    ///
    /// Fails with [`PrepareError::InvalidOperation`] unless the unit is
    /// in `Unknown`. The cache path is skipped when the cache is
    /// disabled or `cache_dir`/`cache_name` are absent. A cache miss of
    /// any kind falls through to compilation; only a compile failure
    /// fails the call. A failed cache write after a successful compile
    /// is logged and the unit still ends up `Compiled`.
    pub fn prepare_executable(
        &mut self,
        cache_dir: Option<&Path>,
        cache_name: Option<&str>,
        options: &CompileOptions,
        config: &CacheConfig,
        compiler: &dyn Compiler,
        resolver: &dyn SymbolResolver,
    ) -> Result<(), PrepareError> {
        if !matches!(self.state, ScriptState::Unknown) {
            return Err(PrepareError::InvalidOperation);
        }

        let paths = match (config.enabled, cache_dir, cache_name) {
            (true, Some(dir), Some(name)) => Some(cache_paths(dir, name)),
            _ => None,
        };

        if let Some((obj_path, info_path)) = &paths {
            let ledger = self.build_ledger(config);
            if let Some(artifact) =
                self.load_cache(obj_path, info_path, &ledger, config, resolver)
            {
                if !artifact.threadable {
                    resolver.lookup(SYM_CLEAR_THREADABLE);
                }
                self.state = ScriptState::Cached(artifact);
                return Ok(());
            }
        }

        let artifact = compiler.compile(&self.source, options)?;

        if let Some((obj_path, info_path)) = &paths {
            let ledger = self.build_ledger(config);
            self.write_cache(obj_path, info_path, &ledger, &artifact, resolver);
        }

        self.state = ScriptState::Compiled(artifact);
        Ok(())
    }

    /// Probes whether a trusted cache exists for this unit, without
    /// materializing or relocating anything.
    pub fn check_cached(&self, cache_dir: &Path, cache_name: &str, config: &CacheConfig) -> bool {
        if !config.enabled {
            return false;
        }

        let (obj_path, info_path) = cache_paths(cache_dir, cache_name);
        let mut obj_lock = match FileLock::shared(&obj_path) {
            Ok(lock) => lock,
            Err(_) => return false,
        };
        let mut info_lock = match FileLock::shared(&info_path) {
            Ok(lock) => lock,
            Err(_) => return false,
        };

        let ledger = self.build_ledger(config);
        let mut reader = CacheReader::new(&ledger, config.context_slot_count);
        reader.check_cache_file(obj_lock.file(), info_lock.file())
    }

    /// Builds the ledger for this load: runtime-library entries first,
    /// then every registered source dependency in registration order.
    fn build_ledger(&self, config: &CacheConfig) -> DependencyLedger {
        let mut ledger = DependencyLedger::new();
        for dep in &config.runtime_deps {
            ledger.push(dep.name.clone(), dep.digest);
        }
        for dep in &self.source_deps {
            ledger.push(dep.name.clone(), dep.digest);
        }
        ledger
    }

    /// Read path: shared locks in object-then-info order, then a full
    /// validating read. Any failure is a miss; the sticky context-slot
    /// diagnostic is captured from the reader.
    fn load_cache(
        &mut self,
        obj_path: &Path,
        info_path: &Path,
        ledger: &DependencyLedger,
        config: &CacheConfig,
        resolver: &dyn SymbolResolver,
    ) -> Option<Artifact> {
        let mut obj_lock = match FileLock::shared(obj_path) {
            Ok(lock) => lock,
            Err(err) => {
                debug!(path = %obj_path.display(), error = %err, "cache unavailable");
                return None;
            }
        };
        let mut info_lock = match FileLock::shared(info_path) {
            Ok(lock) => lock,
            Err(err) => {
                debug!(path = %info_path.display(), error = %err, "cache unavailable");
                return None;
            }
        };

        let mut reader = CacheReader::new(ledger, config.context_slot_count);
        match reader.read_cache_file(obj_lock.file(), info_lock.file(), resolver) {
            Ok(artifact) => Some(artifact),
            Err(miss) => {
                self.context_slot_unavailable = reader.is_context_slot_unavailable();
                debug!(name = %self.source.name, reason = %miss, "cache miss");
                None
            }
        }
    }

    /// Write path: exclusive locks in object-then-info order, then a
    /// full replacement write. Best-effort; any failure truncates and
    /// removes both companion files so no partially written pair is ever
    /// observable, and is only logged.
    fn write_cache(
        &self,
        obj_path: &Path,
        info_path: &Path,
        ledger: &DependencyLedger,
        artifact: &Artifact,
        resolver: &dyn SymbolResolver,
    ) {
        let threadable = resolver
            .lookup(SYM_IS_THREADABLE)
            .map(|value| value != 0)
            .unwrap_or(false);

        let mut obj_lock = match FileLock::exclusive(obj_path) {
            Ok(lock) => lock,
            Err(err) => {
                warn!(path = %obj_path.display(), error = %err, "unable to lock cache file for writing");
                return;
            }
        };
        let mut info_lock = match FileLock::exclusive(info_path) {
            Ok(lock) => lock,
            Err(err) => {
                warn!(path = %info_path.display(), error = %err, "unable to lock cache file for writing");
                // The exclusive open may have created the object file.
                discard(obj_lock);
                return;
            }
        };

        let writer = CacheWriter::new(ledger);
        if let Err(err) =
            writer.write_cache_file(obj_lock.file(), info_lock.file(), artifact, threadable)
        {
            warn!(name = %self.source.name, error = %err, "failed to write the cache");
            discard(obj_lock);
            discard(info_lock);
        }
    }

    fn artifact(&self) -> Option<&Artifact> {
        match &self.state {
            ScriptState::Cached(artifact) | ScriptState::Compiled(artifact) => Some(artifact),
            ScriptState::Unknown => None,
        }
    }

    /// Exported variable names; empty in `Unknown`.
    pub fn export_var_names(&self) -> &[String] {
        match self.artifact() {
            Some(artifact) => &artifact.variables,
            None => &[],
        }
    }

    /// Exported functions; empty in `Unknown`.
    pub fn export_funcs(&self) -> &[FunctionInfo] {
        match self.artifact() {
            Some(artifact) => &artifact.functions,
            None => &[],
        }
    }

    /// Exported per-element kernels; empty in `Unknown`.
    pub fn export_kernels(&self) -> &[KernelInfo] {
        match self.artifact() {
            Some(artifact) => &artifact.kernels,
            None => &[],
        }
    }

    /// Source pragmas; empty in `Unknown`.
    pub fn pragmas(&self) -> &[(String, String)] {
        match self.artifact() {
            Some(artifact) => &artifact.pragmas,
            None => &[],
        }
    }

    /// Tracked object slots; empty in `Unknown`.
    pub fn object_slots(&self) -> &[u32] {
        match self.artifact() {
            Some(artifact) => &artifact.object_slots,
            None => &[],
        }
    }

    /// Native code bytes; empty in `Unknown`.
    pub fn code(&self) -> &[u8] {
        match self.artifact() {
            Some(artifact) => artifact.code(),
            None => &[],
        }
    }

    /// Native code size in bytes; zero in `Unknown`.
    pub fn code_size(&self) -> usize {
        self.artifact().map_or(0, Artifact::code_size)
    }
}

/// Derives the companion file paths for a cache directory and name.
fn cache_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{name}.{OBJECT_EXT}")),
        dir.join(format!("{name}.{INFO_EXT}")),
    )
}

/// Truncates and removes a cache file left behind by a failed write.
fn discard(mut lock: FileLock) {
    let _ = lock.file().set_len(0);
    let path = lock.path().to_path_buf();
    drop(lock);
    if let Err(err) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %err, "unable to remove invalid cache file");
    }
}
