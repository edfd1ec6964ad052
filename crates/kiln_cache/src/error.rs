//! Error and cache-miss types for the compilation cache.

/// Reasons a cached artifact was rejected during validation.
///
/// A miss is routine: the orchestrator falls back to compilation and the
/// reason is only logged. Each validation stage has its own variant so
/// logs (and the sticky context-slot diagnostic) can say why a cache was
/// not trusted.
#[derive(Debug, thiserror::Error)]
pub enum CacheMiss {
    /// The info file is smaller than the fixed header.
    #[error("info file too small to hold a header")]
    TooSmall,

    /// The companion object file holds no bytes.
    #[error("object file is empty")]
    EmptyObject,

    /// Magic bytes or format version do not match this runtime build.
    #[error("header magic or version mismatch")]
    BadHeader,

    /// The recording machine's word size or byte order differs from the
    /// current process.
    #[error("machine word or byte-order mismatch")]
    MachineMismatch,

    /// The recorded section sizes do not exactly partition the info file.
    #[error("section sizes do not partition the info file")]
    BadSectionLayout,

    /// A section payload failed to decode from its recorded byte range.
    #[error("failed to decode {section} section")]
    Decode {
        /// Name of the section that failed to decode.
        section: &'static str,
    },

    /// A string-pool index referenced by a section is out of range.
    #[error("string index {index} out of range in {section} section")]
    StringIndex {
        /// Name of the referencing section.
        section: &'static str,
        /// The out-of-range pool index.
        index: u32,
    },

    /// The stored dependency table differs from the current ledger.
    #[error("dependency table does not match the current ledger")]
    DependencyMismatch,

    /// A recorded object slot cannot be reused by the current context
    /// layout. Raises the sticky context-slot diagnostic.
    #[error("context slot {slot} not available")]
    ContextSlotUnavailable {
        /// The first slot index that the current layout cannot hold.
        slot: u32,
    },

    /// A relocation symbol could not be resolved by the host runtime.
    #[error("unresolved relocation symbol `{name}`")]
    UnresolvedSymbol {
        /// The symbol name that failed to resolve.
        name: String,
    },

    /// A relocation patch site lies outside the object bytes.
    #[error("relocation patch site at offset {offset} out of bounds")]
    BadRelocation {
        /// Byte offset of the bad patch site.
        offset: u64,
    },

    /// An I/O error occurred while reading the companion files.
    #[error("cache read I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Errors raised while serializing and writing the companion files.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while writing a cache file.
    #[error("cache write I/O error ({file}): {source}")]
    Io {
        /// Which companion file was being written.
        file: &'static str,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A section failed to serialize.
    #[error("failed to encode {section} section: {reason}")]
    Encode {
        /// Name of the section that failed to encode.
        section: &'static str,
        /// Description of the encode failure.
        reason: String,
    },
}

/// Failures reported by the external compiler collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler ran out of memory.
    #[error("out of memory during compilation")]
    OutOfMemory,

    /// The compiler reported a diagnostic message.
    #[error("{0}")]
    Message(String),
}

/// Failures surfaced by [`Script::prepare_executable`](crate::Script::prepare_executable).
///
/// Cache misses and cache-write failures are never surfaced here; only a
/// state-machine misuse or a failed compilation fails the call.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The script is not in the state the operation requires.
    #[error("invalid operation for the current script state")]
    InvalidOperation,

    /// The external compiler failed.
    #[error("compilation failed: {0}")]
    Compile(#[from] CompileError),
}

impl PrepareError {
    /// Numeric status code for embedders (0 is reserved for success).
    pub fn code(&self) -> u32 {
        match self {
            PrepareError::InvalidOperation => 1,
            PrepareError::Compile(CompileError::OutOfMemory) => 2,
            PrepareError::Compile(CompileError::Message(_)) => 3,
        }
    }
}
