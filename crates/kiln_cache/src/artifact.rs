//! The in-memory compiled artifact: native object bytes plus export
//! metadata.
//!
//! An `Artifact` is produced either by the external compiler (compile
//! path) or by the cache reader after validation and relocation (cache
//! path). It is owned exclusively by the [`Script`](crate::Script) that
//! requested it.

/// An exported function with its location inside the object bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Function name.
    pub name: String,

    /// Byte offset of the function inside the object bytes.
    pub offset: u64,

    /// Size of the function body in bytes.
    pub size: u64,
}

/// An exported per-element kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    /// Kernel name.
    pub name: String,

    /// Kernel signature bits as recorded by the front end.
    pub signature: u32,
}

/// A deferred symbol-address patch inside the object bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Symbol name to resolve at load time.
    pub symbol: String,

    /// Byte offset of the patch site inside the object bytes.
    pub offset: u64,
}

/// A compiled kernel module ready to be executed or cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    /// Raw native object bytes (relocated on the cache path).
    pub object: Vec<u8>,

    /// Exported variable names.
    pub variables: Vec<String>,

    /// Exported functions.
    pub functions: Vec<FunctionInfo>,

    /// Exported per-element kernels.
    pub kernels: Vec<KernelInfo>,

    /// Source pragmas as key/value pairs, in source order.
    pub pragmas: Vec<(String, String)>,

    /// Indices of global object-typed slots the host runtime tracks.
    pub object_slots: Vec<u32>,

    /// Symbols left unresolved at compile time, patched at load time.
    pub relocations: Vec<Relocation>,

    /// Whether the runtime library was threadable when this artifact
    /// was produced.
    pub threadable: bool,
}

impl Artifact {
    /// The native code bytes.
    pub fn code(&self) -> &[u8] {
        &self.object
    }

    /// Size of the native code in bytes.
    pub fn code_size(&self) -> usize {
        self.object.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_accessors() {
        let artifact = Artifact {
            object: vec![0x7F, b'E', b'L', b'F'],
            ..Artifact::default()
        };
        assert_eq!(artifact.code(), [0x7F, b'E', b'L', b'F']);
        assert_eq!(artifact.code_size(), 4);
    }

    #[test]
    fn default_is_empty() {
        let artifact = Artifact::default();
        assert!(artifact.code().is_empty());
        assert!(artifact.variables.is_empty());
        assert!(!artifact.threadable);
    }
}
