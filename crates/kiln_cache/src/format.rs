//! On-disk layout of the companion cache files.
//!
//! Each cached unit is a pair of files: the object file holds the raw
//! native object bytes, and the info file holds everything needed to
//! validate and reload them. The info file starts with a fixed-size,
//! hand-packed little-endian header recording the size of every
//! downstream section, so corruption and truncation are detectable from
//! the header alone before any section payload is decoded. Section
//! payloads are bincode-encoded.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheMiss};

/// Magic bytes at the start of every info file.
pub const MAGIC: [u8; 4] = *b"KLN\0";

/// Current info-file format version. Increment on any layout change.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed info-file header in bytes.
pub const HEADER_SIZE: usize = 72;

/// Number of variable-length sections following the header.
pub const SECTION_COUNT: usize = 6;

/// Width in bytes of a relocation patch site inside the object bytes.
pub const RELOC_PATCH_SIZE: usize = 8;

/// File extension of the object companion file.
pub const OBJECT_EXT: &str = "o";

/// File extension of the info companion file.
pub const INFO_EXT: &str = "info";

/// Section names in file order, used in decode diagnostics.
pub const SECTION_NAMES: [&str; SECTION_COUNT] = [
    "string pool",
    "dependency table",
    "pragma list",
    "export table",
    "object slot list",
    "relocation table",
];

/// Fixed-size header at the start of the info file.
///
/// Records the format identity, the machine-word assumptions of the
/// writing process, the runtime-threadable flag, and the exact byte size
/// of each downstream section. The section sizes must partition the
/// remainder of the file exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format magic, must equal [`MAGIC`].
    pub magic: [u8; 4],

    /// Format version, must equal [`FORMAT_VERSION`].
    pub version: u32,

    /// Byte-order tag: `b'e'` for little-endian, `b'E'` for big-endian.
    pub endianness: u8,

    /// `size_of::<usize>()` of the writing process.
    pub sizeof_usize: u8,

    /// `size_of::<*const u8>()` of the writing process.
    pub sizeof_ptr: u8,

    /// Whether the runtime library was threadable at write time.
    pub threadable: u32,

    /// Encoded byte size of each section, in [`SECTION_NAMES`] order.
    pub section_sizes: [u64; SECTION_COUNT],

    /// Expected size of the whole info file, header included.
    pub total_size: u64,
}

impl Header {
    /// Creates a header stamped with the current process's format and
    /// machine assumptions. Section sizes start at zero.
    pub fn for_current_machine(threadable: bool) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            endianness: if cfg!(target_endian = "little") {
                b'e'
            } else {
                b'E'
            },
            sizeof_usize: std::mem::size_of::<usize>() as u8,
            sizeof_ptr: std::mem::size_of::<*const u8>() as u8,
            threadable: threadable as u32,
            section_sizes: [0; SECTION_COUNT],
            total_size: 0,
        }
    }

    /// Packs the header into its fixed byte layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8] = self.endianness;
        out[9] = self.sizeof_usize;
        out[10] = self.sizeof_ptr;
        out[12..16].copy_from_slice(&self.threadable.to_le_bytes());
        for (i, size) in self.section_sizes.iter().enumerate() {
            let at = 16 + i * 8;
            out[at..at + 8].copy_from_slice(&size.to_le_bytes());
        }
        out[64..72].copy_from_slice(&self.total_size.to_le_bytes());
        out
    }

    /// Unpacks a header from the start of the info file.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    /// Field values are not validated here; see [`Header::matches_format`]
    /// and [`Header::matches_machine`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);

        let mut section_sizes = [0u64; SECTION_COUNT];
        for (i, size) in section_sizes.iter_mut().enumerate() {
            let at = 16 + i * 8;
            *size = u64::from_le_bytes(bytes[at..at + 8].try_into().ok()?);
        }

        Some(Self {
            magic,
            version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            endianness: bytes[8],
            sizeof_usize: bytes[9],
            sizeof_ptr: bytes[10],
            threadable: u32::from_le_bytes(bytes[12..16].try_into().ok()?),
            section_sizes,
            total_size: u64::from_le_bytes(bytes[64..72].try_into().ok()?),
        })
    }

    /// Returns `true` if the magic and version match this runtime build.
    pub fn matches_format(&self) -> bool {
        self.magic == MAGIC && self.version == FORMAT_VERSION
    }

    /// Returns `true` if the recorded machine-word assumptions match the
    /// current process.
    pub fn matches_machine(&self) -> bool {
        let current = Self::for_current_machine(false);
        self.endianness == current.endianness
            && self.sizeof_usize == current.sizeof_usize
            && self.sizeof_ptr == current.sizeof_ptr
    }

    /// File size implied by the header: the fixed header plus every
    /// recorded section size. `None` on arithmetic overflow.
    pub fn implied_total(&self) -> Option<u64> {
        let mut total = HEADER_SIZE as u64;
        for size in &self.section_sizes {
            total = total.checked_add(*size)?;
        }
        Some(total)
    }
}

/// Packed pool of every string referenced by the other sections.
///
/// Sections store `u32` indices into this pool instead of inline
/// strings. The pool deduplicates on interning; index validity for
/// stored files is checked by the reader, not here.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StringPool {
    strings: Vec<String>,

    /// Writer-side dedup index; not persisted and empty after decode.
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl StringPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its pool index. Repeated interning of
    /// the same string returns the same index.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    /// Looks up a string by pool index.
    pub fn get(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    /// Number of pooled strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` if the pool holds no strings.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// One persisted ledger entry: pooled name index plus content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// String-pool index of the resource name.
    pub name: u32,

    /// 20-byte content digest recorded at write time.
    pub digest: [u8; 20],
}

/// Persisted form of the dependency ledger.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DependencyTable {
    /// Entries in ledger order.
    pub entries: Vec<DependencyRecord>,
}

/// One source pragma as a pooled key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PragmaRecord {
    /// String-pool index of the pragma key.
    pub key: u32,

    /// String-pool index of the pragma value.
    pub value: u32,
}

/// Persisted pragma list.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PragmaList {
    /// Pragmas in source order.
    pub pragmas: Vec<PragmaRecord>,
}

/// One exported function with its location inside the object bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// String-pool index of the function name.
    pub name: u32,

    /// Byte offset of the function inside the object bytes.
    pub offset: u64,

    /// Size of the function body in bytes.
    pub size: u64,
}

/// One exported per-element kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRecord {
    /// String-pool index of the kernel name.
    pub name: u32,

    /// Kernel signature bits as recorded by the front end.
    pub signature: u32,
}

/// Persisted export tables: variables, functions, and per-element kernels.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExportTable {
    /// String-pool indices of exported variable names.
    pub variables: Vec<u32>,

    /// Exported functions with object-byte locations.
    pub functions: Vec<FunctionRecord>,

    /// Exported per-element kernels.
    pub kernels: Vec<KernelRecord>,
}

/// Persisted list of global object-typed slot indices the host runtime
/// must track for memory management.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ObjectSlotList {
    /// Slot indices into the host context layout.
    pub slots: Vec<u32>,
}

/// One deferred symbol-address patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRecord {
    /// String-pool index of the symbol name to resolve at load time.
    pub symbol: u32,

    /// Byte offset of the patch site inside the object bytes. The
    /// resolved address is written there as [`RELOC_PATCH_SIZE`]
    /// little-endian bytes.
    pub offset: u64,
}

/// Persisted relocation table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RelocationTable {
    /// Patches in the order the writer recorded them.
    pub relocs: Vec<RelocationRecord>,
}

/// Encodes one section payload with the standard bincode configuration.
pub fn encode_section<T: Serialize>(
    value: &T,
    section: &'static str,
) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Encode {
            section,
            reason: e.to_string(),
        }
    })
}

/// Decodes one section payload from exactly its recorded byte range.
///
/// Trailing bytes after the decoded value are rejected: the section size
/// recorded in the header must match the encoding exactly.
pub fn decode_section<T: DeserializeOwned>(
    bytes: &[u8],
    section: &'static str,
) -> Result<T, CacheMiss> {
    let (value, consumed) =
        bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
            .map_err(|_| CacheMiss::Decode { section })?;
    if consumed != bytes.len() {
        return Err(CacheMiss::Decode { section });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut header = Header::for_current_machine(true);
        header.section_sizes = [10, 20, 30, 40, 50, 60];
        header.total_size = header.implied_total().unwrap();

        let bytes = header.encode();
        let back = Header::decode(&bytes).unwrap();
        assert_eq!(back, header);
        assert!(back.matches_format());
        assert!(back.matches_machine());
        assert_eq!(back.threadable, 1);
    }

    #[test]
    fn header_too_small() {
        assert!(Header::decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn header_rejects_wrong_magic() {
        let mut header = Header::for_current_machine(false);
        header.magic = *b"BAD\0";
        assert!(!header.matches_format());
    }

    #[test]
    fn header_rejects_wrong_version() {
        let mut header = Header::for_current_machine(false);
        header.version = FORMAT_VERSION + 1;
        assert!(!header.matches_format());
    }

    #[test]
    fn header_rejects_foreign_machine() {
        let mut header = Header::for_current_machine(false);
        header.sizeof_ptr = 2;
        assert!(!header.matches_machine());

        let mut header = Header::for_current_machine(false);
        header.endianness = if header.endianness == b'e' { b'E' } else { b'e' };
        assert!(!header.matches_machine());
    }

    #[test]
    fn implied_total_overflow() {
        let mut header = Header::for_current_machine(false);
        header.section_sizes = [u64::MAX, 1, 0, 0, 0, 0];
        assert!(header.implied_total().is_none());
    }

    #[test]
    fn string_pool_dedup() {
        let mut pool = StringPool::new();
        let a = pool.intern("root");
        let b = pool.intern("invert");
        let a2 = pool.intern("root");

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a), Some("root"));
        assert_eq!(pool.get(b), Some("invert"));
        assert_eq!(pool.get(99), None);
    }

    #[test]
    fn string_pool_survives_encoding() {
        let mut pool = StringPool::new();
        pool.intern("alpha");
        pool.intern("beta");

        let bytes = encode_section(&pool, "string pool").unwrap();
        let back: StringPool = decode_section(&bytes, "string pool").unwrap();
        assert_eq!(back.get(0), Some("alpha"));
        assert_eq!(back.get(1), Some("beta"));
    }

    #[test]
    fn section_roundtrip() {
        let table = DependencyTable {
            entries: vec![DependencyRecord {
                name: 3,
                digest: [0xAB; 20],
            }],
        };

        let bytes = encode_section(&table, "dependency table").unwrap();
        let back: DependencyTable = decode_section(&bytes, "dependency table").unwrap();
        assert_eq!(back.entries, table.entries);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let slots = ObjectSlotList { slots: vec![1, 2] };
        let mut bytes = encode_section(&slots, "object slot list").unwrap();
        bytes.push(0);

        let result: Result<ObjectSlotList, _> = decode_section(&bytes, "object slot list");
        assert!(matches!(result, Err(CacheMiss::Decode { .. })));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<RelocationTable, _> = decode_section(&[0xFF; 3], "relocation table");
        assert!(matches!(result, Err(CacheMiss::Decode { .. })));
    }
}
