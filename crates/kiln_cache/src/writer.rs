//! Serializes a freshly compiled artifact into the companion files.
//!
//! The writer builds every section in memory first (interning all
//! strings into the pool), stamps the header with the exact encoded
//! sizes, and only then touches the files: object bytes first, then the
//! info file. Both files are fully replaced; a writer never appends to
//! or patches a previous cache in place. Cleanup after a failed write
//! (truncate and unlink) is the orchestrator's job, since only it holds
//! the file paths and locks.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use crate::artifact::Artifact;
use crate::error::CacheError;
use crate::format::{
    encode_section, DependencyRecord, DependencyTable, ExportTable, FunctionRecord, Header,
    KernelRecord, ObjectSlotList, PragmaList, PragmaRecord, RelocationRecord, RelocationTable,
    StringPool, HEADER_SIZE, SECTION_COUNT, SECTION_NAMES,
};
use crate::ledger::DependencyLedger;

/// Serializes artifacts plus the current dependency ledger into the
/// layout [`CacheReader`](crate::CacheReader) expects.
pub struct CacheWriter<'a> {
    /// Ledger to persist alongside the artifact.
    ledger: &'a DependencyLedger,
}

impl<'a> CacheWriter<'a> {
    /// Creates a writer persisting `ledger` with every artifact.
    pub fn new(ledger: &'a DependencyLedger) -> Self {
        Self { ledger }
    }

    /// Writes the artifact and ledger to the companion files, replacing
    /// any previous contents.
    ///
    /// On error, files may be left partially written; the caller must
    /// truncate and remove them before releasing its locks.
    pub fn write_cache_file(
        &self,
        obj: &mut File,
        info: &mut File,
        artifact: &Artifact,
        threadable: bool,
    ) -> Result<(), CacheError> {
        let section_bytes = self.encode_sections(artifact)?;

        let mut header = Header::for_current_machine(threadable);
        let mut total = HEADER_SIZE as u64;
        for (i, bytes) in section_bytes.iter().enumerate() {
            header.section_sizes[i] = bytes.len() as u64;
            total += bytes.len() as u64;
        }
        header.total_size = total;

        let obj_io = |source| CacheError::Io {
            file: "object file",
            source,
        };
        obj.set_len(0).map_err(obj_io)?;
        obj.seek(SeekFrom::Start(0)).map_err(obj_io)?;
        obj.write_all(&artifact.object).map_err(obj_io)?;

        let info_io = |source| CacheError::Io {
            file: "info file",
            source,
        };
        info.set_len(0).map_err(info_io)?;
        info.seek(SeekFrom::Start(0)).map_err(info_io)?;
        info.write_all(&header.encode()).map_err(info_io)?;
        for bytes in &section_bytes {
            info.write_all(bytes).map_err(info_io)?;
        }
        info.flush().map_err(info_io)?;

        Ok(())
    }

    /// Builds and encodes all six sections, interning every referenced
    /// string into the pool.
    fn encode_sections(&self, artifact: &Artifact) -> Result<[Vec<u8>; SECTION_COUNT], CacheError> {
        let mut pool = StringPool::new();

        let deps = DependencyTable {
            entries: self
                .ledger
                .iter()
                .map(|dep| DependencyRecord {
                    name: pool.intern(&dep.name),
                    digest: *dep.digest.as_bytes(),
                })
                .collect(),
        };

        let pragmas = PragmaList {
            pragmas: artifact
                .pragmas
                .iter()
                .map(|(key, value)| PragmaRecord {
                    key: pool.intern(key),
                    value: pool.intern(value),
                })
                .collect(),
        };

        let exports = ExportTable {
            variables: artifact
                .variables
                .iter()
                .map(|name| pool.intern(name))
                .collect(),
            functions: artifact
                .functions
                .iter()
                .map(|func| FunctionRecord {
                    name: pool.intern(&func.name),
                    offset: func.offset,
                    size: func.size,
                })
                .collect(),
            kernels: artifact
                .kernels
                .iter()
                .map(|kernel| KernelRecord {
                    name: pool.intern(&kernel.name),
                    signature: kernel.signature,
                })
                .collect(),
        };

        let slots = ObjectSlotList {
            slots: artifact.object_slots.clone(),
        };

        let relocs = RelocationTable {
            relocs: artifact
                .relocations
                .iter()
                .map(|reloc| RelocationRecord {
                    symbol: pool.intern(&reloc.symbol),
                    offset: reloc.offset,
                })
                .collect(),
        };

        // The pool is encoded last (everything is interned by now) but
        // occupies the first section slot in the file.
        Ok([
            encode_section(&pool, SECTION_NAMES[0])?,
            encode_section(&deps, SECTION_NAMES[1])?,
            encode_section(&pragmas, SECTION_NAMES[2])?,
            encode_section(&exports, SECTION_NAMES[3])?,
            encode_section(&slots, SECTION_NAMES[4])?,
            encode_section(&relocs, SECTION_NAMES[5])?,
        ])
    }
}
