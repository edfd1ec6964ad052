//! Validates and materializes cached artifacts.
//!
//! The reader runs a short-circuiting validation pipeline over the info
//! file: size, header, machine assumptions, section geometry, string
//! pool bounds, dependency ledger, and context-slot compatibility. Only
//! when every stage passes does it read the object bytes, apply the
//! relocation table through the host symbol resolver, and hand back a
//! ready [`Artifact`]. Every failure is a routine miss, never an error
//! to the caller.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use tracing::debug;

use crate::artifact::{Artifact, FunctionInfo, KernelInfo, Relocation};
use crate::error::CacheMiss;
use crate::format::{
    decode_section, DependencyTable, ExportTable, Header, ObjectSlotList, PragmaList,
    RelocationTable, StringPool, HEADER_SIZE, RELOC_PATCH_SIZE, SECTION_NAMES,
};
use crate::host::SymbolResolver;
use crate::ledger::DependencyLedger;

/// Everything decoded from a fully validated info file.
struct InfoSections {
    header: Header,
    strings: StringPool,
    pragmas: PragmaList,
    exports: ExportTable,
    slots: ObjectSlotList,
    relocs: RelocationTable,
}

/// Validates the companion files against a dependency ledger and the
/// current runtime, and materializes the cached artifact on success.
pub struct CacheReader<'a> {
    /// The caller's current ledger for this load.
    ledger: &'a DependencyLedger,

    /// Number of reusable context slots in the current host layout.
    context_slot_count: u32,

    /// Sticky diagnostic: set when validation failed specifically at the
    /// context-slot stage, so the orchestrator can report why.
    context_slot_unavailable: bool,
}

impl<'a> CacheReader<'a> {
    /// Creates a reader validating against `ledger` and the given
    /// context-slot layout.
    pub fn new(ledger: &'a DependencyLedger, context_slot_count: u32) -> Self {
        Self {
            ledger,
            context_slot_count,
            context_slot_unavailable: false,
        }
    }

    /// Returns `true` if the last validation failed at the context-slot
    /// stage.
    pub fn is_context_slot_unavailable(&self) -> bool {
        self.context_slot_unavailable
    }

    /// Read-only validation: runs every check short of relocation, with
    /// no artifact materialization.
    ///
    /// Used to decide cache-vs-recompile without paying relocation cost.
    pub fn check_cache_file(&mut self, obj: &mut File, info: &mut File) -> bool {
        let object_len = match obj.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                debug!(error = %err, "cache miss: cannot stat object file");
                return false;
            }
        };
        if object_len == 0 {
            debug!(reason = %CacheMiss::EmptyObject, "cache miss");
            return false;
        }

        let mut raw = Vec::new();
        if let Err(err) = info.read_to_end(&mut raw) {
            debug!(error = %err, "cache miss: cannot read info file");
            return false;
        }

        match self.validate(&raw) {
            Ok(_) => true,
            Err(miss) => {
                debug!(reason = %miss, "cache miss");
                false
            }
        }
    }

    /// Full validation plus materialization: validates the info file,
    /// reads the object bytes, and patches every relocation through
    /// `resolver`.
    pub fn read_cache_file(
        &mut self,
        obj: &mut File,
        info: &mut File,
        resolver: &dyn SymbolResolver,
    ) -> Result<Artifact, CacheMiss> {
        let mut raw = Vec::new();
        info.read_to_end(&mut raw)?;
        let sections = self.validate(&raw)?;

        let mut object = Vec::new();
        obj.read_to_end(&mut object)?;
        if object.is_empty() {
            return Err(CacheMiss::EmptyObject);
        }

        self.relocate(&sections, &mut object, resolver)?;
        self.materialize(sections, object)
    }

    /// Runs validation stages 1 through 7 over the raw info bytes.
    fn validate(&mut self, raw: &[u8]) -> Result<InfoSections, CacheMiss> {
        if raw.len() < HEADER_SIZE {
            return Err(CacheMiss::TooSmall);
        }

        let header = Header::decode(raw).ok_or(CacheMiss::TooSmall)?;
        if !header.matches_format() {
            return Err(CacheMiss::BadHeader);
        }
        if !header.matches_machine() {
            return Err(CacheMiss::MachineMismatch);
        }

        // The recorded section sizes must exactly partition the rest of
        // the file, and the recorded total must agree with both.
        let implied = header.implied_total().ok_or(CacheMiss::BadSectionLayout)?;
        if header.total_size != implied || raw.len() as u64 != implied {
            return Err(CacheMiss::BadSectionLayout);
        }

        let mut ranges = [(0usize, 0usize); SECTION_NAMES.len()];
        let mut offset = HEADER_SIZE;
        for (i, size) in header.section_sizes.iter().enumerate() {
            let size = usize::try_from(*size).map_err(|_| CacheMiss::BadSectionLayout)?;
            ranges[i] = (offset, offset + size);
            offset += size;
        }

        let section = |i: usize| &raw[ranges[i].0..ranges[i].1];
        let strings: StringPool = decode_section(section(0), SECTION_NAMES[0])?;
        let deps: DependencyTable = decode_section(section(1), SECTION_NAMES[1])?;
        let pragmas: PragmaList = decode_section(section(2), SECTION_NAMES[2])?;
        let exports: ExportTable = decode_section(section(3), SECTION_NAMES[3])?;
        let slots: ObjectSlotList = decode_section(section(4), SECTION_NAMES[4])?;
        let relocs: RelocationTable = decode_section(section(5), SECTION_NAMES[5])?;

        self.check_string_pool(&strings, &deps, &pragmas, &exports, &relocs)?;
        self.check_dependencies(&strings, &deps)?;
        self.check_context(&slots)?;

        Ok(InfoSections {
            header,
            strings,
            pragmas,
            exports,
            slots,
            relocs,
        })
    }

    /// Stage 5: every pool index referenced by a later section must be
    /// in range. Pool content is not semantically validated.
    fn check_string_pool(
        &self,
        strings: &StringPool,
        deps: &DependencyTable,
        pragmas: &PragmaList,
        exports: &ExportTable,
        relocs: &RelocationTable,
    ) -> Result<(), CacheMiss> {
        let check = |section: &'static str, index: u32| {
            if strings.get(index).is_none() {
                Err(CacheMiss::StringIndex { section, index })
            } else {
                Ok(())
            }
        };

        for entry in &deps.entries {
            check(SECTION_NAMES[1], entry.name)?;
        }
        for pragma in &pragmas.pragmas {
            check(SECTION_NAMES[2], pragma.key)?;
            check(SECTION_NAMES[2], pragma.value)?;
        }
        for &var in &exports.variables {
            check(SECTION_NAMES[3], var)?;
        }
        for func in &exports.functions {
            check(SECTION_NAMES[3], func.name)?;
        }
        for kernel in &exports.kernels {
            check(SECTION_NAMES[3], kernel.name)?;
        }
        for reloc in &relocs.relocs {
            check(SECTION_NAMES[5], reloc.symbol)?;
        }
        Ok(())
    }

    /// Stage 6: the stored ledger must match the caller's as a multiset
    /// of `(name, digest)` pairs. Entry order is irrelevant, but any
    /// added, removed, renamed, or digest-changed entry is a miss, and
    /// a duplicated name cannot stand in for a distinct one.
    fn check_dependencies(
        &self,
        strings: &StringPool,
        deps: &DependencyTable,
    ) -> Result<(), CacheMiss> {
        if deps.entries.len() != self.ledger.len() {
            return Err(CacheMiss::DependencyMismatch);
        }

        let mut remaining: HashMap<(&str, &[u8; 20]), usize> = HashMap::new();
        for current in self.ledger.iter() {
            *remaining
                .entry((current.name.as_str(), current.digest.as_bytes()))
                .or_insert(0) += 1;
        }

        for entry in &deps.entries {
            let name = strings.get(entry.name).ok_or(CacheMiss::StringIndex {
                section: SECTION_NAMES[1],
                index: entry.name,
            })?;
            match remaining.get_mut(&(name, &entry.digest)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return Err(CacheMiss::DependencyMismatch),
            }
        }
        Ok(())
    }

    /// Stage 7: every recorded object slot must fit the current context
    /// layout. Failure raises the sticky diagnostic.
    fn check_context(&mut self, slots: &ObjectSlotList) -> Result<(), CacheMiss> {
        for &slot in &slots.slots {
            if slot >= self.context_slot_count {
                self.context_slot_unavailable = true;
                return Err(CacheMiss::ContextSlotUnavailable { slot });
            }
        }
        Ok(())
    }

    /// Stage 8: patches every relocation site in the object bytes with
    /// the address the host resolver returns for its symbol.
    fn relocate(
        &self,
        sections: &InfoSections,
        object: &mut [u8],
        resolver: &dyn SymbolResolver,
    ) -> Result<(), CacheMiss> {
        for reloc in &sections.relocs.relocs {
            let name = sections
                .strings
                .get(reloc.symbol)
                .ok_or(CacheMiss::StringIndex {
                    section: SECTION_NAMES[5],
                    index: reloc.symbol,
                })?;

            let address = resolver
                .lookup(name)
                .ok_or_else(|| CacheMiss::UnresolvedSymbol {
                    name: name.to_string(),
                })?;

            let site = usize::try_from(reloc.offset).map_err(|_| CacheMiss::BadRelocation {
                offset: reloc.offset,
            })?;
            let end = site
                .checked_add(RELOC_PATCH_SIZE)
                .filter(|&end| end <= object.len())
                .ok_or(CacheMiss::BadRelocation {
                    offset: reloc.offset,
                })?;

            object[site..end].copy_from_slice(&address.to_le_bytes());
        }
        Ok(())
    }

    /// Resolves pool indices back to owned strings and assembles the
    /// final artifact.
    fn materialize(
        &self,
        sections: InfoSections,
        object: Vec<u8>,
    ) -> Result<Artifact, CacheMiss> {
        let resolve = |section: &'static str, index: u32| -> Result<String, CacheMiss> {
            sections
                .strings
                .get(index)
                .map(str::to_string)
                .ok_or(CacheMiss::StringIndex { section, index })
        };

        let mut variables = Vec::with_capacity(sections.exports.variables.len());
        for &var in &sections.exports.variables {
            variables.push(resolve(SECTION_NAMES[3], var)?);
        }

        let mut functions = Vec::with_capacity(sections.exports.functions.len());
        for func in &sections.exports.functions {
            functions.push(FunctionInfo {
                name: resolve(SECTION_NAMES[3], func.name)?,
                offset: func.offset,
                size: func.size,
            });
        }

        let mut kernels = Vec::with_capacity(sections.exports.kernels.len());
        for kernel in &sections.exports.kernels {
            kernels.push(KernelInfo {
                name: resolve(SECTION_NAMES[3], kernel.name)?,
                signature: kernel.signature,
            });
        }

        let mut pragmas = Vec::with_capacity(sections.pragmas.pragmas.len());
        for pragma in &sections.pragmas.pragmas {
            pragmas.push((
                resolve(SECTION_NAMES[2], pragma.key)?,
                resolve(SECTION_NAMES[2], pragma.value)?,
            ));
        }

        let mut relocations = Vec::with_capacity(sections.relocs.relocs.len());
        for reloc in &sections.relocs.relocs {
            relocations.push(Relocation {
                symbol: resolve(SECTION_NAMES[5], reloc.symbol)?,
                offset: reloc.offset,
            });
        }

        Ok(Artifact {
            object,
            variables,
            functions,
            kernels,
            pragmas,
            object_slots: sections.slots.slots,
            relocations,
            threadable: sections.header.threadable != 0,
        })
    }
}
