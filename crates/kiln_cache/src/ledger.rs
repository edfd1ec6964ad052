//! The dependency ledger: an ordered record of every input that
//! influenced a compiled artifact.
//!
//! The orchestrator builds a ledger before every cache read or write:
//! runtime-library entries first, then each registered source module in
//! registration order. The ledger is persisted by value in the info
//! file's dependency table and compared entry-for-entry on load.

use kiln_common::Digest;

/// One cache input: a resource name paired with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Resource name (library path or source module name).
    pub name: String,

    /// Content digest of the resource at compile time.
    pub digest: Digest,
}

impl Dependency {
    /// Creates a dependency entry.
    pub fn new(name: impl Into<String>, digest: Digest) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }
}

/// Ordered collection of every input that must invalidate the cache
/// when changed.
///
/// Entry order is preserved as built, but cache validation compares
/// ledgers as multisets, so two ledgers with the same (name, digest)
/// entries are equivalent regardless of order.
#[derive(Debug, Clone, Default)]
pub struct DependencyLedger {
    entries: Vec<Dependency>,
}

impl DependencyLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, preserving insertion order.
    pub fn push(&mut self, name: impl Into<String>, digest: Digest) {
        self.entries.push(Dependency::new(name, digest));
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.entries.iter()
    }

    /// Looks up an entry by name.
    pub fn find(&self, name: &str) -> Option<&Dependency> {
        self.entries.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut ledger = DependencyLedger::new();
        ledger.push("libkiln.so", Digest::of_bytes(b"runtime"));
        ledger.push("kernel.kl", Digest::of_bytes(b"source"));

        let names: Vec<&str> = ledger.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["libkiln.so", "kernel.kl"]);
    }

    #[test]
    fn find_by_name() {
        let mut ledger = DependencyLedger::new();
        let digest = Digest::of_bytes(b"source");
        ledger.push("kernel.kl", digest);

        let dep = ledger.find("kernel.kl").unwrap();
        assert_eq!(dep.digest, digest);
        assert!(ledger.find("other.kl").is_none());
    }

    #[test]
    fn empty_ledger() {
        let ledger = DependencyLedger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.len(), 0);
    }
}
