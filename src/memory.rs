// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Memory accounting and memory-dump plumbing.
//!
//! [`MemoryTypeTracker`] attributes GPU bytes to a client.  [`ProcessMemoryDump`] is a
//! minimal in-process model of a diagnostics dump: named allocator dumps with numeric
//! and string attributes, global dumps shared between processes, and ownership edges
//! saying "this client dump owns that shared one".

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Attributes GPU memory to one client.
///
/// Trackers are shared between the manager and the representations it hands out, so all
/// counters are atomic.
#[derive(Debug, Default)]
pub struct MemoryTypeTracker {
    bytes: AtomicU64,
    allocations: AtomicU64,
}

impl MemoryTypeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_memory_alloc(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_memory_free(&self, bytes: u64) {
        let prior = self.bytes.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(prior >= bytes, "freed more memory than was tracked");
        let prior_count = self.allocations.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prior_count > 0, "freed an allocation that was never tracked");
    }

    pub fn mem_represented(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// Process-independent identifier of a dump, used to link dumps across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAllocatorDumpGuid(pub u64);

impl MemoryAllocatorDumpGuid {
    /// Derives a guid from a stable string.  FNV-1a; stable across runs and processes.
    pub fn from_name(name: &str) -> Self {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in name.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        MemoryAllocatorDumpGuid(hash)
    }
}

impl Display for MemoryAllocatorDumpGuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DumpAttribute {
    Bytes(u64),
    Objects(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAllocatorDump {
    pub name: String,
    pub guid: MemoryAllocatorDumpGuid,
    pub attributes: BTreeMap<String, DumpAttribute>,
}

impl MemoryAllocatorDump {
    pub fn add_scalar(&mut self, key: &str, value: DumpAttribute) {
        self.attributes.insert(key.to_string(), value);
    }

    pub fn add_string(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), DumpAttribute::Text(value.into()));
    }

    pub fn size(&self) -> Option<u64> {
        match self.attributes.get(ATTR_SIZE) {
            Some(DumpAttribute::Bytes(b)) => Some(*b),
            _ => None,
        }
    }
}

pub const ATTR_SIZE: &str = "size";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipEdge {
    pub source: MemoryAllocatorDumpGuid,
    pub target: MemoryAllocatorDumpGuid,
    pub importance: i32,
}

/// Importance used when the client's dump should win attribution of shared memory.
pub const OWNING_EDGE_IMPORTANCE: i32 = 2;

#[derive(Debug, Default)]
pub struct ProcessMemoryDump {
    dumps: BTreeMap<String, MemoryAllocatorDump>,
    shared_global: BTreeMap<MemoryAllocatorDumpGuid, MemoryAllocatorDump>,
    edges: Vec<OwnershipEdge>,
}

impl ProcessMemoryDump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or returns the existing) dump named `name`.
    pub fn create_allocator_dump(&mut self, name: &str) -> &mut MemoryAllocatorDump {
        self.dumps.entry(name.to_string()).or_insert_with(|| MemoryAllocatorDump {
            name: name.to_string(),
            guid: MemoryAllocatorDumpGuid::from_name(name),
            attributes: BTreeMap::new(),
        })
    }

    pub fn create_shared_global_allocator_dump(
        &mut self,
        guid: MemoryAllocatorDumpGuid,
    ) -> &mut MemoryAllocatorDump {
        self.shared_global.entry(guid).or_insert_with(|| MemoryAllocatorDump {
            name: format!("global/{guid}"),
            guid,
            attributes: BTreeMap::new(),
        })
    }

    pub fn add_ownership_edge(
        &mut self,
        source: MemoryAllocatorDumpGuid,
        target: MemoryAllocatorDumpGuid,
        importance: i32,
    ) {
        self.edges.push(OwnershipEdge { source, target, importance });
    }

    pub fn get(&self, name: &str) -> Option<&MemoryAllocatorDump> {
        self.dumps.get(name)
    }

    pub fn shared_global(&self, guid: MemoryAllocatorDumpGuid) -> Option<&MemoryAllocatorDump> {
        self.shared_global.get(&guid)
    }

    pub fn dumps(&self) -> impl Iterator<Item = &MemoryAllocatorDump> {
        self.dumps.values()
    }

    pub fn edges(&self) -> &[OwnershipEdge] {
        &self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_counts() {
        let t = MemoryTypeTracker::new();
        t.track_memory_alloc(100);
        t.track_memory_alloc(28);
        t.track_memory_free(100);
        assert_eq!(t.mem_represented(), 28);
        assert_eq!(t.allocation_count(), 1);
    }

    #[test]
    fn dumps_are_reused_by_name() {
        let mut pmd = ProcessMemoryDump::new();
        pmd.create_allocator_dump("gpu/a").add_scalar(ATTR_SIZE, DumpAttribute::Bytes(4));
        pmd.create_allocator_dump("gpu/a").add_string("kind", "x");
        let d = pmd.get("gpu/a").unwrap();
        assert_eq!(d.size(), Some(4));
        assert_eq!(d.attributes.len(), 2);
        assert_eq!(d.guid, MemoryAllocatorDumpGuid::from_name("gpu/a"));
    }
}
