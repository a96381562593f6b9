use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use super::BlockId;

/// Granularity, in words, of the dependency tracking.
const DEPS_PAGE_LEN: u32 = 1 << 8;

/// What runs at a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// The block compiled for this address. `None` if the first instruction there could not be
    /// translated, in which case it is interpreted.
    pub id: Option<BlockId>,
    /// Number of words the mapping was built from.
    pub length: u32,
}

impl Mapping {
    fn pages(self, addr: u32) -> std::ops::RangeInclusive<u32> {
        let end = addr + self.length.max(1) - 1;
        addr / DEPS_PAGE_LEN..=end / DEPS_PAGE_LEN
    }
}

#[derive(Default)]
pub struct Table(FxHashMap<u32, Mapping>);

impl Table {
    pub fn insert(&mut self, addr: u32, mapping: Mapping) {
        self.0.insert(addr, mapping);
    }

    pub fn remove(&mut self, addr: u32) -> Option<Mapping> {
        self.0.remove(&addr)
    }

    pub fn get(&self, addr: u32) -> Option<&Mapping> {
        self.0.get(&addr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[derive(Default)]
pub struct DepsTable(FxHashMap<u32, IndexSet<u32>>);

impl DepsTable {
    /// Marks the mapping at `addr` as dependent on the pages it covers.
    pub fn mark(&mut self, addr: u32, mapping: Mapping) {
        for page in mapping.pages(addr) {
            self.0.entry(page).or_default().insert(addr);
        }
    }

    /// Unmarks the mapping at `addr` as dependent on the pages it covers.
    pub fn unmark(&mut self, addr: u32, mapping: Mapping) {
        for page in mapping.pages(addr) {
            if let Some(deps) = self.0.get_mut(&page) {
                deps.swap_remove(&addr);
            }
        }
    }

    /// Returns the set of mappings depending on the page that contains the given address.
    pub fn get(&self, addr: u32) -> Option<&IndexSet<u32>> {
        self.0.get(&(addr / DEPS_PAGE_LEN))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
