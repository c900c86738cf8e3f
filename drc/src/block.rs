use std::collections::HashMap;
use std::time::Duration;

use crate::bus::CODE_PAGE_SHIFT;
use crate::cache::CodeRef;

/// Evicted descriptors the driver lets pile up before it flushes to reclaim them
pub const EVICTED_LIMIT: usize = 1024;

/// Handle to a descriptor in a [`BlockStore`].
///
/// Carries the store generation it was created in, so handles from before a flush never resolve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

/// Execution state of the block at a guest address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockState {
    Uncompiled,
    Interpreted,
    Native,
}

#[derive(Clone, Debug)]
pub struct BlockDescriptor {
    /// First guest byte of the block
    pub start: u32,
    /// Last guest byte of the block (inclusive)
    pub end: u32,
    pub instructions: u32,

    pub execution_count: u32,
    /// Translated code in the native cache, `None` until the block is promoted
    pub native_code: Option<CodeRef>,
    pub ir_code: Option<CodeRef>,

    pub interp_size: usize,
    pub native_size: usize,
    pub interp_exec_time: Duration,
    pub native_exec_time: Duration,

    pub(crate) compile_failed: bool,
    pub(crate) evicted: bool,
}

impl BlockDescriptor {
    pub fn new(start: u32, end: u32, instructions: u32) -> BlockDescriptor {
        BlockDescriptor {
            start,
            end,
            instructions,
            execution_count: 0,
            native_code: None,
            ir_code: None,
            interp_size: 0,
            native_size: 0,
            interp_exec_time: Duration::ZERO,
            native_exec_time: Duration::ZERO,
            compile_failed: false,
            evicted: false,
        }
    }

    pub fn state(&self) -> BlockState {
        if self.evicted {
            BlockState::Uncompiled
        } else if self.native_code.is_some() {
            BlockState::Native
        } else {
            BlockState::Interpreted
        }
    }

    /// Translation failed, the block stays interpreted until the next flush
    pub fn compile_failed(&self) -> bool {
        self.compile_failed
    }

    #[inline(always)]
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Owns every block descriptor.
///
/// Descriptors are never freed one by one: an invalidated descriptor is only marked as evicted,
/// its slot stays until `clear` drops them all. That way nothing can be left pointing at a
/// reused slot. Eviction does drop the id from the page map.
#[derive(Default)]
pub struct BlockStore {
    blocks: Vec<BlockDescriptor>,
    /// Code page -> live blocks with bytes in that page
    pages: HashMap<u32, Vec<BlockId>>,
    generation: u32,
    evicted: usize,
}

impl BlockStore {
    pub fn new() -> BlockStore {
        BlockStore::default()
    }

    pub fn insert(&mut self, desc: BlockDescriptor) -> BlockId {
        let id = BlockId {
            index: self.blocks.len() as u32,
            generation: self.generation,
        };
        for page in (desc.start >> CODE_PAGE_SHIFT)..=(desc.end >> CODE_PAGE_SHIFT) {
            self.pages.entry(page).or_default().push(id);
        }
        self.blocks.push(desc);
        id
    }

    #[inline(always)]
    pub fn get(&self, id: BlockId) -> Option<&BlockDescriptor> {
        if id.generation != self.generation {
            return None;
        }
        self.blocks.get(id.index as usize)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut BlockDescriptor> {
        if id.generation != self.generation {
            return None;
        }
        self.blocks.get_mut(id.index as usize)
    }

    /// Resolves `id` only if its descriptor hasn't been evicted
    #[inline(always)]
    pub fn live(&self, id: BlockId) -> Option<&BlockDescriptor> {
        self.get(id).filter(|desc| !desc.evicted)
    }

    /// Every live block with at least one byte in `start..=end`
    pub fn overlapping(&self, start: u32, end: u32) -> Vec<BlockId> {
        let first = start >> CODE_PAGE_SHIFT;
        let last = end >> CODE_PAGE_SHIFT;

        let mut found = Vec::new();
        let mut visit = |ids: &Vec<BlockId>| {
            for &id in ids {
                let hit = self.live(id).is_some_and(|desc| desc.overlaps(start, end));
                if hit && !found.contains(&id) {
                    found.push(id);
                }
            }
        };
        if (last - first) as usize >= self.pages.len() {
            // Huge range, cheaper to walk the pages that actually hold code
            for (_, ids) in self.pages.iter().filter(|(page, _)| (first..=last).contains(*page)) {
                visit(ids);
            }
        } else {
            for page in first..=last {
                if let Some(ids) = self.pages.get(&page) {
                    visit(ids);
                }
            }
        }
        found.sort_unstable();
        found
    }

    /// Marks the descriptor as evicted and severs its code references.
    ///
    /// Returns the descriptor's start address, or `None` if it was already gone.
    pub fn evict(&mut self, id: BlockId) -> Option<u32> {
        let desc = self.get_mut(id).filter(|desc| !desc.evicted)?;
        desc.evicted = true;
        desc.native_code = None;
        desc.ir_code = None;
        let (start, end) = (desc.start, desc.end);

        for page in (start >> CODE_PAGE_SHIFT)..=(end >> CODE_PAGE_SHIFT) {
            if let Some(ids) = self.pages.get_mut(&page) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    self.pages.remove(&page);
                }
            }
        }
        self.evicted += 1;
        Some(start)
    }

    /// Drops every descriptor, all outstanding ids become stale
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.pages.clear();
        self.evicted = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of descriptors allocated since the last flush, evicted ones included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Slots held by evicted descriptors
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.iter_live().count()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.blocks.iter().filter(|desc| !desc.evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_go_stale_after_clear() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockDescriptor::new(0x100, 0x10f, 4));
        assert_eq!(store.get(id).unwrap().start, 0x100);

        store.clear();
        assert!(store.get(id).is_none());
        assert!(store.is_empty());

        // Same slot index, new generation
        let fresh = store.insert(BlockDescriptor::new(0x200, 0x203, 1));
        assert_ne!(fresh, id);
        assert!(store.get(id).is_none());
        assert_eq!(store.get(fresh).unwrap().start, 0x200);
    }

    #[test]
    fn overlap_queries() {
        let mut store = BlockStore::new();
        let a = store.insert(BlockDescriptor::new(0x0ff0, 0x100f, 8));
        let b = store.insert(BlockDescriptor::new(0x1010, 0x101f, 4));
        let c = store.insert(BlockDescriptor::new(0x3000, 0x3003, 1));

        assert_eq!(store.overlapping(0x1000, 0x1003), vec![a]);
        assert_eq!(store.overlapping(0x100c, 0x1013), vec![a, b]);
        assert_eq!(store.overlapping(0x0000, 0xffff_ffff).len(), 3);
        assert!(store.overlapping(0x1020, 0x2fff).is_empty());
        assert_eq!(store.overlapping(0x3003, 0x3003), vec![c]);
    }

    #[test]
    fn eviction_keeps_the_slot() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockDescriptor::new(0x100, 0x10f, 4));
        store.get_mut(id).unwrap().native_code = Some(CodeRef { offset: 0, len: 16 });
        assert_eq!(store.get(id).unwrap().state(), BlockState::Native);

        assert_eq!(store.evict(id), Some(0x100));
        assert_eq!(store.evict(id), None);
        assert!(store.live(id).is_none());
        let desc = store.get(id).unwrap();
        assert_eq!(desc.state(), BlockState::Uncompiled);
        assert!(desc.native_code.is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.evicted(), 1);
        assert!(store.overlapping(0x100, 0x10f).is_empty());
    }

    #[test]
    fn eviction_prunes_the_page_map() {
        let mut store = BlockStore::new();
        let keep = store.insert(BlockDescriptor::new(0x0ff8, 0x1007, 4));
        for _ in 0..500 {
            let id = store.insert(BlockDescriptor::new(0x1000, 0x100f, 4));
            store.evict(id);
        }
        assert_eq!(store.pages[&0x0], vec![keep]);
        assert_eq!(store.pages[&0x1], vec![keep]);
        assert_eq!(store.evicted(), 500);

        store.evict(keep);
        assert!(store.pages.is_empty());
        store.clear();
        assert_eq!(store.evicted(), 0);
    }
}
