//! Guest address -> block lookup.
//!
//! The engine either uses its own [`PageTable`] or a lookup supplied by the host. Hosts with
//! banked or otherwise aliased memory usually want the latter, since the same guest address can
//! hold different code depending on state only the host knows about.

mod page_table;

use std::any::Any;

pub use page_table::{PageTable, PageTableShape};

use crate::block::BlockId;
use crate::DrcError;

/// Everything the engine needs from a block lookup
pub trait BlockLookup {
    /// Called once by `Drc::new`, before any other method
    fn setup(&mut self) -> Result<(), DrcError> {
        Ok(())
    }

    /// Called once when the engine is dropped
    fn teardown(&mut self) {}

    fn lookup(&self, addr: u32) -> Result<Option<BlockId>, DrcError>;

    fn insert(&mut self, addr: u32, id: BlockId) -> Result<(), DrcError>;

    /// Removes the entry at `addr`, but only if it still refers to `id`
    fn remove(&mut self, addr: u32, id: BlockId);

    /// Forget every entry
    fn clear(&mut self);

    /// Host defined data passed through `Drc::set_lookup_info`
    fn set_info(&mut self, _info: &dyn Any) {}
}

pub enum Lookup {
    PageTable(PageTable),
    Custom(Box<dyn BlockLookup>),
}

impl Lookup {
    #[inline(always)]
    fn inner_mut(&mut self) -> &mut dyn BlockLookup {
        match self {
            Lookup::PageTable(table) => table,
            Lookup::Custom(custom) => custom.as_mut(),
        }
    }

    pub fn setup(&mut self) -> Result<(), DrcError> {
        self.inner_mut().setup()
    }

    pub fn teardown(&mut self) {
        self.inner_mut().teardown()
    }

    #[inline(always)]
    pub fn lookup(&self, addr: u32) -> Result<Option<BlockId>, DrcError> {
        match self {
            // Skip the vtable on the common path
            Lookup::PageTable(table) => table.get(addr),
            Lookup::Custom(custom) => custom.lookup(addr),
        }
    }

    pub fn insert(&mut self, addr: u32, id: BlockId) -> Result<(), DrcError> {
        self.inner_mut().insert(addr, id)
    }

    pub fn remove(&mut self, addr: u32, id: BlockId) {
        self.inner_mut().remove(addr, id)
    }

    pub fn clear(&mut self) {
        self.inner_mut().clear()
    }

    pub fn set_info(&mut self, info: &dyn Any) {
        self.inner_mut().set_info(info)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Lookup::Custom(_))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::block::{BlockDescriptor, BlockStore};

    /// Two banks of code mapped at the same addresses, the bank is picked through `set_info`
    #[derive(Default)]
    struct Banked {
        banks: [HashMap<u32, BlockId>; 2],
        bank: usize,
    }

    impl BlockLookup for Banked {
        fn lookup(&self, addr: u32) -> Result<Option<BlockId>, DrcError> {
            Ok(self.banks[self.bank].get(&addr).copied())
        }

        fn insert(&mut self, addr: u32, id: BlockId) -> Result<(), DrcError> {
            self.banks[self.bank].insert(addr, id);
            Ok(())
        }

        fn remove(&mut self, addr: u32, id: BlockId) {
            if self.banks[self.bank].get(&addr) == Some(&id) {
                self.banks[self.bank].remove(&addr);
            }
        }

        fn clear(&mut self) {
            self.banks.iter_mut().for_each(HashMap::clear);
        }

        fn set_info(&mut self, info: &dyn Any) {
            if let Some(&bank) = info.downcast_ref::<usize>() {
                self.bank = bank;
            }
        }
    }

    #[test]
    fn custom_lookup_is_used_as_is() {
        let mut store = BlockStore::new();
        let a = store.insert(BlockDescriptor::new(0x100, 0x103, 1));
        let b = store.insert(BlockDescriptor::new(0x100, 0x107, 2));

        let mut lookup = Lookup::Custom(Box::new(Banked::default()));
        assert!(lookup.is_custom());
        lookup.setup().unwrap();
        lookup.insert(0x100, a).unwrap();
        lookup.set_info(&1usize);
        assert_eq!(lookup.lookup(0x100).unwrap(), None);
        lookup.insert(0x100, b).unwrap();
        assert_eq!(lookup.lookup(0x100).unwrap(), Some(b));
        lookup.set_info(&0usize);
        assert_eq!(lookup.lookup(0x100).unwrap(), Some(a));

        // Unknown info types are ignored
        lookup.set_info(&"bank 1");
        assert_eq!(lookup.lookup(0x100).unwrap(), Some(a));

        lookup.remove(0x100, b);
        assert_eq!(lookup.lookup(0x100).unwrap(), Some(a));
        lookup.clear();
        assert_eq!(lookup.lookup(0x100).unwrap(), None);
        lookup.teardown();
    }

    #[test]
    fn page_table_strategy() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockDescriptor::new(0x8000_0100, 0x8000_0103, 1));

        let mut lookup = Lookup::PageTable(PageTable::new(PageTableShape::default()).unwrap());
        lookup.setup().unwrap();
        lookup.insert(0x8000_0100, id).unwrap();
        assert_eq!(lookup.lookup(0x8000_0100).unwrap(), Some(id));
        assert_eq!(lookup.lookup(0x8000_0104).unwrap(), None);
        assert_eq!(lookup.lookup(0x8000_0101), Err(DrcError::BadPc(0x8000_0101)));
        lookup.clear();
        assert_eq!(lookup.lookup(0x8000_0100).unwrap(), None);
    }
}
