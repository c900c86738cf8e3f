use crate::block::BlockId;
use crate::DrcError;

use super::BlockLookup;

/// How a guest address is split up by the page table.
///
/// From the top: `page1_bits` pick the outer page, `page2_bits` the inner page, `offs_bits` the
/// entry, and the low `ignore_bits` must be zero (instruction alignment).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageTableShape {
    pub address_bits: u32,
    pub page1_bits: u32,
    pub page2_bits: u32,
    pub offs_bits: u32,
    pub ignore_bits: u32,
}

impl Default for PageTableShape {
    fn default() -> Self {
        PageTableShape {
            address_bits: 32,
            page1_bits: 10,
            page2_bits: 10,
            offs_bits: 10,
            ignore_bits: 2,
        }
    }
}

impl PageTableShape {
    const MAX_PAGE_BITS: u32 = 20;

    pub fn validate(&self) -> Result<(), DrcError> {
        if !(1..=32).contains(&self.address_bits) {
            return Err(DrcError::config(format!(
                "page table address width must be 1..=32 bits, got {}", self.address_bits)));
        }
        for (name, bits) in [("page1", self.page1_bits), ("page2", self.page2_bits), ("offs", self.offs_bits)] {
            if bits == 0 {
                return Err(DrcError::config(format!("page table {} selector is empty", name)));
            }
        }
        if self.page1_bits > Self::MAX_PAGE_BITS || self.page2_bits > Self::MAX_PAGE_BITS {
            return Err(DrcError::config(format!(
                "page table selectors are limited to {} bits, got {}/{}",
                Self::MAX_PAGE_BITS, self.page1_bits, self.page2_bits)));
        }
        let total = self.page1_bits as u64 + self.page2_bits as u64 + self.offs_bits as u64 + self.ignore_bits as u64;
        if total != self.address_bits as u64 {
            return Err(DrcError::config(format!(
                "page table fields add up to {} bits, address is {} bits", total, self.address_bits)));
        }
        Ok(())
    }

    /// Splits `addr` into (outer, inner, entry) indices
    #[inline(always)]
    fn split(&self, addr: u32) -> Result<(usize, usize, usize), DrcError> {
        if (addr as u64) >> self.address_bits != 0 || addr & low_mask(self.ignore_bits) != 0 {
            return Err(DrcError::BadPc(addr));
        }
        let word = addr >> self.ignore_bits;
        let offs = word & low_mask(self.offs_bits);
        let page2 = (word >> self.offs_bits) & low_mask(self.page2_bits);
        let page1 = (word >> self.offs_bits >> self.page2_bits) & low_mask(self.page1_bits);
        Ok((page1 as usize, page2 as usize, offs as usize))
    }
}

#[inline(always)]
fn low_mask(bits: u32) -> u32 {
    ((1u64 << bits) - 1) as u32
}

type Leaf = Box<[Option<BlockId>]>;
type Inner = Box<[Option<Leaf>]>;

/// Two-level table of block ids, inner pages and leaves are only allocated once something is
/// inserted into them.
pub struct PageTable {
    shape: PageTableShape,
    outer: Box<[Option<Inner>]>,
}

impl PageTable {
    pub fn new(shape: PageTableShape) -> Result<PageTable, DrcError> {
        shape.validate()?;
        Ok(PageTable {
            shape,
            outer: empty(1 << shape.page1_bits),
        })
    }

    pub fn shape(&self) -> PageTableShape {
        self.shape
    }

    #[inline(always)]
    pub fn get(&self, addr: u32) -> Result<Option<BlockId>, DrcError> {
        let (page1, page2, offs) = self.shape.split(addr)?;
        let entry = self.outer[page1]
            .as_ref()
            .and_then(|inner| inner[page2].as_ref())
            .and_then(|leaf| leaf[offs]);
        Ok(entry)
    }

    fn slot(&mut self, addr: u32) -> Result<&mut Option<BlockId>, DrcError> {
        let (page1, page2, offs) = self.shape.split(addr)?;
        let (inner_len, leaf_len) = (1 << self.shape.page2_bits, 1 << self.shape.offs_bits);
        let inner = self.outer[page1].get_or_insert_with(|| empty(inner_len));
        let leaf = inner[page2].get_or_insert_with(|| empty(leaf_len));
        Ok(&mut leaf[offs])
    }

    /// Number of allocated leaves, for tests and statistics
    pub fn allocated_leaves(&self) -> usize {
        self.outer
            .iter()
            .flatten()
            .map(|inner| inner.iter().filter(|leaf| leaf.is_some()).count())
            .sum()
    }
}

fn empty<T>(len: usize) -> Box<[Option<T>]> {
    std::iter::repeat_with(|| None).take(len).collect()
}

impl BlockLookup for PageTable {
    fn lookup(&self, addr: u32) -> Result<Option<BlockId>, DrcError> {
        self.get(addr)
    }

    fn insert(&mut self, addr: u32, id: BlockId) -> Result<(), DrcError> {
        *self.slot(addr)? = Some(id);
        Ok(())
    }

    fn remove(&mut self, addr: u32, id: BlockId) {
        let Ok((page1, page2, offs)) = self.shape.split(addr) else {
            return;
        };
        let Some(leaf) = self.outer[page1].as_mut().and_then(|inner| inner[page2].as_mut()) else {
            return;
        };
        if leaf[offs] == Some(id) {
            leaf[offs] = None;
        }
    }

    fn clear(&mut self) {
        self.outer.iter_mut().for_each(|inner| *inner = None);
    }
}
