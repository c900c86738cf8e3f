//! Guest memory map: which host buffer or handler backs each guest address, per access kind.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

pub use common::util::Endian;

use crate::DrcError;

/// Host owned memory that guest accesses land in directly
pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

/// Called with the guest address, returns the value (only the low bits of the access width are used)
pub type ReadHandler = Rc<dyn Fn(u32) -> u32>;

/// Called with the guest address and the value being written
pub type WriteHandler = Rc<dyn Fn(u32, u32)>;

pub fn shared_buffer(size: usize) -> SharedBuffer {
    Rc::new(RefCell::new(vec![0; size]))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Fetch,
    Read8,
    Read16,
    Read32,
    Write8,
    Write16,
    Write32,
}

impl AccessKind {
    pub const COUNT: usize = 7;

    pub const ALL: [AccessKind; AccessKind::COUNT] = [
        AccessKind::Fetch,
        AccessKind::Read8,
        AccessKind::Read16,
        AccessKind::Read32,
        AccessKind::Write8,
        AccessKind::Write16,
        AccessKind::Write32,
    ];

    /// Access width in bytes
    #[inline(always)]
    pub fn width(self) -> usize {
        match self {
            AccessKind::Read8 | AccessKind::Write8 => 1,
            AccessKind::Read16 | AccessKind::Write16 => 2,
            AccessKind::Fetch | AccessKind::Read32 | AccessKind::Write32 => 4,
        }
    }

    #[inline(always)]
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Write8 | AccessKind::Write16 | AccessKind::Write32)
    }

    #[inline(always)]
    pub fn read(width: usize) -> AccessKind {
        match width {
            1 => AccessKind::Read8,
            2 => AccessKind::Read16,
            _ => AccessKind::Read32,
        }
    }

    #[inline(always)]
    pub fn write(width: usize) -> AccessKind {
        match width {
            1 => AccessKind::Write8,
            2 => AccessKind::Write16,
            _ => AccessKind::Write32,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessKind::Fetch => "fetch",
            AccessKind::Read8 => "read8",
            AccessKind::Read16 => "read16",
            AccessKind::Read32 => "read32",
            AccessKind::Write8 => "write8",
            AccessKind::Write16 => "write16",
            AccessKind::Write32 => "write32",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub enum RegionTarget {
    /// Accesses go straight to `buffer`.
    ///
    /// When `volatile` is set, translated code may not hold on to the buffer and must go through
    /// the memory map on every access. Needed when the host swaps buffers between runs.
    Direct { buffer: SharedBuffer, volatile: bool, endian: Endian },
    Read(ReadHandler),
    Write(WriteHandler),
}

impl fmt::Debug for RegionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionTarget::Direct { buffer, volatile, endian } => f
                .debug_struct("Direct")
                .field("len", &buffer.borrow().len())
                .field("volatile", volatile)
                .field("endian", endian)
                .finish(),
            RegionTarget::Read(_) => write!(f, "Read(<handler>)"),
            RegionTarget::Write(_) => write!(f, "Write(<handler>)"),
        }
    }
}

/// A guest address range (`start..=end`) assigned to one device
#[derive(Clone, Debug)]
pub struct Region {
    pub start: u32,
    pub end: u32,
    pub target: RegionTarget,
}

impl Region {
    pub fn buffer_be(start: u32, end: u32, buffer: SharedBuffer, volatile: bool) -> Region {
        Region { start, end, target: RegionTarget::Direct { buffer, volatile, endian: Endian::Big } }
    }

    pub fn buffer_le(start: u32, end: u32, buffer: SharedBuffer, volatile: bool) -> Region {
        Region { start, end, target: RegionTarget::Direct { buffer, volatile, endian: Endian::Little } }
    }

    pub fn read_handler(start: u32, end: u32, handler: impl Fn(u32) -> u32 + 'static) -> Region {
        Region { start, end, target: RegionTarget::Read(Rc::new(handler)) }
    }

    pub fn write_handler(start: u32, end: u32, handler: impl Fn(u32, u32) + 'static) -> Region {
        Region { start, end, target: RegionTarget::Write(Rc::new(handler)) }
    }

    #[inline(always)]
    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Size in bytes, as u64 so a region covering the full 32-bit space doesn't overflow
    pub fn len(&self) -> u64 {
        self.end as u64 - self.start as u64 + 1
    }

    fn check(&self, kind: AccessKind) -> Result<(), DrcError> {
        if self.start > self.end {
            return Err(DrcError::config(format!(
                "{} region {:#010x}..={:#010x} ends before it starts", kind, self.start, self.end)));
        }
        match &self.target {
            RegionTarget::Direct { buffer, endian, .. } => {
                let len = buffer.borrow().len() as u64;
                if len < self.len() {
                    return Err(DrcError::config(format!(
                        "{} region {:#010x}..={:#010x} needs {} bytes but its buffer has {}",
                        kind, self.start, self.end, self.len(), len)));
                }
                if *endian == Endian::Little && (self.start & 3 != 0 || self.len() & 3 != 0) {
                    return Err(DrcError::config(format!(
                        "little-endian {} region {:#010x}..={:#010x} isn't made of whole words",
                        kind, self.start, self.end)));
                }
            }
            RegionTarget::Read(_) if kind.is_write() => {
                return Err(DrcError::config(format!(
                    "read handler mapped for {} at {:#010x}", kind, self.start)));
            }
            RegionTarget::Write(_) if !kind.is_write() => {
                return Err(DrcError::config(format!(
                    "write handler mapped for {} at {:#010x}", kind, self.start)));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Seven independent region lists, one per access kind
#[derive(Clone, Debug, Default)]
pub struct MemoryMap {
    lists: [Vec<Region>; AccessKind::COUNT],
}

impl MemoryMap {
    pub fn new() -> MemoryMap {
        MemoryMap::default()
    }

    pub fn push(&mut self, kind: AccessKind, region: Region) -> &mut Self {
        self[kind].push(region);
        self
    }

    /// Map `buffer` for instruction fetch and for every read and write width
    pub fn map_buffer(&mut self, start: u32, end: u32, buffer: SharedBuffer, endian: Endian, volatile: bool) -> &mut Self {
        for kind in AccessKind::ALL {
            let target = RegionTarget::Direct { buffer: buffer.clone(), volatile, endian };
            self.push(kind, Region { start, end, target });
        }
        self
    }

    /// Map a device: `read` serves fetches and reads of every width, `write` every write width
    pub fn map_handlers(
        &mut self,
        start: u32,
        end: u32,
        read: impl Fn(u32) -> u32 + 'static,
        write: impl Fn(u32, u32) + 'static,
    ) -> &mut Self {
        let read: ReadHandler = Rc::new(read);
        let write: WriteHandler = Rc::new(write);
        for kind in AccessKind::ALL {
            let target = if kind.is_write() {
                RegionTarget::Write(write.clone())
            } else {
                RegionTarget::Read(read.clone())
            };
            self.push(kind, Region { start, end, target });
        }
        self
    }

    pub fn regions(&self, kind: AccessKind) -> &[Region] {
        &self[kind]
    }

    /// Finds the region covering `addr`, returning its index in the list as well
    #[inline(always)]
    pub fn resolve(&self, kind: AccessKind, addr: u32) -> Option<(usize, &Region)> {
        self[kind].iter().enumerate().find(|(_, region)| region.contains(addr))
    }

    pub fn validate(&self) -> Result<(), DrcError> {
        if self[AccessKind::Fetch].is_empty() {
            return Err(DrcError::config("memory map has no fetch regions"));
        }
        for kind in AccessKind::ALL {
            for region in &self[kind] {
                region.check(kind)?;
            }

            let mut ranges: Vec<(u32, u32)> = self[kind].iter().map(|r| (r.start, r.end)).collect();
            ranges.sort_unstable();
            for pair in ranges.windows(2) {
                if pair[1].0 <= pair[0].1 {
                    return Err(DrcError::config(format!(
                        "{} regions {:#010x}..={:#010x} and {:#010x}..={:#010x} overlap",
                        kind, pair[0].0, pair[0].1, pair[1].0, pair[1].1)));
                }
            }
        }
        Ok(())
    }
}

impl Index<AccessKind> for MemoryMap {
    type Output = Vec<Region>;

    fn index(&self, kind: AccessKind) -> &Vec<Region> {
        &self.lists[kind.index()]
    }
}

impl IndexMut<AccessKind> for MemoryMap {
    fn index_mut(&mut self, kind: AccessKind) -> &mut Vec<Region> {
        &mut self.lists[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_map() -> MemoryMap {
        let mut map = MemoryMap::new();
        map.map_buffer(0x0000, 0xffff, shared_buffer(0x10000), Endian::Big, false);
        map
    }

    #[test]
    fn every_address_resolves_to_its_own_region() {
        let mut map = MemoryMap::new();
        let ram = shared_buffer(0x1000);
        let rom = shared_buffer(0x1000);
        map.map_buffer(0x0000, 0x0fff, ram.clone(), Endian::Big, false)
            .map_buffer(0x1000, 0x1fff, rom.clone(), Endian::Little, true)
            .map_handlers(0xf000, 0xf0ff, |_| 0, |_, _| {});
        map.validate().unwrap();

        for kind in AccessKind::ALL {
            for addr in [0x0000, 0x0800, 0x0fff] {
                let (index, region) = map.resolve(kind, addr).unwrap();
                assert_eq!(index, 0);
                assert!(matches!(&region.target, RegionTarget::Direct { buffer, .. } if Rc::ptr_eq(buffer, &ram)));
            }
            for addr in [0x1000, 0x1fff] {
                let (index, region) = map.resolve(kind, addr).unwrap();
                assert_eq!(index, 1);
                assert!(matches!(&region.target, RegionTarget::Direct { buffer, .. } if Rc::ptr_eq(buffer, &rom)));
            }
            let (_, device) = map.resolve(kind, 0xf080).unwrap();
            assert_eq!(matches!(device.target, RegionTarget::Write(_)), kind.is_write());
            assert!(map.resolve(kind, 0x2000).is_none());
        }
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let mut map = flat_map();
        map.push(AccessKind::Read32, Region::read_handler(0xff00, 0x1_00ff, |_| 0));
        let err = map.validate().unwrap_err();
        assert!(matches!(err, DrcError::InvalidConfig(msg) if msg.contains("overlap")));
    }

    #[test]
    fn same_range_in_different_lists_is_fine() {
        let mut map = MemoryMap::new();
        map.push(AccessKind::Fetch, Region::buffer_be(0, 0xff, shared_buffer(0x100), false))
            .push(AccessKind::Read32, Region::read_handler(0, 0xff, |a| a))
            .push(AccessKind::Write32, Region::write_handler(0, 0xff, |_, _| {}));
        map.validate().unwrap();
    }

    #[test]
    fn handler_kind_must_match_access_kind() {
        let mut map = flat_map();
        map.push(AccessKind::Write8, Region::read_handler(0x2_0000, 0x2_00ff, |_| 0));
        assert!(map.validate().is_err());

        let mut map = flat_map();
        map.push(AccessKind::Fetch, Region::write_handler(0x2_0000, 0x2_00ff, |_, _| {}));
        assert!(map.validate().is_err());
    }

    #[test]
    fn buffers_must_cover_their_range() {
        let mut map = MemoryMap::new();
        map.map_buffer(0, 0xfff, shared_buffer(0x800), Endian::Big, false);
        assert!(map.validate().is_err());
    }

    #[test]
    fn little_endian_regions_are_word_sized() {
        let mut map = MemoryMap::new();
        map.map_buffer(0, 0xffe, shared_buffer(0x1000), Endian::Little, false);
        assert!(map.validate().is_err());

        let mut map = MemoryMap::new();
        map.map_buffer(2, 0x1001, shared_buffer(0x1000), Endian::Little, false);
        assert!(map.validate().is_err());
    }

    #[test]
    fn inverted_and_missing_fetch_regions() {
        let mut map = MemoryMap::new();
        map.push(AccessKind::Fetch, Region::read_handler(0x10, 0x0f, |_| 0));
        assert!(map.validate().is_err());

        let mut map = MemoryMap::new();
        map.push(AccessKind::Read8, Region::read_handler(0, 0xff, |_| 0));
        assert!(matches!(map.validate(), Err(DrcError::InvalidConfig(_))));
    }

    #[test]
    fn full_address_space_region() {
        let mut map = MemoryMap::new();
        map.push(AccessKind::Fetch, Region::read_handler(0, u32::MAX, |_| 0));
        map.validate().unwrap();
        assert_eq!(map.regions(AccessKind::Fetch)[0].len(), 1 << 32);
    }
}
