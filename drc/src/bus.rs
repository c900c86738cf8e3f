//! Runtime side of the region dispatcher.
//!
//! `Bus` is what guest code (interpreted or translated) sees of memory. It resolves every access
//! through the memory map and keeps track of writes that land on pages holding guest code.

use common::util::width_mask;

use crate::region::{AccessKind, MemoryMap, Region, RegionTarget};
use crate::DrcError;

pub const CODE_PAGE_SHIFT: u32 = 12;
const CODE_PAGE_COUNT: usize = 1 << (32 - CODE_PAGE_SHIFT);

/// Bitmap of guest pages that contain discovered blocks, plus the writes that hit them
pub struct CodePages {
    bits: Vec<u64>,
    pending: Vec<(u32, u32)>,
}

impl CodePages {
    pub fn new() -> CodePages {
        CodePages {
            bits: vec![0; CODE_PAGE_COUNT / 64],
            pending: Vec::new(),
        }
    }

    /// Marks every page touched by `start..=end`
    pub fn mark(&mut self, start: u32, end: u32) {
        for page in (start >> CODE_PAGE_SHIFT)..=(end >> CODE_PAGE_SHIFT) {
            self.bits[page as usize / 64] |= 1 << (page % 64);
        }
    }

    #[inline(always)]
    pub fn is_code(&self, addr: u32) -> bool {
        let page = addr >> CODE_PAGE_SHIFT;
        self.bits[page as usize / 64] & (1 << (page % 64)) != 0
    }

    /// Records a guest write of `len` bytes. Writes that don't touch code pages are dropped.
    #[inline(always)]
    pub fn note_write(&mut self, addr: u32, len: u32) {
        let last = addr.saturating_add(len - 1);
        if self.is_code(addr) || self.is_code(last) {
            self.pending.push((addr, len));
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> Vec<(u32, u32)> {
        std::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.pending.clear();
    }
}

impl Default for CodePages {
    fn default() -> Self {
        CodePages::new()
    }
}

/// Memory as seen by the guest while a block runs
pub struct Bus<'a> {
    map: &'a MemoryMap,
    pages: &'a mut CodePages,
}

impl<'a> Bus<'a> {
    pub fn new(map: &'a MemoryMap, pages: &'a mut CodePages) -> Bus<'a> {
        Bus { map, pages }
    }

    /// Fetches the 32-bit instruction word at `addr`
    #[inline(always)]
    pub fn fetch(&mut self, addr: u32) -> Result<u32, DrcError> {
        match self.read(AccessKind::Fetch, addr) {
            Err(DrcError::Unmapped { .. }) => Err(DrcError::BadPc(addr)),
            result => result,
        }
    }

    pub fn read8(&mut self, addr: u32) -> Result<u8, DrcError> {
        self.read(AccessKind::Read8, addr).map(|v| v as u8)
    }

    pub fn read16(&mut self, addr: u32) -> Result<u16, DrcError> {
        self.read(AccessKind::Read16, addr).map(|v| v as u16)
    }

    pub fn read32(&mut self, addr: u32) -> Result<u32, DrcError> {
        self.read(AccessKind::Read32, addr)
    }

    pub fn write8(&mut self, addr: u32, value: u8) -> Result<(), DrcError> {
        self.write(AccessKind::Write8, addr, value as u32)
    }

    pub fn write16(&mut self, addr: u32, value: u16) -> Result<(), DrcError> {
        self.write(AccessKind::Write16, addr, value as u32)
    }

    pub fn write32(&mut self, addr: u32, value: u32) -> Result<(), DrcError> {
        self.write(AccessKind::Write32, addr, value)
    }

    /// Reads through the memory map, `kind` must be `Fetch` or one of the reads
    pub fn read(&mut self, kind: AccessKind, addr: u32) -> Result<u32, DrcError> {
        let width = kind.width();
        let (_, region) = self.map.resolve(kind, addr).ok_or(DrcError::Unmapped { kind, addr })?;
        let offset = region_offset(region, kind, addr)?;

        match &region.target {
            RegionTarget::Direct { buffer, endian, .. } => {
                let buffer = buffer.borrow();
                endian.read(&buffer, offset, width).ok_or_else(|| buffer_fault(kind, addr))
            }
            RegionTarget::Read(handler) => Ok(handler(addr) & width_mask(width)),
            // validate() keeps write handlers out of read lists
            RegionTarget::Write(_) => Err(DrcError::Unmapped { kind, addr }),
        }
    }

    /// Writes through the memory map, `kind` must be one of the writes
    pub fn write(&mut self, kind: AccessKind, addr: u32, value: u32) -> Result<(), DrcError> {
        let width = kind.width();
        let (_, region) = self.map.resolve(kind, addr).ok_or(DrcError::Unmapped { kind, addr })?;
        let offset = region_offset(region, kind, addr)?;

        match &region.target {
            RegionTarget::Direct { buffer, endian, .. } => {
                endian
                    .write(&mut buffer.borrow_mut(), offset, width, value)
                    .ok_or_else(|| buffer_fault(kind, addr))?;
            }
            RegionTarget::Write(handler) => handler(addr, value & width_mask(width)),
            RegionTarget::Read(_) => return Err(DrcError::Unmapped { kind, addr }),
        }
        self.pages.note_write(addr, width as u32);
        Ok(())
    }

    /// Tells the code tracker about a write that bypassed `write` (inlined by translated code)
    #[inline(always)]
    pub(crate) fn note_write(&mut self, addr: u32, len: u32) {
        self.pages.note_write(addr, len);
    }
}

#[inline(always)]
fn region_offset(region: &Region, kind: AccessKind, addr: u32) -> Result<usize, DrcError> {
    let last = addr as u64 + kind.width() as u64 - 1;
    if last > region.end as u64 {
        return Err(DrcError::Straddle { kind, addr });
    }
    Ok((addr - region.start) as usize)
}

/// The host shrank a buffer after the map was validated
pub(crate) fn buffer_fault(kind: AccessKind, addr: u32) -> DrcError {
    DrcError::Runtime(format!("{} at {:#010x} is outside of its region's buffer", kind, addr))
}
