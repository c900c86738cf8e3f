//! Code cache arenas.
//!
//! Both the native code and the intermediate representation live in bump-allocated arenas
//! obtained from the host. Each arena ends in a guard region: a reservation that would reach
//! into it fails with [`CacheFull`], which makes the driver flush everything and start over.

use std::rc::Rc;

use crate::region::SharedBuffer;
use crate::services::HostServices;
use crate::DrcError;

/// Location of a translation inside an arena
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CodeRef {
    pub offset: u32,
    pub len: u32,
}

/// Space handed out by [`Arena::reserve`], to be filled and committed
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    offset: usize,
    len: usize,
}

impl Reservation {
    pub fn len(&self) -> usize {
        self.len
    }
}

/// The reservation would have entered the guard region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheFull {
    pub requested: usize,
}

pub struct Arena {
    name: &'static str,
    buf: Option<Box<[u8]>>,
    guard: usize,
    top: usize,
    reserved: Option<usize>,
}

impl Arena {
    pub fn new(name: &'static str, services: &dyn HostServices, size: usize, guard: usize) -> Result<Arena, DrcError> {
        if guard == 0 || guard >= size {
            return Err(DrcError::config(format!(
                "{} cache of {} bytes needs a guard between 1 and {} bytes, got {}",
                name, size, size.saturating_sub(1), guard)));
        }
        let buf = services.alloc(size).ok_or(DrcError::OutOfMemory(size))?;
        if buf.len() != size {
            services.free(buf);
            return Err(DrcError::OutOfMemory(size));
        }
        Ok(Arena {
            name,
            buf: Some(buf),
            guard,
            top: 0,
            reserved: None,
        })
    }

    pub fn size(&self) -> usize {
        self.buf.as_ref().map_or(0, |buf| buf.len())
    }

    /// Bytes usable before the guard region starts
    pub fn limit(&self) -> usize {
        self.size() - self.guard
    }

    pub fn used(&self) -> usize {
        self.top
    }

    pub fn reserve(&mut self, len: usize) -> Result<Reservation, CacheFull> {
        match self.top.checked_add(len) {
            Some(end) if end <= self.limit() => {
                self.reserved = Some(end);
                Ok(Reservation { offset: self.top, len })
            }
            _ => Err(CacheFull { requested: len }),
        }
    }

    /// Copies `bytes` into the reserved space and moves the top past them.
    ///
    /// Writing past the reservation means a translation mis-estimated its size, that's a bug in
    /// the translator and is not recovered from.
    pub fn commit(&mut self, reservation: Reservation, bytes: &[u8]) -> Result<CodeRef, DrcError> {
        if self.reserved.take() != Some(reservation.offset + reservation.len) {
            return Err(DrcError::Runtime(format!("{} cache: stale reservation", self.name)));
        }
        if bytes.len() > reservation.len {
            return Err(DrcError::Runtime(format!(
                "{} cache: translation wrote {} bytes into a {} byte reservation at {:#x}, overrunning into the guard",
                self.name, bytes.len(), reservation.len, reservation.offset)));
        }
        let buf = self.buf.as_mut().ok_or_else(|| DrcError::Runtime(format!("{} cache released", self.name)))?;
        let start = reservation.offset;
        buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.top = start + bytes.len();
        Ok(CodeRef {
            offset: start as u32,
            len: bytes.len() as u32,
        })
    }

    pub fn get(&self, code: CodeRef) -> Option<&[u8]> {
        let start = code.offset as usize;
        let end = start + code.len as usize;
        if end > self.top {
            return None;
        }
        self.buf.as_ref()?.get(start..end)
    }

    pub fn reset(&mut self) {
        self.top = 0;
        self.reserved = None;
    }

    pub fn release(&mut self, services: &dyn HostServices) {
        if let Some(buf) = self.buf.take() {
            services.free(buf);
        }
        self.reset();
    }
}

/// Buffers that translated code accesses without going through the memory map
#[derive(Default)]
pub struct InlinePool {
    buffers: Vec<SharedBuffer>,
}

impl InlinePool {
    /// Slot for `buffer`, adding it if this is the first time it's inlined
    pub fn intern(&mut self, buffer: &SharedBuffer) -> u32 {
        if let Some(slot) = self.buffers.iter().position(|b| Rc::ptr_eq(b, buffer)) {
            return slot as u32;
        }
        self.buffers.push(buffer.clone());
        (self.buffers.len() - 1) as u32
    }

    #[inline(always)]
    pub fn get(&self, slot: u32) -> Option<&SharedBuffer> {
        self.buffers.get(slot as usize)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

pub struct CodeCache {
    pub native: Arena,
    pub intermediate: Arena,
    pub inline_pool: InlinePool,
}

impl CodeCache {
    pub fn flush(&mut self) {
        self.native.reset();
        self.intermediate.reset();
        self.inline_pool.clear();
    }

    pub fn release(&mut self, services: &dyn HostServices) {
        self.native.release(services);
        self.intermediate.release(services);
        self.inline_pool.clear();
    }
}
