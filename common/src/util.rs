use core::fmt;

/// Byte order of the 32-bit words stored in a host buffer.
///
/// Guest addresses are always big-endian. A `Little` buffer stores each 32-bit word byte-swapped
/// (4321), so narrow accesses have to be steered to the swapped lane.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// Buffer index holding the guest byte at `offset`
    #[inline(always)]
    pub fn lane(self, offset: usize) -> usize {
        match self {
            Endian::Big => offset,
            Endian::Little => offset ^ 3,
        }
    }

    /// Reads a `width` byte (1, 2 or 4) guest value starting at `offset`.
    ///
    /// Returns `None` if any byte falls outside of `buf`.
    #[inline(always)]
    pub fn read(self, buf: &[u8], offset: usize, width: usize) -> Option<u32> {
        let mask = width - 1;
        if offset & mask == 0 {
            // Aligned accesses never leave their word, so the lane of the whole access can be
            // computed once.
            let base = match self {
                Endian::Big => offset,
                Endian::Little => offset ^ (4 - width),
            };
            let bytes = buf.get(base..base + width)?;
            return Some(match (self, width) {
                (_, 1) => bytes[0] as u32,
                (Endian::Big, 2) => u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
                (Endian::Little, 2) => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
                (Endian::Big, _) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                (Endian::Little, _) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            });
        }

        let mut value = 0u32;
        for i in 0..width {
            value = (value << 8) | *buf.get(self.lane(offset + i))? as u32;
        }
        Some(value)
    }

    /// Writes the low `width` bytes of `value` at `offset`. Returns `None` (and writes nothing)
    /// if the access doesn't fit in `buf`.
    #[inline(always)]
    pub fn write(self, buf: &mut [u8], offset: usize, width: usize, value: u32) -> Option<()> {
        for i in 0..width {
            if self.lane(offset + i) >= buf.len() {
                return None;
            }
        }
        for i in 0..width {
            let shift = 8 * (width - 1 - i);
            buf[self.lane(offset + i)] = (value >> shift) as u8;
        }
        Some(())
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Big => write!(f, "BE"),
            Endian::Little => write!(f, "LE"),
        }
    }
}

/// Mask covering the low `width` bytes of a 32-bit value
#[inline(always)]
pub fn width_mask(width: usize) -> u32 {
    (!0u32).wrapping_shr(32 - 8 * width as u32)
}
