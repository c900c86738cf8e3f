use std::fmt;
use std::rc::Rc;

use crate::lookup::{BlockLookup, PageTableShape};
use crate::region::MemoryMap;
use crate::services::{DefaultServices, HostServices};
use crate::DrcError;

/// Threshold that translates every block the first time it's seen, skipping the profiling stage
pub const ZERO_THRESHOLD: u32 = 1;

pub const DEFAULT_HOT_THRESHOLD: u32 = 5;
pub const DEFAULT_MAX_BLOCK_INSTRUCTIONS: u32 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Total arena size in bytes
    pub size: usize,
    /// Bytes at the end of the arena that are never handed out
    pub guard_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            size: 1 << 20,
            guard_size: 16 << 10,
        }
    }
}

pub enum LookupStrategy {
    PageTable(PageTableShape),
    /// The host handles lookups on its own
    Custom(Box<dyn BlockLookup>),
}

impl Default for LookupStrategy {
    fn default() -> Self {
        LookupStrategy::PageTable(PageTableShape::default())
    }
}

impl fmt::Debug for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStrategy::PageTable(shape) => f.debug_tuple("PageTable").field(shape).finish(),
            LookupStrategy::Custom(_) => write!(f, "Custom(<lookup>)"),
        }
    }
}

pub struct DrcConfig {
    /// Never translate, no caches get allocated
    pub interpret_only: bool,
    pub services: Rc<dyn HostServices>,
    pub native_cache: CacheConfig,
    pub intermediate_cache: CacheConfig,
    /// Entries after which a block gets translated, see [`ZERO_THRESHOLD`]
    pub hot_threshold: u32,
    pub max_block_instructions: u32,
    pub lookup: LookupStrategy,
    pub memory_map: MemoryMap,
    /// Accumulate per block execution time
    pub profile: bool,
}

impl Default for DrcConfig {
    fn default() -> Self {
        DrcConfig {
            interpret_only: false,
            services: Rc::new(DefaultServices),
            native_cache: CacheConfig::default(),
            intermediate_cache: CacheConfig::default(),
            hot_threshold: DEFAULT_HOT_THRESHOLD,
            max_block_instructions: DEFAULT_MAX_BLOCK_INSTRUCTIONS,
            lookup: LookupStrategy::default(),
            memory_map: MemoryMap::new(),
            profile: false,
        }
    }
}

impl DrcConfig {
    pub fn validate(&self) -> Result<(), DrcError> {
        if self.hot_threshold == 0 {
            return Err(DrcError::config(format!(
                "hot threshold must be at least {} (ZERO_THRESHOLD)", ZERO_THRESHOLD)));
        }
        if self.max_block_instructions == 0 {
            return Err(DrcError::config("blocks need room for at least one instruction"));
        }
        if !self.interpret_only {
            for (name, cache) in [("native", &self.native_cache), ("intermediate", &self.intermediate_cache)] {
                if cache.guard_size == 0 || cache.guard_size >= cache.size {
                    return Err(DrcError::config(format!(
                        "{} cache guard of {} bytes doesn't fit a {} byte cache", name, cache.guard_size, cache.size)));
                }
            }
        }
        if let LookupStrategy::PageTable(shape) = &self.lookup {
            shape.validate()?;
        }
        self.memory_map.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{shared_buffer, Endian};

    fn mapped() -> DrcConfig {
        let mut config = DrcConfig::default();
        config.memory_map.map_buffer(0, 0xffff, shared_buffer(0x10000), Endian::Big, false);
        config
    }

    #[test]
    fn defaults_need_a_memory_map() {
        assert!(DrcConfig::default().validate().is_err());
        mapped().validate().unwrap();
    }

    #[test]
    fn rejects_bad_knobs() {
        let mut config = mapped();
        config.hot_threshold = 0;
        assert!(matches!(config.validate(), Err(DrcError::InvalidConfig(_))));

        let mut config = mapped();
        config.max_block_instructions = 0;
        assert!(config.validate().is_err());

        let mut config = mapped();
        config.native_cache.guard_size = config.native_cache.size;
        assert!(config.validate().is_err());
        // Caches aren't allocated at all when interpreting
        config.interpret_only = true;
        config.validate().unwrap();

        let mut config = mapped();
        config.lookup = LookupStrategy::PageTable(PageTableShape { offs_bits: 9, ..Default::default() });
        assert!(config.validate().is_err());
    }
}
