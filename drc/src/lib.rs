//! A retargetable dynamic recompiler.
//!
//! Guest code is discovered block by block and interpreted until a block gets hot, at which
//! point it's translated through a small IR into threaded native code. Memory is described by a
//! [`MemoryMap`] of host buffers and handlers, guest CPUs plug in through [`SourceCpu`].

pub mod arch;
pub mod block;
pub mod bus;
pub mod cache;
pub mod config;
pub mod driver;
mod error;
pub mod ir;
pub mod lookup;
pub mod native;
pub mod region;
pub mod services;

pub use arch::{Decoded, Flow, GuestState, SourceCpu, Unsupported};
pub use block::{BlockDescriptor, BlockId, BlockState};
pub use bus::Bus;
pub use config::{CacheConfig, DrcConfig, LookupStrategy, ZERO_THRESHOLD};
pub use driver::{Drc, DrcStats, ExecPath, RunExit, StepInfo};
pub use error::{DrcError, Status};
pub use lookup::{BlockLookup, PageTableShape};
pub use region::{shared_buffer, AccessKind, Endian, MemoryMap, Region, SharedBuffer};
pub use services::{DefaultServices, HostServices};
