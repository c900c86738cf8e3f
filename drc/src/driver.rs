//! The execution driver: finds the block at the PC, decides whether to interpret or translate it
//! and keeps the caches, the lookup and the block store in sync.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::arch::{Flow, GuestState, SourceCpu};
use crate::block::{BlockDescriptor, BlockId, BlockState, BlockStore, EVICTED_LIMIT};
use crate::bus::{Bus, CodePages};
use crate::cache::{Arena, CodeCache, InlinePool};
use crate::config::{DrcConfig, LookupStrategy};
use crate::ir::{self, IrBuilder, IrOp, Record};
use crate::lookup::{Lookup, PageTable};
use crate::native::{self, NativeOp};
use crate::region::{AccessKind, MemoryMap, RegionTarget, SharedBuffer};
use crate::services::{host_print, HostServices};
use crate::DrcError;

/// How a block was run by [`Drc::step`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecPath {
    Interpreted,
    /// Translated on this entry, then run natively
    Translated,
    Native,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StepInfo {
    /// Guest address of the block that ran
    pub start: u32,
    pub path: ExecPath,
    /// Entries into the block, this one included
    pub execution_count: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// The guest reported itself as stopped
    Stopped,
    BudgetExhausted,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrcStats {
    pub blocks_discovered: u64,
    pub interpreted_entries: u64,
    pub native_entries: u64,
    pub translations: u64,
    pub compile_failures: u64,
    pub flushes: u64,
    pub invalidated_blocks: u64,
}

impl fmt::Display for DrcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks={} interpreted={} native={} translations={} compile_failures={} flushes={} invalidated={}",
            self.blocks_discovered,
            self.interpreted_entries,
            self.native_entries,
            self.translations,
            self.compile_failures,
            self.flushes,
            self.invalidated_blocks,
        )
    }
}

/// Why a translation didn't produce native code
enum Failure {
    /// Pin the block to the interpreter
    Unsupported(String),
    /// Flush and retry
    CacheFull,
    Fatal(DrcError),
}

impl From<DrcError> for Failure {
    fn from(err: DrcError) -> Self {
        Failure::Fatal(err)
    }
}

pub struct Drc<A: SourceCpu> {
    arch: A,
    services: Rc<dyn HostServices>,
    hot_threshold: u32,
    max_block_instructions: u32,
    profile: bool,

    map: MemoryMap,
    code_pages: CodePages,
    store: BlockStore,
    lookup: Lookup,
    /// `None` when interpreting only
    cache: Option<CodeCache>,
    stats: DrcStats,
}

impl<A: SourceCpu> Drc<A> {
    pub fn new(arch: A, config: DrcConfig) -> Result<Drc<A>, DrcError> {
        config.validate()?;
        if A::REGISTER_COUNT > ir::MAX_GUEST_REGISTERS {
            return Err(DrcError::config(format!(
                "{} has {} registers, translations can address at most {}",
                arch.name(),
                A::REGISTER_COUNT,
                ir::MAX_GUEST_REGISTERS
            )));
        }
        let DrcConfig {
            interpret_only,
            services,
            native_cache,
            intermediate_cache,
            hot_threshold,
            max_block_instructions,
            lookup,
            memory_map,
            profile,
        } = config;

        let mut lookup = match lookup {
            LookupStrategy::PageTable(shape) => Lookup::PageTable(PageTable::new(shape)?),
            LookupStrategy::Custom(custom) => Lookup::Custom(custom),
        };

        let mut cache = if interpret_only {
            None
        } else {
            let mut native = Arena::new("native", &*services, native_cache.size, native_cache.guard_size)?;
            let intermediate = match Arena::new(
                "intermediate",
                &*services,
                intermediate_cache.size,
                intermediate_cache.guard_size,
            ) {
                Ok(arena) => arena,
                Err(err) => {
                    native.release(&*services);
                    return Err(err);
                }
            };
            Some(CodeCache {
                native,
                intermediate,
                inline_pool: InlinePool::default(),
            })
        };

        if let Err(err) = lookup.setup() {
            if let Some(cache) = cache.as_mut() {
                cache.release(&*services);
            }
            return Err(err);
        }

        match &cache {
            Some(_) => host_print!(
                services,
                Info,
                "{}: hot threshold {}, {} KiB native cache, {} KiB IR cache, {} lookup",
                arch.name(),
                hot_threshold,
                native_cache.size >> 10,
                intermediate_cache.size >> 10,
                if lookup.is_custom() { "custom" } else { "page table" },
            ),
            None => host_print!(services, Info, "{}: interpreter only", arch.name()),
        }

        Ok(Drc {
            arch,
            services,
            hot_threshold,
            max_block_instructions,
            profile,
            map: memory_map,
            code_pages: CodePages::new(),
            store: BlockStore::new(),
            lookup,
            cache,
            stats: DrcStats::default(),
        })
    }

    /// Runs the block at the current PC once
    pub fn step(&mut self, state: &mut A::State) -> Result<StepInfo, DrcError> {
        let pc = state.pc();
        let id = match self.lookup.lookup(pc)? {
            Some(id) if self.store.live(id).is_some() => id,
            _ => self.discover(pc)?,
        };
        let count = self.hit(id)?;

        let desc = self.store.get(id).ok_or_else(|| missing(id))?;
        let (has_native, pinned) = (desc.native_code.is_some(), desc.compile_failed);

        let (path, id) = if has_native {
            self.run_native(id, state)?;
            (ExecPath::Native, id)
        } else if self.cache.is_none() || pinned || count < self.hot_threshold {
            self.interpret_block(id, state)?;
            (ExecPath::Interpreted, id)
        } else {
            self.promote(id, state)?
        };
        let execution_count = self.store.get(id).map_or(count, |desc| desc.execution_count);

        // Stores into code only take effect once the block that made them is done
        if self.code_pages.has_pending() {
            for (addr, len) in self.code_pages.take_pending() {
                self.invalidate(addr, len);
            }
        }

        Ok(StepInfo {
            start: pc,
            path,
            execution_count,
        })
    }

    /// Steps until the guest stops or `max_blocks` blocks have run
    pub fn run(&mut self, state: &mut A::State, max_blocks: u64) -> Result<RunExit, DrcError> {
        for _ in 0..max_blocks {
            if state.stopped() {
                return Ok(RunExit::Stopped);
            }
            self.step(state)?;
        }
        Ok(if state.stopped() { RunExit::Stopped } else { RunExit::BudgetExhausted })
    }

    /// Decodes forward from `pc` and registers the block
    fn discover(&mut self, pc: u32) -> Result<BlockId, DrcError> {
        let mut bus = Bus::new(&self.map, &mut self.code_pages);
        let mut addr = pc;
        let mut end = pc;
        let mut count = 0;

        while count < self.max_block_instructions {
            let word = match bus.fetch(addr) {
                Ok(word) => word,
                Err(err) if count == 0 => return Err(err),
                Err(_) => break,
            };
            let decoded = match self.arch.decode(addr, word) {
                Some(decoded) if decoded.len > 0 => decoded,
                _ if count == 0 => {
                    return Err(DrcError::Runtime(format!(
                        "{}: undecodable instruction {:#010x} at {:#010x}", self.arch.name(), word, addr)));
                }
                _ => break,
            };
            count += 1;
            end = addr.wrapping_add(decoded.len - 1);
            if decoded.flow != Flow::FallThrough {
                break;
            }
            match end.checked_add(1) {
                Some(next) => addr = next,
                None => break,
            }
        }

        self.code_pages.mark(pc, end);
        let id = self.store.insert(BlockDescriptor::new(pc, end, count));
        self.lookup.insert(pc, id)?;
        self.stats.blocks_discovered += 1;
        host_print!(self.services, Trace, "block {:#010x}..={:#010x}, {} instructions", pc, end, count);
        Ok(id)
    }

    fn hit(&mut self, id: BlockId) -> Result<u32, DrcError> {
        let desc = self.store.get_mut(id).ok_or_else(|| missing(id))?;
        desc.execution_count = desc.execution_count.saturating_add(1);
        Ok(desc.execution_count)
    }

    /// Translates a hot block and runs it. Falls back to interpreting when the block can't be
    /// translated.
    fn promote(&mut self, mut id: BlockId, state: &mut A::State) -> Result<(ExecPath, BlockId), DrcError> {
        let mut flushed = false;
        loop {
            match self.translate(id) {
                Ok(()) => {
                    self.run_native(id, state)?;
                    return Ok((ExecPath::Translated, id));
                }
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::CacheFull) if !flushed => {
                    let pc = self.store.get(id).ok_or_else(|| missing(id))?.start;
                    host_print!(self.services, Info, "code cache full translating {:#010x}", pc);
                    self.flush();
                    flushed = true;

                    id = self.discover(pc)?;
                    if self.hit(id)? < self.hot_threshold {
                        break;
                    }
                }
                Err(Failure::CacheFull) => {
                    self.pin(id, "block doesn't fit in an empty code cache");
                    break;
                }
                Err(Failure::Unsupported(reason)) => {
                    self.pin(id, &reason);
                    break;
                }
            }
        }
        self.interpret_block(id, state)?;
        Ok((ExecPath::Interpreted, id))
    }

    fn pin(&mut self, id: BlockId, reason: &str) {
        let Some(desc) = self.store.get_mut(id) else {
            return;
        };
        desc.compile_failed = true;
        desc.ir_code = None;
        let err = DrcError::Compile {
            pc: desc.start,
            reason: reason.to_owned(),
        };
        self.stats.compile_failures += 1;
        host_print!(self.services, Warn, "{}: {}, interpreting the block from now on", self.arch.name(), err);
    }

    fn translate(&mut self, id: BlockId) -> Result<(), Failure> {
        let desc = self.store.get(id).ok_or_else(|| missing(id))?;
        let (start, instructions) = (desc.start, desc.instructions);
        let Some(cache) = self.cache.as_mut() else {
            return Err(Failure::Unsupported("no code cache".into()));
        };

        let worst_case = (instructions as usize * A::MAX_IR_PER_INSTRUCTION + 1) * Record::SIZE;
        let ir_space = cache.intermediate.reserve(worst_case).map_err(|_| Failure::CacheFull)?;

        let mut ir = IrBuilder::new(A::REGISTER_COUNT);
        let mut bus = Bus::new(&self.map, &mut self.code_pages);
        let mut pc = start;
        for _ in 0..instructions {
            let word = bus.fetch(pc)?;
            let decoded = self
                .arch
                .decode(pc, word)
                .ok_or_else(|| Failure::Unsupported(format!("{:#010x} at {:#010x} no longer decodes", word, pc)))?;
            let before = ir.len();
            self.arch.translate(pc, word, &mut ir).map_err(|err| Failure::Unsupported(err.0))?;
            if ir.len() - before > A::MAX_IR_PER_INSTRUCTION {
                return Err(Failure::Fatal(DrcError::Runtime(format!(
                    "{}: {} IR ops emitted for {:#010x} at {:#010x}, at most {} fit",
                    self.arch.name(),
                    ir.len() - before,
                    word,
                    pc,
                    A::MAX_IR_PER_INSTRUCTION
                ))));
            }
            pc = pc.wrapping_add(decoded.len);
        }
        ir.exit(pc);
        ir.validate().map_err(Failure::Unsupported)?;

        let ir_code = cache.intermediate.commit(ir_space, &ir.encode())?;
        let stored = cache.intermediate.get(ir_code).ok_or_else(|| DrcError::Runtime("IR vanished from its cache".into()))?;
        let ops = ir::decode(stored)?;

        let native_space = cache.native.reserve(ops.len() * Record::SIZE).map_err(|_| Failure::CacheFull)?;
        let code = native::compile(&ops, &self.map, &mut cache.inline_pool);
        let native_code = cache.native.commit(native_space, &native::encode(&code))?;

        let desc = self.store.get_mut(id).ok_or_else(|| missing(id))?;
        desc.ir_code = Some(ir_code);
        desc.native_code = Some(native_code);
        desc.interp_size = ir_code.len as usize;
        desc.native_size = native_code.len as usize;
        self.stats.translations += 1;
        host_print!(
            self.services,
            Debug,
            "translated {:#010x}: {} instructions, {} ops",
            start,
            instructions,
            code.len()
        );
        Ok(())
    }

    fn run_native(&mut self, id: BlockId, state: &mut A::State) -> Result<(), DrcError> {
        let code = self.store.get(id).and_then(|desc| desc.native_code).ok_or_else(|| missing(id))?;
        let cache = self.cache.as_ref().ok_or_else(|| missing(id))?;
        let bytes = cache.native.get(code).ok_or_else(|| missing(id))?;

        let started = self.profile.then(Instant::now);
        let mut bus = Bus::new(&self.map, &mut self.code_pages);
        native::execute(&self.arch, bytes, state, &mut bus, &cache.inline_pool)?;

        self.stats.native_entries += 1;
        if let (Some(started), Some(desc)) = (started, self.store.get_mut(id)) {
            desc.native_exec_time += started.elapsed();
        }
        Ok(())
    }

    fn interpret_block(&mut self, id: BlockId, state: &mut A::State) -> Result<(), DrcError> {
        let instructions = self.store.get(id).ok_or_else(|| missing(id))?.instructions;

        let started = self.profile.then(Instant::now);
        let mut bus = Bus::new(&self.map, &mut self.code_pages);
        let mut executed = 0;
        loop {
            let pc = state.pc();
            let word = bus.fetch(pc)?;
            let decoded = self.arch.decode(pc, word).ok_or_else(|| {
                DrcError::Runtime(format!("{}: undecodable instruction {:#010x} at {:#010x}", self.arch.name(), word, pc))
            })?;
            self.arch.interpret(state, &mut bus, word)?;
            executed += 1;

            let sequential = state.pc() == pc.wrapping_add(decoded.len);
            if decoded.flow != Flow::FallThrough || !sequential || executed >= instructions || state.stopped() {
                break;
            }
        }

        self.stats.interpreted_entries += 1;
        if let (Some(started), Some(desc)) = (started, self.store.get_mut(id)) {
            desc.interp_exec_time += started.elapsed();
        }
        Ok(())
    }

    /// Evicts every block with bytes in `start..start + len`, returns how many there were
    pub fn invalidate(&mut self, start: u32, len: u32) -> usize {
        if len == 0 {
            return 0;
        }
        self.invalidate_range(start, start.saturating_add(len - 1))
    }

    /// Same as [`Drc::invalidate`] with an inclusive end, so the whole address space fits
    fn invalidate_range(&mut self, start: u32, end: u32) -> usize {
        let ids = self.store.overlapping(start, end);
        for &id in &ids {
            if let Some(addr) = self.store.evict(id) {
                self.lookup.remove(addr, id);
            }
        }
        if !ids.is_empty() {
            self.stats.invalidated_blocks += ids.len() as u64;
            host_print!(self.services, Debug, "invalidated {} blocks in {:#010x}..={:#010x}", ids.len(), start, end);
        }
        if self.store.evicted() >= EVICTED_LIMIT {
            host_print!(self.services, Debug, "{} evicted descriptors, reclaiming them", self.store.evicted());
            self.flush();
        }
        ids.len()
    }

    /// Throws away every block and translation
    pub fn flush(&mut self) {
        self.store.clear();
        if let Some(cache) = self.cache.as_mut() {
            cache.flush();
        }
        self.lookup.clear();
        self.code_pages.clear();
        self.stats.flushes += 1;
        host_print!(self.services, Info, "translation caches flushed ({} flushes)", self.stats.flushes);
    }

    /// Live descriptor of the block starting at `addr`
    pub fn block(&self, addr: u32) -> Option<&BlockDescriptor> {
        let id = self.lookup.lookup(addr).ok()??;
        self.store.live(id)
    }

    /// Every live block, in discovery order
    pub fn blocks(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.store.iter_live()
    }

    pub fn block_state(&self, addr: u32) -> BlockState {
        self.block(addr).map_or(BlockState::Uncompiled, BlockDescriptor::state)
    }

    pub fn native_code(&self, addr: u32) -> Option<&[u8]> {
        let code = self.block(addr)?.native_code?;
        self.cache.as_ref()?.native.get(code)
    }

    pub fn ir_code(&self, addr: u32) -> Option<&[u8]> {
        let code = self.block(addr)?.ir_code?;
        self.cache.as_ref()?.intermediate.get(code)
    }

    /// Decoded IR of the block at `addr`
    pub fn ir_ops(&self, addr: u32) -> Option<Vec<IrOp>> {
        ir::decode(self.ir_code(addr)?).ok()
    }

    pub fn native_ops(&self, addr: u32) -> Option<Vec<NativeOp>> {
        native::decode(self.native_code(addr)?).ok()
    }

    pub fn stats(&self) -> &DrcStats {
        &self.stats
    }

    pub fn cache(&self) -> Option<&CodeCache> {
        self.cache.as_ref()
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn set_lookup_info(&mut self, info: &dyn Any) {
        self.lookup.set_info(info);
    }

    /// Points a direct region at a different buffer.
    ///
    /// Swapping a `Fetch` buffer is a code bank switch: every block decoded from the region is
    /// evicted. For data regions, translations that inlined the old buffer keep using it; map the
    /// region as volatile if the guest has to see the swap everywhere.
    pub fn set_region_buffer(&mut self, kind: AccessKind, index: usize, buffer: SharedBuffer) -> Result<(), DrcError> {
        let region = self.map[kind]
            .get_mut(index)
            .ok_or_else(|| DrcError::config(format!("there's no {} region #{}", kind, index)))?;
        let needed = region.len();
        let (start, end) = (region.start, region.end);
        match &mut region.target {
            RegionTarget::Direct { buffer: current, .. } => {
                let len = buffer.borrow().len() as u64;
                if len < needed {
                    return Err(DrcError::config(format!(
                        "{} region {:#010x}..={:#010x} needs {} bytes, new buffer has {}", kind, start, end, needed, len)));
                }
                *current = buffer;
            }
            _ => return Err(DrcError::config(format!("{} region {:#010x}..={:#010x} is a handler", kind, start, end))),
        }
        if kind == AccessKind::Fetch {
            self.invalidate_range(start, end);
        }
        Ok(())
    }
}

impl<A: SourceCpu> Drop for Drc<A> {
    fn drop(&mut self) {
        self.lookup.teardown();
        if let Some(cache) = self.cache.as_mut() {
            cache.release(&*self.services);
        }
    }
}

fn missing(id: BlockId) -> DrcError {
    DrcError::Runtime(format!("block {:?} lost its descriptor or code", id))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::arch::{Decoded, Unsupported};
    use crate::region::{shared_buffer, Endian};

    #[derive(Default)]
    struct Acc {
        regs: [u32; 2],
        pc: u32,
        halted: bool,
    }

    impl GuestState for Acc {
        fn pc(&self) -> u32 {
            self.pc
        }
        fn set_pc(&mut self, pc: u32) {
            self.pc = pc;
        }
        fn regs(&self) -> &[u32] {
            &self.regs
        }
        fn regs_mut(&mut self) -> &mut [u32] {
            &mut self.regs
        }
        fn stopped(&self) -> bool {
            self.halted
        }
    }

    /// 1: r0 += 1, 2: jump to 0, 3: halt, 4: rewrite the word at 0 with itself
    struct Accumulator;

    impl SourceCpu for Accumulator {
        type State = Acc;
        const REGISTER_COUNT: usize = 2;

        fn name(&self) -> &'static str {
            "acc"
        }

        fn decode(&self, _pc: u32, word: u32) -> Option<Decoded> {
            let flow = match word {
                1 | 4 => Flow::FallThrough,
                2 => Flow::Branch,
                3 => Flow::EndBlock,
                _ => return None,
            };
            Some(Decoded { len: 4, flow })
        }

        fn interpret(&self, state: &mut Acc, bus: &mut Bus<'_>, word: u32) -> Result<(), DrcError> {
            match word {
                1 => {
                    state.regs[0] += 1;
                    state.pc += 4;
                }
                4 => {
                    let first = bus.read32(0)?;
                    bus.write32(0, first)?;
                    state.pc += 4;
                }
                2 => state.pc = 0,
                _ => {
                    state.halted = true;
                    state.pc += 4;
                }
            }
            Ok(())
        }

        fn translate(&self, pc: u32, word: u32, ir: &mut IrBuilder) -> Result<(), Unsupported> {
            use crate::ir::{AluOp, Reg};
            match word {
                1 => ir.alu_imm(AluOp::Add, Reg::Guest(0), Reg::Guest(0), 1),
                2 => ir.jump(0),
                _ => ir.interpret(pc, word, 4),
            };
            Ok(())
        }
    }

    fn bank(program: &[u32]) -> SharedBuffer {
        let ram = shared_buffer(0x1000);
        for (i, word) in program.iter().enumerate() {
            ram.borrow_mut()[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        ram
    }

    fn config(program: &[u32]) -> DrcConfig {
        let ram = bank(program);
        let mut config = DrcConfig::default();
        config.memory_map.map_buffer(0, 0xfff, ram, Endian::Big, false);
        config.native_cache = crate::config::CacheConfig { size: 4096, guard_size: 256 };
        config.intermediate_cache = crate::config::CacheConfig { size: 4096, guard_size: 256 };
        config
    }

    #[test]
    fn loop_gets_promoted() {
        let mut config = config(&[1, 1, 2]);
        config.hot_threshold = 3;
        let mut drc = Drc::new(Accumulator, config).unwrap();
        let mut state = Acc::default();

        let paths: Vec<ExecPath> = (0..4).map(|_| drc.step(&mut state).unwrap().path).collect();
        assert_eq!(paths, [ExecPath::Interpreted, ExecPath::Interpreted, ExecPath::Translated, ExecPath::Native]);
        assert_eq!(state.regs[0], 8);
        assert_eq!(state.pc, 0);
        assert_eq!(drc.block_state(0), BlockState::Native);
        assert_eq!(drc.stats().to_string(), "blocks=1 interpreted=2 native=2 translations=1 compile_failures=0 flushes=0 invalidated=0");
    }

    #[test]
    fn code_bank_switch_evicts_translations() {
        let mut config = config(&[1, 2]);
        config.hot_threshold = 1;
        let mut drc = Drc::new(Accumulator, config).unwrap();
        let mut state = Acc::default();

        assert_eq!(drc.step(&mut state).unwrap().path, ExecPath::Translated);
        assert_eq!(drc.block_state(0), BlockState::Native);

        drc.set_region_buffer(AccessKind::Fetch, 0, bank(&[3])).unwrap();
        assert_eq!(drc.block_state(0), BlockState::Uncompiled);
        assert_eq!(drc.stats().invalidated_blocks, 1);

        assert_eq!(drc.step(&mut state).unwrap().path, ExecPath::Translated);
        assert!(state.halted);
        assert_eq!(state.regs[0], 1);
        assert_eq!(drc.block(0).unwrap().instructions, 1);
    }

    #[test]
    fn data_buffer_swap_keeps_translations() {
        let mut config = config(&[1, 2]);
        config.hot_threshold = 1;
        let mut drc = Drc::new(Accumulator, config).unwrap();
        drc.step(&mut Acc::default()).unwrap();

        drc.set_region_buffer(AccessKind::Read32, 0, bank(&[3])).unwrap();
        assert_eq!(drc.block_state(0), BlockState::Native);
        assert_eq!(drc.stats().invalidated_blocks, 0);
    }

    #[test]
    fn evicted_descriptors_get_reclaimed() {
        let mut config = config(&[4, 2]);
        config.interpret_only = true;
        let mut drc = Drc::new(Accumulator, config).unwrap();
        let mut state = Acc::default();

        for _ in 0..3000 {
            drc.step(&mut state).unwrap();
        }
        assert_eq!(drc.stats().invalidated_blocks, 3000);
        assert_eq!(drc.stats().flushes, 2);
        assert_eq!(drc.store.len(), 3000 - 2 * EVICTED_LIMIT);
        assert!(drc.store.len() < EVICTED_LIMIT);
        assert_eq!(state.pc, 0);
    }

    #[test]
    fn halt_stops_run() {
        let mut drc = Drc::new(Accumulator, config(&[1, 3])).unwrap();
        let mut state = Acc::default();
        assert_eq!(drc.run(&mut state, 10).unwrap(), RunExit::Stopped);
        assert_eq!(state.regs[0], 1);
        assert_eq!(drc.stats().blocks_discovered, 1);
    }

    #[test]
    fn budget_runs_out() {
        let mut drc = Drc::new(Accumulator, config(&[1, 2])).unwrap();
        let mut state = Acc::default();
        assert_eq!(drc.run(&mut state, 10).unwrap(), RunExit::BudgetExhausted);
        assert_eq!(state.regs[0], 10);
    }

    #[test]
    fn undecodable_entry_is_fatal() {
        let mut drc = Drc::new(Accumulator, config(&[0])).unwrap();
        let err = drc.step(&mut Acc::default()).unwrap_err();
        assert!(matches!(err, DrcError::Runtime(msg) if msg.contains("undecodable")));
    }

    #[test]
    fn blocks_stop_before_undecodable_words() {
        let mut drc = Drc::new(Accumulator, config(&[1, 1, 0])).unwrap();
        let mut state = Acc::default();
        drc.step(&mut state).unwrap();
        assert_eq!(drc.block(0).unwrap().instructions, 2);
        assert_eq!(state.pc, 8);
        assert!(drc.step(&mut state).is_err());
    }

    struct Counting {
        frees: Cell<usize>,
    }

    impl HostServices for Counting {
        fn free(&self, _buf: Box<[u8]>) {
            self.frees.set(self.frees.get() + 1);
        }
    }

    #[test]
    fn teardown_frees_both_arenas() {
        let services = Rc::new(Counting { frees: Cell::new(0) });
        let mut config = config(&[1, 2]);
        config.services = services.clone();
        drop(Drc::new(Accumulator, config).unwrap());
        assert_eq!(services.frees.get(), 2);

        let mut config = self::config(&[1, 2]);
        config.services = services.clone();
        config.interpret_only = true;
        let drc = Drc::new(Accumulator, config).unwrap();
        assert!(drc.cache().is_none());
        drop(drc);
        assert_eq!(services.frees.get(), 2);
    }

    #[test]
    fn invalid_config_is_caught_up_front() {
        let mut config = config(&[1]);
        config.hot_threshold = 0;
        assert!(matches!(Drc::new(Accumulator, config), Err(DrcError::InvalidConfig(_))));
        assert!(matches!(Drc::new(Accumulator, DrcConfig::default()), Err(DrcError::InvalidConfig(_))));
    }

    /// More registers than the IR can name
    struct Wide;

    impl SourceCpu for Wide {
        type State = Acc;
        const REGISTER_COUNT: usize = 129;

        fn name(&self) -> &'static str {
            "wide"
        }

        fn decode(&self, _pc: u32, _word: u32) -> Option<Decoded> {
            None
        }

        fn interpret(&self, _state: &mut Acc, _bus: &mut Bus<'_>, _word: u32) -> Result<(), DrcError> {
            Ok(())
        }

        fn translate(&self, _pc: u32, _word: u32, _ir: &mut IrBuilder) -> Result<(), Unsupported> {
            Ok(())
        }
    }

    #[test]
    fn register_count_must_fit_the_ir() {
        let services = Rc::new(Counting { frees: Cell::new(0) });
        let mut config = config(&[1]);
        config.services = services.clone();
        let err = Drc::new(Wide, config).err().unwrap();
        assert!(matches!(err, DrcError::InvalidConfig(msg) if msg.contains("129 registers")));
        assert_eq!(services.frees.get(), 0);
    }
}
