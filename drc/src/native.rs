//! Native code generation.
//!
//! The host backend emits threaded code: a flat sequence of [`Record`]s that a tight dispatch
//! loop walks without going back through the IR. Compiling from IR does block-local constant
//! propagation, which is what lets memory accesses with a known address bind directly to the
//! buffer backing them.

use crate::arch::{GuestState, SourceCpu};
use crate::bus::{buffer_fault, Bus};
use crate::cache::InlinePool;
use crate::ir::{AluOp, Cond, IrOp, Record, Reg, Width, TEMP_COUNT};
use crate::region::{AccessKind, Endian, MemoryMap, RegionTarget};
use crate::DrcError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NativeOp {
    Imm { dst: Reg, value: u32 },
    Mov { dst: Reg, src: Reg },
    Alu { op: AluOp, dst: Reg, a: Reg, b: Reg },
    AluImm { op: AluOp, dst: Reg, a: Reg, imm: u32 },
    /// Load from an inlined buffer, `addr` is only kept for error reporting
    LoadDirect { mem: MemFlags, dst: Reg, slot: u32, offset: u32, addr: u32 },
    /// Load from a constant address through the memory map
    LoadAbs { mem: MemFlags, dst: Reg, addr: u32 },
    Load { mem: MemFlags, dst: Reg, base: Reg, offset: i32 },
    StoreDirect { mem: MemFlags, src: Reg, slot: u32, offset: u32, addr: u32 },
    StoreAbs { mem: MemFlags, src: Reg, addr: u32 },
    Store { mem: MemFlags, src: Reg, base: Reg, offset: i32 },
    Branch { cond: Cond, a: Reg, b: Reg, target: u32 },
    Jump { target: u32 },
    JumpReg { reg: Reg },
    Interp { pc: u32, word: u32, len: u8 },
    Exit { next_pc: u32 },
}

/// Width, signedness and (for inlined accesses) buffer layout of a memory op
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemFlags {
    pub width: Width,
    pub signed: bool,
    pub endian: Endian,
}

impl MemFlags {
    fn new(width: Width, signed: bool) -> MemFlags {
        MemFlags { width, signed, endian: Endian::Big }
    }

    fn encode(self) -> u8 {
        self.width.encode() | (self.signed as u8) << 4 | ((self.endian == Endian::Little) as u8) << 5
    }

    fn decode(raw: u8) -> Option<MemFlags> {
        Some(MemFlags {
            width: Width::decode(raw & 0xf)?,
            signed: raw & 0x10 != 0,
            endian: if raw & 0x20 != 0 { Endian::Little } else { Endian::Big },
        })
    }

    fn read_kind(self) -> AccessKind {
        AccessKind::read(self.width.bytes())
    }

    fn write_kind(self) -> AccessKind {
        AccessKind::write(self.width.bytes())
    }
}

impl NativeOp {
    fn to_record(self) -> Record {
        let r = Record::new();
        match self {
            NativeOp::Imm { dst, value } => r.with_op(0).with_a(dst.encode()).with_x(value),
            NativeOp::Mov { dst, src } => r.with_op(1).with_a(dst.encode()).with_b(src.encode()),
            NativeOp::Alu { op, dst, a, b } => {
                r.with_op(2).with_a(dst.encode()).with_b(a.encode()).with_c(b.encode()).with_x(op as u32)
            }
            NativeOp::AluImm { op, dst, a, imm } => {
                r.with_op(3).with_a(dst.encode()).with_b(a.encode()).with_x(op as u32).with_y(imm)
            }
            NativeOp::LoadDirect { mem, dst, slot, offset, addr } => r
                .with_op(4)
                .with_a(dst.encode())
                .with_c(mem.encode())
                .with_x(slot)
                .with_y(offset)
                .with_z(addr),
            NativeOp::LoadAbs { mem, dst, addr } => r.with_op(5).with_a(dst.encode()).with_c(mem.encode()).with_x(addr),
            NativeOp::Load { mem, dst, base, offset } => r
                .with_op(6)
                .with_a(dst.encode())
                .with_b(base.encode())
                .with_c(mem.encode())
                .with_y(offset as u32),
            NativeOp::StoreDirect { mem, src, slot, offset, addr } => r
                .with_op(7)
                .with_a(src.encode())
                .with_c(mem.encode())
                .with_x(slot)
                .with_y(offset)
                .with_z(addr),
            NativeOp::StoreAbs { mem, src, addr } => r.with_op(8).with_a(src.encode()).with_c(mem.encode()).with_x(addr),
            NativeOp::Store { mem, src, base, offset } => r
                .with_op(9)
                .with_a(src.encode())
                .with_b(base.encode())
                .with_c(mem.encode())
                .with_y(offset as u32),
            NativeOp::Branch { cond, a, b, target } => {
                r.with_op(10).with_a(a.encode()).with_b(b.encode()).with_c(cond as u8).with_x(target)
            }
            NativeOp::Jump { target } => r.with_op(11).with_x(target),
            NativeOp::JumpReg { reg } => r.with_op(12).with_a(reg.encode()),
            NativeOp::Interp { pc, word, len } => r.with_op(13).with_c(len).with_x(pc).with_y(word),
            NativeOp::Exit { next_pc } => r.with_op(14).with_x(next_pc),
        }
    }

    #[inline(always)]
    fn from_record(r: Record) -> Option<NativeOp> {
        let (a, b) = (Reg::decode(r.a()), Reg::decode(r.b()));
        let op = match r.op() {
            0 => NativeOp::Imm { dst: a, value: r.x() },
            1 => NativeOp::Mov { dst: a, src: b },
            2 => NativeOp::Alu { op: AluOp::from_u32(r.x())?, dst: a, a: b, b: Reg::decode(r.c()) },
            3 => NativeOp::AluImm { op: AluOp::from_u32(r.x())?, dst: a, a: b, imm: r.y() },
            4 => NativeOp::LoadDirect { mem: MemFlags::decode(r.c())?, dst: a, slot: r.x(), offset: r.y(), addr: r.z() },
            5 => NativeOp::LoadAbs { mem: MemFlags::decode(r.c())?, dst: a, addr: r.x() },
            6 => NativeOp::Load { mem: MemFlags::decode(r.c())?, dst: a, base: b, offset: r.y() as i32 },
            7 => NativeOp::StoreDirect { mem: MemFlags::decode(r.c())?, src: a, slot: r.x(), offset: r.y(), addr: r.z() },
            8 => NativeOp::StoreAbs { mem: MemFlags::decode(r.c())?, src: a, addr: r.x() },
            9 => NativeOp::Store { mem: MemFlags::decode(r.c())?, src: a, base: b, offset: r.y() as i32 },
            10 => NativeOp::Branch { cond: Cond::from_u8(r.c())?, a, b, target: r.x() },
            11 => NativeOp::Jump { target: r.x() },
            12 => NativeOp::JumpReg { reg: a },
            13 => NativeOp::Interp { pc: r.x(), word: r.y(), len: r.c() },
            14 => NativeOp::Exit { next_pc: r.x() },
            _ => return None,
        };
        Some(op)
    }
}

/// Register values known at compile time
struct Known([Option<u32>; 256]);

impl Known {
    fn get(&self, reg: Reg) -> Option<u32> {
        self.0[reg.encode() as usize]
    }

    fn set(&mut self, reg: Reg, value: Option<u32>) {
        self.0[reg.encode() as usize] = value;
    }

    fn forget(&mut self) {
        self.0 = [None; 256];
    }
}

enum Binding {
    /// Inline against the buffer in this pool slot
    Direct { slot: u32, offset: u32, endian: Endian },
    /// Go through the memory map, at runtime
    Dispatch,
}

/// Decides how an access of `kind` at a constant `addr` gets emitted
fn bind(map: &MemoryMap, pool: &mut InlinePool, kind: AccessKind, addr: u32) -> Binding {
    let Some((_, region)) = map.resolve(kind, addr) else {
        // Faults at runtime, if that code path is ever taken
        return Binding::Dispatch;
    };
    let RegionTarget::Direct { buffer, volatile: false, endian } = &region.target else {
        return Binding::Dispatch;
    };
    let width = kind.width();
    let offset = (addr - region.start) as usize;
    let fits_region = addr as u64 + width as u64 - 1 <= region.end as u64;
    let fits_buffer = offset + width <= buffer.borrow().len();
    if !fits_region || !fits_buffer {
        return Binding::Dispatch;
    }
    Binding::Direct {
        slot: pool.intern(buffer),
        offset: offset as u32,
        endian: *endian,
    }
}

/// Compiles a block's IR, one native op per IR op
pub fn compile(ir: &[IrOp], map: &MemoryMap, pool: &mut InlinePool) -> Vec<NativeOp> {
    let mut known = Known([None; 256]);
    let mut out = Vec::with_capacity(ir.len());

    for op in ir {
        let native = match *op {
            IrOp::Imm { dst, value } => {
                known.set(dst, Some(value));
                NativeOp::Imm { dst, value }
            }
            IrOp::Mov { dst, src } => match known.get(src) {
                Some(value) => {
                    known.set(dst, Some(value));
                    NativeOp::Imm { dst, value }
                }
                None => {
                    known.set(dst, None);
                    NativeOp::Mov { dst, src }
                }
            },
            IrOp::Alu { op, dst, a, b } => match (known.get(a), known.get(b)) {
                (Some(a), Some(b)) => {
                    let value = op.eval(a, b);
                    known.set(dst, Some(value));
                    NativeOp::Imm { dst, value }
                }
                _ => {
                    known.set(dst, None);
                    NativeOp::Alu { op, dst, a, b }
                }
            },
            IrOp::AluImm { op, dst, a, imm } => match known.get(a) {
                Some(a) => {
                    let value = op.eval(a, imm);
                    known.set(dst, Some(value));
                    NativeOp::Imm { dst, value }
                }
                None => {
                    known.set(dst, None);
                    NativeOp::AluImm { op, dst, a, imm }
                }
            },
            IrOp::Load { width, signed, dst, base, offset } => {
                let mem = MemFlags::new(width, signed);
                let native = match known.get(base) {
                    Some(base) => {
                        let addr = base.wrapping_add(offset as u32);
                        match bind(map, pool, mem.read_kind(), addr) {
                            Binding::Direct { slot, offset, endian } => {
                                NativeOp::LoadDirect { mem: MemFlags { endian, ..mem }, dst, slot, offset, addr }
                            }
                            Binding::Dispatch => NativeOp::LoadAbs { mem, dst, addr },
                        }
                    }
                    None => NativeOp::Load { mem, dst, base, offset },
                };
                known.set(dst, None);
                native
            }
            IrOp::Store { width, src, base, offset } => {
                let mem = MemFlags::new(width, false);
                match known.get(base) {
                    Some(base) => {
                        let addr = base.wrapping_add(offset as u32);
                        match bind(map, pool, mem.write_kind(), addr) {
                            Binding::Direct { slot, offset, endian } => {
                                NativeOp::StoreDirect { mem: MemFlags { endian, ..mem }, src, slot, offset, addr }
                            }
                            Binding::Dispatch => NativeOp::StoreAbs { mem, src, addr },
                        }
                    }
                    None => NativeOp::Store { mem, src, base, offset },
                }
            }
            IrOp::Branch { cond, a, b, target } => NativeOp::Branch { cond, a, b, target },
            IrOp::Jump { target } => NativeOp::Jump { target },
            IrOp::JumpReg { reg } => NativeOp::JumpReg { reg },
            IrOp::Interp { pc, word, len } => {
                // The interpreter can change any register
                known.forget();
                NativeOp::Interp { pc, word, len }
            }
            IrOp::Exit { next_pc } => NativeOp::Exit { next_pc },
        };
        out.push(native);
    }
    out
}

pub fn encode(code: &[NativeOp]) -> Vec<u8> {
    code.iter().flat_map(|op| op.to_record().into_bytes()).collect()
}

pub fn decode(bytes: &[u8]) -> Result<Vec<NativeOp>, DrcError> {
    let records = Record::read_all(bytes).ok_or_else(|| DrcError::Runtime("torn native record".into()))?;
    records
        .map(|r| NativeOp::from_record(r).ok_or_else(|| DrcError::Runtime(format!("bad native record {:?}", r))))
        .collect()
}

#[inline(always)]
fn get(regs: &[u32], temps: &[u32], reg: Reg) -> u32 {
    match reg {
        Reg::Guest(n) => regs[n as usize],
        Reg::Temp(n) => temps[n as usize],
    }
}

#[inline(always)]
fn set(regs: &mut [u32], temps: &mut [u32], reg: Reg, value: u32) {
    match reg {
        Reg::Guest(n) => regs[n as usize] = value,
        Reg::Temp(n) => temps[n as usize] = value,
    }
}

/// Runs translated code until it leaves the block. The guest PC is up to date on return.
pub fn execute<A: SourceCpu>(
    arch: &A,
    code: &[u8],
    state: &mut A::State,
    bus: &mut Bus<'_>,
    pool: &InlinePool,
) -> Result<(), DrcError> {
    let records = Record::read_all(code).ok_or_else(|| DrcError::Runtime("torn native record".into()))?;
    let mut temps = [0u32; TEMP_COUNT as usize];

    for record in records {
        let op = NativeOp::from_record(record)
            .ok_or_else(|| DrcError::Runtime(format!("bad native record {:?}", record)))?;
        match op {
            NativeOp::Imm { dst, value } => set(state.regs_mut(), &mut temps, dst, value),
            NativeOp::Mov { dst, src } => {
                let value = get(state.regs(), &temps, src);
                set(state.regs_mut(), &mut temps, dst, value);
            }
            NativeOp::Alu { op, dst, a, b } => {
                let value = op.eval(get(state.regs(), &temps, a), get(state.regs(), &temps, b));
                set(state.regs_mut(), &mut temps, dst, value);
            }
            NativeOp::AluImm { op, dst, a, imm } => {
                let value = op.eval(get(state.regs(), &temps, a), imm);
                set(state.regs_mut(), &mut temps, dst, value);
            }
            NativeOp::LoadDirect { mem, dst, slot, offset, addr } => {
                let buffer = pool.get(slot).ok_or_else(|| stale_slot(slot))?;
                let value = mem
                    .endian
                    .read(&buffer.borrow(), offset as usize, mem.width.bytes())
                    .ok_or_else(|| buffer_fault(mem.read_kind(), addr))?;
                set(state.regs_mut(), &mut temps, dst, mem.width.extend(value, mem.signed));
            }
            NativeOp::LoadAbs { mem, dst, addr } => {
                let value = bus.read(mem.read_kind(), addr)?;
                set(state.regs_mut(), &mut temps, dst, mem.width.extend(value, mem.signed));
            }
            NativeOp::Load { mem, dst, base, offset } => {
                let addr = get(state.regs(), &temps, base).wrapping_add(offset as u32);
                let value = bus.read(mem.read_kind(), addr)?;
                set(state.regs_mut(), &mut temps, dst, mem.width.extend(value, mem.signed));
            }
            NativeOp::StoreDirect { mem, src, slot, offset, addr } => {
                let buffer = pool.get(slot).ok_or_else(|| stale_slot(slot))?;
                let value = get(state.regs(), &temps, src);
                mem.endian
                    .write(&mut buffer.borrow_mut(), offset as usize, mem.width.bytes(), value)
                    .ok_or_else(|| buffer_fault(mem.write_kind(), addr))?;
                bus.note_write(addr, mem.width.bytes() as u32);
            }
            NativeOp::StoreAbs { mem, src, addr } => {
                bus.write(mem.write_kind(), addr, get(state.regs(), &temps, src))?;
            }
            NativeOp::Store { mem, src, base, offset } => {
                let addr = get(state.regs(), &temps, base).wrapping_add(offset as u32);
                bus.write(mem.write_kind(), addr, get(state.regs(), &temps, src))?;
            }
            NativeOp::Branch { cond, a, b, target } => {
                if cond.eval(get(state.regs(), &temps, a), get(state.regs(), &temps, b)) {
                    state.set_pc(target);
                    return Ok(());
                }
            }
            NativeOp::Jump { target } => {
                state.set_pc(target);
                return Ok(());
            }
            NativeOp::JumpReg { reg } => {
                let target = get(state.regs(), &temps, reg);
                state.set_pc(target);
                return Ok(());
            }
            NativeOp::Interp { pc, word, len } => {
                state.set_pc(pc);
                arch.interpret(state, bus, word)?;
                if state.pc() != pc.wrapping_add(len as u32) || state.stopped() {
                    return Ok(());
                }
            }
            NativeOp::Exit { next_pc } => {
                state.set_pc(next_pc);
                return Ok(());
            }
        }
    }
    Err(DrcError::Runtime("native code ran past the end of its block".into()))
}

fn stale_slot(slot: u32) -> DrcError {
    DrcError::Runtime(format!("native code refers to inline slot {} which no longer exists", slot))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::arch::{Decoded, Unsupported};
    use crate::bus::CodePages;
    use crate::ir::{IrBuilder, Reg::*};
    use crate::region::shared_buffer;

    #[derive(Default)]
    struct Tiny {
        regs: [u32; 4],
        pc: u32,
    }

    impl GuestState for Tiny {
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
    }

    /// Every instruction increments r3, word 0xffff_ffff jumps to 0
    struct Counter;

    impl SourceCpu for Counter {
        type State = Tiny;
        const REGISTER_COUNT: usize = 4;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn decode(&self, _pc: u32, _word: u32) -> Option<Decoded> {
            None
        }

        fn interpret(&self, state: &mut Tiny, _bus: &mut Bus<'_>, word: u32) -> Result<(), DrcError> {
            state.regs[3] += 1;
            state.pc = if word == 0xffff_ffff { 0 } else { state.pc + 4 };
            Ok(())
        }

        fn translate(&self, _pc: u32, _word: u32, _ir: &mut IrBuilder) -> Result<(), Unsupported> {
            Err(Unsupported("never".into()))
        }
    }

    fn memory() -> (MemoryMap, crate::region::SharedBuffer, crate::region::SharedBuffer) {
        let ram = shared_buffer(0x1000);
        let io = shared_buffer(0x100);
        let mut map = MemoryMap::new();
        map.map_buffer(0x0000, 0x0fff, ram.clone(), Endian::Big, false)
            .map_buffer(0x2000, 0x20ff, io.clone(), Endian::Little, true)
            .map_handlers(0x3000, 0x30ff, |addr| addr, |_, _| {});
        (map, ram, io)
    }

    fn compiled(ir: &IrBuilder, map: &MemoryMap, pool: &mut InlinePool) -> Vec<NativeOp> {
        compile(ir.ops(), map, pool)
    }

    #[test]
    fn constant_addresses_bind_by_region_kind() {
        let (map, ram, _) = memory();
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.imm(Temp(0), 0x0100)
            .load(Width::Word, false, Guest(1), Temp(0), 4)
            .imm(Temp(1), 0x2000)
            .load(Width::Byte, true, Guest(1), Temp(1), 1)
            .imm(Temp(2), 0x3000)
            .store(Width::Half, Guest(1), Temp(2), 0)
            .load(Width::Word, false, Guest(2), Guest(3), 0)
            .exit(0x40);
        let code = compiled(&ir, &map, &mut pool);

        let word = MemFlags::new(Width::Word, false);
        assert_eq!(code[1], NativeOp::LoadDirect { mem: word, dst: Guest(1), slot: 0, offset: 0x104, addr: 0x104 });
        assert_eq!(code[3], NativeOp::LoadAbs { mem: MemFlags::new(Width::Byte, true), dst: Guest(1), addr: 0x2001 });
        assert_eq!(code[5], NativeOp::StoreAbs { mem: MemFlags::new(Width::Half, false), src: Guest(1), addr: 0x3000 });
        assert_eq!(code[6], NativeOp::Load { mem: word, dst: Guest(2), base: Guest(3), offset: 0 });
        assert_eq!(code.len(), ir.len());
        assert_eq!(pool.len(), 1);
        assert!(Rc::ptr_eq(pool.get(0).unwrap(), &ram));
    }

    #[test]
    fn folding_and_interpreter_calls() {
        let (map, _, _) = memory();
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.imm(Guest(1), 6)
            .alu_imm(AluOp::Shl, Guest(1), Guest(1), 4)
            .mov(Guest(2), Guest(1))
            .alu(AluOp::Add, Guest(2), Guest(2), Guest(1))
            .interpret(0x10, 0, 4)
            .alu_imm(AluOp::Add, Guest(2), Guest(2), 1)
            .exit(0x14);
        let code = compiled(&ir, &map, &mut pool);
        assert_eq!(code[1], NativeOp::Imm { dst: Guest(1), value: 0x60 });
        assert_eq!(code[2], NativeOp::Imm { dst: Guest(2), value: 0x60 });
        assert_eq!(code[3], NativeOp::Imm { dst: Guest(2), value: 0xc0 });
        // Nothing is known after the interpreter ran
        assert_eq!(code[5], NativeOp::AluImm { op: AluOp::Add, dst: Guest(2), a: Guest(2), imm: 1 });
    }

    #[test]
    fn straddling_constant_access_is_not_inlined() {
        let (map, _, _) = memory();
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.imm(Temp(0), 0x0ffe).load(Width::Word, false, Guest(1), Temp(0), 0).exit(0);
        let code = compiled(&ir, &map, &mut pool);
        assert!(matches!(code[1], NativeOp::LoadAbs { addr: 0x0ffe, .. }));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn execution() {
        let (map, ram, io) = memory();
        ram.borrow_mut()[0x104..0x108].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        io.borrow_mut()[0..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.imm(Temp(0), 0x0100)
            .load(Width::Half, true, Guest(1), Temp(0), 4)
            .imm(Temp(1), 0x2000)
            .load(Width::Byte, false, Guest(2), Temp(1), 0)
            .store(Width::Word, Guest(2), Temp(0), 0)
            .interpret(0x20, 0, 4)
            .branch(Cond::Lt, Guest(1), Guest(0), 0x80)
            .exit(0x24);
        let bytes = encode(&compiled(&ir, &map, &mut pool));

        let mut pages = CodePages::new();
        pages.mark(0x100, 0x100);
        let mut state = Tiny::default();
        {
            let mut bus = Bus::new(&map, &mut pages);
            execute(&Counter, &bytes, &mut state, &mut bus, &pool).unwrap();
        }
        assert_eq!(state.regs[1], 0xffff_dead);
        assert_eq!(state.regs[2], 0x44);
        assert_eq!(state.regs[3], 1);
        assert_eq!(state.pc, 0x80);
        assert_eq!(ram.borrow()[0x100..0x104], [0, 0, 0, 0x44]);
        assert_eq!(pages.take_pending(), vec![(0x100, 4)]);
    }

    #[test]
    fn interpreter_call_that_jumps_leaves_the_block() {
        let (map, _, _) = memory();
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.interpret(0x40, 0xffff_ffff, 4).imm(Guest(1), 1).exit(0x44);
        let bytes = encode(&compiled(&ir, &map, &mut pool));
        assert_eq!(decode(&bytes).unwrap().len(), 3);

        let mut pages = CodePages::new();
        let mut bus = Bus::new(&map, &mut pages);
        let mut state = Tiny::default();
        execute(&Counter, &bytes, &mut state, &mut bus, &pool).unwrap();
        assert_eq!(state.pc, 0);
        assert_eq!(state.regs[1], 0);
    }

    #[test]
    fn running_off_the_end_is_a_fault() {
        let (map, _, _) = memory();
        let mut pool = InlinePool::default();
        let mut ir = IrBuilder::new(4);
        ir.imm(Guest(1), 1);
        let bytes = encode(&compiled(&ir, &map, &mut pool));
        let mut pages = CodePages::new();
        let mut bus = Bus::new(&map, &mut pages);
        let err = execute(&Counter, &bytes, &mut Tiny::default(), &mut bus, &pool).unwrap_err();
        assert!(matches!(err, DrcError::Runtime(_)));
    }
}
