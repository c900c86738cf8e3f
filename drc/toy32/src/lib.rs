//! Toy32, a small 32-bit load/store CPU used to drive the recompiler.
//!
//! The encoding borrows the MIPS I formats (I, J and R type words, `r0` hardwired to zero) but
//! has no delay slots, no coprocessors and no exceptions. `halt` stops the CPU, `mul` has no
//! translation and always goes through the interpreter, `divu` can't be translated at all.

use drc::ir::{AluOp, Cond, IrBuilder, Reg, Width};
use drc::{Bus, Decoded, DrcError, GuestState, SourceCpu, Unsupported};

pub mod asm;
pub mod instructions;
mod machine;

use instructions::{branch_target, decode, jump_target, sign_imm, zero_imm, IType, Op, RType};
pub use machine::{program, Machine, Toy32Core, CONSOLE, ORIGIN, PROGRAMS, RAM_END};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Toy32State {
    pub regs: [u32; 32],
    pub pc: u32,
    pub halted: bool,
}

impl Toy32State {
    pub fn new(pc: u32) -> Toy32State {
        Toy32State { pc, ..Default::default() }
    }

    #[inline(always)]
    fn set(&mut self, reg: u8, value: u32) {
        if reg != 0 {
            self.regs[reg as usize] = value;
        }
    }
}

impl GuestState for Toy32State {
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

#[derive(Copy, Clone, Debug, Default)]
pub struct Toy32;

impl SourceCpu for Toy32 {
    type State = Toy32State;

    const REGISTER_COUNT: usize = 32;
    // Every instruction becomes at most one op
    const MAX_IR_PER_INSTRUCTION: usize = 1;

    fn name(&self) -> &'static str {
        "toy32"
    }

    fn decode(&self, _pc: u32, word: u32) -> Option<Decoded> {
        decode(word).map(|info| Decoded { len: 4, flow: info.form.flow() })
    }

    fn interpret(&self, state: &mut Toy32State, bus: &mut Bus<'_>, word: u32) -> Result<(), DrcError> {
        let info = decode(word)
            .ok_or_else(|| DrcError::Runtime(format!("toy32: reserved instruction {:#010x} at {:#010x}", word, state.pc)))?;
        let i = IType::from(word);
        let r = RType::from(word);
        let rs = state.regs[i.rs() as usize];
        let rt = state.regs[i.rt() as usize];
        let pc = state.pc;
        let mut next = pc.wrapping_add(4);
        let addr = rs.wrapping_add(sign_imm(word));

        match info.op {
            Op::Add => state.set(r.rd(), rs.wrapping_add(rt)),
            Op::Sub => state.set(r.rd(), rs.wrapping_sub(rt)),
            Op::And => state.set(r.rd(), rs & rt),
            Op::Or => state.set(r.rd(), rs | rt),
            Op::Xor => state.set(r.rd(), rs ^ rt),
            Op::Slt => state.set(r.rd(), ((rs as i32) < (rt as i32)) as u32),
            Op::Sltu => state.set(r.rd(), (rs < rt) as u32),
            Op::Sll => state.set(r.rd(), rt << r.sa()),
            Op::Srl => state.set(r.rd(), rt >> r.sa()),
            Op::Sra => state.set(r.rd(), ((rt as i32) >> r.sa()) as u32),
            Op::Mul => state.set(r.rd(), rs.wrapping_mul(rt)),
            Op::Divu => state.set(r.rd(), rs.checked_div(rt).unwrap_or(u32::MAX)),
            Op::Halt => state.halted = true,
            Op::J => next = jump_target(pc, word),
            Op::Jr => next = rs,
            Op::Beq => {
                if rs == rt {
                    next = branch_target(pc, word)
                }
            }
            Op::Bne => {
                if rs != rt {
                    next = branch_target(pc, word)
                }
            }
            Op::Addiu => state.set(i.rt(), rs.wrapping_add(sign_imm(word))),
            Op::Slti => state.set(i.rt(), ((rs as i32) < (sign_imm(word) as i32)) as u32),
            Op::Sltiu => state.set(i.rt(), (rs < sign_imm(word)) as u32),
            Op::Andi => state.set(i.rt(), rs & zero_imm(word)),
            Op::Ori => state.set(i.rt(), rs | zero_imm(word)),
            Op::Xori => state.set(i.rt(), rs ^ zero_imm(word)),
            Op::Lui => state.set(i.rt(), zero_imm(word) << 16),
            Op::Lb => {
                let value = bus.read8(addr)? as i8 as i32 as u32;
                state.set(i.rt(), value)
            }
            Op::Lh => {
                let value = bus.read16(addr)? as i16 as i32 as u32;
                state.set(i.rt(), value)
            }
            Op::Lw => {
                let value = bus.read32(addr)?;
                state.set(i.rt(), value)
            }
            Op::Lbu => {
                let value = bus.read8(addr)? as u32;
                state.set(i.rt(), value)
            }
            Op::Lhu => {
                let value = bus.read16(addr)? as u32;
                state.set(i.rt(), value)
            }
            Op::Sb => bus.write8(addr, rt as u8)?,
            Op::Sh => bus.write16(addr, rt as u16)?,
            Op::Sw => bus.write32(addr, rt)?,
        }
        state.pc = next;
        Ok(())
    }

    fn translate(&self, pc: u32, word: u32, ir: &mut IrBuilder) -> Result<(), Unsupported> {
        let info = decode(word).ok_or_else(|| Unsupported(format!("reserved instruction {:#010x}", word)))?;
        let i = IType::from(word);
        let r = RType::from(word);
        let (rs, rt, rd) = (Reg::Guest(i.rs()), Reg::Guest(i.rt()), Reg::Guest(r.rd()));
        let offset = sign_imm(word) as i32;

        // Writes to r0 are dropped, loads still happen for their side effects
        let rd_zero = r.rd() == 0;
        let rt_zero = i.rt() == 0;
        let load_dst = if rt_zero { Reg::Temp(0) } else { rt };

        match info.op {
            Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor | Op::Slt | Op::Sltu if !rd_zero => {
                let op = match info.op {
                    Op::Add => AluOp::Add,
                    Op::Sub => AluOp::Sub,
                    Op::And => AluOp::And,
                    Op::Or => AluOp::Or,
                    Op::Xor => AluOp::Xor,
                    Op::Slt => AluOp::Slt,
                    _ => AluOp::Sltu,
                };
                ir.alu(op, rd, rs, rt);
            }
            Op::Sll | Op::Srl | Op::Sra if !rd_zero => {
                let op = match info.op {
                    Op::Sll => AluOp::Shl,
                    Op::Srl => AluOp::Shr,
                    _ => AluOp::Sar,
                };
                ir.alu_imm(op, rd, rt, r.sa() as u32);
            }
            Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor | Op::Slt | Op::Sltu => {}
            Op::Sll | Op::Srl | Op::Sra => {}

            Op::Mul | Op::Halt => {
                ir.interpret(pc, word, 4);
            }
            Op::Divu => return Err(Unsupported(format!("divu at {:#010x} has no translation", pc))),

            Op::J => {
                ir.jump(jump_target(pc, word));
            }
            Op::Jr => {
                ir.jump_reg(rs);
            }
            Op::Beq => {
                ir.branch(Cond::Eq, rs, rt, branch_target(pc, word));
            }
            Op::Bne => {
                ir.branch(Cond::Ne, rs, rt, branch_target(pc, word));
            }

            _ if rt_zero && matches!(info.op, Op::Addiu | Op::Slti | Op::Sltiu | Op::Andi | Op::Ori | Op::Xori | Op::Lui) => {}
            Op::Addiu => {
                ir.alu_imm(AluOp::Add, rt, rs, sign_imm(word));
            }
            Op::Slti => {
                ir.alu_imm(AluOp::Slt, rt, rs, sign_imm(word));
            }
            Op::Sltiu => {
                ir.alu_imm(AluOp::Sltu, rt, rs, sign_imm(word));
            }
            Op::Andi => {
                ir.alu_imm(AluOp::And, rt, rs, zero_imm(word));
            }
            Op::Ori => {
                ir.alu_imm(AluOp::Or, rt, rs, zero_imm(word));
            }
            Op::Xori => {
                ir.alu_imm(AluOp::Xor, rt, rs, zero_imm(word));
            }
            Op::Lui => {
                ir.imm(rt, zero_imm(word) << 16);
            }

            Op::Lb => {
                ir.load(Width::Byte, true, load_dst, rs, offset);
            }
            Op::Lh => {
                ir.load(Width::Half, true, load_dst, rs, offset);
            }
            Op::Lw => {
                ir.load(Width::Word, false, load_dst, rs, offset);
            }
            Op::Lbu => {
                ir.load(Width::Byte, false, load_dst, rs, offset);
            }
            Op::Lhu => {
                ir.load(Width::Half, false, load_dst, rs, offset);
            }
            Op::Sb => {
                ir.store(Width::Byte, rt, rs, offset);
            }
            Op::Sh => {
                ir.store(Width::Half, rt, rs, offset);
            }
            Op::Sw => {
                ir.store(Width::Word, rt, rs, offset);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use drc::ir::IrOp;

    use super::asm::Assembler;
    use super::*;

    fn translate(word: u32) -> Result<Vec<IrOp>, Unsupported> {
        let mut ir = IrBuilder::new(Toy32::REGISTER_COUNT);
        Toy32.translate(0x100, word, &mut ir)?;
        Ok(ir.ops().to_vec())
    }

    fn one(build: impl FnOnce(&mut Assembler)) -> u32 {
        let mut asm = Assembler::new(0);
        build(&mut asm);
        asm.finish().unwrap()[0]
    }

    #[test]
    fn writes_to_r0_vanish() {
        assert_eq!(translate(one(|a| { a.addiu(0, 1, 5); })).unwrap(), []);
        assert_eq!(translate(one(|a| { a.add(0, 1, 2); })).unwrap(), []);
        assert_eq!(
            translate(one(|a| { a.lw(0, 1, 8); })).unwrap(),
            [IrOp::Load { width: Width::Word, signed: false, dst: Reg::Temp(0), base: Reg::Guest(1), offset: 8 }]
        );
    }

    #[test]
    fn immediates_extend_per_instruction() {
        assert_eq!(
            translate(one(|a| { a.addiu(2, 1, -1); })).unwrap(),
            [IrOp::AluImm { op: AluOp::Add, dst: Reg::Guest(2), a: Reg::Guest(1), imm: 0xffff_ffff }]
        );
        assert_eq!(
            translate(one(|a| { a.ori(2, 1, 0xffff); })).unwrap(),
            [IrOp::AluImm { op: AluOp::Or, dst: Reg::Guest(2), a: Reg::Guest(1), imm: 0xffff }]
        );
        assert_eq!(
            translate(one(|a| { a.lui(3, 0x1234); })).unwrap(),
            [IrOp::Imm { dst: Reg::Guest(3), value: 0x1234_0000 }]
        );
    }

    #[test]
    fn branches_target_the_next_instruction_plus_offset() {
        // At 0x100, +2 instructions past the one after the branch
        let word = one(|a| {
            a.beq_offset(1, 2, 2);
        });
        assert_eq!(
            translate(word).unwrap(),
            [IrOp::Branch { cond: Cond::Eq, a: Reg::Guest(1), b: Reg::Guest(2), target: 0x10c }]
        );
    }

    #[test]
    fn mul_and_divu() {
        let mul = one(|a| {
            a.mul(3, 1, 2);
        });
        assert_eq!(translate(mul).unwrap(), [IrOp::Interp { pc: 0x100, word: mul, len: 4 }]);
        assert!(translate(one(|a| { a.divu(3, 1, 2); })).is_err());
    }

    #[test]
    fn interpreter_semantics() {
        use drc::{shared_buffer, Endian, MemoryMap};

        let mut map = MemoryMap::new();
        map.map_buffer(0, 0xff, shared_buffer(0x100), Endian::Big, false);
        let mut pages = drc::bus::CodePages::new();
        let mut bus = Bus::new(&map, &mut pages);
        let mut state = Toy32State::new(0);
        state.regs[1] = 7;

        let program = {
            let mut a = Assembler::new(0);
            a.divu(2, 1, 0).addiu(0, 1, 1).addiu(3, 0, -2).sb(3, 0, 0x10).lb(4, 0, 0x10).lbu(5, 0, 0x10).halt();
            a.finish().unwrap()
        };
        for &word in &program {
            Toy32.interpret(&mut state, &mut bus, word).unwrap();
        }
        assert_eq!(state.regs[2], u32::MAX);
        assert_eq!(state.regs[0], 0);
        assert_eq!(state.regs[4], 0xffff_fffe);
        assert_eq!(state.regs[5], 0xfe);
        assert!(state.halted);
        assert_eq!(state.pc, 4 * program.len() as u32);
    }
}
