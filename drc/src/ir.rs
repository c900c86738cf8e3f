//! Intermediate representation.
//!
//! Source CPUs translate guest instructions into a short list of [`IrOp`]s. The list is stored in
//! the intermediate cache as fixed size [`Record`]s and compiled from there into native code.

use modular_bitfield::{bitfield, specifiers::*};

use crate::DrcError;

/// Scratch registers available to a translation, they don't survive the block
pub const TEMP_COUNT: u8 = 4;
/// Guest register numbers share a byte with the temp flag
pub const MAX_GUEST_REGISTERS: usize = Reg::TEMP_BIT as usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Guest(u8),
    Temp(u8),
}

impl Reg {
    const TEMP_BIT: u8 = 0x80;

    #[inline(always)]
    pub(crate) fn encode(self) -> u8 {
        match self {
            Reg::Guest(n) => n,
            Reg::Temp(n) => Self::TEMP_BIT | n,
        }
    }

    #[inline(always)]
    pub(crate) fn decode(raw: u8) -> Reg {
        if raw & Self::TEMP_BIT != 0 {
            Reg::Temp(raw & !Self::TEMP_BIT)
        } else {
            Reg::Guest(raw)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Mul,
    Slt,
    Sltu,
}

impl AluOp {
    const ALL: [AluOp; 11] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::And,
        AluOp::Or,
        AluOp::Xor,
        AluOp::Shl,
        AluOp::Shr,
        AluOp::Sar,
        AluOp::Mul,
        AluOp::Slt,
        AluOp::Sltu,
    ];

    /// Shifts only use the low 5 bits of `b`
    #[inline(always)]
    pub fn eval(self, a: u32, b: u32) -> u32 {
        match self {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::And => a & b,
            AluOp::Or => a | b,
            AluOp::Xor => a ^ b,
            AluOp::Shl => a << (b & 31),
            AluOp::Shr => a >> (b & 31),
            AluOp::Sar => ((a as i32) >> (b & 31)) as u32,
            AluOp::Mul => a.wrapping_mul(b),
            AluOp::Slt => ((a as i32) < (b as i32)) as u32,
            AluOp::Sltu => (a < b) as u32,
        }
    }

    pub(crate) fn from_u32(raw: u32) -> Option<AluOp> {
        Self::ALL.get(raw as usize).copied()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

impl Cond {
    const ALL: [Cond; 6] = [Cond::Eq, Cond::Ne, Cond::Lt, Cond::Ge, Cond::Ltu, Cond::Geu];

    #[inline(always)]
    pub fn eval(self, a: u32, b: u32) -> bool {
        match self {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => (a as i32) < (b as i32),
            Cond::Ge => (a as i32) >= (b as i32),
            Cond::Ltu => a < b,
            Cond::Geu => a >= b,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Cond> {
        Self::ALL.get(raw as usize).copied()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    #[inline(always)]
    pub fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    /// Sign or zero extends the low `self` bits of `value`
    #[inline(always)]
    pub fn extend(self, value: u32, signed: bool) -> u32 {
        match (self, signed) {
            (Width::Byte, true) => value as u8 as i8 as i32 as u32,
            (Width::Byte, false) => value as u8 as u32,
            (Width::Half, true) => value as u16 as i16 as i32 as u32,
            (Width::Half, false) => value as u16 as u32,
            (Width::Word, _) => value,
        }
    }

    pub(crate) fn encode(self) -> u8 {
        match self {
            Width::Byte => 0,
            Width::Half => 1,
            Width::Word => 2,
        }
    }

    pub(crate) fn decode(raw: u8) -> Option<Width> {
        match raw {
            0 => Some(Width::Byte),
            1 => Some(Width::Half),
            2 => Some(Width::Word),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrOp {
    Imm { dst: Reg, value: u32 },
    Mov { dst: Reg, src: Reg },
    Alu { op: AluOp, dst: Reg, a: Reg, b: Reg },
    AluImm { op: AluOp, dst: Reg, a: Reg, imm: u32 },
    /// `dst = mem[base + offset]`
    Load { width: Width, signed: bool, dst: Reg, base: Reg, offset: i32 },
    /// `mem[base + offset] = src`
    Store { width: Width, src: Reg, base: Reg, offset: i32 },
    /// Leaves the block for `target` if the condition holds
    Branch { cond: Cond, a: Reg, b: Reg, target: u32 },
    Jump { target: u32 },
    JumpReg { reg: Reg },
    /// Hand the instruction at `pc` to the interpreter. Leaves the block if it moved the PC
    /// anywhere other than the next instruction.
    Interp { pc: u32, word: u32, len: u8 },
    Exit { next_pc: u32 },
}

impl IrOp {
    fn regs(&self) -> impl Iterator<Item = Reg> {
        let regs: [Option<Reg>; 3] = match *self {
            IrOp::Imm { dst, .. } => [Some(dst), None, None],
            IrOp::Mov { dst, src } => [Some(dst), Some(src), None],
            IrOp::Alu { dst, a, b, .. } => [Some(dst), Some(a), Some(b)],
            IrOp::AluImm { dst, a, .. } => [Some(dst), Some(a), None],
            IrOp::Load { dst, base, .. } => [Some(dst), Some(base), None],
            IrOp::Store { src, base, .. } => [Some(src), Some(base), None],
            IrOp::Branch { a, b, .. } => [Some(a), Some(b), None],
            IrOp::JumpReg { reg } => [Some(reg), None, None],
            IrOp::Jump { .. } | IrOp::Interp { .. } | IrOp::Exit { .. } => [None; 3],
        };
        regs.into_iter().flatten()
    }

    pub(crate) fn to_record(self) -> Record {
        let r = Record::new();
        match self {
            IrOp::Imm { dst, value } => r.with_op(0).with_a(dst.encode()).with_x(value),
            IrOp::Mov { dst, src } => r.with_op(1).with_a(dst.encode()).with_b(src.encode()),
            IrOp::Alu { op, dst, a, b } => r
                .with_op(2)
                .with_a(dst.encode())
                .with_b(a.encode())
                .with_c(b.encode())
                .with_x(op as u32),
            IrOp::AluImm { op, dst, a, imm } => r
                .with_op(3)
                .with_a(dst.encode())
                .with_b(a.encode())
                .with_x(op as u32)
                .with_y(imm),
            IrOp::Load { width, signed, dst, base, offset } => r
                .with_op(4)
                .with_a(dst.encode())
                .with_b(base.encode())
                .with_c(width.encode() | (signed as u8) << 4)
                .with_y(offset as u32),
            IrOp::Store { width, src, base, offset } => r
                .with_op(5)
                .with_a(src.encode())
                .with_b(base.encode())
                .with_c(width.encode())
                .with_y(offset as u32),
            IrOp::Branch { cond, a, b, target } => r
                .with_op(6)
                .with_a(a.encode())
                .with_b(b.encode())
                .with_c(cond as u8)
                .with_x(target),
            IrOp::Jump { target } => r.with_op(7).with_x(target),
            IrOp::JumpReg { reg } => r.with_op(8).with_a(reg.encode()),
            IrOp::Interp { pc, word, len } => r.with_op(9).with_c(len).with_x(pc).with_y(word),
            IrOp::Exit { next_pc } => r.with_op(10).with_x(next_pc),
        }
    }

    pub(crate) fn from_record(r: Record) -> Option<IrOp> {
        let (a, b, c) = (Reg::decode(r.a()), Reg::decode(r.b()), Reg::decode(r.c()));
        let op = match r.op() {
            0 => IrOp::Imm { dst: a, value: r.x() },
            1 => IrOp::Mov { dst: a, src: b },
            2 => IrOp::Alu { op: AluOp::from_u32(r.x())?, dst: a, a: b, b: c },
            3 => IrOp::AluImm { op: AluOp::from_u32(r.x())?, dst: a, a: b, imm: r.y() },
            4 => IrOp::Load {
                width: Width::decode(r.c() & 0xf)?,
                signed: r.c() & 0x10 != 0,
                dst: a,
                base: b,
                offset: r.y() as i32,
            },
            5 => IrOp::Store { width: Width::decode(r.c())?, src: a, base: b, offset: r.y() as i32 },
            6 => IrOp::Branch { cond: Cond::from_u8(r.c())?, a, b, target: r.x() },
            7 => IrOp::Jump { target: r.x() },
            8 => IrOp::JumpReg { reg: a },
            9 => IrOp::Interp { pc: r.x(), word: r.y(), len: r.c() },
            10 => IrOp::Exit { next_pc: r.x() },
            _ => return None,
        };
        Some(op)
    }
}

/// One IR or native operation as it's stored in a cache arena
#[bitfield(bits = 128)]
#[derive(Debug, Copy, Clone)]
pub struct Record {
    pub op: B8,
    pub a: B8,
    pub b: B8,
    pub c: B8,
    pub x: B32,
    pub y: B32,
    pub z: B32,
}

impl Record {
    pub const SIZE: usize = 16;

    /// Splits a cache slice into records, `None` if it isn't made of whole records
    pub fn read_all(bytes: &[u8]) -> Option<impl Iterator<Item = Record> + '_> {
        if bytes.len() % Self::SIZE != 0 {
            return None;
        }
        Some(bytes.chunks_exact(Self::SIZE).map(|chunk| {
            let mut raw = [0; Self::SIZE];
            raw.copy_from_slice(chunk);
            Record::from_bytes(raw)
        }))
    }
}

/// Collects the IR for one block
pub struct IrBuilder {
    ops: Vec<IrOp>,
    register_count: usize,
}

impl IrBuilder {
    pub fn new(register_count: usize) -> IrBuilder {
        IrBuilder {
            ops: Vec::new(),
            register_count,
        }
    }

    pub fn imm(&mut self, dst: Reg, value: u32) -> &mut Self {
        self.push(IrOp::Imm { dst, value })
    }

    pub fn mov(&mut self, dst: Reg, src: Reg) -> &mut Self {
        self.push(IrOp::Mov { dst, src })
    }

    pub fn alu(&mut self, op: AluOp, dst: Reg, a: Reg, b: Reg) -> &mut Self {
        self.push(IrOp::Alu { op, dst, a, b })
    }

    pub fn alu_imm(&mut self, op: AluOp, dst: Reg, a: Reg, imm: u32) -> &mut Self {
        self.push(IrOp::AluImm { op, dst, a, imm })
    }

    pub fn load(&mut self, width: Width, signed: bool, dst: Reg, base: Reg, offset: i32) -> &mut Self {
        self.push(IrOp::Load { width, signed, dst, base, offset })
    }

    pub fn store(&mut self, width: Width, src: Reg, base: Reg, offset: i32) -> &mut Self {
        self.push(IrOp::Store { width, src, base, offset })
    }

    pub fn branch(&mut self, cond: Cond, a: Reg, b: Reg, target: u32) -> &mut Self {
        self.push(IrOp::Branch { cond, a, b, target })
    }

    pub fn jump(&mut self, target: u32) -> &mut Self {
        self.push(IrOp::Jump { target })
    }

    pub fn jump_reg(&mut self, reg: Reg) -> &mut Self {
        self.push(IrOp::JumpReg { reg })
    }

    /// Emits a call into the interpreter for an instruction that has no IR translation
    pub fn interpret(&mut self, pc: u32, word: u32, len: u8) -> &mut Self {
        self.push(IrOp::Interp { pc, word, len })
    }

    pub(crate) fn exit(&mut self, next_pc: u32) -> &mut Self {
        self.push(IrOp::Exit { next_pc })
    }

    fn push(&mut self, op: IrOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[IrOp] {
        &self.ops
    }

    /// Checks every register reference, returns a description of the first bad one
    pub fn validate(&self) -> Result<(), String> {
        for (i, op) in self.ops.iter().enumerate() {
            for reg in op.regs() {
                let ok = match reg {
                    Reg::Guest(n) => (n as usize) < self.register_count,
                    Reg::Temp(n) => n < TEMP_COUNT,
                };
                if !ok {
                    return Err(format!("op {} ({:?}) uses {:?}", i, op, reg));
                }
            }
            if let IrOp::Interp { len: 0, .. } = op {
                return Err(format!("op {} interprets an empty instruction", i));
            }
        }
        Ok(())
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        self.ops.iter().flat_map(|op| op.to_record().into_bytes()).collect()
    }
}

/// Reads IR back out of the intermediate cache
pub fn decode(bytes: &[u8]) -> Result<Vec<IrOp>, DrcError> {
    let records = Record::read_all(bytes).ok_or_else(|| DrcError::Runtime("torn IR record".into()))?;
    records
        .map(|r| IrOp::from_record(r).ok_or_else(|| DrcError::Runtime(format!("bad IR record {:?}", r))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alu_semantics() {
        assert_eq!(AluOp::Add.eval(0xffff_ffff, 2), 1);
        assert_eq!(AluOp::Sub.eval(1, 2), 0xffff_ffff);
        assert_eq!(AluOp::Shl.eval(1, 33), 2);
        assert_eq!(AluOp::Shr.eval(0x8000_0000, 31), 1);
        assert_eq!(AluOp::Sar.eval(0x8000_0000, 31), 0xffff_ffff);
        assert_eq!(AluOp::Mul.eval(0x1_0001, 0x1_0001), 0x2_0001);
        assert_eq!(AluOp::Slt.eval(0xffff_ffff, 0), 1);
        assert_eq!(AluOp::Sltu.eval(0xffff_ffff, 0), 0);
        assert!(Cond::Lt.eval(-1i32 as u32, 0));
        assert!(Cond::Geu.eval(-1i32 as u32, 0));
        assert!(!Cond::Ne.eval(7, 7));
    }

    #[test]
    fn extension() {
        assert_eq!(Width::Byte.extend(0x1ff, true), 0xffff_ffff);
        assert_eq!(Width::Byte.extend(0x17f, true), 0x7f);
        assert_eq!(Width::Half.extend(0x8000, true), 0xffff_8000);
        assert_eq!(Width::Half.extend(0x1_8000, false), 0x8000);
    }

    #[test]
    fn temps_and_guests_share_a_byte() {
        assert_eq!(Reg::decode(Reg::Temp(3).encode()), Reg::Temp(3));
        assert_eq!(Reg::decode(Reg::Guest(31).encode()), Reg::Guest(31));
        assert_ne!(Reg::Temp(1).encode(), Reg::Guest(1).encode());
    }

    #[test]
    fn builder_output_survives_the_cache_format() {
        let mut ir = IrBuilder::new(32);
        ir.imm(Reg::Temp(0), 0x1234_5678)
            .load(Width::Half, true, Reg::Guest(4), Reg::Temp(0), -2)
            .alu(AluOp::Sltu, Reg::Guest(5), Reg::Guest(4), Reg::Guest(0))
            .store(Width::Byte, Reg::Guest(5), Reg::Guest(29), 0x10)
            .branch(Cond::Ge, Reg::Guest(5), Reg::Guest(6), 0x100)
            .interpret(0x104, 0xdead_beef, 4)
            .exit(0x108);
        ir.validate().unwrap();

        let bytes = ir.encode();
        assert_eq!(bytes.len(), ir.len() * Record::SIZE);
        assert_eq!(decode(&bytes).unwrap(), ir.ops());
    }

    #[test]
    fn validation_catches_bad_registers() {
        let mut ir = IrBuilder::new(8);
        ir.mov(Reg::Guest(7), Reg::Temp(3));
        assert!(ir.validate().is_ok());
        ir.mov(Reg::Guest(8), Reg::Guest(0));
        assert!(ir.validate().unwrap_err().contains("Guest(8)"));

        let mut ir = IrBuilder::new(8);
        ir.jump_reg(Reg::Temp(TEMP_COUNT));
        assert!(ir.validate().is_err());
    }

    #[test]
    fn torn_records_are_rejected() {
        let mut ir = IrBuilder::new(8);
        ir.jump(0x40);
        let bytes = ir.encode();
        assert!(decode(&bytes[..15]).is_err());

        let mut bad = bytes.clone();
        bad[0] = 0xee;
        assert!(decode(&bad).is_err());
    }
}
