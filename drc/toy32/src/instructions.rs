use drc::Flow;
use modular_bitfield::{bitfield, specifiers::*};

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct IType {
    pub imm: B16,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct JType {
    pub target: B26,
    pub op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct RType {
    pub funct: B6,
    pub sa: B5,
    pub rd: B5,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

impl From<u32> for IType {
    fn from(word: u32) -> Self {
        IType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for JType {
    fn from(word: u32) -> Self {
        JType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for RType {
    fn from(word: u32) -> Self {
        RType::from_bytes(word.to_le_bytes())
    }
}

impl From<IType> for u32 {
    fn from(i: IType) -> u32 {
        u32::from_le_bytes(i.into_bytes())
    }
}
impl From<JType> for u32 {
    fn from(j: JType) -> u32 {
        u32::from_le_bytes(j.into_bytes())
    }
}
impl From<RType> for u32 {
    fn from(r: RType) -> u32 {
        u32::from_le_bytes(r.into_bytes())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Slt,
    Sltu,
    Sll,
    Srl,
    Sra,
    Jr,
    Mul,
    Divu,
    Halt,
    J,
    Beq,
    Bne,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
}

/// Operand layout, drives disassembly and tells the engine how control flow works
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Form {
    RegRegReg,
    ShiftImm,
    JReg,
    Halt,
    J26,
    BranchRegReg,
    /// true == sign extended immediate
    RegImm(bool),
    LoadUpper,
    Load,
    Store,
}

impl Form {
    pub fn flow(self) -> Flow {
        match self {
            Form::J26 | Form::JReg | Form::BranchRegReg => Flow::Branch,
            Form::Halt => Flow::EndBlock,
            _ => Flow::FallThrough,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct InstructionInfo {
    pub name: &'static str,
    pub op: Op,
    pub form: Form,
}

const fn op(name: &'static str, op: Op, form: Form) -> Option<InstructionInfo> {
    Some(InstructionInfo { name, op, form })
}

const RESERVED: Option<InstructionInfo> = None;

const SPECIAL: u32 = 0x00;

static PRIMARY_TABLE: [Option<InstructionInfo>; 64] = {
    let mut table = [RESERVED; 64];
    table[0x02] = op("j", Op::J, Form::J26);
    table[0x04] = op("beq", Op::Beq, Form::BranchRegReg);
    table[0x05] = op("bne", Op::Bne, Form::BranchRegReg);
    table[0x09] = op("addiu", Op::Addiu, Form::RegImm(true));
    table[0x0a] = op("slti", Op::Slti, Form::RegImm(true));
    table[0x0b] = op("sltiu", Op::Sltiu, Form::RegImm(true));
    table[0x0c] = op("andi", Op::Andi, Form::RegImm(false));
    table[0x0d] = op("ori", Op::Ori, Form::RegImm(false));
    table[0x0e] = op("xori", Op::Xori, Form::RegImm(false));
    table[0x0f] = op("lui", Op::Lui, Form::LoadUpper);
    table[0x20] = op("lb", Op::Lb, Form::Load);
    table[0x21] = op("lh", Op::Lh, Form::Load);
    table[0x23] = op("lw", Op::Lw, Form::Load);
    table[0x24] = op("lbu", Op::Lbu, Form::Load);
    table[0x25] = op("lhu", Op::Lhu, Form::Load);
    table[0x28] = op("sb", Op::Sb, Form::Store);
    table[0x29] = op("sh", Op::Sh, Form::Store);
    table[0x2b] = op("sw", Op::Sw, Form::Store);
    table
};

static SPECIAL_TABLE: [Option<InstructionInfo>; 64] = {
    let mut table = [RESERVED; 64];
    table[0x00] = op("sll", Op::Sll, Form::ShiftImm);
    table[0x02] = op("srl", Op::Srl, Form::ShiftImm);
    table[0x03] = op("sra", Op::Sra, Form::ShiftImm);
    table[0x08] = op("jr", Op::Jr, Form::JReg);
    table[0x0d] = op("halt", Op::Halt, Form::Halt);
    table[0x18] = op("mul", Op::Mul, Form::RegRegReg);
    table[0x1a] = op("divu", Op::Divu, Form::RegRegReg);
    table[0x20] = op("add", Op::Add, Form::RegRegReg);
    table[0x22] = op("sub", Op::Sub, Form::RegRegReg);
    table[0x24] = op("and", Op::And, Form::RegRegReg);
    table[0x25] = op("or", Op::Or, Form::RegRegReg);
    table[0x26] = op("xor", Op::Xor, Form::RegRegReg);
    table[0x2a] = op("slt", Op::Slt, Form::RegRegReg);
    table[0x2b] = op("sltu", Op::Sltu, Form::RegRegReg);
    table
};

pub fn decode(word: u32) -> Option<&'static InstructionInfo> {
    let r = RType::from(word);
    let entry = if r.op() as u32 == SPECIAL {
        &SPECIAL_TABLE[r.funct() as usize]
    } else {
        &PRIMARY_TABLE[r.op() as usize]
    };
    entry.as_ref()
}

/// Target of a pc relative branch at `pc`
#[inline(always)]
pub fn branch_target(pc: u32, word: u32) -> u32 {
    let offset = (IType::from(word).imm() as i16 as i32) << 2;
    pc.wrapping_add(4).wrapping_add(offset as u32)
}

/// Target of an absolute jump at `pc`, stays in the same 256MB segment
#[inline(always)]
pub fn jump_target(pc: u32, word: u32) -> u32 {
    (pc.wrapping_add(4) & 0xf000_0000) | (JType::from(word).target() << 2)
}

#[inline(always)]
pub fn sign_imm(word: u32) -> u32 {
    IType::from(word).imm() as i16 as i32 as u32
}

#[inline(always)]
pub fn zero_imm(word: u32) -> u32 {
    IType::from(word).imm() as u32
}

fn reg(n: u8) -> String {
    format!("r{}", n)
}

/// Disassembles `word` as if it was fetched from `pc`
pub fn disassemble(word: u32, pc: u32) -> String {
    let Some(info) = decode(word) else {
        return format!(".word   {:#010x}", word);
    };
    let i = IType::from(word);
    let r = RType::from(word);

    let args = match info.form {
        Form::RegRegReg => vec![reg(r.rd()), reg(r.rs()), reg(r.rt())],
        Form::ShiftImm => vec![reg(r.rd()), reg(r.rt()), format!("{}", r.sa())],
        Form::JReg => vec![reg(r.rs())],
        Form::Halt => vec![],
        Form::J26 => vec![format!("{:#x}", jump_target(pc, word))],
        Form::BranchRegReg => vec![reg(i.rs()), reg(i.rt()), format!("{:#x}", branch_target(pc, word))],
        Form::RegImm(true) => vec![reg(i.rt()), reg(i.rs()), format!("{}", sign_imm(word) as i32)],
        Form::RegImm(false) => vec![reg(i.rt()), reg(i.rs()), format!("{:#x}", i.imm())],
        Form::LoadUpper => vec![reg(i.rt()), format!("{:#x}", i.imm())],
        Form::Load | Form::Store => {
            vec![reg(i.rt()), format!("{}({})", sign_imm(word) as i32, reg(i.rs()))]
        }
    };
    if args.is_empty() {
        info.name.to_owned()
    } else {
        format!("{:<7} {}", info.name, args.join(", "))
    }
}
