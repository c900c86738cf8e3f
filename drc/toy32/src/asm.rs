//! A tiny assembler, enough to write test and demo programs without hand encoding words.

use std::collections::HashMap;

use anyhow::{anyhow, bail};

use crate::instructions::{IType, JType, RType};

#[derive(Copy, Clone, Debug)]
enum Fixup {
    Branch,
    Jump,
}

pub struct Assembler {
    origin: u32,
    words: Vec<u32>,
    labels: HashMap<String, u32>,
    fixups: Vec<(usize, String, Fixup)>,
}

fn r(funct: u32, rs: u8, rt: u8, rd: u8, sa: u8) -> u32 {
    RType::new()
        .with_op(0)
        .with_rs(rs)
        .with_rt(rt)
        .with_rd(rd)
        .with_sa(sa)
        .with_funct(funct as u8)
        .into()
}

fn i(op: u32, rs: u8, rt: u8, imm: u16) -> u32 {
    IType::new().with_op(op as u8).with_rs(rs).with_rt(rt).with_imm(imm).into()
}

impl Assembler {
    pub fn new(origin: u32) -> Assembler {
        Assembler {
            origin,
            words: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    /// Address the next word lands on
    pub fn pc(&self) -> u32 {
        self.origin + 4 * self.words.len() as u32
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let pc = self.pc();
        self.labels.insert(name.to_owned(), pc);
        self
    }

    pub fn word(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    /// Packs `text` into big endian words, NUL terminated and padded
    pub fn ascii(&mut self, text: &str) -> &mut Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.word(u32::from_be_bytes(word));
        }
        self
    }

    fn fixup(&mut self, word: u32, label: &str, kind: Fixup) -> &mut Self {
        self.fixups.push((self.words.len(), label.to_owned(), kind));
        self.word(word)
    }

    pub fn add(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x20, rs, rt, rd, 0))
    }
    pub fn sub(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x22, rs, rt, rd, 0))
    }
    pub fn and(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x24, rs, rt, rd, 0))
    }
    pub fn or(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x25, rs, rt, rd, 0))
    }
    pub fn xor(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x26, rs, rt, rd, 0))
    }
    pub fn slt(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x2a, rs, rt, rd, 0))
    }
    pub fn sltu(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x2b, rs, rt, rd, 0))
    }
    pub fn mul(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x18, rs, rt, rd, 0))
    }
    pub fn divu(&mut self, rd: u8, rs: u8, rt: u8) -> &mut Self {
        self.word(r(0x1a, rs, rt, rd, 0))
    }
    pub fn sll(&mut self, rd: u8, rt: u8, sa: u8) -> &mut Self {
        self.word(r(0x00, 0, rt, rd, sa))
    }
    pub fn srl(&mut self, rd: u8, rt: u8, sa: u8) -> &mut Self {
        self.word(r(0x02, 0, rt, rd, sa))
    }
    pub fn sra(&mut self, rd: u8, rt: u8, sa: u8) -> &mut Self {
        self.word(r(0x03, 0, rt, rd, sa))
    }
    pub fn nop(&mut self) -> &mut Self {
        self.word(0)
    }
    pub fn jr(&mut self, rs: u8) -> &mut Self {
        self.word(r(0x08, rs, 0, 0, 0))
    }
    pub fn halt(&mut self) -> &mut Self {
        self.word(r(0x0d, 0, 0, 0, 0))
    }

    pub fn addiu(&mut self, rt: u8, rs: u8, imm: i16) -> &mut Self {
        self.word(i(0x09, rs, rt, imm as u16))
    }
    pub fn slti(&mut self, rt: u8, rs: u8, imm: i16) -> &mut Self {
        self.word(i(0x0a, rs, rt, imm as u16))
    }
    pub fn sltiu(&mut self, rt: u8, rs: u8, imm: i16) -> &mut Self {
        self.word(i(0x0b, rs, rt, imm as u16))
    }
    pub fn andi(&mut self, rt: u8, rs: u8, imm: u16) -> &mut Self {
        self.word(i(0x0c, rs, rt, imm))
    }
    pub fn ori(&mut self, rt: u8, rs: u8, imm: u16) -> &mut Self {
        self.word(i(0x0d, rs, rt, imm))
    }
    pub fn xori(&mut self, rt: u8, rs: u8, imm: u16) -> &mut Self {
        self.word(i(0x0e, rs, rt, imm))
    }
    pub fn lui(&mut self, rt: u8, imm: u16) -> &mut Self {
        self.word(i(0x0f, 0, rt, imm))
    }

    /// `lui` + `ori`, always two words so code size doesn't depend on the value
    pub fn li(&mut self, rt: u8, value: u32) -> &mut Self {
        self.lui(rt, (value >> 16) as u16).ori(rt, rt, value as u16)
    }

    pub fn lb(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x20, rs, rt, offset as u16))
    }
    pub fn lh(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x21, rs, rt, offset as u16))
    }
    pub fn lw(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x23, rs, rt, offset as u16))
    }
    pub fn lbu(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x24, rs, rt, offset as u16))
    }
    pub fn lhu(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x25, rs, rt, offset as u16))
    }
    pub fn sb(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x28, rs, rt, offset as u16))
    }
    pub fn sh(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x29, rs, rt, offset as u16))
    }
    pub fn sw(&mut self, rt: u8, rs: u8, offset: i16) -> &mut Self {
        self.word(i(0x2b, rs, rt, offset as u16))
    }

    pub fn beq(&mut self, rs: u8, rt: u8, label: &str) -> &mut Self {
        self.fixup(i(0x04, rs, rt, 0), label, Fixup::Branch)
    }
    pub fn bne(&mut self, rs: u8, rt: u8, label: &str) -> &mut Self {
        self.fixup(i(0x05, rs, rt, 0), label, Fixup::Branch)
    }
    /// `beq` with a raw offset in instructions, relative to the next instruction
    pub fn beq_offset(&mut self, rs: u8, rt: u8, offset: i16) -> &mut Self {
        self.word(i(0x04, rs, rt, offset as u16))
    }
    pub fn j(&mut self, label: &str) -> &mut Self {
        self.fixup(JType::new().with_op(0x02).into(), label, Fixup::Jump)
    }

    /// Resolves labels and returns the program
    pub fn finish(&self) -> anyhow::Result<Vec<u32>> {
        let mut words = self.words.clone();
        for (index, label, kind) in &self.fixups {
            let target = *self.labels.get(label).ok_or_else(|| anyhow!("undefined label `{}`", label))?;
            let pc = self.origin + 4 * *index as u32;
            let word = &mut words[*index];
            match kind {
                Fixup::Branch => {
                    let offset = (target as i64 - (pc as i64 + 4)) >> 2;
                    let Ok(offset) = i16::try_from(offset) else {
                        bail!("branch at {:#010x} can't reach `{}` at {:#010x}", pc, label, target);
                    };
                    *word = IType::from(*word).with_imm(offset as u16).into();
                }
                Fixup::Jump => {
                    if (pc.wrapping_add(4) ^ target) & 0xf000_0000 != 0 {
                        bail!("jump at {:#010x} can't reach `{}` at {:#010x}", pc, label, target);
                    }
                    *word = JType::from(*word).with_target(target >> 2 & 0x03ff_ffff).into();
                }
            }
        }
        Ok(words)
    }

    /// The program as big endian bytes, the layout of a `Big` buffer
    pub fn finish_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.finish()?.iter().flat_map(|word| word.to_be_bytes()).collect())
    }
}
