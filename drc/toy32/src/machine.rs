//! A complete toy32 system: 64 KiB of RAM, a console device and the recompiler driving the CPU.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::bail;
use common::{EmulationCore, Instance, RunOptions, RunReport, Status};
use drc::{shared_buffer, CacheConfig, Drc, DrcConfig, DrcError, Endian, RunExit, SharedBuffer, StepInfo};

use crate::asm::Assembler;
use crate::{Toy32, Toy32State};

pub const RAM_END: u32 = 0xffff;
/// Byte writes show up on the console, reads return how many bytes were written so far
pub const CONSOLE: u32 = 0x0001_0000;
/// Where programs are loaded and started
pub const ORIGIN: u32 = 0x0100;

pub struct Machine {
    drc: Drc<Toy32>,
    state: Toy32State,
    ram: SharedBuffer,
    console: Rc<RefCell<Vec<u8>>>,
    profile: bool,
}

impl Machine {
    /// Loads `program` at [`ORIGIN`] and points the CPU at it
    pub fn new(program: &[u32], config: DrcConfig) -> Result<Machine, DrcError> {
        let ram = shared_buffer(RAM_END as usize + 1);
        {
            let mut ram = ram.borrow_mut();
            for (i, word) in program.iter().enumerate() {
                let offset = ORIGIN as usize + i * 4;
                let Some(slot) = ram.get_mut(offset..offset + 4) else {
                    return Err(DrcError::InvalidConfig(format!(
                        "program of {} words doesn't fit in RAM", program.len())));
                };
                slot.copy_from_slice(&word.to_be_bytes());
            }
        }

        let console = Rc::new(RefCell::new(Vec::new()));
        let mut config = config;
        let (reader, writer) = (console.clone(), console.clone());
        config
            .memory_map
            .map_buffer(0, RAM_END, ram.clone(), Endian::Big, false)
            .map_handlers(
                CONSOLE,
                CONSOLE + 0xff,
                move |_| reader.borrow().len() as u32,
                move |_, value| writer.borrow_mut().push(value as u8),
            );
        let profile = config.profile;
        log::debug!("toy32: {} words loaded at {:#06x}", program.len(), ORIGIN);

        Ok(Machine {
            drc: Drc::new(Toy32, config)?,
            state: Toy32State::new(ORIGIN),
            ram,
            console,
            profile,
        })
    }

    pub fn from_options(program: &[u32], options: &RunOptions) -> Result<Machine, DrcError> {
        let cache = |size| CacheConfig {
            size,
            guard_size: options.guard_size,
        };
        let config = DrcConfig {
            interpret_only: options.interpret_only,
            native_cache: cache(options.native_cache_size),
            intermediate_cache: cache(options.ir_cache_size),
            hot_threshold: options.hot_threshold,
            profile: options.profile,
            ..Default::default()
        };
        Machine::new(program, config)
    }

    pub fn drc(&self) -> &Drc<Toy32> {
        &self.drc
    }

    pub fn drc_mut(&mut self) -> &mut Drc<Toy32> {
        &mut self.drc
    }

    pub fn state(&self) -> &Toy32State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Toy32State {
        &mut self.state
    }

    pub fn ram(&self) -> &SharedBuffer {
        &self.ram
    }

    pub fn console(&self) -> String {
        String::from_utf8_lossy(&self.console.borrow()).into_owned()
    }

    pub fn step(&mut self) -> Result<StepInfo, DrcError> {
        self.drc.step(&mut self.state)
    }

    /// Runs until the CPU halts or `max_blocks` blocks were dispatched
    pub fn run(&mut self, max_blocks: u64) -> Result<RunExit, DrcError> {
        self.drc.run(&mut self.state, max_blocks)
    }

    fn report_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("pc={:#010x}", self.state.pc)];
        let regs: Vec<String> = self
            .state
            .regs
            .iter()
            .enumerate()
            .filter(|(_, &value)| value != 0)
            .map(|(n, value)| format!("r{}={:#x}", n, value))
            .collect();
        if !regs.is_empty() {
            lines.push(regs.join(" "));
        }
        let console = self.console();
        if !console.is_empty() {
            lines.push(format!("console: {}", console.trim_end()));
        }
        lines.push(self.drc.stats().to_string());

        if self.profile {
            for block in self.drc.blocks() {
                lines.push(format!(
                    "{:#010x}..={:#010x} {:>8} entries  {:?}  interp {:?}  native {:?}",
                    block.start,
                    block.end,
                    block.execution_count,
                    block.state(),
                    block.interp_exec_time,
                    block.native_exec_time,
                ));
            }
        }
        lines
    }
}

impl Instance for Machine {
    fn run(&mut self, max_blocks: u64) -> Result<RunReport, anyhow::Error> {
        let stats = self.drc.stats();
        let before = stats.interpreted_entries + stats.native_entries;
        let exit = Machine::run(self, max_blocks)?;
        let stats = self.drc.stats();

        Ok(RunReport {
            status: match exit {
                RunExit::Stopped => Status::Stopped,
                RunExit::BudgetExhausted => Status::BudgetExhausted,
            },
            blocks: stats.interpreted_entries + stats.native_entries - before,
            details: self.report_lines(),
        })
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub struct Toy32Core {}

impl EmulationCore for Toy32Core {
    fn name(&self) -> &'static str {
        "Toy32 reference CPU"
    }

    fn short_name(&self) -> &'static str {
        "toy32"
    }

    fn programs(&self) -> &'static [&'static str] {
        &PROGRAMS
    }

    fn new(&self, options: &RunOptions) -> Result<Box<dyn Instance>, anyhow::Error> {
        let program = program(&options.program)?;
        Ok(Box::new(Machine::from_options(&program, options)?))
    }
}

pub const PROGRAMS: [&str; 5] = ["sum", "factorial", "hello", "selfmod", "divide"];

/// Assembles one of the built-in [`PROGRAMS`]
pub fn program(name: &str) -> anyhow::Result<Vec<u32>> {
    let mut a = Assembler::new(ORIGIN);
    match name {
        // r1 = 1 + 2 + ... + 1000, also stored at 0x80
        "sum" => {
            a.addiu(2, 0, 1000)
                .label("loop")
                .add(1, 1, 2)
                .addiu(2, 2, -1)
                .bne(2, 0, "loop")
                .sw(1, 0, 0x80)
                .halt();
        }
        // r1 = 10!, `mul` always runs in the interpreter
        "factorial" => {
            a.addiu(1, 0, 1)
                .addiu(2, 0, 10)
                .label("loop")
                .mul(1, 1, 2)
                .addiu(2, 2, -1)
                .bne(2, 0, "loop")
                .halt();
        }
        "hello" => {
            a.j("start");
            let text = a.pc();
            a.ascii("hello, world\n")
                .label("start")
                .li(3, text)
                .lui(9, (CONSOLE >> 16) as u16)
                .label("loop")
                .lbu(2, 3, 0)
                .beq(2, 0, "done")
                .sb(2, 9, 0)
                .addiu(3, 3, 1)
                .j("loop")
                .label("done")
                .halt();
        }
        // Counts 20 iterations, halfway through the loop rewrites its own increment from 1 to
        // 100: r1 = 10 * 1 + 1 + 9 * 100
        "selfmod" => {
            let patch = {
                let mut p = Assembler::new(0);
                p.addiu(1, 1, 100);
                p.finish()?[0]
            };
            a.li(5, patch).addiu(2, 0, 20);
            let body = a.pc();
            a.label("body")
                .addiu(1, 1, 1)
                .addiu(2, 2, -1)
                .slti(3, 2, 10)
                .beq(3, 0, "skip")
                .sw(5, 0, body as i16)
                .label("skip")
                .bne(2, 0, "body")
                .halt();
        }
        // r1 = sum of i / 3 for i in 1..=30, `divu` keeps its block interpreted
        "divide" => {
            a.addiu(2, 0, 30)
                .addiu(4, 0, 3)
                .label("loop")
                .divu(5, 2, 4)
                .add(1, 1, 5)
                .addiu(2, 2, -1)
                .bne(2, 0, "loop")
                .halt();
        }
        _ => bail!("unknown program `{}`, try one of {}", name, PROGRAMS.join(", ")),
    }
    a.finish()
}
