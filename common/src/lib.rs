pub mod cli;
pub mod util;

/// Knobs shared by every core when it builds a runnable instance
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub program: String,
    pub hot_threshold: u32,
    pub interpret_only: bool,
    pub native_cache_size: usize,
    pub ir_cache_size: usize,
    pub guard_size: usize,
    pub profile: bool,
}

pub trait EmulationCore {
    fn name(&self) -> &'static str;
    fn short_name(&self) -> &'static str;

    /// Names of the built-in programs this core can load
    fn programs(&self) -> &'static [&'static str];

    fn new(&self, options: &RunOptions) -> Result<Box<dyn Instance>, anyhow::Error>;
}

/// Synchronous instance of an emulator core.
///
/// Instances are not `Send`: an execution engine belongs to exactly one guest CPU and is driven
/// from the thread that created it.
pub trait Instance {
    /// Run until the guest stops or `max_blocks` blocks have been dispatched
    fn run(&mut self, max_blocks: u64) -> Result<RunReport, anyhow::Error>;

    fn as_any(&mut self) -> &mut dyn std::any::Any;
}

#[derive(Debug)]
pub enum Status {
    Stopped,
    BudgetExhausted,
}

#[derive(Debug)]
pub struct RunReport {
    pub status: Status,
    pub blocks: u64,
    /// Free-form, one line per entry
    pub details: Vec<String>,
}
