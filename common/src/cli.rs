use clap::{Args, ValueEnum};

use crate::RunOptions;

#[derive(Debug, Args)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts<Cores>
where
    Cores: ValueEnum + Send + Sync + 'static
{
    #[clap(long, short, global = true, help_heading = "Select emulation Core")]
    pub core: Option<Cores>,

    /// Built-in program to load (defaults to the core's first program)
    #[arg(long, short)]
    pub program: Option<String>,

    /// Execution count at which a block gets translated (1 = translate immediately)
    #[arg(long, default_value_t = 5)]
    pub threshold: u32,

    /// Never translate, interpret every block
    #[arg(long)]
    pub interpret_only: bool,

    /// Native code cache size in KiB
    #[arg(long, default_value_t = 1024)]
    pub native_cache: usize,

    /// Intermediate representation cache size in KiB
    #[arg(long, default_value_t = 1024)]
    pub ir_cache: usize,

    /// Guard region size in KiB, applies to both caches
    #[arg(long, default_value_t = 16)]
    pub guard: usize,

    /// Stop after this many dispatched blocks
    #[arg(long, default_value_t = 1_000_000)]
    pub max_blocks: u64,

    /// Collect per-block execution times
    #[arg(long)]
    pub profile: bool,
}

impl<Cores> GlobalOpts<Cores>
where
    Cores: ValueEnum + Send + Sync + 'static
{
    pub fn run_options(&self, default_program: &str) -> RunOptions {
        RunOptions {
            program: self.program.clone().unwrap_or_else(|| default_program.to_owned()),
            hot_threshold: self.threshold,
            interpret_only: self.interpret_only,
            native_cache_size: self.native_cache * 1024,
            ir_cache_size: self.ir_cache * 1024,
            guard_size: self.guard * 1024,
            profile: self.profile,
        }
    }
}

#[macro_export]
macro_rules! register_cores {
    { $( $core_type:ident ),* $(,)? } => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        enum Cores {
            #[allow(non_camel_case_types)]
            $( $core_type ),*
        }

        impl clap::ValueEnum for Cores {
            fn value_variants<'a>() -> &'a [Self] { &[$( Cores::$core_type ),*] }
            fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
                use common::EmulationCore;
                match self {
                    $( Cores::$core_type => {
                        Some(clap::builder::PossibleValue::new(( $core_type {} ).short_name()))
                    }),*
                }
            }
        }

        fn get_core(core: Cores) -> &'static dyn common::EmulationCore {
            match core {
                $( Cores::$core_type => {
                    static CORE : $core_type = $core_type {};
                    &CORE
                }),*
            }
        }

        /// First registered core, used when `--core` isn't given
        fn default_core() -> Cores {
            <Cores as clap::ValueEnum>::value_variants()[0]
        }
    };
}
