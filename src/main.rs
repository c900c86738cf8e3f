use clap::Parser;
use common::{cli::GlobalOpts, register_cores, Status};
use toy32::Toy32Core;

register_cores! {
    Toy32Core,
}

/// Runs a built-in guest program through the dynamic recompiler
#[derive(Parser, Debug)]
#[command(name = "arcade-drc")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts<Cores>,

    /// Print the selected core's built-in programs and exit
    #[arg(long)]
    list: bool,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let core = get_core(cli.global.core.unwrap_or_else(default_core));
    if cli.list {
        for program in core.programs() {
            println!("{}", program);
        }
        return Ok(());
    }

    let default_program = core.programs().first().copied().unwrap_or_default();
    let options = cli.global.run_options(default_program);
    log::info!("{}: running `{}`", core.name(), options.program);

    let mut instance = core.new(&options)?;
    let report = instance.run(cli.global.max_blocks)?;

    match report.status {
        Status::Stopped => println!("stopped after {} blocks", report.blocks),
        Status::BudgetExhausted => println!("gave up after {} blocks", report.blocks),
    }
    for line in &report.details {
        println!("  {}", line);
    }
    Ok(())
}
