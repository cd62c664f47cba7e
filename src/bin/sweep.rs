use clap::Parser;
use split_ensemble::{run_sweep, SweepArgs};

fn main() -> anyhow::Result<()> {
    run_sweep(SweepArgs::parse())?;
    Ok(())
}
