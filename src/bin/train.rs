use clap::Parser;
use split_ensemble::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    run_train(TrainArgs::parse())?;
    Ok(())
}
