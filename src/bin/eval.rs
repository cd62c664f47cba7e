use clap::Parser;
use split_ensemble::score::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    run_eval(EvalArgs::parse())
}
