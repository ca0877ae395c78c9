//! Offline cache preparation for one attribute and mode.

use clap::Parser;
use fashionai_dataset::{Attribute, DatasetOptions, FashionAttr, Mode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "build-cache",
    about = "Build or refresh the cached arrays for a FashionAI attribute"
)]
struct Args {
    /// Dataset root containing the datasets/ tree.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Attribute task to prepare.
    #[arg(long, value_enum)]
    attribute: Attribute,
    /// Which partition to build.
    #[arg(long, value_enum, default_value_t = Mode::Train)]
    mode: Mode,
    /// Train fraction; values outside (0, 1) fall back to 0.8.
    #[arg(long, default_value_t = 0.8)]
    split: f64,
    /// Regenerate the permutation and rebuild every downstream artifact.
    #[arg(long)]
    reset: bool,
    /// Seed for permutation generation (useful for repeatable experiments).
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let options = DatasetOptions {
        split: args.split,
        reset: args.reset,
        seed: args.seed,
        ..DatasetOptions::default()
    };
    let dataset = FashionAttr::new(&args.root, args.attribute, args.mode, options)?;
    println!("{}", serde_json::to_string_pretty(&dataset.summary())?);
    Ok(())
}
