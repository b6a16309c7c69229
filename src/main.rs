//! podar - train the CIFAR-10 classifier, plain or gated.
//!
//! Usage:
//!   podar                                # plain network, dense
//!   podar --gated                        # gated network, all channels kept
//!   podar --gated --sparsity-ratio 0.7   # keep 70% of channels per block
//!
//! Gated runs warm-start from the checkpoint one ratio step up, so train
//! the plain network first and walk the ladder downward from 1.0.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use podar::train::{self, TrainConfig};

/// Train the channel-gated CIFAR-10 classifier.
#[derive(Parser)]
#[command(name = "podar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Train the gated network instead of the plain one
    #[arg(long)]
    gated: bool,

    /// Fraction of channels each gate keeps, in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    sparsity_ratio: f32,

    /// Weight of the gate cost in the loss
    #[arg(long, default_value_t = 1e-8)]
    lasso_lambda: f32,

    /// Number of passes over the training split
    #[arg(long, default_value_t = 500)]
    epochs: usize,

    /// Examples per optimization step
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    lr: f32,

    /// Seed for initialization and epoch shuffling
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Directory holding the CIFAR-10 binary batches
    #[arg(long, default_value = "data/cifar-10-batches-bin")]
    data_dir: PathBuf,

    /// Directory for checkpoints and the training log
    #[arg(long, default_value = "checkpoints")]
    ckpt_dir: PathBuf,
}

impl From<Args> for TrainConfig {
    fn from(args: Args) -> Self {
        Self {
            gated: args.gated,
            sparsity_ratio: args.sparsity_ratio,
            lasso_lambda: args.lasso_lambda,
            epochs: args.epochs,
            batch_size: args.batch_size,
            lr: args.lr,
            seed: args.seed,
            data_dir: args.data_dir,
            ckpt_dir: args.ckpt_dir,
        }
    }
}

fn main() -> ExitCode {
    let config = TrainConfig::from(Args::parse());
    match train::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
