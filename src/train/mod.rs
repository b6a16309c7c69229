//! Training driver for the CIFAR-10 classifiers.
//!
//! Runs the standard loop: shuffled training epochs, evaluation on the
//! test split, a TSV log row per epoch, and a checkpoint whenever test
//! accuracy improves. Gated runs follow the sparsity ladder: the dense
//! gated network warm-starts from the plain network's convolutions, and
//! each sparser run warm-starts from the checkpoint one ratio step up.
//!
//! The training objective is cross-entropy plus `lasso_lambda` times
//! the summed gate cost. Evaluation reports the same composite loss.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::data::Cifar10;
use crate::error::{PodarError, Result};
use crate::model::{CifarNet, GatedCifarNet};
use crate::nn::serialize::{filter_by_suffix, load_state_dict, save_state_dict};
use crate::nn::{Adam, CrossEntropyLoss, Optimizer, StateDict};

/// Hyperparameters and paths for one training run.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Train the gated network instead of the plain one.
    pub gated: bool,
    /// Fraction of channels each gate keeps.
    pub sparsity_ratio: f32,
    /// Weight of the gate cost in the loss.
    pub lasso_lambda: f32,
    /// Number of passes over the training split.
    pub epochs: usize,
    /// Examples per optimization step.
    pub batch_size: usize,
    /// Adam learning rate.
    pub lr: f32,
    /// Seed for initialization and epoch shuffling.
    pub seed: u64,
    /// Directory holding the CIFAR-10 binary batches.
    pub data_dir: PathBuf,
    /// Directory for checkpoints and the training log.
    pub ckpt_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            gated: false,
            sparsity_ratio: 1.0,
            lasso_lambda: 1e-8,
            epochs: 500,
            batch_size: 256,
            lr: 1e-3,
            seed: 1,
            data_dir: PathBuf::from("data/cifar-10-batches-bin"),
            ckpt_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl TrainConfig {
    /// Check hyperparameters that the model constructors don't already
    /// cover.
    ///
    /// # Errors
    ///
    /// Returns [`PodarError::InvalidHyperparameter`] for a zero batch
    /// size, a non-positive learning rate, or a negative lasso weight.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "0", "batch_size > 0"));
        }
        if self.lr <= 0.0 || self.lr.is_nan() {
            return Err(invalid("lr", &format!("{}", self.lr), "lr > 0"));
        }
        if self.lasso_lambda < 0.0 || self.lasso_lambda.is_nan() {
            return Err(invalid(
                "lasso_lambda",
                &format!("{}", self.lasso_lambda),
                "lasso_lambda >= 0",
            ));
        }
        Ok(())
    }
}

fn invalid(param: &str, value: &str, constraint: &str) -> PodarError {
    PodarError::InvalidHyperparameter {
        param: param.to_string(),
        value: value.to_string(),
        constraint: constraint.to_string(),
    }
}

/// Load the dataset from `config.data_dir` and train.
///
/// # Errors
///
/// Fails on invalid hyperparameters, dataset problems, a missing
/// warm-start checkpoint, or I/O errors while logging and saving.
pub fn run(config: &TrainConfig) -> Result<()> {
    config.validate()?;
    let train_data = Cifar10::train(&config.data_dir)?;
    let test_data = Cifar10::test(&config.data_dir)?;
    fit(config, &train_data, &test_data)
}

/// Train on already-loaded splits.
///
/// # Errors
///
/// Same failure modes as [`run`], minus dataset loading.
pub fn fit(config: &TrainConfig, train_data: &Cifar10, test_data: &Cifar10) -> Result<()> {
    config.validate()?;
    let mut model = build_model(config)?;

    fs::create_dir_all(&config.ckpt_dir)?;
    if config.gated {
        warm_start(&mut model, config)?;
    }

    let mut log = File::create(log_file(
        &config.ckpt_dir,
        config.gated,
        config.sparsity_ratio,
    ))?;
    writeln!(log, "epoch\ttrain_loss\ttest_loss\ttrain_acc\ttest_acc\tbest_acc")?;

    let criterion = CrossEntropyLoss::new();
    let mut optimizer = Adam::new(model.parameters_mut(), config.lr);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let best_ckpt = checkpoint_file(&config.ckpt_dir, config.gated, config.sparsity_ratio);

    let mut best_acc = 0.0_f32;
    for epoch in 1..=config.epochs {
        println!("Epoch: {epoch}");

        let train_stats = train_epoch(&mut model, train_data, &criterion, &mut optimizer, config, &mut rng);
        let test_stats = evaluate(&mut model, test_data, &criterion, config);

        if test_stats.accuracy > best_acc {
            best_acc = test_stats.accuracy;
            println!(
                "test acc {:.6}. test loss {:.6}",
                test_stats.accuracy, test_stats.loss
            );
            save_state_dict(&best_ckpt, &model.state_dict()).map_err(PodarError::Serialization)?;
        }

        writeln!(
            log,
            "{epoch}\t{}\t{}\t{}\t{}\t{}",
            train_stats.loss, test_stats.loss, train_stats.accuracy, test_stats.accuracy, best_acc
        )?;
    }

    Ok(())
}

/// Either network behind one forward contract for the driver.
#[derive(Debug)]
enum Classifier {
    Plain(CifarNet),
    Gated(GatedCifarNet),
}

impl Classifier {
    /// Logits, plus the gate cost when the network has gates.
    fn forward(&mut self, input: &Tensor) -> (Tensor, Option<Tensor>) {
        match self {
            Classifier::Plain(net) => (net.forward(input), None),
            Classifier::Gated(net) => {
                let (logits, cost) = net.forward(input);
                (logits, Some(cost))
            }
        }
    }

    fn train(&mut self) {
        match self {
            Classifier::Plain(net) => net.train(),
            Classifier::Gated(net) => net.train(),
        }
    }

    fn eval(&mut self) {
        match self {
            Classifier::Plain(net) => net.eval(),
            Classifier::Gated(net) => net.eval(),
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            Classifier::Plain(net) => net.parameters_mut(),
            Classifier::Gated(net) => net.parameters_mut(),
        }
    }

    fn state_dict(&self) -> StateDict {
        match self {
            Classifier::Plain(net) => net.state_dict(),
            Classifier::Gated(net) => net.state_dict(),
        }
    }

    fn load_matching(&mut self, state: &StateDict) -> Result<usize> {
        match self {
            Classifier::Plain(net) => net.load_matching(state),
            Classifier::Gated(net) => net.load_matching(state),
        }
    }
}

fn build_model(config: &TrainConfig) -> Result<Classifier> {
    if config.gated {
        let net = GatedCifarNet::with_seed(config.sparsity_ratio, Some(config.seed))?;
        Ok(Classifier::Gated(net))
    } else {
        Ok(Classifier::Plain(CifarNet::with_seed(Some(config.seed))))
    }
}

/// Seed a gated network from the previous run on the sparsity ladder.
///
/// The dense gated run copies only the plain network's convolution
/// weights, leaving gates and normalization at their initialization.
/// Sparser runs copy every weight and bias from one ratio step up,
/// leaving running statistics fresh.
fn warm_start(model: &mut Classifier, config: &TrainConfig) -> Result<()> {
    let (source, suffixes): (PathBuf, &[&str]) = if config.sparsity_ratio >= 1.0 {
        (
            checkpoint_file(&config.ckpt_dir, false, config.sparsity_ratio),
            &["conv.weight", "conv.bias"],
        )
    } else {
        (
            checkpoint_file(&config.ckpt_dir, true, next_ratio_up(config.sparsity_ratio)),
            &["weight", "bias"],
        )
    };

    let state = load_state_dict(&source).map_err(|e| {
        PodarError::Serialization(format!("warm start from {}: {e}", source.display()))
    })?;
    let applied = model.load_matching(&filter_by_suffix(&state, suffixes))?;
    println!("Warm start from {}: {applied} tensors", source.display());
    Ok(())
}

struct EpochStats {
    loss: f32,
    accuracy: f32,
}

fn train_epoch(
    model: &mut Classifier,
    data: &Cifar10,
    criterion: &CrossEntropyLoss,
    optimizer: &mut Adam,
    config: &TrainConfig,
    rng: &mut StdRng,
) -> EpochStats {
    model.train();

    let mut total_loss = 0.0;
    let mut steps = 0usize;
    let mut correct = 0usize;
    let mut total = 0usize;

    for (images, labels) in data.shuffled_batches(config.batch_size, rng) {
        let (logits, cost) = model.forward(&images);
        let loss = batch_loss(criterion, &logits, &labels, cost, config.lasso_lambda);

        optimizer.zero_grad();
        loss.backward();
        let mut params = model.parameters_mut();
        optimizer.step_with_params(&mut params);

        total_loss += loss.item();
        correct += count_correct(&logits, &labels);
        total += labels.numel();
        steps += 1;

        clear_graph();
    }

    EpochStats {
        loss: total_loss / steps as f32,
        accuracy: 100.0 * correct as f32 / total as f32,
    }
}

fn evaluate(
    model: &mut Classifier,
    data: &Cifar10,
    criterion: &CrossEntropyLoss,
    config: &TrainConfig,
) -> EpochStats {
    model.eval();

    no_grad(|| {
        let mut total_loss = 0.0;
        let mut steps = 0usize;
        let mut correct = 0usize;
        let mut total = 0usize;

        for (images, labels) in data.batches(config.batch_size) {
            let (logits, cost) = model.forward(&images);
            let loss = batch_loss(criterion, &logits, &labels, cost, config.lasso_lambda);

            total_loss += loss.item();
            correct += count_correct(&logits, &labels);
            total += labels.numel();
            steps += 1;
        }

        EpochStats {
            loss: total_loss / steps as f32,
            accuracy: 100.0 * correct as f32 / total as f32,
        }
    })
}

/// Cross-entropy plus the weighted gate cost when one is present.
fn batch_loss(
    criterion: &CrossEntropyLoss,
    logits: &Tensor,
    labels: &Tensor,
    cost: Option<Tensor>,
    lasso_lambda: f32,
) -> Tensor {
    let ce = criterion.forward(logits, labels);
    match cost {
        Some(cost) => ce.add(&cost.mul_scalar(lasso_lambda)),
        None => ce,
    }
}

/// Predictions matching labels, with ties resolved to the lowest class
/// index.
fn count_correct(logits: &Tensor, labels: &Tensor) -> usize {
    let classes = logits.shape()[1];
    logits
        .data()
        .chunks_exact(classes)
        .zip(labels.data())
        .filter(|(row, &label)| argmax(row) == label as usize)
        .count()
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Render a ratio the way it appears in file names, `1.0` included.
fn ratio_tag(ratio: f32) -> String {
    format!("{ratio:?}")
}

/// Next ratio on the 0.1 ladder, snapped back onto the grid so
/// accumulated float error never leaks into file names.
fn next_ratio_up(ratio: f32) -> f32 {
    ((ratio * 10.0).round() + 1.0) / 10.0
}

fn checkpoint_file(dir: &Path, gated: bool, ratio: f32) -> PathBuf {
    dir.join(format!("best_{gated}_{}.safetensors", ratio_tag(ratio)))
}

fn log_file(dir: &Path, gated: bool, ratio: f32) -> PathBuf {
    dir.join(format!("train_log_{gated}_{}.tsv", ratio_tag(ratio)))
}
