//! Integration tests for the gated CIFAR-10 classifier.
//!
//! These tests verify end-to-end workflows combining the dataset, both
//! network variants, checkpoint serialization, and the training driver.

use podar::autograd::no_grad;
use podar::data::Cifar10;
use podar::model::{CifarNet, GatedCifarNet, NUM_CLASSES};
use podar::nn::serialize::{filter_by_suffix, load_state_dict, save_state_dict};
use podar::serialization::safetensors::load_safetensors;
use podar::train::{fit, TrainConfig};

#[test]
fn test_dataset_to_logits_pipeline() {
    // Create a small synthetic split and pull one batch
    let data = Cifar10::synthetic(4, 3);
    let (images, labels) = data.batches(4).next().expect("one batch");
    assert_eq!(images.shape(), &[4, 3, 32, 32]);
    assert_eq!(labels.shape(), &[4]);

    // Plain network: logits only
    let mut plain = CifarNet::with_seed(Some(1));
    plain.eval();
    let logits = no_grad(|| plain.forward(&images));
    assert_eq!(logits.shape(), &[4, NUM_CLASSES]);

    // Gated network: logits plus a non-negative scalar gate cost
    let mut gated = GatedCifarNet::with_seed(0.5, Some(1)).expect("valid ratio");
    gated.eval();
    let (logits, cost) = no_grad(|| gated.forward(&images));
    assert_eq!(logits.shape(), &[4, NUM_CLASSES]);
    assert_eq!(cost.shape(), &[1]);
    assert!(cost.item() >= 0.0);
}

#[test]
fn test_same_seed_networks_share_convolutions() {
    // The gated network reuses the plain initialization for its
    // convolutions, so a shared seed yields identical conv weights.
    let plain = CifarNet::with_seed(Some(11)).state_dict();
    let gated = GatedCifarNet::with_seed(0.5, Some(11))
        .expect("valid ratio")
        .state_dict();

    for i in 0..8 {
        let name = format!("layers.{i}.conv.weight");
        assert_eq!(plain[&name], gated[&name], "{name}");
    }
}

#[test]
fn test_plain_checkpoint_transfers_to_gated_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dense.safetensors");

    // 1. Save a plain network's checkpoint
    let plain = CifarNet::with_seed(Some(7));
    save_state_dict(&path, &plain.state_dict()).unwrap();

    // 2. Load it back and keep only the convolution parameters
    let state = load_state_dict(&path).unwrap();
    let conv_only = filter_by_suffix(&state, &["conv.weight", "conv.bias"]);

    // 3. Seed a differently-initialized gated network from it
    let mut gated = GatedCifarNet::with_seed(0.5, Some(99)).expect("valid ratio");
    let applied = gated.load_matching(&conv_only).unwrap();
    assert_eq!(applied, 16); // 8 blocks x (weight, bias)

    // Convolutions now match the checkpoint; the gate kept its own
    // initialization (bias starts at 1.0)
    let restored = gated.state_dict();
    assert_eq!(
        restored["layers.0.conv.weight"],
        state["layers.0.conv.weight"]
    );
    assert!(restored["layers.3.gate.bias"]
        .0
        .iter()
        .all(|&b| (b - 1.0).abs() < 1e-6));
}

#[test]
fn test_checkpoint_is_standard_safetensors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");

    let net = CifarNet::with_seed(Some(2));
    save_state_dict(&path, &net.state_dict()).unwrap();

    // The file parses with the format-level reader, not just the
    // state-dict layer on top of it
    let (metadata, raw_data) = load_safetensors(&path).unwrap();
    assert_eq!(metadata.len(), 50); // 8 blocks x 6 entries + classifier

    let head = &metadata["classifier.weight"];
    assert_eq!(head.dtype, "F32");
    assert_eq!(head.shape, vec![NUM_CLASSES, 192]);

    // Offsets tile the data section exactly
    let covered: usize = metadata
        .values()
        .map(|m| m.data_offsets[1] - m.data_offsets[0])
        .sum();
    assert_eq!(covered, raw_data.len());
}

#[test]
fn test_sparsity_ladder_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let train_data = Cifar10::synthetic(2, 31);
    let test_data = Cifar10::synthetic(2, 32);

    let base = TrainConfig {
        epochs: 1,
        batch_size: 2,
        ckpt_dir: dir.path().to_path_buf(),
        ..TrainConfig::default()
    };

    // 1. Dense plain run
    fit(&base, &train_data, &test_data).unwrap();

    // fit only checkpoints on an accuracy improvement, so pin this rung
    // down before stepping onto the ladder
    save_state_dict(
        &dir.path().join("best_false_1.0.safetensors"),
        &CifarNet::with_seed(Some(base.seed)).state_dict(),
    )
    .unwrap();

    // 2. Dense gated run, warm-started from the plain convolutions
    let dense = TrainConfig {
        gated: true,
        ..base.clone()
    };
    fit(&dense, &train_data, &test_data).unwrap();

    save_state_dict(
        &dir.path().join("best_true_1.0.safetensors"),
        &GatedCifarNet::with_seed(1.0, Some(base.seed))
            .expect("valid ratio")
            .state_dict(),
    )
    .unwrap();

    // 3. Sparser run, warm-started from one ratio step up
    let sparse = TrainConfig {
        gated: true,
        sparsity_ratio: 0.9,
        ..base.clone()
    };
    fit(&sparse, &train_data, &test_data).unwrap();

    // Every rung leaves its own log with a header and one epoch row
    for name in [
        "train_log_false_1.0.tsv",
        "train_log_true_1.0.tsv",
        "train_log_true_0.9.tsv",
    ] {
        let log = std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(log.lines().count(), 2, "{name}");
    }
}
