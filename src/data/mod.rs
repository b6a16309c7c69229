//! CIFAR-10 dataset loading and batching.
//!
//! Reads the binary CIFAR-10 distribution: each record is one label
//! byte followed by 3072 pixel bytes (1024 red, then green, then blue,
//! row-major 32x32). Pixels are scaled to `[0, 1]` and normalized with
//! the dataset's per-channel mean and standard deviation at load time,
//! so batches come out ready for the network.
//!
//! # Examples
//!
//! ```no_run
//! use podar::data::Cifar10;
//!
//! let train = Cifar10::train("data/cifar-10-batches-bin")?;
//! for (images, labels) in train.batches(256) {
//!     assert_eq!(images.shape()[1..], [3, 32, 32]);
//!     assert_eq!(labels.shape(), &[images.shape()[0]]);
//! }
//! # Ok::<(), podar::PodarError>(())
//! ```

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::autograd::Tensor;
use crate::error::{PodarError, Result};
use crate::model::NUM_CLASSES;

/// Image side length in pixels.
pub const IMAGE_SIDE: usize = 32;

/// Color channels per image.
pub const IMAGE_CHANNELS: usize = 3;

/// Per-channel mean of the training set after scaling to `[0, 1]`.
pub const CHANNEL_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];

/// Per-channel standard deviation of the training set.
pub const CHANNEL_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

const PIXELS_PER_CHANNEL: usize = IMAGE_SIDE * IMAGE_SIDE;
const IMAGE_FLOATS: usize = IMAGE_CHANNELS * PIXELS_PER_CHANNEL;
const RECORD_BYTES: usize = 1 + IMAGE_FLOATS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// An in-memory CIFAR-10 split with normalized images.
///
/// Images are stored contiguously in `[n, channel, row, col]` order,
/// labels as class indices. Batching never copies the dataset; each
/// yielded batch materializes only its own tensors.
#[derive(Debug, Clone)]
pub struct Cifar10 {
    images: Vec<f32>,
    labels: Vec<f32>,
}

impl Cifar10 {
    /// Load the five training batches from `dir`.
    ///
    /// # Errors
    ///
    /// Fails when any batch file is missing, truncated, or carries an
    /// out-of-range label.
    pub fn train(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut images = Vec::new();
        let mut labels = Vec::new();
        for file in TRAIN_FILES {
            read_batch_file(&dir.join(file), &mut images, &mut labels)?;
        }
        Ok(Self { images, labels })
    }

    /// Load the test batch from `dir`.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing, truncated, or carries an
    /// out-of-range label.
    pub fn test(dir: impl AsRef<Path>) -> Result<Self> {
        let mut images = Vec::new();
        let mut labels = Vec::new();
        read_batch_file(&dir.as_ref().join(TEST_FILE), &mut images, &mut labels)?;
        Ok(Self { images, labels })
    }

    /// Build a split from already-normalized image data.
    ///
    /// `images` must hold `labels.len() * 3072` floats in
    /// `[n, channel, row, col]` order.
    ///
    /// # Errors
    ///
    /// Fails on a length mismatch or an out-of-range label.
    pub fn from_normalized(images: Vec<f32>, labels: Vec<f32>) -> Result<Self> {
        if images.len() != labels.len() * IMAGE_FLOATS {
            return Err(PodarError::DimensionMismatch {
                expected: format!(
                    "{} image floats for {} labels",
                    labels.len() * IMAGE_FLOATS,
                    labels.len()
                ),
                actual: format!("{}", images.len()),
            });
        }
        for &label in &labels {
            if label < 0.0 || label >= NUM_CLASSES as f32 || label.fract() != 0.0 {
                return Err(PodarError::Other(format!(
                    "Label {label} is not a class index below {NUM_CLASSES}"
                )));
            }
        }
        Ok(Self { images, labels })
    }

    /// Generate a random split for tests and benchmarks.
    #[must_use]
    pub fn synthetic(n: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let images = (0..n * IMAGE_FLOATS)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let labels = (0..n)
            .map(|_| rng.gen_range(0..NUM_CLASSES) as f32)
            .collect();
        Self { images, labels }
    }

    /// Number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when the split holds no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Normalized pixel data for one example.
    #[must_use]
    pub fn image(&self, index: usize) -> &[f32] {
        &self.images[index * IMAGE_FLOATS..(index + 1) * IMAGE_FLOATS]
    }

    /// Class index for one example.
    #[must_use]
    pub fn label(&self, index: usize) -> usize {
        self.labels[index] as usize
    }

    /// Iterate the split in stored order, `batch_size` examples at a
    /// time. The final batch may be smaller.
    #[must_use]
    pub fn batches(&self, batch_size: usize) -> Batches<'_> {
        assert!(batch_size > 0, "batch_size must be positive");
        Batches {
            data: self,
            order: (0..self.len()).collect(),
            batch_size,
            cursor: 0,
        }
    }

    /// Iterate the split in a fresh random order drawn from `rng`.
    ///
    /// The caller holds the generator, so one seeded generator yields a
    /// different permutation every epoch while staying reproducible.
    #[must_use]
    pub fn shuffled_batches(&self, batch_size: usize, rng: &mut StdRng) -> Batches<'_> {
        assert!(batch_size > 0, "batch_size must be positive");
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        Batches {
            data: self,
            order,
            batch_size,
            cursor: 0,
        }
    }
}

/// Iterator over `(images, labels)` tensor pairs.
///
/// Images come out as `[batch, 3, 32, 32]`, labels as `[batch]` class
/// indices.
#[derive(Debug)]
pub struct Batches<'a> {
    data: &'a Cifar10,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = (Tensor, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let mut images = Vec::with_capacity(indices.len() * IMAGE_FLOATS);
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            images.extend_from_slice(self.data.image(idx));
            labels.push(self.data.labels[idx]);
        }

        let batch = indices.len();
        Some((
            Tensor::new(&images, &[batch, IMAGE_CHANNELS, IMAGE_SIDE, IMAGE_SIDE]),
            Tensor::new(&labels, &[batch]),
        ))
    }
}

/// Decode one batch file, appending normalized images and labels.
fn read_batch_file(path: &Path, images: &mut Vec<f32>, labels: &mut Vec<f32>) -> Result<()> {
    let bytes =
        fs::read(path).map_err(|e| PodarError::dataset(path, format!("cannot read: {e}")))?;

    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(PodarError::dataset(
            path,
            format!(
                "expected whole {RECORD_BYTES}-byte records, file holds {} bytes",
                bytes.len()
            ),
        ));
    }

    images.reserve(bytes.len() / RECORD_BYTES * IMAGE_FLOATS);
    for record in bytes.chunks_exact(RECORD_BYTES) {
        let label = record[0];
        if usize::from(label) >= NUM_CLASSES {
            return Err(PodarError::dataset(
                path,
                format!("label {label} out of range for {NUM_CLASSES} classes"),
            ));
        }
        labels.push(f32::from(label));

        for (c, plane) in record[1..].chunks_exact(PIXELS_PER_CHANNEL).enumerate() {
            for &byte in plane {
                let scaled = f32::from(byte) / 255.0;
                images.push((scaled - CHANNEL_MEAN[c]) / CHANNEL_STD[c]);
            }
        }
    }

    Ok(())
}
