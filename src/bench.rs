//! Holdout evaluation of a training file.

use std::fmt;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{IdsError, Result};
use crate::id3::{self, DecisionTree};
use crate::record::{Dataset, Record};

/// Share of the shuffled records used for training.
pub const TRAINING_SHARE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub trained_on: usize,
    pub total: usize,
    pub accuracy: f64,
    /// Gains over the training half, highest first.
    pub gains: Vec<(String, f64)>,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training on {}/{} packets", self.trained_on, self.total)?;
        writeln!(f, "{:.2}% model accuracy", self.accuracy)?;
        writeln!(f, "Entropy Gains:")?;
        for (attribute, gain) in &self.gains {
            writeln!(f, "{gain:.4}: {attribute}")?;
        }
        Ok(())
    }
}

pub fn run(path: impl AsRef<Path>, seed: Option<u64>) -> Result<BenchReport> {
    let dataset = Dataset::load(path)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    evaluate(&dataset, &mut rng)
}

pub fn evaluate<R: Rng + ?Sized>(dataset: &Dataset, rng: &mut R) -> Result<BenchReport> {
    let shuffled = dataset.shuffled(rng);
    let (training, testing) = shuffled.split(TRAINING_SHARE);
    if training.is_empty() {
        return Err(IdsError::EmptyInput("holdout training split"));
    }

    let tree = DecisionTree::induce(training, dataset.attributes())?;
    Ok(BenchReport {
        trained_on: training.len(),
        total: dataset.len(),
        accuracy: tree.accuracy(testing),
        gains: rank_gains(training, dataset.attributes())?,
    })
}

/// Gains computed in parallel, sorted descending; equal gains keep attribute
/// order.
pub fn rank_gains(records: &[Record], attributes: &[String]) -> Result<Vec<(String, f64)>> {
    let mut gains = attributes
        .par_iter()
        .map(|attribute| Ok((attribute.clone(), id3::gain(records, attribute)?)))
        .collect::<Result<Vec<_>>>()?;
    gains.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(gains)
}
