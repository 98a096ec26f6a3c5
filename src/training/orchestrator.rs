use std::ops::Range;

use log::{debug, info};
use rand::Rng;

use crate::{
    config::EngineConfig,
    dataset::{DataErr, Dataset, Trial, one_hot},
    error::Result,
    network::Network,
    pool::WorkerPool,
    sync::Gate,
    worker::JobKind,
};

/// What one trial produced, for logging and score streams.
///
/// The mean squared error is reporting-only; the delta rule drives the
/// weight updates.
#[derive(Debug, Clone)]
pub struct TrialScore {
    pub target: Vec<f32>,
    pub output: Vec<f32>,
    pub mse: f32,
}

/// Per-trial scores of one applied batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub scores: Vec<TrialScore>,
}

impl BatchReport {
    /// Mean of the per-trial mean squared errors.
    pub fn mean_squared_error(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.;
        }
        self.scores.iter().map(|s| s.mse).sum::<f32>() / self.scores.len() as f32
    }
}

/// The master-side control loop.
///
/// Owns the pool and the dataset collaborator, drives forward/backward
/// phases trial by trial, accumulates the workers' weight updates across a
/// batch and applies the sum once per batch (batch semantics, not online).
pub struct BatchOrchestrator<G: Gate, D: Dataset> {
    pool: WorkerPool<G>,
    dataset: D,
    batch_acc: Vec<f32>,
}

impl<G: Gate, D: Dataset> BatchOrchestrator<G, D> {
    /// Wraps an already-spawned pool.
    pub fn new(pool: WorkerPool<G>, dataset: D) -> Self {
        let batch_acc = vec![0.; pool.net().shape().weight_count()];
        Self {
            pool,
            dataset,
            batch_acc,
        }
    }

    /// Validates `config`, builds a randomly initialized network and spawns
    /// the pool around it.
    ///
    /// # Errors
    /// Fails fast on a bad configuration; nothing is spawned in that case.
    pub fn spawn<R: Rng>(config: EngineConfig, dataset: D, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let net = Network::new(config.shape, rng)?;
        Ok(Self::new(WorkerPool::spawn(net, config.worker_count)?, dataset))
    }

    pub fn pool(&self) -> &WorkerPool<G> {
        &self.pool
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Runs one trial by dataset index: forward, score, backward, and fold
    /// the workers' weight-update contributions into the batch accumulator.
    /// Weights are untouched until [`apply_batch`](Self::apply_batch).
    pub fn run_trial(&mut self, index: u32) -> Result<TrialScore> {
        let trial = self.dataset.trial(index)?;
        self.step(&trial)
    }

    /// Applies the accumulated batch update to the weights once and zeroes
    /// the accumulator. The sum is applied as-is: the learning rate is
    /// already baked into every per-trial contribution.
    pub fn apply_batch(&mut self) -> Result<()> {
        self.pool.net().apply_update(&self.batch_acc)?;
        self.batch_acc.fill(0.);
        Ok(())
    }

    /// Runs one batch of `trials_per_batch` random trials and applies the
    /// summed update.
    ///
    /// # Errors
    /// Any failure fails the whole batch: nothing is applied, the partial
    /// accumulator is discarded and no retry is attempted.
    pub fn train_batch<R: Rng>(
        &mut self,
        trials_per_batch: usize,
        rng: &mut R,
    ) -> Result<BatchReport> {
        let mut scores = Vec::with_capacity(trials_per_batch);
        for _ in 0..trials_per_batch {
            let result = self
                .dataset
                .random_trial(rng)
                .map_err(Into::into)
                .and_then(|trial| self.step(&trial));
            match result {
                Ok(score) => scores.push(score),
                Err(e) => {
                    self.discard_batch();
                    return Err(e);
                }
            }
        }
        self.apply_batch()?;

        let report = BatchReport { scores };
        debug!(trials = trials_per_batch; "batch applied, mse {:.6}", report.mean_squared_error());
        Ok(report)
    }

    /// Convenience driver: `batches` consecutive batches.
    pub fn train<R: Rng>(
        &mut self,
        batches: usize,
        trials_per_batch: usize,
        rng: &mut R,
    ) -> Result<Vec<BatchReport>> {
        let mut reports = Vec::with_capacity(batches);
        for _ in 0..batches {
            reports.push(self.train_batch(trials_per_batch, rng)?);
        }
        Ok(reports)
    }

    /// Forward-only passes over a held-out index range; classification is
    /// the stable arg-max over the output vector (first maximum wins).
    /// Returns `correct / total`.
    pub fn evaluate(&mut self, validation: Range<u32>) -> Result<f32> {
        let total = validation.len();
        if total == 0 {
            return Ok(0.);
        }

        let classes = self.pool.net().shape().output();
        let mut correct = 0usize;
        for index in validation {
            let trial = self.dataset.trial(index)?;
            if trial.label == 0 || trial.label as usize > classes {
                return Err(DataErr::BadLabel {
                    label: trial.label,
                    classes,
                }
                .into());
            }

            self.pool.net().set_input(&trial.features)?;
            self.pool.run_phase(JobKind::Forward)?;

            let output = self.pool.net().output();
            if arg_max(&output) + 1 == trial.label as usize {
                correct += 1;
            }
        }

        let accuracy = correct as f32 / total as f32;
        info!(samples = total; "validation accuracy {accuracy:.3}");
        Ok(accuracy)
    }

    /// Orchestrated shutdown, the only cancellation path: workers observe
    /// the cleared flag through one final gate opening and exit.
    pub fn shutdown(self) -> Result<()> {
        self.pool.shutdown()
    }

    /// Throws a failed batch away: the workers' private buffers and the
    /// batch accumulator are zeroed, so no partial per-trial delta can leak
    /// into the next applied update.
    fn discard_batch(&mut self) {
        self.pool.drain_grads_into(&mut self.batch_acc);
        self.batch_acc.fill(0.);
    }

    fn step(&mut self, trial: &Trial) -> Result<TrialScore> {
        let target = one_hot(trial.label, self.pool.net().shape().output())?;

        self.pool.net().set_input(&trial.features)?;
        self.pool.set_targets(&target)?;

        self.pool.run_phase(JobKind::Forward)?;
        let output = self.pool.net().output();
        let mse = mean_squared_error(&target, &output);

        self.pool.run_phase(JobKind::Backward)?;
        self.pool.drain_grads_into(&mut self.batch_acc);

        debug!(label = trial.label, mse = mse; "trial scored");
        Ok(TrialScore {
            target,
            output,
            mse,
        })
    }
}

fn mean_squared_error(target: &[f32], output: &[f32]) -> f32 {
    let sum: f32 = target
        .iter()
        .zip(output)
        .map(|(t, o)| (t - o) * (t - o))
        .sum();
    sum / target.len() as f32
}

/// Stable left-to-right arg-max: the first index achieving the maximum wins.
fn arg_max(values: &[f32]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_max_tie_break_is_first_index() {
        assert_eq!(arg_max(&[0.5, 0.5, 0.1]), 0);
        assert_eq!(arg_max(&[0.1, 0.5, 0.5]), 1);
        assert_eq!(arg_max(&[0.0]), 0);
    }

    #[test]
    fn test_mse_is_the_mean_over_classes() {
        let mse = mean_squared_error(&[1., 0.], &[0.5, 0.5]);
        assert!((mse - 0.25).abs() < 1e-6);
    }
}
