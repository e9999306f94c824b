use std::f64::consts::PI;

use tracing::info;

use crate::config::{LrPolicyKind, SchedulerConfig};
use crate::error::{HarnessError, Result};

const ONE_CYCLE_DIV_FACTOR: f64 = 25.0;
const ONE_CYCLE_FINAL_DIV_FACTOR: f64 = 1e4;
const PLATEAU_THRESHOLD: f64 = 1e-4;
const PLATEAU_EPS: f64 = 1e-8;

/// Decays the learning rate by `gamma` at every milestone epoch.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    step_count: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            base_lr,
            milestones,
            gamma,
            step_count: 0,
        }
    }

    fn step(&mut self) {
        self.step_count += 1;
    }

    fn lr(&self) -> f64 {
        let passed = self
            .milestones
            .iter()
            .filter(|milestone| **milestone <= self.step_count)
            .count();
        self.base_lr * self.gamma.powi(passed as i32)
    }
}

/// Cosine one-cycle policy over `epochs * steps_per_epoch` batches.
#[derive(Debug, Clone)]
pub struct OneCycleLr {
    initial_lr: f64,
    max_lr: f64,
    min_lr: f64,
    warmup_end: f64,
    total_end: f64,
    step_count: usize,
}

impl OneCycleLr {
    pub fn new(max_lr: f64, epochs: usize, steps_per_epoch: usize, pct_start: f64) -> Self {
        let total_steps = (epochs * steps_per_epoch) as f64;
        let initial_lr = max_lr / ONE_CYCLE_DIV_FACTOR;

        Self {
            initial_lr,
            max_lr,
            min_lr: initial_lr / ONE_CYCLE_FINAL_DIV_FACTOR,
            warmup_end: (pct_start * total_steps - 1.0).max(0.0),
            total_end: (total_steps - 1.0).max(0.0),
            step_count: 0,
        }
    }

    fn step(&mut self) {
        self.step_count += 1;
    }

    fn lr(&self) -> f64 {
        let step = self.step_count as f64;
        if step <= self.warmup_end {
            let pct = if self.warmup_end > 0.0 { step / self.warmup_end } else { 1.0 };
            cosine_anneal(self.initial_lr, self.max_lr, pct)
        } else {
            let span = (self.total_end - self.warmup_end).max(1.0);
            let pct = ((step - self.warmup_end) / span).min(1.0);
            cosine_anneal(self.max_lr, self.min_lr, pct)
        }
    }
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// Halves (by `factor`) the learning rate once the validation loss has not
/// improved for more than `patience` epochs.
#[derive(Debug, Clone)]
pub struct PlateauLr {
    lr: f64,
    factor: f64,
    patience: usize,
    best: f64,
    bad_epochs: usize,
    step_count: usize,
}

impl PlateauLr {
    pub fn new(lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            lr,
            factor,
            patience,
            best: f64::INFINITY,
            bad_epochs: 0,
            step_count: 0,
        }
    }

    fn step(&mut self, metric: f64) {
        self.step_count += 1;

        if metric < self.best * (1.0 - PLATEAU_THRESHOLD) {
            self.best = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.patience {
            let new_lr = self.lr * self.factor;
            if self.lr - new_lr > PLATEAU_EPS {
                info!("Reducing learning rate to {:.6e}", new_lr);
                self.lr = new_lr;
            }
            self.bad_epochs = 0;
        }
    }
}

/// The three mutually exclusive learning-rate policies.
#[derive(Debug, Clone)]
pub enum LrScheduler {
    MultiStep(MultiStepLr),
    OneCycle(OneCycleLr),
    Plateau(PlateauLr),
}

impl LrScheduler {
    pub fn from_config(
        config: &SchedulerConfig,
        lr: f64,
        epochs: usize,
        steps_per_epoch: usize,
    ) -> Result<Self> {
        let scheduler = match config.policy {
            LrPolicyKind::MultiStep => LrScheduler::MultiStep(MultiStepLr::new(
                lr,
                config.steps.clone(),
                config.lr_decay_ratio,
            )),
            LrPolicyKind::OneCycle => {
                if steps_per_epoch == 0 {
                    return Err(HarnessError::Config(
                        "one-cycle policy needs at least one training batch per epoch".into(),
                    ));
                }
                LrScheduler::OneCycle(OneCycleLr::new(lr, epochs, steps_per_epoch, config.pct_start))
            }
            LrPolicyKind::Plateau => LrScheduler::Plateau(PlateauLr::new(
                lr,
                config.plateau_factor,
                config.plateau_patience,
            )),
        };

        Ok(scheduler)
    }

    pub fn lr(&self) -> f64 {
        match self {
            LrScheduler::MultiStep(s) => s.lr(),
            LrScheduler::OneCycle(s) => s.lr(),
            LrScheduler::Plateau(s) => s.lr,
        }
    }

    /// Called after every optimizer step.
    pub fn on_batch_end(&mut self) {
        if let LrScheduler::OneCycle(s) = self {
            s.step();
        }
    }

    /// Called once per epoch after validation.
    pub fn on_epoch_end(&mut self, val_loss: f64) {
        match self {
            LrScheduler::MultiStep(s) => s.step(),
            LrScheduler::OneCycle(_) => {}
            LrScheduler::Plateau(s) => s.step(val_loss),
        }
    }

    pub fn step_count(&self) -> usize {
        match self {
            LrScheduler::MultiStep(s) => s.step_count,
            LrScheduler::OneCycle(s) => s.step_count,
            LrScheduler::Plateau(s) => s.step_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    fn run_epoch(scheduler: &mut LrScheduler, batches: usize, val_loss: f64) {
        for _ in 0..batches {
            scheduler.on_batch_end();
        }
        scheduler.on_epoch_end(val_loss);
    }

    #[test]
    fn multi_step_steps_once_per_epoch() {
        let config = SchedulerConfig::new()
            .with_policy(LrPolicyKind::MultiStep)
            .with_steps(vec![2, 4])
            .with_lr_decay_ratio(0.1);
        let mut scheduler = LrScheduler::from_config(&config, 1.0, 10, 7).unwrap();

        run_epoch(&mut scheduler, 7, 1.0);
        assert_eq!(scheduler.step_count(), 1);
        assert_close(scheduler.lr(), 1.0);

        run_epoch(&mut scheduler, 3, 1.0);
        assert_eq!(scheduler.step_count(), 2);
        assert_close(scheduler.lr(), 0.1);

        run_epoch(&mut scheduler, 7, 1.0);
        run_epoch(&mut scheduler, 7, 1.0);
        assert_close(scheduler.lr(), 0.01);
    }

    #[test]
    fn one_cycle_steps_per_batch_only() {
        let config = SchedulerConfig::new().with_policy(LrPolicyKind::OneCycle);
        let mut scheduler = LrScheduler::from_config(&config, 1.0, 2, 4).unwrap();

        run_epoch(&mut scheduler, 4, 1.0);

        assert_eq!(scheduler.step_count(), 4);
    }

    #[test]
    fn one_cycle_warms_up_then_anneals() {
        let mut scheduler = OneCycleLr::new(1.0, 1, 11, 0.5);
        assert_close(scheduler.lr(), 1.0 / 25.0);

        // warmup ends at step 0.5 * 11 - 1 = 4.5
        let mut peak: f64 = 0.0;
        for _ in 0..5 {
            scheduler.step();
            peak = peak.max(scheduler.lr());
        }
        assert!(peak > 0.9);

        for _ in 0..5 {
            scheduler.step();
        }
        assert_close(scheduler.lr(), 1.0 / 25.0 / 1e4);
    }

    #[test]
    fn plateau_reduces_after_patience_is_exceeded() {
        let config = SchedulerConfig::new()
            .with_plateau_factor(0.5)
            .with_plateau_patience(2);
        let mut scheduler = LrScheduler::from_config(&config, 1.0, 10, 5).unwrap();

        scheduler.on_epoch_end(1.0);
        scheduler.on_epoch_end(1.0);
        scheduler.on_epoch_end(1.0);
        assert_close(scheduler.lr(), 1.0);

        scheduler.on_epoch_end(1.0);
        assert_close(scheduler.lr(), 0.5);
        assert_eq!(scheduler.step_count(), 4);
    }

    #[test]
    fn plateau_ignores_batches() {
        let mut scheduler = LrScheduler::Plateau(PlateauLr::new(1.0, 0.5, 0));

        scheduler.on_batch_end();

        assert_eq!(scheduler.step_count(), 0);
    }
}
