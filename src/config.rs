use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// How the training loss is assembled for a model.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossStrategy {
    /// Sum of the enabled KL, reconstruction, prediction and contrastive terms.
    Composite,
    /// Masked MAE between denormalized target and prediction.
    Direct,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    #[serde(alias = "mae")]
    Mae,
    #[serde(alias = "mse")]
    Mse,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrPolicyKind {
    MultiStep,
    #[serde(alias = "TST")]
    OneCycle,
    Plateau,
}

#[derive(Config, Debug)]
pub struct DataConfig {
    pub root_path: String,

    #[config(default = 32)]
    pub batch_size: usize,

    /// Append a per-node identity channel and extract the auxiliary target embedding.
    #[config(default = false)]
    pub embed: bool,

    /// Target feature indices (after the identity channel is appended) forming the auxiliary embedding.
    #[config(default = "vec![6, 7, 8, 9, 10, 11]")]
    pub aux_features: Vec<usize>,

    #[config(default = 0.7)]
    pub train_ratio: f64,

    #[config(default = 0.1)]
    pub val_ratio: f64,

    #[config(default = 42)]
    pub seed: u64,

    /// Denormalized ground-truth value marking a missing reading.
    #[config(default = 0.0)]
    pub null_value: f32,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Raw feature channels fed to the model.
    pub input_dim: usize,
    /// Feature channels predicted per node.
    pub output_dim: usize,
    pub seq_len: usize,
    pub horizon: usize,

    #[config(default = 1)]
    pub embed_dim: usize,

    #[config(default = 64)]
    pub hidden_dim: usize,

    #[config(default = 16)]
    pub latent_dim: usize,
}

#[derive(Config, Debug)]
pub struct LossConfig {
    #[config(default = "LossStrategy::Direct")]
    pub strategy: LossStrategy,

    #[config(default = "Criterion::Mae")]
    pub criterion: Criterion,

    #[config(default = false)]
    pub kl_loss: bool,

    #[config(default = false)]
    pub recon_loss: bool,

    #[config(default = true)]
    pub pred_loss: bool,

    #[config(default = false)]
    pub cl_loss: bool,

    #[config(default = 1.0)]
    pub recon_coeff: f64,

    #[config(default = 0.1)]
    pub cl_coeff: f64,
}

#[derive(Config, Debug)]
pub struct SchedulerConfig {
    #[config(default = "LrPolicyKind::Plateau")]
    pub policy: LrPolicyKind,

    /// Epoch milestones of the multi-step policy.
    #[config(default = "vec![20, 30, 40]")]
    pub steps: Vec<usize>,

    #[config(default = 0.1)]
    pub lr_decay_ratio: f64,

    #[config(default = 0.3)]
    pub pct_start: f64,

    #[config(default = 0.5)]
    pub plateau_factor: f64,

    #[config(default = 3)]
    pub plateau_patience: usize,
}

#[derive(Config, Debug)]
pub struct TrainConfig {
    #[config(default = 1e-3)]
    pub lr: f64,

    #[config(default = 100)]
    pub epochs: usize,

    #[config(default = 10)]
    pub patience: usize,

    /// Minimum decrease of the validation loss that counts as an improvement.
    #[config(default = 0.0)]
    pub delta: f64,

    #[config(default = 1)]
    pub log_every: usize,

    #[config(default = "SchedulerConfig::new()")]
    pub scheduler: SchedulerConfig,
}

#[derive(Config, Debug)]
pub struct LogConfig {
    #[config(default = "String::from(\"info\")")]
    pub level: String,

    #[config(default = true)]
    pub to_stdout: bool,

    #[config(default = false)]
    pub to_log_file: bool,

    /// Record scalar loss events to `scalars.csv` in the log directory.
    #[config(default = false)]
    pub scalars: bool,

    #[config(default = "String::from(\"logs\")")]
    pub log_base_dir: String,

    #[config(default = "None")]
    pub log_dir: Option<String>,
}

#[derive(Config, Debug)]
pub struct DeviceConfig {
    #[config(default = false)]
    pub use_gpu: bool,

    #[config(default = false)]
    pub use_multi_gpu: bool,

    #[config(default = "vec![0]")]
    pub device_ids: Vec<usize>,
}

#[derive(Config, Debug)]
pub struct ExperimentConfig {
    pub model_name: String,
    pub data: DataConfig,
    pub model: ModelConfig,

    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,

    #[config(default = "TrainConfig::new()")]
    pub train: TrainConfig,

    #[config(default = "LogConfig::new()")]
    pub log: LogConfig,

    #[config(default = "String::from(\"checkpoints\")")]
    pub checkpoints: String,

    #[config(default = "DeviceConfig::new()")]
    pub device: DeviceConfig,
}

impl ExperimentConfig {
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        Self::load(path).map_err(|err| HarnessError::Config(format!("{path}: {err:?}")))
    }

    /// Width of one node's input channels as seen by the model.
    pub fn input_width(&self) -> usize {
        if self.data.embed {
            self.model.input_dim + 1
        } else {
            self.model.input_dim
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let fail = |msg: String| Err(HarnessError::Config(msg));

        if self.model_name.is_empty() {
            return fail("model_name is empty".into());
        }
        if self.data.batch_size == 0 {
            return fail("data.batch_size must be positive".into());
        }
        if self.model.seq_len == 0 || self.model.horizon == 0 {
            return fail("model.seq_len and model.horizon must be positive".into());
        }
        if self.model.input_dim == 0 || self.model.output_dim == 0 {
            return fail("model.input_dim and model.output_dim must be positive".into());
        }
        if self.data.embed && self.model.embed_dim != 1 {
            return fail(format!(
                "model.embed_dim must be 1 (one node identity channel), got {}",
                self.model.embed_dim
            ));
        }
        if self.train.log_every == 0 {
            return fail("train.log_every must be positive".into());
        }
        if !(self.train.delta >= 0.0) {
            return fail(format!("train.delta must be non-negative, got {}", self.train.delta));
        }
        if self.train.lr <= 0.0 {
            return fail(format!("train.lr must be positive, got {}", self.train.lr));
        }

        let ratios = self.data.train_ratio + self.data.val_ratio;
        if self.data.train_ratio <= 0.0 || self.data.val_ratio <= 0.0 || ratios > 1.0 {
            return fail(format!(
                "invalid split ratios train={} val={}",
                self.data.train_ratio, self.data.val_ratio
            ));
        }

        let scheduler = &self.train.scheduler;
        if scheduler.policy == LrPolicyKind::OneCycle
            && !(scheduler.pct_start > 0.0 && scheduler.pct_start < 1.0)
        {
            return fail(format!(
                "train.scheduler.pct_start must lie in (0, 1), got {}",
                scheduler.pct_start
            ));
        }
        if scheduler.policy == LrPolicyKind::Plateau
            && !(scheduler.plateau_factor > 0.0 && scheduler.plateau_factor < 1.0)
        {
            return fail(format!(
                "train.scheduler.plateau_factor must lie in (0, 1), got {}",
                scheduler.plateau_factor
            ));
        }

        if self.data.embed && self.data.aux_features.is_empty() {
            return fail("data.aux_features is empty while embedding is enabled".into());
        }

        Ok(())
    }
}
