use burn::tensor::{backend::Backend, Tensor};

use crate::config::{Criterion, LossConfig, LossStrategy};
use crate::data::StandardScaler;
use crate::error::{HarnessError, Result};
use crate::model::ForecastOutput;
use crate::utils::{masked_average, mean_absolute_error, mean_squared_error, valid_mask};

impl Criterion {
    pub fn forward<B: Backend, const D: usize>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        match self {
            Criterion::Mae => mean_absolute_error(y_true, y_pred),
            Criterion::Mse => mean_squared_error(y_true, y_pred),
        }
    }
}

/// `0.5 * (exp(logvar) + mean^2 - logvar - 1)`, summed over nodes and
/// latent dims, averaged over the leading dims.
pub fn kl_loss<B: Backend>(mean: Tensor<B, 4>, log_var: Tensor<B, 4>) -> Tensor<B, 1> {
    let var = log_var.clone().exp();
    let loss = (var + mean.clone() * mean - log_var - 1.0) * 0.5;

    loss.sum_dim(3).sum_dim(2).mean()
}

/// Masked MAE between denormalized ground truth and prediction.
pub fn masked_mae<B: Backend>(y_true: Tensor<B, 3>, y_pred: Tensor<B, 3>, null_value: f32) -> Tensor<B, 1> {
    let valid = valid_mask(y_true.clone(), null_value);
    masked_average((y_pred - y_true).abs(), valid)
}

/// Combines the configured loss terms into the scalar training loss.
#[derive(Debug, Clone)]
pub struct LossAssembler {
    config: LossConfig,
    scaler: StandardScaler,
    output_dim: usize,
    null_value: f32,
}

impl LossAssembler {
    pub fn new(config: &LossConfig, scaler: StandardScaler, output_dim: usize, null_value: f32) -> Self {
        Self {
            config: config.clone(),
            scaler,
            output_dim,
            null_value,
        }
    }

    pub fn criterion(&self) -> Criterion {
        self.config.criterion
    }

    pub fn has_terms(&self) -> bool {
        let c = &self.config;
        c.kl_loss || c.recon_loss || c.pred_loss || c.cl_loss
    }

    /// `input_first_channel` is the ground-truth `[T, B, N]` the
    /// reconstruction term compares against.
    pub fn forward<B: Backend>(
        &self,
        input_first_channel: Tensor<B, 3>,
        targets: Tensor<B, 3>,
        output: &ForecastOutput<B>,
    ) -> Result<Tensor<B, 1>> {
        match self.config.strategy {
            LossStrategy::Direct => self.direct(targets, output.prediction.clone()),
            LossStrategy::Composite => self.composite(input_first_channel, targets, output),
        }
    }

    fn direct<B: Backend>(&self, targets: Tensor<B, 3>, prediction: Tensor<B, 3>) -> Result<Tensor<B, 1>> {
        let y_true = self.scaler.inverse_transform(targets, self.output_dim)?;
        let y_pred = self.scaler.inverse_transform(prediction, self.output_dim)?;

        Ok(masked_mae(y_true, y_pred, self.null_value))
    }

    fn composite<B: Backend>(
        &self,
        input_first_channel: Tensor<B, 3>,
        targets: Tensor<B, 3>,
        output: &ForecastOutput<B>,
    ) -> Result<Tensor<B, 1>> {
        let config = &self.config;
        let criterion = config.criterion;
        let mut loss: Tensor<B, 1> = Tensor::zeros([1]).to_device(&targets.device());

        let needs_state = config.kl_loss || config.recon_loss || config.cl_loss;
        let state = match (&output.variational, needs_state) {
            (Some(state), _) => Some(state),
            (None, false) => None,
            (None, true) => return Err(HarnessError::MissingCapability("a variational state")),
        };

        if let Some(state) = state {
            if config.kl_loss {
                loss = loss + kl_loss(state.mean.clone(), state.log_var.clone());
            }
            if config.recon_loss {
                let recon = criterion.forward(input_first_channel, state.reconstruction.clone());
                loss = loss + recon * config.recon_coeff;
            }
            if config.cl_loss {
                let contrastive = state
                    .contrastive
                    .clone()
                    .ok_or(HarnessError::MissingCapability("a contrastive loss"))?;
                loss = loss + contrastive * config.cl_coeff;
            }
        }

        if config.pred_loss {
            loss = loss + criterion.forward(targets, output.prediction.clone());
        }

        Ok(loss)
    }
}
