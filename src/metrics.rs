use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use crate::data::StandardScaler;
use crate::error::Result;
use crate::utils::{masked_average, valid_mask};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub mae: f64,
    pub smape: f64,
    pub rmse: f64,
}

/// MAE, SMAPE and RMSE over every entry whose ground truth is not (within
/// round-off of) `null_value`.
pub fn masked_metrics<B: Backend>(y_true: Tensor<B, 3>, y_pred: Tensor<B, 3>, null_value: f32) -> Metrics {
    let valid = valid_mask(y_true.clone(), null_value);
    let residual = y_pred.clone() - y_true.clone();
    let abs_error = residual.clone().abs();

    let mae = masked_average(abs_error.clone(), valid.clone());
    let rmse = masked_average(residual.clone() * residual, valid.clone()).sqrt();

    let denominator = (y_pred.abs() + y_true.abs()).clamp_min(1e-8);
    let smape = masked_average(abs_error * 2.0 / denominator, valid);

    Metrics {
        mae: mae.into_scalar().elem::<f64>(),
        smape: smape.into_scalar().elem::<f64>(),
        rmse: rmse.into_scalar().elem::<f64>(),
    }
}

/// Denormalizes epoch-level predictions and reports masked metrics.
#[derive(Debug, Clone)]
pub struct MetricEvaluator {
    scaler: StandardScaler,
    output_dim: usize,
    null_value: f32,
}

impl MetricEvaluator {
    pub fn new(scaler: StandardScaler, output_dim: usize, null_value: f32) -> Self {
        Self {
            scaler,
            output_dim,
            null_value,
        }
    }

    /// `y_true` and `y_pred` are the time-major `[H, B, N * W_out]` tensors
    /// concatenated over an epoch.
    pub fn evaluate<B: Backend>(&self, y_true: Tensor<B, 3>, y_pred: Tensor<B, 3>) -> Result<Metrics> {
        let y_true = self.scaler.inverse_transform(y_true.swap_dims(0, 1), self.output_dim)?;
        let y_pred = self.scaler.inverse_transform(y_pred.swap_dims(0, 1), self.output_dim)?;

        Ok(masked_metrics(y_true, y_pred, self.null_value))
    }
}
