use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Per-feature standardization fitted on the training portion of a series.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl StandardScaler {
    pub fn identity(num_features: usize) -> Self {
        Self {
            mean: vec![0.0; num_features],
            scale: vec![1.0; num_features],
        }
    }

    /// Fits mean and population standard deviation of every feature over
    /// all time steps and nodes of `series` (`[time][node][feature]`).
    pub fn fit(series: &[Vec<Vec<f32>>]) -> Result<Self> {
        let num_features = series
            .first()
            .and_then(|step| step.first())
            .map(|node| node.len())
            .ok_or_else(|| HarnessError::Data("cannot fit a scaler on an empty series".into()))?;

        let mut sum = vec![0.0f64; num_features];
        let mut sum_sq = vec![0.0f64; num_features];
        let mut count = 0usize;

        for node in series.iter().flatten() {
            if node.len() != num_features {
                return Err(HarnessError::shape("scaler fit", num_features, node.len()));
            }
            for (f, value) in node.iter().enumerate() {
                let value = *value as f64;
                sum[f] += value;
                sum_sq[f] += value * value;
            }
            count += 1;
        }

        let count = count as f64;
        let (mean, scale) = sum
            .iter()
            .zip(sum_sq.iter())
            .map(|(s, sq)| {
                let mean = s / count;
                let variance = (sq / count - mean * mean).max(0.0);
                let std = variance.sqrt();
                let std = if std > f64::EPSILON { std } else { 1.0 };
                (mean as f32, std as f32)
            })
            .unzip();

        Ok(Self { mean, scale })
    }

    pub fn num_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, series: &mut [Vec<Vec<f32>>]) {
        for node in series.iter_mut().flatten() {
            for ((value, mean), scale) in node.iter_mut().zip(&self.mean).zip(&self.scale) {
                *value = (*value - mean) / scale;
            }
        }
    }

    /// Maps a flattened `[.., .., nodes * width]` tensor back to physical
    /// units using the first `width` features of the scaler.
    pub fn inverse_transform<B: Backend>(&self, x: Tensor<B, 3>, width: usize) -> Result<Tensor<B, 3>> {
        let [a, b, c] = x.dims();
        if width == 0 || width > self.num_features() || c % width != 0 {
            return Err(HarnessError::shape(
                "inverse transform",
                format!("multiple of {width} (<= {} features)", self.num_features()),
                c,
            ));
        }

        let device = x.device();
        let mean = self.feature_tensor::<B>(&self.mean[..width], &device);
        let scale = self.feature_tensor::<B>(&self.scale[..width], &device);

        let x = x.reshape([a, b, c / width, width]);
        let x = x * scale + mean;

        Ok(x.reshape([a, b, c]))
    }

    fn feature_tensor<B: Backend>(&self, values: &[f32], device: &B::Device) -> Tensor<B, 4> {
        let data = Data::new(values.to_vec(), Shape::new([1, 1, 1, values.len()]));
        let tensor: Tensor<B, 4> = Tensor::from_data(data.convert());
        tensor.to_device(device)
    }
}
