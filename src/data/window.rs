use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::data::batchitem::Batch;
use crate::error::{HarnessError, Result};

/// One sliding window of a normalized series, flattened row-major.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WindowItem {
    pub inputs: Vec<f32>,  // [T * N * F]
    pub targets: Vec<f32>, // [H * N * F]
}

/// Cuts `series` (`[time][node][feature]`) into every window of `seq_len`
/// input steps followed by `horizon` target steps.
pub fn sliding_windows(
    series: &[Vec<Vec<f32>>],
    seq_len: usize,
    horizon: usize,
) -> Result<Vec<WindowItem>> {
    let total_len = seq_len + horizon;
    if series.len() < total_len {
        return Err(HarnessError::Data(format!(
            "series of {} steps is shorter than one window of {total_len}",
            series.len()
        )));
    }

    let flatten = |steps: &[Vec<Vec<f32>>]| -> Vec<f32> {
        steps.iter().flatten().flatten().copied().collect()
    };

    Ok((0..=series.len() - total_len)
        .map(|start| WindowItem {
            inputs: flatten(&series[start..start + seq_len]),
            targets: flatten(&series[start + seq_len..start + total_len]),
        })
        .collect())
}

pub struct WindowBatcher<B: Backend> {
    device: B::Device,
    seq_len: usize,
    horizon: usize,
    num_nodes: usize,
    num_features: usize,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(
        device: B::Device,
        seq_len: usize,
        horizon: usize,
        num_nodes: usize,
        num_features: usize,
    ) -> Self {
        Self {
            device,
            seq_len,
            horizon,
            num_nodes,
            num_features,
        }
    }

    fn stack(&self, values: Vec<f32>, batch_size: usize, steps: usize) -> Tensor<B, 4> {
        let data = Data::new(
            values,
            Shape::new([batch_size, steps, self.num_nodes, self.num_features]),
        );
        let tensor: Tensor<B, 4> = Tensor::from_data(data.convert());
        tensor.to_device(&self.device)
    }
}

impl<B: Backend> Batcher<WindowItem, Batch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<WindowItem>) -> Batch<B> {
        let batch_size = items.len();

        let (inputs, targets): (Vec<Vec<f32>>, Vec<Vec<f32>>) = items
            .into_iter()
            .map(|item| (item.inputs, item.targets))
            .unzip();

        Batch {
            inputs: self.stack(inputs.concat(), batch_size, self.seq_len),
            targets: self.stack(targets.concat(), batch_size, self.horizon),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn series(steps: usize) -> Vec<Vec<Vec<f32>>> {
        (0..steps)
            .map(|t| vec![vec![t as f32], vec![100.0 + t as f32]])
            .collect()
    }

    #[test]
    fn windows_cover_every_start() {
        let windows = sliding_windows(&series(6), 3, 1).unwrap();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].inputs, vec![1.0, 101.0, 2.0, 102.0, 3.0, 103.0]);
        assert_eq!(windows[1].targets, vec![4.0, 104.0]);
    }

    #[test]
    fn short_series_is_rejected() {
        assert!(sliding_windows(&series(3), 3, 1).is_err());
    }

    #[test]
    fn batcher_stacks_batch_major() {
        let windows = sliding_windows(&series(6), 3, 1).unwrap();
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 3, 1, 2, 1);

        let batch = batcher.batch(windows[..2].to_vec());

        assert_eq!(batch.inputs.dims(), [2, 3, 2, 1]);
        assert_eq!(batch.targets.dims(), [2, 1, 2, 1]);
        let targets = batch.targets.into_data().convert::<f32>().value;
        assert_eq!(targets, vec![3.0, 103.0, 4.0, 104.0]);
    }
}
