use burn::tensor::{backend::Backend, Data, Int, Shape, Tensor};

use crate::config::ExperimentConfig;
use crate::data::Batch;
use crate::error::{HarnessError, Result};

/// Time-major tensors in the layout the models consume.
#[derive(Clone, Debug)]
pub struct Reshaped<B: Backend> {
    pub inputs: Tensor<B, 3>,      // [T, B, N * W_in]
    pub targets: Tensor<B, 3>,     // [H, B, N * W_out]
    pub aux: Option<Tensor<B, 3>>, // [H, B, N * |aux_features|]
}

#[derive(Debug, Clone)]
pub struct DataReshaper {
    num_nodes: usize,
    seq_len: usize,
    horizon: usize,
    input_dim: usize,
    output_dim: usize,
    embed: bool,
    aux_features: Vec<usize>,
}

impl DataReshaper {
    pub fn new(config: &ExperimentConfig, num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seq_len: config.model.seq_len,
            horizon: config.model.horizon,
            input_dim: config.model.input_dim,
            output_dim: config.model.output_dim,
            embed: config.data.embed,
            aux_features: config.data.aux_features.clone(),
        }
    }

    pub fn input_width(&self) -> usize {
        if self.embed {
            self.input_dim + 1
        } else {
            self.input_dim
        }
    }

    pub fn reshape<B: Backend>(&self, batch: Batch<B>) -> Result<Reshaped<B>> {
        let [batch_size, seq_len, num_nodes, x_features] = batch.inputs.dims();
        let [y_batch, horizon, y_nodes, y_features] = batch.targets.dims();

        self.check_layout(
            "input batch",
            [batch_size, seq_len, num_nodes],
            [batch_size, self.seq_len, self.num_nodes],
        )?;
        self.check_layout(
            "target batch",
            [y_batch, horizon, y_nodes],
            [batch_size, self.horizon, self.num_nodes],
        )?;
        if self.input_dim > x_features {
            return Err(HarnessError::shape("input features", format!(">= {}", self.input_dim), x_features));
        }
        if self.output_dim > y_features {
            return Err(HarnessError::shape("target features", format!(">= {}", self.output_dim), y_features));
        }

        let n = self.num_nodes;
        let x = batch.inputs.swap_dims(0, 1); // [T, B, N, F]
        let y = batch.targets.swap_dims(0, 1); // [H, B, N, F]
        let x = x.slice([0..self.seq_len, 0..batch_size, 0..n, 0..self.input_dim]);

        if !self.embed {
            let targets = y.slice([0..self.horizon, 0..batch_size, 0..n, 0..self.output_dim]);

            return Ok(Reshaped {
                inputs: x.reshape([self.seq_len, batch_size, n * self.input_dim]),
                targets: targets.reshape([self.horizon, batch_size, n * self.output_dim]),
                aux: None,
            });
        }

        let device = y.device();
        let width = y_features + 1;
        if let Some(index) = self.aux_features.iter().find(|index| **index >= width) {
            return Err(HarnessError::shape(
                "auxiliary embedding index",
                format!("< {width}"),
                index,
            ));
        }

        let x = Tensor::cat(
            vec![x, self.node_identity(self.seq_len, batch_size, &device)],
            3,
        );
        let y = Tensor::cat(
            vec![y, self.node_identity(self.horizon, batch_size, &device)],
            3,
        );

        let aux_index = Data::new(
            self.aux_features.iter().map(|index| *index as i64).collect(),
            Shape::new([self.aux_features.len()]),
        );
        let aux_index: Tensor<B, 1, Int> = Tensor::from_data(aux_index.convert());
        let aux = y
            .clone()
            .select(3, aux_index.to_device(&device))
            .reshape([self.horizon, batch_size, n * self.aux_features.len()]);

        let targets = y.slice([0..self.horizon, 0..batch_size, 0..n, 0..self.output_dim]);

        Ok(Reshaped {
            inputs: x.reshape([self.seq_len, batch_size, n * self.input_width()]),
            targets: targets.reshape([self.horizon, batch_size, n * self.output_dim]),
            aux: Some(aux),
        })
    }

    /// First feature channel of reshaped inputs, `[T, B, N]`.
    pub fn first_input_channel<B: Backend>(&self, inputs: Tensor<B, 3>) -> Tensor<B, 3> {
        let [steps, batch_size, _] = inputs.dims();
        let n = self.num_nodes;

        inputs
            .reshape([steps, batch_size, n, self.input_width()])
            .slice([0..steps, 0..batch_size, 0..n, 0..1])
            .reshape([steps, batch_size, n])
    }

    /// Node index broadcast over time and batch, `[steps, B, N, 1]`.
    fn node_identity<B: Backend>(
        &self,
        steps: usize,
        batch_size: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let n = self.num_nodes;
        let data = Data::new(
            (0..n).map(|node| node as f32).collect(),
            Shape::new([1, 1, n, 1]),
        );
        let ids: Tensor<B, 4> = Tensor::from_data(data.convert());

        ids.to_device(device).repeat(0, steps).repeat(1, batch_size)
    }

    fn check_layout(&self, context: &'static str, found: [usize; 3], expected: [usize; 3]) -> Result<()> {
        if found != expected {
            return Err(HarnessError::shape(
                context,
                format!("[batch, steps, nodes] = {expected:?}"),
                format!("{found:?}"),
            ));
        }
        Ok(())
    }
}
