use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use crate::model::{ForecastModel, ForecastOutput};

/// Direct multi-horizon linear map from the flattened input window.
#[derive(Module, Debug)]
pub struct LinearForecaster<B: Backend> {
    num_nodes: usize,
    seq_len: usize,
    horizon: usize,
    input_width: usize,
    output_dim: usize,
    proj: Linear<B>,
    aux_proj: Option<Linear<B>>,
}

impl<B: Backend> ForecastModel<B> for LinearForecaster<B> {
    fn forward(&self, input: Tensor<B, 3>, aux: Option<Tensor<B, 3>>) -> ForecastOutput<B> {
        let [seq_len, batch_size, _] = input.dims();
        let n = self.num_nodes;

        let x = input
            .swap_dims(0, 1)
            .reshape([batch_size, seq_len * n * self.input_width]);
        let mut y = self.proj.forward(x);

        if let (Some(aux_proj), Some(aux)) = (&self.aux_proj, aux) {
            let [horizon, _, aux_len] = aux.dims();
            let aux = aux.swap_dims(0, 1).reshape([batch_size, horizon * aux_len]);
            y = y + aux_proj.forward(aux);
        }

        let prediction = y
            .reshape([batch_size, self.horizon, n * self.output_dim])
            .swap_dims(0, 1);

        ForecastOutput::new(prediction)
    }

    fn setting(&self) -> String {
        format!("linear_seq{}_hor{}", self.seq_len, self.horizon)
    }
}

#[derive(Config, Debug)]
pub struct LinearForecasterConfig {
    num_nodes: usize,
    seq_len: usize,
    horizon: usize,
    input_width: usize,
    output_dim: usize,

    /// Auxiliary embedding channels per node; 0 disables the auxiliary input.
    #[config(default = 0)]
    aux_width: usize,
}

impl LinearForecasterConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearForecaster<B> {
        let n = self.num_nodes;
        let proj = LinearConfig::new(
            self.seq_len * n * self.input_width,
            self.horizon * n * self.output_dim,
        )
        .init();

        let aux_proj = if self.aux_width > 0 {
            Some(
                LinearConfig::new(
                    self.horizon * n * self.aux_width,
                    self.horizon * n * self.output_dim,
                )
                .with_bias(false)
                .init(),
            )
        } else {
            None
        };

        LinearForecaster {
            num_nodes: n,
            seq_len: self.seq_len,
            horizon: self.horizon,
            input_width: self.input_width,
            output_dim: self.output_dim,
            proj,
            aux_proj,
        }
        .to_device(device)
    }
}
